use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;

/// The tabular result of a successful query: ordered named columns and rows
/// of JSON-typed cells. Produced by the database executor, consumed by the
/// visualizer and display code. Never mutated in place; presentation derives
/// formatted copies.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultFrame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultFrame {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Iterate the cells of one column, top to bottom.
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().filter_map(move |row| row.get(index))
    }

    /// A copy of the frame with rows ordered ascending by the named column.
    /// Numbers compare numerically, everything else compares as text, nulls
    /// sort first. Used when a time-series presentation needs the date axis
    /// in order.
    pub fn sorted_by(&self, column: &str) -> ResultFrame {
        let Some(index) = self.column_index(column) else {
            return self.clone();
        };

        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| compare_cells(a.get(index), b.get(index)));

        ResultFrame {
            columns: self.columns.clone(),
            rows,
        }
    }

    /// Render up to `max_rows` rows as a compact markdown table. Used to give
    /// the narrative-analysis prompt a bounded sample of the result.
    pub fn sample_markdown(&self, max_rows: usize) -> String {
        if self.columns.is_empty() {
            return String::new();
        }

        let mut out = format!("| {} |\n", self.columns.join(" | "));
        out.push_str("| ");
        for _ in &self.columns {
            out.push_str("--- | ");
        }
        out.push('\n');

        for row in self.rows.iter().take(max_rows) {
            out.push_str("| ");
            for cell in row {
                out.push_str(&cell_text(cell));
                out.push_str(" | ");
            }
            out.push('\n');
        }

        if self.rows.len() > max_rows {
            out.push_str(&format!("({} more rows)\n", self.rows.len() - max_rows));
        }

        out
    }
}

/// Plain-text rendition of a cell, with nulls shown as empty text.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numeric view of a cell. Numbers pass through; strings that parse as
/// numbers count too, since decimal columns arrive as text.
pub fn cell_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn compare_cells(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            if a.is_null() || b.is_null() {
                return a.is_null().cmp(&b.is_null()).reverse();
            }
            match (cell_number(a), cell_number(b)) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => cell_text(a).cmp(&cell_text(b)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame() -> ResultFrame {
        ResultFrame {
            columns: vec!["order_month".to_string(), "revenue".to_string()],
            rows: vec![
                vec![json!(3), json!(120.0)],
                vec![json!(1), json!(80.0)],
                vec![json!(2), json!(95.5)],
            ],
        }
    }

    #[test]
    fn sorted_by_orders_numerically() {
        let sorted = frame().sorted_by("order_month");
        let months: Vec<i64> = sorted
            .rows
            .iter()
            .map(|r| r[0].as_i64().unwrap())
            .collect();
        assert_eq!(months, vec![1, 2, 3]);
    }

    #[test]
    fn sorted_by_unknown_column_is_unchanged() {
        let sorted = frame().sorted_by("missing");
        assert_eq!(sorted.rows[0][0], json!(3));
    }

    #[test]
    fn sample_markdown_caps_rows() {
        let md = frame().sample_markdown(2);
        assert!(md.starts_with("| order_month | revenue |"));
        assert!(md.contains("(1 more rows)"));
    }

    #[test]
    fn cell_number_parses_numeric_text() {
        assert_eq!(cell_number(&json!("42.5")), Some(42.5));
        assert_eq!(cell_number(&json!(7)), Some(7.0));
        assert_eq!(cell_number(&json!("North")), None);
        assert_eq!(cell_number(&Value::Null), None);
    }
}
