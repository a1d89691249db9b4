use crate::frame::{cell_number, cell_text, ResultFrame};
use crate::viz::format_thousands;
use serde_json::Value;

/// Extended vocabularies for table display. Broader than the chart vocab so
/// pay rates, CLV and freight columns also pick up currency formatting.
const DISPLAY_CURRENCY: &[&str] = &[
    "revenue", "price", "cost", "value", "clv", "amount", "total", "profit", "pay", "sales",
    "purchase", "lifetime_value", "order_total", "line_amount", "subtotal", "freight",
];
const DISPLAY_PERCENT: &[&str] = &[
    "percent", "percentage", "%", "achievement", "scrap rate", "rejection rate",
    "fulfillment rate", "discount", "turnover ratio",
];

/// Render a formatted copy of the frame for table display: currency with a
/// dollar sign, percentages with a percent sign, everything numeric with
/// thousands separators and no decimals. Non-numeric cells pass through;
/// nulls become empty text. The source frame is never mutated.
pub fn format_for_display(frame: &ResultFrame) -> ResultFrame {
    let styles: Vec<CellStyle> = frame.columns.iter().map(|name| column_style(name)).collect();

    let rows = frame
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(i, cell)| Value::String(format_cell(cell, styles[i])))
                .collect()
        })
        .collect();

    ResultFrame {
        columns: frame.columns.clone(),
        rows,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellStyle {
    Currency,
    Percent,
    Plain,
}

fn column_style(name: &str) -> CellStyle {
    let lower = name.to_lowercase();

    // A percent sign in the name always wins, then currency, then percent
    // vocabulary, so "pay rate" stays currency and "scrap rate" stays percent.
    if lower.contains('%') {
        return CellStyle::Percent;
    }
    if DISPLAY_CURRENCY.iter().any(|p| lower.contains(p)) {
        return CellStyle::Currency;
    }
    if DISPLAY_PERCENT.iter().any(|p| lower.contains(p)) {
        return CellStyle::Percent;
    }
    CellStyle::Plain
}

fn format_cell(cell: &Value, style: CellStyle) -> String {
    let Some(number) = cell_number(cell) else {
        return cell_text(cell);
    };

    match style {
        CellStyle::Currency => format!("${}", format_thousands(number, 0)),
        CellStyle::Percent => format!("{}%", format_thousands(number, 0)),
        CellStyle::Plain => format_thousands(number, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn currency_percent_and_count_columns_are_styled() {
        let frame = ResultFrame {
            columns: vec![
                "territory_name".to_string(),
                "total_revenue".to_string(),
                "rejection_rate_percent".to_string(),
                "order_count".to_string(),
            ],
            rows: vec![vec![
                json!("North America"),
                json!(1234567.2),
                json!(12.6),
                json!(4321),
            ]],
        };

        let formatted = format_for_display(&frame);
        let row = &formatted.rows[0];
        assert_eq!(row[0], json!("North America"));
        assert_eq!(row[1], json!("$1,234,567"));
        assert_eq!(row[2], json!("13%"));
        assert_eq!(row[3], json!("4,321"));
    }

    #[test]
    fn nulls_render_as_empty_text() {
        let frame = ResultFrame {
            columns: vec!["total_revenue".to_string()],
            rows: vec![vec![Value::Null]],
        };
        assert_eq!(format_for_display(&frame).rows[0][0], json!(""));
    }

    #[test]
    fn source_frame_is_untouched() {
        let frame = ResultFrame {
            columns: vec!["total_revenue".to_string()],
            rows: vec![vec![json!(10.0)]],
        };
        let _ = format_for_display(&frame);
        assert_eq!(frame.rows[0][0], json!(10.0));
    }
}
