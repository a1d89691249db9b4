pub mod display;

use crate::frame::{cell_number, cell_text, ResultFrame};
use serde::Serialize;
use std::collections::HashSet;

/// Column-name vocabularies used to infer semantic roles. Matching is
/// substring, case-insensitive, on the raw column name.
pub const CURRENCY_VOCAB: &[&str] = &[
    "revenue", "sales", "amount", "value", "cost", "price", "profit", "total", "sum", "avg_order",
    "lifetime",
];
pub const DATE_VOCAB: &[&str] = &["date", "year", "month", "quarter", "day", "week", "period"];
pub const CATEGORY_VOCAB: &[&str] = &[
    "name", "category", "segment", "status", "type", "group", "territory", "region", "country",
];
pub const COUNT_VOCAB: &[&str] = &[
    "count", "quantity", "qty", "number", "orders", "customers", "products",
];
pub const PERCENT_VOCAB: &[&str] = &["percent", "rate", "ratio", "pct", "%", "achievement"];

/// Categories at or below this count render as a proportion chart; above it,
/// a ranked bar.
const PROPORTION_MAX_CATEGORIES: usize = 8;
/// Ranked bars are capped to this many entries.
const RANKED_BAR_CAP: usize = 20;
/// A scatter gains a trend overlay past this row count.
const TREND_MIN_ROWS: usize = 10;
/// Columns with more distinct values than this are not categorical.
const MAX_CATEGORY_CARDINALITY: usize = 50;

fn matches_vocab(name: &str, vocab: &[&str]) -> bool {
    let lower = name.to_lowercase();
    vocab.iter().any(|pattern| lower.contains(pattern))
}

/// Temporal naming is matched on whole name tokens (plus plural forms) so a
/// measure like `monthly_revenue` is not mistaken for a time axis.
fn matches_date_vocab(name: &str) -> bool {
    name.to_lowercase().split('_').any(|token| {
        DATE_VOCAB
            .iter()
            .any(|v| token == *v || token.strip_suffix('s') == Some(*v))
    })
}

/// A column is date-like when its name is temporal or every non-null cell
/// parses as a date or timestamp (date-typed columns arrive as text).
fn is_date_like_column(frame: &ResultFrame, index: usize, name: &str) -> bool {
    if matches_date_vocab(name) {
        return true;
    }

    let mut any = false;
    for value in frame.column_values(index) {
        if value.is_null() {
            continue;
        }
        let Some(text) = value.as_str() else {
            return false;
        };
        if chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d").is_err()
            && chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").is_err()
        {
            return false;
        }
        any = true;
    }
    any
}

/// Inferred semantic role of a column. One role per column: temporal naming
/// wins over numeric content (a year column charts as time, not magnitude),
/// and the numeric test runs before the categorical one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    DateLike,
    Numeric,
    Categorical,
    Other,
}

/// The presentation decision for a result frame: a chart role with its axis
/// bindings, or a table/metric verdict. Computed fresh per frame, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "chart", rename_all = "snake_case")]
pub enum ChartDecision {
    NoData,
    ScalarMetric,
    TimeSeries {
        date_column: String,
        value_column: String,
        currency_axis: bool,
    },
    Proportion {
        category_column: String,
        value_column: String,
    },
    RankedBar {
        category_column: String,
        value_column: String,
        top_n: usize,
        currency_axis: bool,
    },
    Scatter {
        x_column: String,
        y_column: String,
        with_trend: bool,
    },
    GroupedBars {
        axis_column: String,
        series_column: String,
    },
    Table,
}

impl ChartDecision {
    pub fn describe(&self) -> &'static str {
        match self {
            ChartDecision::NoData => "No data to visualize",
            ChartDecision::ScalarMetric => "Single value result - displayed as metric",
            ChartDecision::TimeSeries { .. } => "Time series line chart",
            ChartDecision::Proportion { .. } => "Proportion chart",
            ChartDecision::RankedBar { .. } => "Horizontal bar chart",
            ChartDecision::Scatter { .. } => "Scatter plot",
            ChartDecision::GroupedBars { .. } => "Grouped bar chart",
            ChartDecision::Table => "Best displayed as table",
        }
    }
}

/// Classify every column of the frame. Deterministic for identical input.
pub fn classify_columns(frame: &ResultFrame) -> Vec<ColumnRole> {
    frame
        .columns
        .iter()
        .enumerate()
        .map(|(index, name)| {
            if is_date_like_column(frame, index, name) {
                ColumnRole::DateLike
            } else if is_numeric_column(frame, index) {
                ColumnRole::Numeric
            } else if distinct_count(frame, index) <= MAX_CATEGORY_CARDINALITY
                || matches_vocab(name, CATEGORY_VOCAB)
            {
                ColumnRole::Categorical
            } else {
                ColumnRole::Other
            }
        })
        .collect()
}

/// Pick the best presentation for an arbitrary result frame. The question is
/// accepted for interface symmetry with the generator but the decision runs
/// purely on the shape of the data.
pub fn analyze_and_visualize(frame: &ResultFrame, _question: &str) -> ChartDecision {
    if frame.is_empty() || frame.column_count() == 0 {
        return ChartDecision::NoData;
    }

    if frame.row_count() == 1 && frame.column_count() == 1 {
        return ChartDecision::ScalarMetric;
    }

    let roles = classify_columns(frame);
    let first_of = |role: ColumnRole| {
        roles
            .iter()
            .position(|r| *r == role)
            .map(|i| frame.columns[i].clone())
    };
    let count_of = |role: ColumnRole| roles.iter().filter(|r| **r == role).count();

    let date_column = first_of(ColumnRole::DateLike);
    let numeric_column = first_of(ColumnRole::Numeric);
    let categorical_column = first_of(ColumnRole::Categorical);

    // Decision table, first match wins.
    if let (Some(date_column), Some(value_column)) = (date_column, numeric_column.clone()) {
        let currency_axis = matches_vocab(&value_column, CURRENCY_VOCAB);
        return ChartDecision::TimeSeries {
            date_column,
            value_column,
            currency_axis,
        };
    }

    if let (Some(category_column), Some(value_column)) =
        (categorical_column.clone(), numeric_column)
    {
        let index = frame.column_index(&category_column).unwrap_or(0);
        if distinct_count(frame, index) <= PROPORTION_MAX_CATEGORIES {
            return ChartDecision::Proportion {
                category_column,
                value_column,
            };
        }
        let currency_axis = matches_vocab(&value_column, CURRENCY_VOCAB);
        return ChartDecision::RankedBar {
            category_column,
            value_column,
            top_n: frame.row_count().min(RANKED_BAR_CAP),
            currency_axis,
        };
    }

    if count_of(ColumnRole::Numeric) >= 2 {
        let numeric: Vec<&String> = frame
            .columns
            .iter()
            .zip(&roles)
            .filter(|(_, role)| **role == ColumnRole::Numeric)
            .map(|(name, _)| name)
            .collect();
        return ChartDecision::Scatter {
            x_column: numeric[0].clone(),
            y_column: numeric[1].clone(),
            with_trend: frame.row_count() > TREND_MIN_ROWS,
        };
    }

    if count_of(ColumnRole::Categorical) >= 2 {
        let categorical: Vec<&String> = frame
            .columns
            .iter()
            .zip(&roles)
            .filter(|(_, role)| **role == ColumnRole::Categorical)
            .map(|(name, _)| name)
            .collect();
        return ChartDecision::GroupedBars {
            axis_column: categorical[0].clone(),
            series_column: categorical[1].clone(),
        };
    }

    ChartDecision::Table
}

/// A formatted scalar for single-row results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricCard {
    pub label: String,
    pub value: String,
}

/// Format each column of a single-row frame as a metric card. Frames with
/// any other shape yield nothing.
pub fn create_metric_cards(frame: &ResultFrame) -> Vec<MetricCard> {
    if frame.row_count() != 1 {
        return Vec::new();
    }

    let row = &frame.rows[0];
    frame
        .columns
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let value = row.get(index).cloned().unwrap_or(serde_json::Value::Null);
            let formatted = if let Some(number) = cell_number(&value) {
                if matches_vocab(name, CURRENCY_VOCAB) {
                    format!("${}", format_thousands(number, 2))
                } else if matches_vocab(name, PERCENT_VOCAB) {
                    format!("{}%", format_thousands(number, 1))
                } else if matches_vocab(name, COUNT_VOCAB) {
                    format_thousands(number.trunc(), 0)
                } else {
                    format_thousands(number, 2)
                }
            } else if value.is_null() {
                "N/A".to_string()
            } else {
                cell_text(&value)
            };

            MetricCard {
                label: humanize_label(name),
                value: formatted,
            }
        })
        .collect()
}

/// Distinct textual values in a column.
pub fn distinct_count(frame: &ResultFrame, index: usize) -> usize {
    frame
        .column_values(index)
        .map(cell_text)
        .collect::<HashSet<_>>()
        .len()
}

/// Every non-null cell parses as a number, and at least one cell is non-null.
fn is_numeric_column(frame: &ResultFrame, index: usize) -> bool {
    let mut any = false;
    for value in frame.column_values(index) {
        if value.is_null() {
            continue;
        }
        if cell_number(value).is_none() {
            return false;
        }
        any = true;
    }
    any
}

/// Abbreviations expanded in axis labels and card titles. Applied word-wise
/// after title-casing so longer words are never corrupted.
const LABEL_ABBREVIATIONS: &[(&str, &str)] = &[
    ("Qty", "Quantity"),
    ("Pct", "Percent"),
    ("Amt", "Amount"),
    ("Num", "Number"),
    ("Avg", "Average"),
    ("Ytd", "YTD"),
    ("Mtd", "MTD"),
    ("Yoy", "YoY"),
    ("Id", "ID"),
];

/// Humanize a column name for labels only: underscores to spaces, title
/// case, then the abbreviation table. The underlying data is never touched.
pub fn humanize_label(column_name: &str) -> String {
    column_name
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            let titled = match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            };
            LABEL_ABBREVIATIONS
                .iter()
                .find(|(abbr, _)| *abbr == titled)
                .map(|(_, full)| (*full).to_string())
                .unwrap_or(titled)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Thousands-separated fixed-point rendition of a number.
pub fn format_thousands(value: f64, decimals: usize) -> String {
    let negative = value < 0.0;
    let formatted = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (formatted.as_str(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&grouped);
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(frac);
    }
    out
}
