use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

/// One column of a warehouse table, as described by the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub data_type: String,
}

/// One warehouse table's contract. Loaded once per session from the metadata
/// store and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
}

/// Classification of a table by naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableCategory {
    Mart,
    Dimension,
    Fact,
    Metric,
    Staging,
    Other,
}

/// Prefix rules, evaluated in order. First match wins.
const CATEGORY_RULES: &[(&str, TableCategory)] = &[
    ("mart_", TableCategory::Mart),
    ("dim_", TableCategory::Dimension),
    ("fact_", TableCategory::Fact),
    ("metrics_", TableCategory::Metric),
    ("stg_", TableCategory::Staging),
];

/// Classify a table name by prefix convention. Pure and order-independent.
pub fn categorize(name: &str) -> TableCategory {
    let lower = name.to_lowercase();
    for (prefix, category) in CATEGORY_RULES {
        if lower.starts_with(prefix) {
            return *category;
        }
    }
    TableCategory::Other
}

/// Serializable allow-list for consumption by a separate validator process.
/// Regenerable deterministically from the same schema store.
#[derive(Debug, Clone, Serialize)]
pub struct AllowListArtifact {
    pub tables: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum SchemaError {
    /// The metadata store directory is missing or holds no readable entries.
    StoreUnavailable(String),
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::StoreUnavailable(msg) => {
                write!(f, "schema store unavailable: {}", msg)
            }
        }
    }
}

impl Error for SchemaError {}

/// On-disk shape of one schema group file (marts.json, dimensions.json, ...).
/// Entries are kept as raw values so one malformed record can be skipped
/// without discarding the rest of the file.
#[derive(Debug, Deserialize)]
struct SchemaGroupFile {
    #[serde(default)]
    models: Vec<serde_json::Value>,
}

/// Indexed table/column metadata for the queryable warehouse. Tables are kept
/// in name order so every derived artifact (prompt context, allow-list) is
/// deterministic for identical input.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaCatalog {
    /// Load every `*.json` group file under `dir`. A malformed file or entry
    /// is skipped with a warning; the load only fails when the store itself
    /// is unreachable or yields nothing usable.
    pub fn load(dir: &Path) -> Result<Self, SchemaError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| SchemaError::StoreUnavailable(format!("{}: {}", dir.display(), e)))?;

        let mut tables = BTreeMap::new();
        let mut files_seen = 0usize;

        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            files_seen += 1;

            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Skipping unreadable schema file {}: {}", path.display(), e);
                    continue;
                }
            };

            let group: SchemaGroupFile = match serde_json::from_str(&text) {
                Ok(group) => group,
                Err(e) => {
                    warn!("Skipping malformed schema file {}: {}", path.display(), e);
                    continue;
                }
            };

            for model in group.models {
                match serde_json::from_value::<TableSchema>(model) {
                    Ok(table) if !table.name.trim().is_empty() => {
                        tables.insert(table.name.clone(), table);
                    }
                    Ok(_) => warn!("Skipping schema entry without a name in {}", path.display()),
                    Err(e) => warn!("Skipping malformed schema entry in {}: {}", path.display(), e),
                }
            }
        }

        if tables.is_empty() {
            return Err(SchemaError::StoreUnavailable(format!(
                "no usable table definitions under {} ({} files scanned)",
                dir.display(),
                files_seen
            )));
        }

        info!("Loaded {} table definitions from {}", tables.len(), dir.display());
        Ok(Self { tables })
    }

    /// Minimal hard-coded catalog used when the metadata store is absent.
    /// Covers the primary mart tables so the assistant stays usable.
    pub fn fallback() -> Self {
        let minimal = [
            (
                "mart_sales",
                "Main sales mart with customer, product, territory and rep dimensions pre-joined.",
                vec![
                    ("order_date", "DATE", "Order date"),
                    ("order_year", "INTEGER", "Order year"),
                    ("order_month", "INTEGER", "Order month"),
                    ("customer_name", "VARCHAR", "Customer name"),
                    ("customer_segment", "VARCHAR", "High/Medium/Low Value"),
                    ("product_name", "VARCHAR", "Product name"),
                    ("category_name", "VARCHAR", "Product category"),
                    ("territory_name", "VARCHAR", "Sales territory"),
                    ("order_total", "DECIMAL", "Order amount"),
                    ("total_profit", "DECIMAL", "Order profit"),
                ],
            ),
            (
                "mart_customer_analytics",
                "Customer analytics with lifetime value, RFM scoring and churn prediction.",
                vec![
                    ("customer_name", "VARCHAR", "Customer name"),
                    ("customer_segment", "VARCHAR", "Value segment"),
                    ("lifetime_value", "DECIMAL", "Customer lifetime value"),
                    ("order_count", "INTEGER", "Orders placed"),
                    ("avg_order_value", "DECIMAL", "Average order value"),
                    ("days_since_last_order", "INTEGER", "Recency in days"),
                    ("rfm_segment", "VARCHAR", "RFM segment label"),
                    ("churn_risk", "VARCHAR", "High/Medium/Low"),
                ],
            ),
            (
                "mart_product_analytics",
                "Product performance with profitability and inventory metrics.",
                vec![
                    ("product_name", "VARCHAR", "Product name"),
                    ("category_name", "VARCHAR", "Product category"),
                    ("total_revenue", "DECIMAL", "Revenue to date"),
                    ("total_quantity_sold", "INTEGER", "Units sold"),
                    ("profit_margin_percent", "DECIMAL", "Profit margin"),
                    ("current_inventory", "INTEGER", "Units on hand"),
                ],
            ),
            (
                "mart_operations",
                "Purchase orders and work orders with vendor and quality metrics.",
                vec![
                    ("operation_type", "VARCHAR", "purchase_order or work_order"),
                    ("operation_date", "DATE", "Operation date"),
                    ("vendor_name", "VARCHAR", "Vendor (for POs)"),
                    ("product_name", "VARCHAR", "Product"),
                    ("total_amount", "DECIMAL", "Operation amount"),
                    ("rejection_rate_percent", "DECIMAL", "Rejected share"),
                ],
            ),
            (
                "mart_employee_territory_performance",
                "Employee and territory performance with quota tracking.",
                vec![
                    ("performance_type", "VARCHAR", "employee or territory"),
                    ("performance_name", "VARCHAR", "Employee or territory name"),
                    ("monthly_revenue", "DECIMAL", "Revenue for the month"),
                    ("quota_amount", "DECIMAL", "Quota for the period"),
                    ("quota_achievement_percent", "DECIMAL", "Quota attainment"),
                ],
            ),
        ];

        let mut tables = BTreeMap::new();
        for (name, description, columns) in minimal {
            tables.insert(
                name.to_string(),
                TableSchema {
                    name: name.to_string(),
                    description: description.to_string(),
                    columns: columns
                        .into_iter()
                        .map(|(name, data_type, description)| ColumnSchema {
                            name: name.to_string(),
                            data_type: data_type.to_string(),
                            description: description.to_string(),
                        })
                        .collect(),
                },
            );
        }
        Self { tables }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// The set of table names generated SQL may reference: marts, dimensions
    /// and facts. Staging and metric-intermediate tables are excluded.
    pub fn allowed_tables(&self) -> Vec<String> {
        self.tables
            .keys()
            .filter(|name| {
                matches!(
                    categorize(name),
                    TableCategory::Mart | TableCategory::Dimension | TableCategory::Fact
                )
            })
            .cloned()
            .collect()
    }

    pub fn allow_list_artifact(&self) -> AllowListArtifact {
        AllowListArtifact {
            tables: self.allowed_tables(),
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorize_follows_prefix_rules() {
        assert_eq!(categorize("mart_sales"), TableCategory::Mart);
        assert_eq!(categorize("dim_customer"), TableCategory::Dimension);
        assert_eq!(categorize("fact_sales_order"), TableCategory::Fact);
        assert_eq!(categorize("metrics_daily"), TableCategory::Metric);
        assert_eq!(categorize("stg_orders"), TableCategory::Staging);
        assert_eq!(categorize("raw_dump"), TableCategory::Other);
        // case-insensitive on input
        assert_eq!(categorize("MART_SALES"), TableCategory::Mart);
    }

    #[test]
    fn allowed_tables_excludes_staging_and_metrics() {
        let mut tables = BTreeMap::new();
        for name in [
            "mart_sales",
            "dim_customer",
            "fact_inventory",
            "stg_orders",
            "metrics_rollup",
            "scratch",
        ] {
            tables.insert(
                name.to_string(),
                TableSchema {
                    name: name.to_string(),
                    description: String::new(),
                    columns: Vec::new(),
                },
            );
        }
        let catalog = SchemaCatalog { tables };

        let allowed = catalog.allowed_tables();
        assert_eq!(allowed, vec!["dim_customer", "fact_inventory", "mart_sales"]);
    }

    #[test]
    fn allowed_tables_is_sorted_and_stable() {
        let catalog = SchemaCatalog::fallback();
        let first = catalog.allowed_tables();
        let second = catalog.allowed_tables();
        assert_eq!(first, second);
        let mut sorted = first.clone();
        sorted.sort();
        assert_eq!(first, sorted);
    }

    #[test]
    fn fallback_covers_primary_marts() {
        let catalog = SchemaCatalog::fallback();
        assert!(catalog.get("mart_sales").is_some());
        assert!(catalog.get("mart_customer_analytics").is_some());
        assert_eq!(catalog.len(), 5);
    }

    #[test]
    fn load_skips_malformed_entries() {
        let dir = std::env::temp_dir().join(format!("nlmart-schema-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("marts.json"),
            r#"{"models": [
                {"name": "mart_sales", "description": "sales", "columns": []},
                {"description": "entry without a name"},
                42
            ]}"#,
        )
        .unwrap();
        std::fs::write(dir.join("broken.json"), "not json at all").unwrap();

        let catalog = SchemaCatalog::load(&dir).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("mart_sales").is_some());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn load_fails_when_store_is_missing() {
        let missing = Path::new("/definitely/not/a/real/schema/store");
        assert!(matches!(
            SchemaCatalog::load(missing),
            Err(SchemaError::StoreUnavailable(_))
        ));
    }
}
