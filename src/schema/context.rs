use crate::schema::catalog::{categorize, SchemaCatalog, TableCategory, TableSchema};
use std::fmt::Write;

/// Fixed few-shot question/SQL pairs embedded in the system prompt to steer
/// output style toward the mart tables.
pub const EXAMPLE_QUERIES: &[(&str, &str)] = &[
    (
        "What is our total revenue by territory?",
        "SELECT territory_name, SUM(order_total) AS total_revenue\n\
         FROM mart_sales\n\
         WHERE territory_name IS NOT NULL\n\
         GROUP BY territory_name\n\
         ORDER BY total_revenue DESC",
    ),
    (
        "Show me the top 10 customers by lifetime value",
        "SELECT customer_name, lifetime_value, customer_segment, order_count\n\
         FROM mart_customer_analytics\n\
         ORDER BY lifetime_value DESC\n\
         LIMIT 10",
    ),
    (
        "What is our monthly revenue trend for 2014?",
        "SELECT order_year, order_month, SUM(order_total) AS monthly_revenue\n\
         FROM mart_sales\n\
         WHERE order_year = 2014\n\
         GROUP BY order_year, order_month\n\
         ORDER BY order_month",
    ),
    (
        "Which products have the highest profit margin?",
        "SELECT product_name, category_name, total_revenue, profit_margin_percent\n\
         FROM mart_product_analytics\n\
         WHERE profit_margin_percent IS NOT NULL\n\
         ORDER BY profit_margin_percent DESC\n\
         LIMIT 10",
    ),
    (
        "Show me customers at risk of churning",
        "SELECT customer_name, lifetime_value, days_since_last_order, churn_risk\n\
         FROM mart_customer_analytics\n\
         WHERE churn_risk = 'High'\n\
         ORDER BY lifetime_value DESC",
    ),
    (
        "What is the average order value by customer segment?",
        "SELECT customer_segment,\n\
         \x20      COUNT(DISTINCT salesorderid) AS order_count,\n\
         \x20      AVG(order_total) AS avg_order_value,\n\
         \x20      SUM(order_total) AS total_revenue\n\
         FROM mart_sales\n\
         WHERE customer_segment IS NOT NULL\n\
         GROUP BY customer_segment\n\
         ORDER BY total_revenue DESC",
    ),
    (
        "Show revenue by product category and year",
        "SELECT category_name, order_year, SUM(net_line_amount) AS revenue\n\
         FROM mart_sales\n\
         WHERE category_name IS NOT NULL\n\
         GROUP BY category_name, order_year\n\
         ORDER BY category_name, order_year",
    ),
];

/// The fixed prefix a model must emit when it cannot answer. The validator
/// surfaces everything after the prefix verbatim as the error.
pub const ERROR_SENTINEL: &str = "-- ERROR:";

const RULES: &str = "\
## Important Rules:
1. ONLY generate SELECT queries - no INSERT, UPDATE, DELETE, DROP, or any DDL
2. Always use table aliases for clarity
3. Use appropriate aggregations (SUM, AVG, COUNT, etc.) for metrics
4. Include ORDER BY for sorted results
5. Use LIMIT for top-N queries (default to 10-20 for large result sets)
6. Handle NULL values appropriately with COALESCE or WHERE filters
7. Use proper date filtering for time-based queries
8. Prefer the mart tables - they are pre-joined and need no manual joins
";

/// Build the complete system prompt for SQL generation: table and column
/// descriptions ordered marts first, the rules, the few-shot examples and the
/// error sentinel contract. Deterministic for identical catalog input.
pub fn build_system_prompt(catalog: &SchemaCatalog) -> String {
    let mut prompt = String::from(
        "You are a SQL expert for a dimensional data warehouse.\n\
         Your job is to convert natural language questions into accurate SQL queries.\n\n\
         ## Database Schema\n\n",
    );

    for (heading, category) in [
        ("### Mart Tables (preferred - pre-joined)", TableCategory::Mart),
        ("### Dimension Tables", TableCategory::Dimension),
        ("### Fact Tables (use marts instead when possible)", TableCategory::Fact),
    ] {
        let tables: Vec<&TableSchema> = catalog
            .tables()
            .filter(|t| categorize(&t.name) == category)
            .collect();
        if tables.is_empty() {
            continue;
        }

        prompt.push_str(heading);
        prompt.push_str("\n\n");
        for table in tables {
            write_table_block(&mut prompt, table);
        }
    }

    prompt.push_str(RULES);
    prompt.push_str("\n## Example Queries:\n\n");
    for (question, sql) in EXAMPLE_QUERIES {
        let _ = write!(prompt, "Question: {}\nSQL:\n```sql\n{}\n```\n\n", question, sql);
    }

    let _ = write!(
        prompt,
        "## Response Format:\n\
         Return ONLY the SQL query without any explanation or markdown formatting.\n\
         If the question cannot be answered with the available data, respond with:\n\
         {} [explanation of why the query cannot be generated]\n",
        ERROR_SENTINEL
    );

    prompt
}

/// Condensed context for follow-up turns: the allow-listed table names plus
/// each mart's leading columns. Replaces the full prompt to bound token cost
/// once a conversation is underway.
pub fn quick_context(catalog: &SchemaCatalog) -> String {
    let mut context = format!(
        "Available tables: {}.\n\nKey columns:\n",
        catalog.allowed_tables().join(", ")
    );

    for table in catalog
        .tables()
        .filter(|t| categorize(&t.name) == TableCategory::Mart)
    {
        let columns: Vec<&str> = table
            .columns
            .iter()
            .take(8)
            .map(|c| c.name.as_str())
            .collect();
        let _ = writeln!(context, "- {}: {}", table.name, columns.join(", "));
    }

    context.push_str("\nReturn ONLY the SQL query, no explanations.\n");
    context
}

fn write_table_block(prompt: &mut String, table: &TableSchema) {
    let _ = writeln!(prompt, "#### {}", table.name);
    if !table.description.is_empty() {
        let _ = writeln!(prompt, "{}", table.description.trim());
    }
    if !table.columns.is_empty() {
        prompt.push_str("| Column | Type | Description |\n|--------|------|-------------|\n");
        for column in &table.columns {
            let _ = writeln!(
                prompt,
                "| {} | {} | {} |",
                column.name,
                column.data_type,
                column.description.replace('|', "\\|").replace('\n', " ")
            );
        }
    }
    prompt.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_is_deterministic() {
        let catalog = SchemaCatalog::fallback();
        assert_eq!(build_system_prompt(&catalog), build_system_prompt(&catalog));
    }

    #[test]
    fn system_prompt_lists_marts_and_sentinel() {
        let catalog = SchemaCatalog::fallback();
        let prompt = build_system_prompt(&catalog);
        assert!(prompt.contains("#### mart_sales"));
        assert!(prompt.contains("ONLY generate SELECT queries"));
        assert!(prompt.contains(ERROR_SENTINEL));
        assert!(prompt.contains("What is our total revenue by territory?"));
    }

    #[test]
    fn quick_context_is_condensed() {
        let catalog = SchemaCatalog::fallback();
        let quick = quick_context(&catalog);
        let full = build_system_prompt(&catalog);
        assert!(quick.len() < full.len());
        assert!(quick.contains("mart_sales"));
        assert!(quick.contains("Return ONLY the SQL query"));
    }
}
