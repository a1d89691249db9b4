use regex::Regex;
use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::sync::OnceLock;

use crate::schema::context::ERROR_SENTINEL;

/// Row cap appended to queries that do not limit themselves.
pub const DEFAULT_ROW_LIMIT: usize = 1000;

/// Keywords that must never appear in generated SQL, as standalone tokens.
/// Covers data modification, DDL, privilege changes, file primitives and
/// timing/process primitives.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT",
    "UPDATE",
    "DELETE",
    "DROP",
    "CREATE",
    "ALTER",
    "TRUNCATE",
    "GRANT",
    "REVOKE",
    "EXECUTE",
    "EXEC",
    "CALL",
    "INTO OUTFILE",
    "INTO DUMPFILE",
    "LOAD_FILE",
    "BENCHMARK",
    "SLEEP",
    "WAITFOR",
    "SHUTDOWN",
    "KILL",
    "COPY",
    "VACUUM",
    "REINDEX",
    "CLUSTER",
];

/// Identifiers that can follow a table name without being its alias.
const NON_ALIAS_WORDS: &[&str] = &[
    "where", "group", "order", "on", "having", "limit", "join", "inner", "left", "right", "full",
    "cross", "outer", "union", "select", "as", "using", "when", "then", "else", "end", "and", "or",
    "not", "set",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Empty,
    /// The model emitted the error sentinel; carries its explanation verbatim.
    Refused(String),
    ForbiddenKeyword(String),
    NotSelect,
    MultipleStatements,
    SuspiciousPattern(&'static str),
    UnknownTable(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Empty => write!(f, "empty query"),
            ValidationError::Refused(msg) => write!(f, "{}", msg),
            ValidationError::ForbiddenKeyword(kw) => {
                write!(f, "query contains forbidden keyword: {}", kw)
            }
            ValidationError::NotSelect => write!(f, "only SELECT queries are allowed"),
            ValidationError::MultipleStatements => {
                write!(f, "multiple SQL statements are not allowed")
            }
            ValidationError::SuspiciousPattern(what) => {
                write!(f, "query contains a suspicious pattern: {}", what)
            }
            ValidationError::UnknownTable(table) => {
                write!(f, "query references unauthorized table: {}", table)
            }
        }
    }
}

impl Error for ValidationError {}

/// Decides whether a single SQL text is safe to execute and normalizes it.
/// Pure over its inputs; fully unit-testable with literal strings.
#[derive(Debug, Clone)]
pub struct QueryValidator {
    strict: bool,
    row_limit: usize,
}

impl Default for QueryValidator {
    fn default() -> Self {
        Self {
            strict: true,
            row_limit: DEFAULT_ROW_LIMIT,
        }
    }
}

impl QueryValidator {
    pub fn new(strict: bool, row_limit: usize) -> Self {
        Self { strict, row_limit }
    }

    /// Validate a SQL query for safety. Returns the cleaned, row-capped text
    /// on success. Re-validating an accepted query's output is a no-op.
    pub fn validate(&self, sql: &str, allow_list: &[String]) -> Result<String, ValidationError> {
        if sql.trim().is_empty() {
            return Err(ValidationError::Empty);
        }

        let cleaned = clean_query(sql);
        if cleaned.is_empty() {
            return Err(ValidationError::Empty);
        }

        // An explicit "cannot answer" from the model; surface its reason.
        if let Some(prefix) = cleaned.get(..ERROR_SENTINEL.len()) {
            if prefix.eq_ignore_ascii_case(ERROR_SENTINEL) {
                return Err(ValidationError::Refused(
                    cleaned[ERROR_SENTINEL.len()..].trim().to_string(),
                ));
            }
        }

        if let Some(keyword) = find_forbidden_keyword(&cleaned) {
            return Err(ValidationError::ForbiddenKeyword(keyword));
        }

        if !is_read_only_query(&cleaned) {
            return Err(ValidationError::NotSelect);
        }

        if has_multiple_statements(&cleaned) {
            return Err(ValidationError::MultipleStatements);
        }

        if let Some(what) = suspicious_pattern(&cleaned) {
            return Err(ValidationError::SuspiciousPattern(what));
        }

        if self.strict {
            if let Some(table) = unresolved_table(&cleaned, allow_list) {
                return Err(ValidationError::UnknownTable(table));
            }
        }

        Ok(with_row_limit(cleaned, self.row_limit))
    }
}

/// Strip markdown code fences, surrounding whitespace and trailing statement
/// terminators.
fn clean_query(sql: &str) -> String {
    static FENCE_SQL: OnceLock<Regex> = OnceLock::new();
    static FENCE: OnceLock<Regex> = OnceLock::new();

    let fence_sql = FENCE_SQL.get_or_init(|| Regex::new(r"(?i)```sql\s*").expect("fence regex"));
    let fence = FENCE.get_or_init(|| Regex::new(r"```\s*").expect("fence regex"));

    let sql = fence_sql.replace_all(sql, "");
    let sql = fence.replace_all(&sql, "");
    sql.trim().trim_end_matches(';').trim().to_string()
}

fn forbidden_regexes() -> &'static Vec<(&'static str, Regex)> {
    static REGEXES: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    REGEXES.get_or_init(|| {
        FORBIDDEN_KEYWORDS
            .iter()
            .map(|kw| {
                let pattern = format!(r"\b{}\b", kw.replace(' ', r"\s+"));
                (*kw, Regex::new(&pattern).expect("keyword regex"))
            })
            .collect()
    })
}

/// Word-boundary scan for forbidden keywords, case-insensitive, anywhere in
/// the text including comments.
fn find_forbidden_keyword(sql: &str) -> Option<String> {
    let upper = sql.to_uppercase();
    forbidden_regexes()
        .iter()
        .find(|(_, re)| re.is_match(&upper))
        .map(|(kw, _)| (*kw).to_string())
}

/// After stripping leading comments, the statement must open with a read-only
/// query form: SELECT or a WITH/CTE prefix.
fn is_read_only_query(sql: &str) -> bool {
    let mut rest = sql.trim_start();
    loop {
        if let Some(stripped) = rest.strip_prefix("--") {
            rest = match stripped.find('\n') {
                Some(i) => stripped[i + 1..].trim_start(),
                None => "",
            };
        } else if let Some(stripped) = rest.strip_prefix("/*") {
            rest = match stripped.find("*/") {
                Some(i) => stripped[i + 2..].trim_start(),
                None => "",
            };
        } else {
            break;
        }
    }

    let upper = rest.to_uppercase();
    upper.starts_with("SELECT") || upper.starts_with("WITH")
}

/// Replace quoted literals so their contents cannot trip token scans.
fn strip_string_literals(sql: &str) -> String {
    static SINGLE: OnceLock<Regex> = OnceLock::new();
    static DOUBLE: OnceLock<Regex> = OnceLock::new();

    let single = SINGLE.get_or_init(|| Regex::new(r"'[^']*'").expect("literal regex"));
    let double = DOUBLE.get_or_init(|| Regex::new(r#""[^"]*""#).expect("literal regex"));

    let sql = single.replace_all(sql, "");
    double.replace_all(&sql, "").to_string()
}

/// A semicolon surviving literal removal means a second statement.
fn has_multiple_statements(sql: &str) -> bool {
    strip_string_literals(sql).contains(';')
}

/// Comment and union tricks that can mask injected clauses.
fn suspicious_pattern(sql: &str) -> Option<&'static str> {
    static TRAILING_COMMENT: OnceLock<Regex> = OnceLock::new();
    static SYSTEM_UNION: OnceLock<Regex> = OnceLock::new();

    if let Some(open) = sql.rfind("/*") {
        if !sql[open..].contains("*/") {
            return Some("unclosed block comment");
        }
    }

    let trailing = TRAILING_COMMENT.get_or_init(|| Regex::new(r"--\s*\z").expect("comment regex"));
    if trailing.is_match(sql) {
        return Some("trailing comment");
    }

    let system_union = SYSTEM_UNION.get_or_init(|| {
        Regex::new(r"(?is)\bunion\s+(?:all\s+)?select\b.*?\bfrom\s+(?:pg_|information_schema)")
            .expect("union regex")
    });
    if system_union.is_match(sql) {
        return Some("system catalog access via UNION");
    }

    None
}

/// Every identifier following FROM or JOIN must resolve against the symbol
/// table: allow-listed tables, CTE names, derived-table aliases and aliases
/// bound to allowed tables. System catalogs are rejected outright. Returns
/// the first identifier that does not resolve.
fn unresolved_table(sql: &str, allow_list: &[String]) -> Option<String> {
    static FROM_JOIN: OnceLock<Regex> = OnceLock::new();
    let from_join = FROM_JOIN.get_or_init(|| {
        Regex::new(r"(?i)\b(?:from|join)\s+([A-Za-z_][A-Za-z0-9_.]*)").expect("from/join regex")
    });

    let symbols = symbol_table(sql, allow_list);

    for cap in from_join.captures_iter(sql) {
        let name = cap[1].to_string();
        let lower = name.to_lowercase();
        if lower.starts_with("pg_") || lower.starts_with("information_schema") {
            return Some(name);
        }
        if !symbols.contains(lower.as_str()) {
            return Some(name);
        }
    }

    None
}

/// Resolved names a FROM/JOIN target may legitimately use, built by a
/// lightweight scan rather than a full parse: the allow-list itself, CTE
/// names (`name AS (`), subquery aliases (`) AS name`) and aliases bound to
/// allowed tables (`table [AS] alias`).
fn symbol_table(sql: &str, allow_list: &[String]) -> HashSet<String> {
    static CTE: OnceLock<Regex> = OnceLock::new();
    static SUBQUERY_ALIAS: OnceLock<Regex> = OnceLock::new();

    let cte = CTE.get_or_init(|| {
        Regex::new(r"(?i)\b([A-Za-z_][A-Za-z0-9_]*)\s+as\s*\(").expect("cte regex")
    });
    let subquery_alias = SUBQUERY_ALIAS.get_or_init(|| {
        Regex::new(r"(?i)\)\s*(?:as\s+)?([A-Za-z_][A-Za-z0-9_]*)").expect("alias regex")
    });

    let mut symbols: HashSet<String> = allow_list.iter().map(|t| t.to_lowercase()).collect();

    for cap in cte.captures_iter(sql) {
        insert_symbol(&mut symbols, &cap[1]);
    }
    for cap in subquery_alias.captures_iter(sql) {
        insert_symbol(&mut symbols, &cap[1]);
    }

    if !allow_list.is_empty() {
        let tables = allow_list
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!(
            r"(?i)\b(?:{})\s+(?:as\s+)?([A-Za-z_][A-Za-z0-9_]*)",
            tables
        );
        if let Ok(table_alias) = Regex::new(&pattern) {
            for cap in table_alias.captures_iter(sql) {
                insert_symbol(&mut symbols, &cap[1]);
            }
        }
    }

    symbols
}

fn insert_symbol(symbols: &mut HashSet<String>, candidate: &str) {
    let lower = candidate.to_lowercase();
    if !NON_ALIAS_WORDS.contains(&lower.as_str()) {
        symbols.insert(lower);
    }
}

/// Append a LIMIT clause when the query carries none, leaving already-limited
/// queries untouched so normalization stays idempotent.
fn with_row_limit(sql: String, row_limit: usize) -> String {
    static LIMIT: OnceLock<Regex> = OnceLock::new();
    let limit = LIMIT.get_or_init(|| Regex::new(r"(?i)\blimit\b").expect("limit regex"));

    if limit.is_match(&strip_string_literals(&sql)) {
        sql
    } else {
        format!("{}\nLIMIT {}", sql, row_limit)
    }
}

/// Pretty-print SQL for display: each major clause on its own line.
pub fn format_for_display(sql: &str) -> String {
    static CLAUSES: &[&str] = &[
        "SELECT", "FROM", "WHERE", "GROUP BY", "ORDER BY", "HAVING", "LIMIT", "WITH", "UNION",
    ];
    static NEWLINES: OnceLock<Regex> = OnceLock::new();

    let mut result = clean_query(sql);
    for clause in CLAUSES {
        let pattern = format!(r"(?i)\b{}\b", clause.replace(' ', r"\s+"));
        if let Ok(re) = Regex::new(&pattern) {
            result = re.replace_all(&result, format!("\n{}", clause)).to_string();
        }
    }

    let newlines = NEWLINES.get_or_init(|| Regex::new(r"\n\s*\n").expect("newline regex"));
    newlines.replace_all(&result, "\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow_list() -> Vec<String> {
        [
            "mart_sales",
            "mart_customer_analytics",
            "dim_customer",
            "fact_inventory",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn validator() -> QueryValidator {
        QueryValidator::default()
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(
            validator().validate("   \n  ", &allow_list()),
            Err(ValidationError::Empty)
        );
    }

    #[test]
    fn rejects_error_sentinel_with_explanation() {
        let err = validator()
            .validate("-- ERROR: no table tracks weather data", &allow_list())
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::Refused("no table tracks weather data".to_string())
        );
    }

    #[test]
    fn rejects_statement_with_drop() {
        // Both the DROP keyword and the second statement are grounds for
        // rejection; the keyword scan runs first.
        let err = validator()
            .validate(
                "SELECT name FROM mart_sales; DROP TABLE mart_sales",
                &allow_list(),
            )
            .unwrap_err();
        assert_eq!(err, ValidationError::ForbiddenKeyword("DROP".to_string()));
        assert!(err.to_string().contains("DROP"));
    }

    #[test]
    fn forbidden_keywords_rejected_regardless_of_case_and_position() {
        for sql in [
            "select * from mart_sales where note = x; delete from mart_sales",
            "SELECT 1\nFROM mart_sales\nWHERE 1=1 AND sleep(10) = 0",
            "with t as (select 1) insert into mart_sales values (1)",
            "SELECT * FROM mart_sales INTO OUTFILE '/tmp/x'",
        ] {
            assert!(
                matches!(
                    validator().validate(sql, &allow_list()),
                    Err(ValidationError::ForbiddenKeyword(_))
                ),
                "expected keyword rejection for: {}",
                sql
            );
        }
    }

    #[test]
    fn keywords_inside_words_are_not_flagged() {
        // "updated_at" contains UPDATE but not as a standalone token.
        let result = validator().validate(
            "SELECT updated_at, recall_flag FROM mart_sales",
            &allow_list(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn strips_fences_and_appends_limit() {
        let sql = "```sql\nSELECT territory_name, SUM(order_total) AS revenue FROM mart_sales GROUP BY territory_name\n```";
        let normalized = validator().validate(sql, &allow_list()).unwrap();
        assert!(!normalized.contains("```"));
        assert!(normalized.ends_with("LIMIT 1000"));
        assert!(normalized.starts_with("SELECT territory_name"));
    }

    #[test]
    fn validation_is_idempotent() {
        let sql = "SELECT customer_name FROM mart_customer_analytics ORDER BY lifetime_value DESC";
        let first = validator().validate(sql, &allow_list()).unwrap();
        let second = validator().validate(&first, &allow_list()).unwrap();
        assert_eq!(first, second);
        // exactly one LIMIT clause
        assert_eq!(second.to_uppercase().matches("LIMIT").count(), 1);
    }

    #[test]
    fn existing_limit_is_preserved() {
        let sql = "SELECT customer_name FROM mart_customer_analytics LIMIT 10";
        let normalized = validator().validate(sql, &allow_list()).unwrap();
        assert!(normalized.ends_with("LIMIT 10"));
        assert_eq!(normalized.to_uppercase().matches("LIMIT").count(), 1);
    }

    #[test]
    fn rejects_non_select_statements() {
        assert_eq!(
            validator().validate("SHOW TABLES", &allow_list()),
            Err(ValidationError::NotSelect)
        );
    }

    #[test]
    fn accepts_cte_prefix_and_leading_comments() {
        let sql = "-- top territories\nWITH ranked AS (SELECT territory_name FROM mart_sales) SELECT * FROM ranked";
        assert!(validator().validate(sql, &allow_list()).is_ok());
    }

    #[test]
    fn semicolon_inside_literal_is_not_multi_statement() {
        let sql = "SELECT customer_name FROM mart_sales WHERE note = 'a;b'";
        assert!(validator().validate(sql, &allow_list()).is_ok());
    }

    #[test]
    fn rejects_two_select_statements() {
        let sql = "SELECT 1 FROM mart_sales; SELECT 2 FROM mart_sales";
        assert_eq!(
            validator().validate(sql, &allow_list()),
            Err(ValidationError::MultipleStatements)
        );
    }

    #[test]
    fn rejects_unclosed_block_comment() {
        let sql = "SELECT customer_name FROM mart_sales /* hidden";
        assert_eq!(
            validator().validate(sql, &allow_list()),
            Err(ValidationError::SuspiciousPattern("unclosed block comment"))
        );
    }

    #[test]
    fn rejects_trailing_line_comment() {
        let sql = "SELECT customer_name FROM mart_sales --";
        assert_eq!(
            validator().validate(sql, &allow_list()),
            Err(ValidationError::SuspiciousPattern("trailing comment"))
        );
    }

    #[test]
    fn rejects_union_into_system_catalog() {
        let sql =
            "SELECT name FROM mart_sales UNION ALL SELECT tablename FROM pg_catalog.pg_tables";
        assert!(matches!(
            validator().validate(sql, &allow_list()),
            Err(ValidationError::SuspiciousPattern(_)) | Err(ValidationError::UnknownTable(_))
        ));
    }

    #[test]
    fn rejects_unauthorized_table() {
        let err = validator()
            .validate("SELECT * FROM secret_payroll", &allow_list())
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownTable("secret_payroll".to_string())
        );
    }

    #[test]
    fn rejects_system_catalogs_directly() {
        for sql in [
            "SELECT * FROM pg_catalog.pg_tables",
            "SELECT * FROM information_schema.tables",
            "SELECT * FROM pg_shadow",
        ] {
            assert!(matches!(
                validator().validate(sql, &allow_list()),
                Err(ValidationError::UnknownTable(_))
            ));
        }
    }

    #[test]
    fn resolves_aliases_of_allowed_tables() {
        let sql = "SELECT ms.territory_name, dc.customer_segment \
                   FROM mart_sales ms \
                   JOIN dim_customer dc ON ms.customer_key = dc.customerid";
        assert!(validator().validate(sql, &allow_list()).is_ok());

        let with_as = "SELECT s.order_total FROM mart_sales AS s";
        assert!(validator().validate(with_as, &allow_list()).is_ok());
    }

    #[test]
    fn resolves_cte_and_subquery_names() {
        let cte = "WITH monthly AS (SELECT order_month, SUM(order_total) AS total FROM mart_sales GROUP BY order_month) \
                   SELECT * FROM monthly";
        assert!(validator().validate(cte, &allow_list()).is_ok());

        let subquery = "SELECT t.revenue FROM (SELECT SUM(order_total) AS revenue FROM mart_sales) t";
        assert!(validator().validate(subquery, &allow_list()).is_ok());
    }

    #[test]
    fn alias_of_unknown_table_does_not_resolve() {
        let sql = "SELECT x.a FROM secret_table x";
        assert!(matches!(
            validator().validate(sql, &allow_list()),
            Err(ValidationError::UnknownTable(_))
        ));
    }

    #[test]
    fn non_strict_mode_skips_table_check() {
        let relaxed = QueryValidator::new(false, DEFAULT_ROW_LIMIT);
        assert!(relaxed
            .validate("SELECT * FROM anything_goes", &allow_list())
            .is_ok());
    }

    #[test]
    fn format_for_display_breaks_clauses() {
        let formatted = format_for_display(
            "SELECT a FROM mart_sales WHERE a > 1 GROUP BY a ORDER BY a LIMIT 5",
        );
        for clause in ["SELECT", "FROM", "WHERE", "GROUP BY", "ORDER BY", "LIMIT"] {
            assert!(
                formatted.contains(&format!("\n{}", clause)) || formatted.starts_with(clause),
                "missing clause break for {}",
                clause
            );
        }
    }
}
