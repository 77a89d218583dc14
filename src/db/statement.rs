//! Query sanitizing and statement classification
//!
//! Decides whether a statement produces a result set (and rows should be
//! fetched) or modifies data (and should be committed).

use crate::error::{MysqlTunnelError, Result};

/// Leading keywords of statements that return rows
const ROW_RETURNING_KEYWORDS: [&str; 5] = ["SELECT", "SHOW", "DESCRIBE", "DESC", "EXPLAIN"];

/// What a statement does with its result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Produces a result set that is fetched in full
    ReturnsRows,
    /// Changes data; committed immediately, reports affected rows
    Modifies,
}

impl StatementKind {
    /// Classify a query by its first keyword, case-insensitively.
    ///
    /// Leading whitespace and comments are skipped.
    ///
    /// # Examples
    /// ```
    /// use mysql_tunnel::db::StatementKind;
    ///
    /// assert_eq!(StatementKind::classify("  select 1"), StatementKind::ReturnsRows);
    /// assert_eq!(StatementKind::classify("DESC users"), StatementKind::ReturnsRows);
    /// assert_eq!(StatementKind::classify("INSERT INTO t VALUES (1)"), StatementKind::Modifies);
    /// ```
    pub fn classify(query: &str) -> Self {
        let keyword: String = skip_leading_comments(query)
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();

        if ROW_RETURNING_KEYWORDS
            .iter()
            .any(|k| k.eq_ignore_ascii_case(&keyword))
        {
            StatementKind::ReturnsRows
        } else {
            StatementKind::Modifies
        }
    }

    /// True when rows should be fetched
    pub fn returns_rows(self) -> bool {
        self == StatementKind::ReturnsRows
    }
}

/// Strip whitespace and `--`, `#` and `/* */` comments from the front of a query
fn skip_leading_comments(query: &str) -> &str {
    let mut rest = query.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--").or_else(|| rest.strip_prefix('#')) {
            rest = match after.find('\n') {
                Some(idx) => after[idx + 1..].trim_start(),
                None => "",
            };
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = match after.find("*/") {
                Some(idx) => after[idx + 2..].trim_start(),
                None => "",
            };
        } else {
            return rest;
        }
    }
}

/// Sanitize a query before execution
///
/// Trims whitespace, rejects empty queries, and enforces the optional
/// length limit.
///
/// # Examples
/// ```
/// use mysql_tunnel::db::sanitize_query;
///
/// let query = sanitize_query("  SHOW TABLES  ", Some(1000)).unwrap();
/// assert_eq!(query, "SHOW TABLES");
///
/// let result = sanitize_query("a".repeat(100).as_str(), Some(50));
/// assert!(result.is_err());
/// ```
pub fn sanitize_query(query: &str, max_chars: Option<usize>) -> Result<String> {
    let trimmed = query.trim();

    if trimmed.is_empty() {
        return Err(MysqlTunnelError::invalid_params("Query cannot be empty"));
    }

    if let Some(max) = max_chars {
        let len = trimmed.chars().count();
        if len > max {
            return Err(MysqlTunnelError::invalid_params(format!(
                "Query is too long (max {} characters, got {})",
                max, len
            )));
        }
    }

    Ok(trimmed.to_string())
}
