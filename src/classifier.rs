//! Query Classifier
//!
//! Decides whether a raw SQL statement modifies records.

/// Statement prefixes that count as writes
const WRITE_PREFIXES: [&str; 4] = ["INSERT", "UPDATE", "DELETE", "REPLACE"];

/// Classification verdict for a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Modifies records on the primary
    Write,
    /// Anything else (SELECT, DDL, PRAGMA, ...)
    ReadOnly,
}

impl QueryKind {
    pub fn is_write(self) -> bool {
        self == QueryKind::Write
    }
}

/// Classify a raw statement by case-insensitive prefix on the trimmed text.
pub fn classify(sql: &str) -> QueryKind {
    let trimmed = sql.trim_start();
    let is_write = WRITE_PREFIXES.iter().any(|prefix| {
        trimmed
            .get(..prefix.len())
            .map(|head| head.eq_ignore_ascii_case(prefix))
            .unwrap_or(false)
    });

    if is_write {
        QueryKind::Write
    } else {
        QueryKind::ReadOnly
    }
}

/// Result-gated verdict for the update/delete entry points
pub fn affected_modified(affected_rows: u64) -> bool {
    affected_rows > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_prefixes_any_case() {
        for sql in [
            "INSERT INTO t VALUES (1)",
            "insert into t values (1)",
            "  \n\tUpdate t SET x = 1",
            "delete from t",
            "RePlAcE INTO t VALUES (1)",
        ] {
            assert_eq!(classify(sql), QueryKind::Write, "{sql}");
        }
    }

    #[test]
    fn test_read_only_statements() {
        for sql in [
            "SELECT * FROM t",
            "  select 1",
            "CREATE TABLE t (id INTEGER)",
            "PRAGMA journal_mode",
            "",
            "DEL",
            "WITH x AS (SELECT 1) SELECT * FROM x",
        ] {
            assert_eq!(classify(sql), QueryKind::ReadOnly, "{sql}");
        }
    }

    #[test]
    fn test_multibyte_text_does_not_panic() {
        assert_eq!(classify("ünsert into t"), QueryKind::ReadOnly);
        assert_eq!(classify("é"), QueryKind::ReadOnly);
    }

    #[test]
    fn test_affected_rows_verdict() {
        assert!(affected_modified(3));
        assert!(!affected_modified(0));
    }
}
