/// Utility functions and helpers for LibSqlBridge
///
/// This module provides statement classification, row collection and error
/// enrichment shared by the query, transaction, statement and cursor modules.
use libsql::Rows;

use crate::error::{BridgeError, SqlErrorKind};
use crate::models::{ResultSet, Value};

/// Column names of a result stream.
///
/// Unnamed columns are reported as `col<N>`.
pub fn column_names(rows: &Rows) -> Vec<String> {
    let count = rows.column_count();
    (0..count)
        .map(|i| {
            rows.column_name(i)
                .map_or_else(|| format!("col{i}"), ToString::to_string)
        })
        .collect()
}

/// Read one row into owned values.
pub fn row_values(row: &libsql::Row, column_count: usize) -> Result<Vec<Value>, BridgeError> {
    let mut values = Vec::with_capacity(column_count);
    for i in 0..column_count {
        let index = i32::try_from(i)
            .map_err(|_| BridgeError::Runtime(format!("column index {i} exceeds i32")))?;
        let value = row.get_value(index).map_err(|err| {
            BridgeError::sql(
                SqlErrorKind::TypeMismatch,
                format!("Failed to read column {i}: {err}"),
            )
        })?;
        values.push(Value::from(value));
    }
    Ok(values)
}

/// Collect rows from a query result into a [`ResultSet`]
///
/// Drains the stream; `num_rows` is the number of rows read.
pub async fn collect_rows(mut rows: Rows) -> Result<ResultSet, BridgeError> {
    let columns = column_names(&rows);
    let mut collected = Vec::new();

    while let Some(row) = rows.next().await.map_err(|e| BridgeError::from_libsql(&e))? {
        collected.push(row_values(&row, columns.len())?);
    }

    Ok(ResultSet {
        num_rows: collected.len() as u64,
        columns,
        rows: collected,
    })
}

/// Classify a failed statement and, for unique violations, name the index.
///
/// SQLite only reports the columns of a failed unique constraint. The index
/// is looked up through `PRAGMA index_list`/`index_info` on the same
/// connection; a failed lookup leaves the error unenriched.
pub async fn statement_error(conn: &libsql::Connection, err: &libsql::Error) -> BridgeError {
    let error = BridgeError::from_libsql(err);
    if !matches!(
        error,
        BridgeError::Sql {
            kind: SqlErrorKind::ConstraintViolation,
            ..
        }
    ) {
        return error;
    }

    match constraint_index_name(conn, &err.to_string()).await {
        Ok(index) => error.with_constraint(index),
        Err(lookup) => {
            tracing::debug!(error = %lookup, "constraint index lookup failed");
            error
        }
    }
}

/// Table and columns named by a `UNIQUE constraint failed:` message.
pub fn parse_unique_violation(message: &str) -> Option<(String, Vec<String>)> {
    let (_, constraint_part) = message.split_once("UNIQUE constraint failed:")?;
    let constraint_part = constraint_part.trim().trim_matches('`').trim();

    let mut table = None;
    let mut columns = Vec::new();
    for part in constraint_part.split(',') {
        let (tbl, column) = part.trim().split_once('.')?;
        table.get_or_insert_with(|| tbl.trim().to_string());
        columns.push(column.trim().to_string());
    }
    Some((table?, columns))
}

fn quote_identifier(id: &str) -> String {
    format!("\"{}\"", id.replace('"', "\"\""))
}

/// Find the unique index whose columns match a constraint violation.
pub async fn constraint_index_name(
    conn: &libsql::Connection,
    error_message: &str,
) -> Result<Option<String>, libsql::Error> {
    let Some((table, columns)) = parse_unique_violation(error_message) else {
        return Ok(None);
    };

    let pragma_query = format!("PRAGMA index_list({})", quote_identifier(&table));
    let mut rows = conn.query(&pragma_query, ()).await?;

    while let Some(row) = rows.next().await? {
        // Column 1 is the index name, column 2 is the unique flag
        let index_name: String = row.get(1)?;
        let is_unique: i64 = row.get(2)?;
        if is_unique != 1 {
            continue;
        }

        let info_query = format!("PRAGMA index_info({})", quote_identifier(&index_name));
        let mut info_rows = conn.query(&info_query, ()).await?;
        let mut index_columns = Vec::new();
        while let Some(info_row) = info_rows.next().await? {
            index_columns.push(info_row.get::<String>(2)?);
        }

        if index_columns == columns {
            return Ok(Some(index_name));
        }
    }
    Ok(None)
}

/// Validate that a savepoint name is a valid SQL identifier
///
/// Savepoint names must be:
/// - Non-empty
/// - ASCII alphanumeric or underscore
/// - Not start with a digit
pub fn validate_savepoint_name(name: &str) -> Result<(), BridgeError> {
    if name.is_empty()
        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        || name.chars().next().is_none_or(|c| c.is_ascii_digit())
    {
        return Err(BridgeError::sql(
            SqlErrorKind::Syntax,
            format!("Invalid savepoint name {name:?}: must be a valid SQL identifier"),
        ));
    }
    Ok(())
}

/// Query type enumeration for dispatching queries vs. executions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    Begin,
    Commit,
    Rollback,
    Pragma,
    With,
    Other,
}

/// Detect the query type from a SQL statement
///
/// Examines the first keyword to categorize the statement.
pub fn detect_query_type(query: &str) -> QueryType {
    let keyword = query.split_whitespace().next().unwrap_or("");

    const KEYWORDS: [(&str, QueryType); 12] = [
        ("SELECT", QueryType::Select),
        ("INSERT", QueryType::Insert),
        ("UPDATE", QueryType::Update),
        ("DELETE", QueryType::Delete),
        ("CREATE", QueryType::Create),
        ("DROP", QueryType::Drop),
        ("ALTER", QueryType::Alter),
        ("BEGIN", QueryType::Begin),
        ("COMMIT", QueryType::Commit),
        ("ROLLBACK", QueryType::Rollback),
        ("PRAGMA", QueryType::Pragma),
        ("WITH", QueryType::With),
    ];

    KEYWORDS
        .iter()
        .find(|(word, _)| keyword.eq_ignore_ascii_case(word))
        .map_or(QueryType::Other, |(_, kind)| *kind)
}

fn starts_with_keyword(bytes: &[u8], keyword: &[u8]) -> bool {
    bytes.len() >= keyword.len()
        && bytes[..keyword.len()].eq_ignore_ascii_case(keyword)
        && bytes
            .get(keyword.len())
            .is_none_or(|b| b.is_ascii_whitespace() || *b == b'(')
}

/// Determines if a statement should use query() or execute()
///
/// Returns true for statements that produce rows: SELECT, VALUES, PRAGMA,
/// EXPLAIN, WITH and anything carrying a RETURNING clause.
///
/// Keywords inside string literals or comments also match. Using query()
/// for a statement that returns nothing is harmless; the reverse would drop
/// rows, so false positives are the safe side.
#[inline]
pub fn should_use_query(sql: &str) -> bool {
    let bytes = sql.trim_start().as_bytes();
    if bytes.is_empty() {
        return false;
    }

    const ROW_PRODUCING: [&[u8]; 5] = [b"SELECT", b"VALUES", b"PRAGMA", b"EXPLAIN", b"WITH"];
    if ROW_PRODUCING
        .iter()
        .any(|keyword| starts_with_keyword(bytes, keyword))
    {
        return true;
    }

    let target = b"RETURNING";
    if bytes.len() < target.len() {
        return false;
    }
    (0..=bytes.len() - target.len()).any(|i| {
        (i == 0 || bytes[i - 1].is_ascii_whitespace() || bytes[i - 1] == b')')
            && bytes[i..i + target.len()].eq_ignore_ascii_case(target)
            && bytes
                .get(i + target.len())
                .is_none_or(|b| b.is_ascii_whitespace() || *b == b';')
    })
}
