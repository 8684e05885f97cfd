//! SQL text for the statements the engine issues.
//!
//! Identifiers are double-quoted and every value is bound through a `?`
//! placeholder, in column order.

use cascade_core::quote_ident;

/// `"a" = ? AND "b" = ?`
fn where_clause<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|col| format!("{} = ?", quote_ident(col.as_ref())))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn column_list<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|col| quote_ident(col.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `INSERT INTO "t" ("a", "b") VALUES (?, ?)`, or `DEFAULT VALUES` when no
/// column is given.
pub(crate) fn insert<S: AsRef<str>>(table: &str, columns: &[S]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table));
    }
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        column_list(columns),
        placeholders
    )
}

/// `UPDATE "t" SET "a" = ?, "b" = ? WHERE "id" = ?`
pub(crate) fn update<S: AsRef<str>, K: AsRef<str>>(
    table: &str,
    set_columns: &[S],
    key_columns: &[K],
) -> String {
    let set_clause = set_columns
        .iter()
        .map(|col| format!("{} = ?", quote_ident(col.as_ref())))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {} WHERE {}",
        quote_ident(table),
        set_clause,
        where_clause(key_columns)
    )
}

/// `DELETE FROM "t" WHERE "a" = ? AND "b" = ?`
pub(crate) fn delete<K: AsRef<str>>(table: &str, key_columns: &[K]) -> String {
    format!(
        "DELETE FROM {} WHERE {}",
        quote_ident(table),
        where_clause(key_columns)
    )
}

/// `SELECT "x", "y" FROM "t" WHERE "a" = ?`; `*` when no column is listed.
pub(crate) fn select<S: AsRef<str>, K: AsRef<str>>(
    table: &str,
    columns: &[S],
    key_columns: &[K],
    limit: Option<usize>,
) -> String {
    let projection = if columns.is_empty() {
        "*".to_string()
    } else {
        column_list(columns)
    };
    let mut sql = format!(
        "SELECT {} FROM {} WHERE {}",
        projection,
        quote_ident(table),
        where_clause(key_columns)
    );
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    sql
}
