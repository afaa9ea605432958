//! Lexical (BM25) indexing on SQLite FTS5.
//!
//! Each sparse field populated by a BM25 function is backed by an
//! external-content FTS5 table over the function's input column. An
//! `AFTER INSERT` trigger keeps it in sync, so the lexical representation is
//! derived by the store at insert time and never supplied by the caller.

/// Name of the FTS5 table backing `sparse_field` of `collection`.
pub fn fts_table_name(collection: &str, sparse_field: &str) -> String {
    format!("{}__{}", collection, sparse_field)
}

/// Quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// DDL for the FTS table and its sync trigger.
pub fn fts_ddl(collection: &str, primary_key: &str, sparse_field: &str, input_field: &str) -> String {
    let fts = fts_table_name(collection, sparse_field);
    let trigger = format!("{}_ai", fts);
    format!(
        "CREATE VIRTUAL TABLE {fts} USING fts5(
            {input},
            content={table_lit},
            content_rowid={pk_lit},
            tokenize='unicode61 remove_diacritics 2'
        );
        CREATE TRIGGER {trigger} AFTER INSERT ON {table} BEGIN
            INSERT INTO {fts}(rowid, {input}) VALUES (new.{pk}, new.{input});
        END;",
        fts = quote_ident(&fts),
        input = quote_ident(input_field),
        table = quote_ident(collection),
        table_lit = sql_literal(collection),
        pk = quote_ident(primary_key),
        pk_lit = sql_literal(primary_key),
        trigger = quote_ident(&trigger),
    )
}

fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Turn free text into an FTS5 MATCH expression.
///
/// Every alphanumeric token becomes a quoted term and the terms are OR-ed, so
/// a document matching any query term is a candidate and BM25 ranks them.
/// Operators and punctuation in the input never reach the FTS5 parser.
/// Returns `None` when the query has no searchable token.
pub fn sanitize_fts5_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
