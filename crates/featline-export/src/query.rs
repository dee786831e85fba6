//! SQL text for the offline store and feature-group → table resolution

use crate::job::QuerySpec;

/// Build `SELECT ... FROM "db"."table" [WHERE ..] [ORDER BY ..] [LIMIT n]`.
///
/// `WHERE` / `ORDER BY` keywords are added unless the clause already starts
/// with them (case-insensitive).
pub fn build_query(query: &QuerySpec) -> String {
    let columns: Vec<&str> = query
        .columns
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();
    let select = if columns.is_empty() {
        "*".to_string()
    } else {
        columns.join(", ")
    };

    let mut sql = format!(
        r#"SELECT {select} FROM "{}"."{}""#,
        query.database, query.table
    );
    if let Some(clause) = query.where_clause.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        sql.push(' ');
        sql.push_str(&with_keyword(clause, "WHERE"));
    }
    if let Some(clause) = query.order_by.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        sql.push(' ');
        sql.push_str(&with_keyword(clause, "ORDER BY"));
    }
    if let Some(limit) = query.limit.filter(|l| *l > 0) {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    sql
}

fn with_keyword(clause: &str, keyword: &str) -> String {
    let starts = clause
        .get(..keyword.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(keyword))
        && clause
            .get(keyword.len()..)
            .and_then(|rest| rest.chars().next())
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
    if starts {
        clause.to_string()
    } else {
        format!("{keyword} {clause}")
    }
}

/// Table names the catalog may use for a feature group, most specific first.
pub fn table_candidates(feature_group: &str, account_id: Option<&str>) -> Vec<String> {
    let base = feature_group.replace('-', "_");
    let lower = base.to_lowercase();
    let mut out = vec![base.clone(), lower.clone()];
    if let Some(account) = account_id {
        out.push(format!("{base}_{account}"));
        out.push(format!("{lower}_{account}"));
    }
    out
}

/// Pick the table backing `feature_group` among `tables`.
///
/// Exact (case-insensitive) candidate match first, then the first table whose
/// name contains the normalized feature-group name.
pub fn resolve_table_name(
    feature_group: &str,
    tables: &[String],
    account_id: Option<&str>,
) -> Option<String> {
    let candidates = table_candidates(feature_group, account_id);
    log::debug!("Table candidates for '{feature_group}': {candidates:?}");

    for candidate in &candidates {
        if let Some(t) = tables.iter().find(|t| t.eq_ignore_ascii_case(candidate)) {
            return Some(t.clone());
        }
    }

    let needle = feature_group.replace('-', "_").to_lowercase();
    let found = tables.iter().find(|t| t.to_lowercase().contains(&needle)).cloned();
    if let Some(t) = &found {
        log::info!("Using partially matching table '{t}' for '{feature_group}'");
    }
    found
}
