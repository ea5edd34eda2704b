//! SQL text for the single-row statements the backend issues
//!
//! Every identifier is quoted and every value is a positional parameter;
//! callers bind parameters in the order the columns are passed.

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn column_list(columns: &[&str]) -> String {
    columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
}

/// `"a" = ?n AND "b" = ?n+1`, numbering from `first`
fn predicate(columns: &[&str], first: usize) -> String {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", quote(c), first + i))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn order_by(columns: &[&str]) -> String {
    if columns.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", column_list(columns))
    }
}

pub fn select_by_key(table: &str, columns: &[&str], key: &[&str]) -> String {
    format!(
        "SELECT {} FROM {} WHERE {}",
        column_list(columns),
        quote(table),
        predicate(key, 1)
    )
}

pub fn select_all(table: &str, columns: &[&str], key: &[&str]) -> String {
    format!(
        "SELECT {} FROM {}{}",
        column_list(columns),
        quote(table),
        order_by(key)
    )
}

/// Rows matching one column; `IS` so a null probe finds null columns
pub fn select_where(table: &str, columns: &[&str], column: &str, key: &[&str]) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} IS ?1{}",
        column_list(columns),
        quote(table),
        quote(column),
        order_by(key)
    )
}

/// Guarded existence probe, used for updates with nothing to set
pub fn count_by_key(table: &str, key: &[&str], guard: Option<&str>) -> String {
    let mut sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        quote(table),
        predicate(key, 1)
    );
    if let Some(column) = guard {
        sql.push_str(&format!(" AND {} = ?{}", quote(column), key.len() + 1));
    }
    sql
}

pub fn insert(table: &str, columns: &[&str]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote(table));
    }
    let params = (1..=columns.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(table),
        column_list(columns),
        params
    )
}

/// Parameters: set values, then key parts, then the expected version
pub fn update(table: &str, set: &[&str], key: &[&str], guard: Option<&str>) -> String {
    let assignments = set
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", quote(c), i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "UPDATE {} SET {} WHERE {}",
        quote(table),
        assignments,
        predicate(key, set.len() + 1)
    );
    if let Some(column) = guard {
        sql.push_str(&format!(
            " AND {} = ?{}",
            quote(column),
            set.len() + key.len() + 1
        ));
    }
    sql
}

/// Parameters: key parts, then the expected version
pub fn delete(table: &str, key: &[&str], guard: Option<&str>) -> String {
    let mut sql = format!("DELETE FROM {} WHERE {}", quote(table), predicate(key, 1));
    if let Some(column) = guard {
        sql.push_str(&format!(" AND {} = ?{}", quote(column), key.len() + 1));
    }
    sql
}

pub fn select_links(table: &str, matched: &str, returned: &str) -> String {
    format!(
        "SELECT {r} FROM {t} WHERE {m} = ?1 ORDER BY {r}",
        r = quote(returned),
        t = quote(table),
        m = quote(matched)
    )
}

pub fn insert_link(table: &str, owner: &str, target: &str) -> String {
    format!(
        "INSERT INTO {} ({}, {}) VALUES (?1, ?2)",
        quote(table),
        quote(owner),
        quote(target)
    )
}

pub fn delete_link(table: &str, owner: &str, target: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {}",
        quote(table),
        predicate(&[owner, target], 1)
    )
}

pub fn delete_links(table: &str, matched: &str) -> String {
    format!("DELETE FROM {} WHERE {} = ?1", quote(table), quote(matched))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_are_quoted() {
        assert_eq!(quote("order"), "\"order\"");
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_update_numbers_parameters_across_clauses() {
        let sql = update("product", &["name", "version"], &["id"], Some("version"));
        assert_eq!(
            sql,
            "UPDATE \"product\" SET \"name\" = ?1, \"version\" = ?2 \
             WHERE \"id\" = ?3 AND \"version\" = ?4"
        );
    }

    #[test]
    fn test_unguarded_delete_with_composite_key() {
        let sql = delete("order_line", &["order_id", "line_no"], None);
        assert_eq!(
            sql,
            "DELETE FROM \"order_line\" WHERE \"order_id\" = ?1 AND \"line_no\" = ?2"
        );
    }

    #[test]
    fn test_select_where_matches_nulls() {
        let sql = select_where("product", &["id", "category_id"], "category_id", &["id"]);
        assert_eq!(
            sql,
            "SELECT \"id\", \"category_id\" FROM \"product\" \
             WHERE \"category_id\" IS ?1 ORDER BY \"id\""
        );
    }

    #[test]
    fn test_insert_without_columns_uses_defaults() {
        assert_eq!(insert("tag", &[]), "INSERT INTO \"tag\" DEFAULT VALUES");
        assert_eq!(
            insert("tag", &["id", "label"]),
            "INSERT INTO \"tag\" (\"id\", \"label\") VALUES (?1, ?2)"
        );
    }

    #[test]
    fn test_link_statements() {
        assert_eq!(
            select_links("product_tags", "tag_id", "product_id"),
            "SELECT \"product_id\" FROM \"product_tags\" WHERE \"tag_id\" = ?1 ORDER BY \"product_id\""
        );
        assert_eq!(
            delete_link("product_tags", "product_id", "tag_id"),
            "DELETE FROM \"product_tags\" WHERE \"product_id\" = ?1 AND \"tag_id\" = ?2"
        );
    }
}
