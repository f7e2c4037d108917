//! Generic list queries
//!
//! [`ListQuery`] assembles the `WHERE`, `ORDER BY` and `LIMIT` parts shared
//! by every paginated listing, then [`fetch_page_sqlite`] and
//! [`fetch_page_mysql`] run the count and page queries and map the rows.
//!
//! Column names are `&'static str` and user supplied sort fields are only
//! used after a match against the table's allowlist. Every user value is a
//! bound `?` parameter, which both SQLite and MySQL accept.

use anyhow::{Context, Result};
use sqlx::mysql::{MySqlArguments, MySqlRow};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{MySql, MySqlPool, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::models::{Page, PageMeta, QueryParams, SortOrder};

/// Column every listing falls back to when no valid sort field is given
pub const DEFAULT_SORT_COLUMN: &str = "created_at";

/// A bound parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<Uuid> for SqlValue {
    fn from(value: Uuid) -> Self {
        SqlValue::Text(value.to_string())
    }
}

/// A single `WHERE` clause
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(&'static str, SqlValue),
    /// Case-insensitive `LIKE`; the pattern is lowercased when bound
    Like(&'static str, String),
    Gte(&'static str, SqlValue),
    Lte(&'static str, SqlValue),
    IsNull(&'static str),
    /// Fixed SQL fragment with its own placeholders
    Raw(&'static str, Vec<SqlValue>),
    /// OR group
    Any(Vec<Condition>),
}

impl Condition {
    fn render(&self, sql: &mut String, binds: &mut Vec<SqlValue>) {
        match self {
            Condition::Eq(col, value) => {
                sql.push_str(&format!("{} = ?", col));
                binds.push(value.clone());
            }
            Condition::Like(col, pattern) => {
                sql.push_str(&format!("LOWER({}) LIKE ?", col));
                binds.push(SqlValue::Text(pattern.to_lowercase()));
            }
            Condition::Gte(col, value) => {
                sql.push_str(&format!("{} >= ?", col));
                binds.push(value.clone());
            }
            Condition::Lte(col, value) => {
                sql.push_str(&format!("{} <= ?", col));
                binds.push(value.clone());
            }
            Condition::IsNull(col) => {
                sql.push_str(&format!("{} IS NULL", col));
            }
            Condition::Raw(fragment, values) => {
                sql.push_str(fragment);
                binds.extend(values.iter().cloned());
            }
            Condition::Any(conditions) => {
                if conditions.is_empty() {
                    sql.push_str("1 = 0");
                    return;
                }
                sql.push('(');
                for (i, condition) in conditions.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(" OR ");
                    }
                    condition.render(sql, binds);
                }
                sql.push(')');
            }
        }
    }
}

/// Builder for a filtered, searched, sorted and paginated listing
#[derive(Debug, Clone)]
pub struct ListQuery {
    table: &'static str,
    columns: &'static str,
    sortable: &'static [&'static str],
    conditions: Vec<Condition>,
    sort: (&'static str, SortOrder),
    page: u32,
    size: u32,
    include_deleted: bool,
}

/// SQL and binds produced by [`ListQuery::build`]
#[derive(Debug, Clone)]
pub struct BuiltQuery {
    pub count_sql: String,
    /// Page query; its last two placeholders are `LIMIT ? OFFSET ?`
    pub select_sql: String,
    pub binds: Vec<SqlValue>,
    pub page: u32,
    pub size: u32,
    pub limit: i64,
    pub offset: i64,
}

impl ListQuery {
    pub fn new(table: &'static str, columns: &'static str) -> Self {
        let defaults = QueryParams::default();
        Self {
            table,
            columns,
            sortable: &[],
            conditions: Vec::new(),
            sort: (DEFAULT_SORT_COLUMN, SortOrder::Desc),
            page: defaults.page,
            size: defaults.size,
            include_deleted: false,
        }
    }

    /// Columns a caller may sort by
    pub fn sortable(mut self, columns: &'static [&'static str]) -> Self {
        self.sortable = columns;
        self
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Equality filter; text containing `%` becomes a case-insensitive `LIKE`
    pub fn filter_eq(self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        match value.into() {
            SqlValue::Text(text) if text.contains('%') => self.filter(Condition::Like(column, text)),
            value => self.filter(Condition::Eq(column, value)),
        }
    }

    pub fn filter_opt<V: Into<SqlValue>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.filter_eq(column, value),
            None => self,
        }
    }

    /// Inclusive range filter on whichever bounds are present
    pub fn filter_range<V: Into<SqlValue>>(
        mut self,
        column: &'static str,
        min: Option<V>,
        max: Option<V>,
    ) -> Self {
        if let Some(min) = min {
            self.conditions.push(Condition::Gte(column, min.into()));
        }
        if let Some(max) = max {
            self.conditions.push(Condition::Lte(column, max.into()));
        }
        self
    }

    /// Match `term` anywhere in any of `columns`, ignoring case.
    ///
    /// Blank terms and empty column lists leave the query unchanged.
    pub fn search(self, term: Option<&str>, columns: &[&'static str]) -> Self {
        let term = match term.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return self,
        };
        if columns.is_empty() {
            return self;
        }

        let pattern = format!("%{}%", term.to_lowercase());
        let group = columns
            .iter()
            .map(|col| Condition::Like(*col, pattern.clone()))
            .collect();
        self.filter(Condition::Any(group))
    }

    /// Sort by `sort_by` when it is an allowed column.
    ///
    /// No field sorts `created_at` in the requested order; an unknown field
    /// falls back to `created_at DESC`.
    pub fn sort(mut self, sort_by: Option<&str>, order: SortOrder) -> Self {
        self.sort = match sort_by {
            None => (DEFAULT_SORT_COLUMN, order),
            Some(field) => match self.sortable.iter().find(|col| **col == field) {
                Some(col) => (*col, order),
                None => (DEFAULT_SORT_COLUMN, SortOrder::Desc),
            },
        };
        self
    }

    /// Apply page, size, search and sort from the request parameters
    pub fn paginate(mut self, params: &QueryParams, search_columns: &[&'static str]) -> Self {
        self.page = params.page;
        self.size = params.size;
        self.search(params.search_term(), search_columns)
            .sort(params.sort_by.as_deref(), params.sort_order)
    }

    /// Keep soft-deleted rows in the result
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn build(&self) -> BuiltQuery {
        let mut where_sql = String::new();
        let mut binds = Vec::new();

        let mut clauses = Vec::new();
        if !self.include_deleted {
            clauses.push("is_deleted = 0".to_string());
        }
        for condition in &self.conditions {
            let mut clause = String::new();
            condition.render(&mut clause, &mut binds);
            clauses.push(clause);
        }
        if !clauses.is_empty() {
            where_sql = format!(" WHERE {}", clauses.join(" AND "));
        }

        let (sort_col, order) = self.sort;
        let count_sql = format!("SELECT COUNT(*) FROM {}{}", self.table, where_sql);
        let select_sql = format!(
            "SELECT {} FROM {}{} ORDER BY {} {}, id {} LIMIT ? OFFSET ?",
            self.columns,
            self.table,
            where_sql,
            sort_col,
            order.as_sql(),
            order.as_sql()
        );

        let params = QueryParams::new(self.page, self.size);
        BuiltQuery {
            count_sql,
            select_sql,
            binds,
            page: self.page,
            size: self.size,
            limit: params.limit(),
            offset: params.offset(),
        }
    }
}

// ============================================================================
// Execution
// ============================================================================

fn bind_sqlite<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: &[SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            SqlValue::Text(v) => query.bind(v.clone()),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Bool(v) => query.bind(*v),
        };
    }
    query
}

fn bind_mysql<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    values: &[SqlValue],
) -> Query<'q, MySql, MySqlArguments> {
    for value in values {
        query = match value {
            SqlValue::Text(v) => query.bind(v.clone()),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Bool(v) => query.bind(*v),
        };
    }
    query
}

/// Run a built listing on SQLite
pub async fn fetch_page_sqlite<T, F>(pool: &SqlitePool, query: &BuiltQuery, map: F) -> Result<Page<T>>
where
    F: Fn(&SqliteRow) -> Result<T>,
{
    let total: i64 = bind_sqlite(sqlx::query(&query.count_sql), &query.binds)
        .fetch_one(pool)
        .await
        .context("Failed to count rows")?
        .try_get::<i64, _>(0)?;

    let rows = bind_sqlite(sqlx::query(&query.select_sql), &query.binds)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(pool)
        .await
        .context("Failed to fetch page")?;

    let items = rows.iter().map(&map).collect::<Result<Vec<_>>>()?;
    Ok(Page::new(items, PageMeta::new(query.page, query.size, total)))
}

/// Run a built listing on MySQL
pub async fn fetch_page_mysql<T, F>(pool: &MySqlPool, query: &BuiltQuery, map: F) -> Result<Page<T>>
where
    F: Fn(&MySqlRow) -> Result<T>,
{
    let total: i64 = bind_mysql(sqlx::query(&query.count_sql), &query.binds)
        .fetch_one(pool)
        .await
        .context("Failed to count rows")?
        .try_get::<i64, _>(0)?;

    let rows = bind_mysql(sqlx::query(&query.select_sql), &query.binds)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(pool)
        .await
        .context("Failed to fetch page")?;

    let items = rows.iter().map(&map).collect::<Result<Vec<_>>>()?;
    Ok(Page::new(items, PageMeta::new(query.page, query.size, total)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, DynDatabasePool};
    use proptest::prelude::*;

    const SORTABLE: &[&str] = &["created_at", "title"];

    #[test]
    fn test_default_query_excludes_deleted() {
        let built = ListQuery::new("posts", "*").build();
        assert_eq!(built.count_sql, "SELECT COUNT(*) FROM posts WHERE is_deleted = 0");
        assert_eq!(
            built.select_sql,
            "SELECT * FROM posts WHERE is_deleted = 0 ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        );
        assert!(built.binds.is_empty());
        assert_eq!((built.limit, built.offset), (10, 0));
    }

    #[test]
    fn test_include_deleted_drops_filter() {
        let built = ListQuery::new("posts", "*").include_deleted().build();
        assert_eq!(built.count_sql, "SELECT COUNT(*) FROM posts");
    }

    #[test]
    fn test_filter_eq_with_percent_becomes_like() {
        let built = ListQuery::new("posts", "*")
            .filter_eq("title", "Hello%")
            .filter_eq("is_published", true)
            .build();
        assert!(built.count_sql.contains("LOWER(title) LIKE ?"));
        assert!(built.count_sql.contains("is_published = ?"));
        assert_eq!(
            built.binds,
            vec![SqlValue::Text("hello%".to_string()), SqlValue::Bool(true)]
        );
    }

    #[test]
    fn test_filter_opt_skips_none() {
        let built = ListQuery::new("posts", "*")
            .filter_opt::<bool>("is_published", None)
            .build();
        assert!(built.binds.is_empty());
    }

    #[test]
    fn test_filter_range_partial_bounds() {
        let built = ListQuery::new("products", "*")
            .filter_range("price", Some(5.0), None)
            .build();
        assert!(built.count_sql.contains("price >= ?"));
        assert!(!built.count_sql.contains("price <= ?"));
        assert_eq!(built.binds, vec![SqlValue::Float(5.0)]);
    }

    #[test]
    fn test_search_builds_or_group() {
        let built = ListQuery::new("posts", "*")
            .search(Some("  Rust "), &["title", "content"])
            .build();
        assert!(built
            .count_sql
            .contains("(LOWER(title) LIKE ? OR LOWER(content) LIKE ?)"));
        assert_eq!(built.binds.len(), 2);
        assert_eq!(built.binds[0], SqlValue::Text("%rust%".to_string()));
    }

    #[test]
    fn test_blank_search_is_ignored() {
        let built = ListQuery::new("posts", "*")
            .search(Some("   "), &["title"])
            .search(Some("x"), &[])
            .search(None, &["title"])
            .build();
        assert!(built.binds.is_empty());
        assert!(!built.count_sql.contains("LIKE"));
    }

    #[test]
    fn test_sort_allowed_column() {
        let built = ListQuery::new("posts", "*")
            .sortable(SORTABLE)
            .sort(Some("title"), SortOrder::Asc)
            .build();
        assert!(built.select_sql.contains("ORDER BY title ASC, id ASC"));
    }

    #[test]
    fn test_sort_unknown_column_falls_back() {
        let built = ListQuery::new("posts", "*")
            .sortable(SORTABLE)
            .sort(Some("password; DROP TABLE posts"), SortOrder::Asc)
            .build();
        assert!(built.select_sql.contains("ORDER BY created_at DESC, id DESC"));
        assert!(!built.select_sql.contains("DROP"));
    }

    #[test]
    fn test_sort_without_field_uses_requested_order() {
        let built = ListQuery::new("posts", "*").sort(None, SortOrder::Asc).build();
        assert!(built.select_sql.contains("ORDER BY created_at ASC"));
    }

    #[test]
    fn test_paginate_sets_offset() {
        let params = QueryParams::new(3, 20).with_search("abc");
        let built = ListQuery::new("posts", "*")
            .paginate(&params, &["title"])
            .build();
        assert_eq!(built.limit, 20);
        assert_eq!(built.offset, 40);
        assert_eq!(built.page, 3);
        assert_eq!(built.binds, vec![SqlValue::Text("%abc%".to_string())]);
    }

    #[test]
    fn test_raw_and_any_conditions() {
        let built = ListQuery::new("posts", "*")
            .filter(Condition::Raw(
                "id IN (SELECT post_id FROM post_tags WHERE tag_id = ?)",
                vec![SqlValue::Text("t".to_string())],
            ))
            .filter(Condition::Any(vec![
                Condition::Eq("is_published", SqlValue::Bool(true)),
                Condition::IsNull("published_at"),
            ]))
            .build();
        assert!(built.count_sql.contains(
            "id IN (SELECT post_id FROM post_tags WHERE tag_id = ?) AND (is_published = ? OR published_at IS NULL)"
        ));
        assert_eq!(built.binds.len(), 2);
    }

    #[test]
    fn test_empty_any_matches_nothing() {
        let built = ListQuery::new("posts", "*")
            .filter(Condition::Any(Vec::new()))
            .build();
        assert!(built.count_sql.ends_with("1 = 0"));
    }

    async fn setup_items(count: i64) -> DynDatabasePool {
        let pool = create_test_pool().await.unwrap();
        let sqlite = pool.as_sqlite().unwrap();
        sqlx::query(
            "CREATE TABLE items (id TEXT PRIMARY KEY, name TEXT NOT NULL, created_at TEXT NOT NULL, is_deleted INTEGER NOT NULL DEFAULT 0)",
        )
        .execute(sqlite)
        .await
        .unwrap();
        for i in 0..count {
            sqlx::query("INSERT INTO items (id, name, created_at, is_deleted) VALUES (?, ?, ?, ?)")
                .bind(format!("id-{:03}", i))
                .bind(format!("Item {}", i))
                .bind(format!("2024-01-01T00:00:{:02}Z", i % 60))
                .bind(i % 5 == 4)
                .execute(sqlite)
                .await
                .unwrap();
        }
        pool
    }

    #[tokio::test]
    async fn test_fetch_page_sqlite_respects_size_and_total() {
        let pool = setup_items(25).await;

        let built = ListQuery::new("items", "id, name")
            .paginate(&QueryParams::new(2, 7), &[])
            .build();
        let page = fetch_page_sqlite(pool.as_sqlite().unwrap(), &built, |row| Ok(row.get::<String, _>("name")))
            .await
            .unwrap();

        // 25 rows, every fifth soft-deleted
        assert_eq!(page.meta.total, 20);
        assert_eq!(page.meta.pages, 3);
        assert_eq!(page.items.len(), 7);
        assert!(page.meta.has_next);
        assert!(page.meta.has_prev);
    }

    #[tokio::test]
    async fn test_fetch_page_sqlite_search_is_case_insensitive() {
        let pool = setup_items(12).await;

        let params = QueryParams::new(1, 10).with_search("ITEM 1");
        let built = ListQuery::new("items", "id, name")
            .paginate(&params, &["name"])
            .build();
        let page = fetch_page_sqlite(pool.as_sqlite().unwrap(), &built, |row| Ok(row.get::<String, _>("name")))
            .await
            .unwrap();

        // "Item 1", "Item 10", "Item 11"
        assert_eq!(page.meta.total, 3);
    }

    #[tokio::test]
    async fn test_fetch_page_past_end_is_empty() {
        let pool = setup_items(3).await;
        let built = ListQuery::new("items", "id")
            .paginate(&QueryParams::new(5, 10), &[])
            .build();
        let page = fetch_page_sqlite(pool.as_sqlite().unwrap(), &built, |row| Ok(row.get::<String, _>("id")))
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.meta.total, 3);
        assert!(!page.meta.has_next);
    }

    proptest! {
        #[test]
        fn prop_placeholders_match_binds(
            search in proptest::option::of("[a-zA-Z ]{0,12}"),
            published in proptest::option::of(any::<bool>()),
            min in proptest::option::of(0.0f64..1000.0),
            max in proptest::option::of(0.0f64..1000.0),
        ) {
            let built = ListQuery::new("products", "*")
                .filter_opt("is_active", published)
                .filter_range("price", min, max)
                .search(search.as_deref(), &["name", "sku"])
                .build();

            let placeholders = built.count_sql.matches('?').count();
            prop_assert_eq!(placeholders, built.binds.len());
            prop_assert_eq!(built.select_sql.matches('?').count(), built.binds.len() + 2);
        }

        #[test]
        fn prop_sort_never_uses_unlisted_column(field in "[a-z_;]{1,20}") {
            let built = ListQuery::new("posts", "*")
                .sortable(SORTABLE)
                .sort(Some(&field), SortOrder::Asc)
                .build();
            let order_by = built.select_sql.split("ORDER BY ").nth(1).unwrap().to_string();
            let column = order_by.split(' ').next().unwrap();
            prop_assert!(SORTABLE.contains(&column));
        }
    }
}
