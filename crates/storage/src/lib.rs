//! Local SQLite record store speaking the same data-client contract as the
//! managed backend.
//!
//! Every collection lives in one `records` table as JSON documents keyed by
//! `(collection, id)`. Equality filters, projections, relationship embeds
//! and the delete cascades of the managed backend are evaluated here, so the
//! client core can run offline or under test without a network.

use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use shared::{
    contract::DataClient,
    error::{BackendError, ErrorCode},
    protocol::{Cardinality, Collection, Columns, DataRequest, Embed, Filter, Projection},
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite, SqliteConnection,
};
use tracing::debug;
use uuid::Uuid;

/// Deleting a `parent` row deletes every `child` row whose `column` holds
/// the parent's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeRule {
    pub parent: Collection,
    pub child: Collection,
    pub column: &'static str,
}

pub const DEFAULT_CASCADES: &[CascadeRule] = &[
    CascadeRule {
        parent: Collection::Teams,
        child: Collection::Projects,
        column: "team_id",
    },
    CascadeRule {
        parent: Collection::Teams,
        child: Collection::TeamMembers,
        column: "team_id",
    },
    CascadeRule {
        parent: Collection::Projects,
        child: Collection::Sections,
        column: "project_id",
    },
    CascadeRule {
        parent: Collection::Projects,
        child: Collection::Tasks,
        column: "project_id",
    },
    CascadeRule {
        parent: Collection::Sections,
        child: Collection::Tasks,
        column: "section_id",
    },
    CascadeRule {
        parent: Collection::Tasks,
        child: Collection::Tasks,
        column: "parent_task_id",
    },
];

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

struct StoredRow {
    id: String,
    body: Value,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let in_memory = database_url.starts_with("sqlite::memory:");
        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // An in-memory database lives and dies with its single connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(connect_options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn count(&self, collection: Collection) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(collection.as_str())
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("failed to count {collection}"))?;
        Ok(count)
    }

    async fn select(
        &self,
        collection: Collection,
        filter: Filter,
        projection: &Projection,
    ) -> Result<Vec<Value>, BackendError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let rows = resolve(&mut *conn, collection, filter, &projection.embeds).await?;
        Ok(rows
            .into_iter()
            .map(|row| project(row, projection))
            .collect())
    }

    async fn insert(
        &self,
        collection: Collection,
        rows: Vec<Value>,
    ) -> Result<Vec<Value>, BackendError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            let row = prepare_insert(collection, row)?;
            let id = row_id(&row)?;
            sqlx::query("INSERT INTO records (collection, id, body) VALUES (?, ?, ?)")
                .bind(collection.as_str())
                .bind(&id)
                .bind(row.to_string())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            inserted.push(row);
        }
        tx.commit().await.map_err(db_err)?;
        debug!(%collection, rows = inserted.len(), "inserted records");
        Ok(inserted)
    }

    async fn update(
        &self,
        collection: Collection,
        filter: Filter,
        patch: Value,
    ) -> Result<Vec<Value>, BackendError> {
        let Value::Object(fields) = patch else {
            return Err(BackendError::validation("update patch must be an object"));
        };
        if fields.contains_key("id") {
            return Err(BackendError::validation("id is immutable"));
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let rows = load_rows(&mut *tx, collection, &filter).await?;
        let mut updated = Vec::with_capacity(rows.len());
        for StoredRow { id, mut body } in rows {
            if let Value::Object(existing) = &mut body {
                for (key, value) in &fields {
                    existing.insert(key.clone(), value.clone());
                }
            }
            sqlx::query("UPDATE records SET body = ? WHERE collection = ? AND id = ?")
                .bind(body.to_string())
                .bind(collection.as_str())
                .bind(&id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            updated.push(body);
        }
        tx.commit().await.map_err(db_err)?;
        debug!(%collection, rows = updated.len(), "updated records");
        Ok(updated)
    }

    async fn delete(&self, collection: Collection, filter: Filter) -> Result<(), BackendError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut pending = VecDeque::from([(collection, filter)]);
        let mut removed = 0usize;

        while let Some((collection, filter)) = pending.pop_front() {
            let rows = load_rows(&mut *tx, collection, &filter).await?;
            for row in rows {
                sqlx::query("DELETE FROM records WHERE collection = ? AND id = ?")
                    .bind(collection.as_str())
                    .bind(&row.id)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
                removed += 1;

                for rule in DEFAULT_CASCADES.iter().filter(|rule| rule.parent == collection) {
                    pending.push_back((rule.child, Filter::new().eq(rule.column, &row.id)));
                }
            }
        }

        tx.commit().await.map_err(db_err)?;
        debug!(%collection, removed, "deleted records");
        Ok(())
    }
}

#[async_trait]
impl DataClient for Storage {
    async fn execute(&self, request: DataRequest) -> Result<Vec<Value>, BackendError> {
        debug!(
            method = request.method(),
            collection = %request.collection(),
            "local store request"
        );
        match request {
            DataRequest::Select {
                collection,
                filter,
                projection,
            } => self.select(collection, filter, &projection).await,
            DataRequest::Insert { collection, rows } => self.insert(collection, rows).await,
            DataRequest::Update {
                collection,
                filter,
                patch,
            } => self.update(collection, filter, patch).await,
            DataRequest::Delete { collection, filter } => {
                self.delete(collection, filter).await?;
                Ok(Vec::new())
            }
        }
    }
}

async fn load_rows(
    conn: &mut SqliteConnection,
    collection: Collection,
    filter: &Filter,
) -> Result<Vec<StoredRow>, BackendError> {
    let records = match filter.get("id").and_then(Value::as_str) {
        Some(id) => {
            sqlx::query("SELECT id, body FROM records WHERE collection = ? AND id = ? ORDER BY seq")
                .bind(collection.as_str())
                .bind(id)
                .fetch_all(&mut *conn)
                .await
        }
        None => {
            sqlx::query("SELECT id, body FROM records WHERE collection = ? ORDER BY seq")
                .bind(collection.as_str())
                .fetch_all(&mut *conn)
                .await
        }
    }
    .map_err(db_err)?;

    let mut rows = Vec::new();
    for record in records {
        let id: String = record.try_get("id").map_err(db_err)?;
        let body: String = record.try_get("body").map_err(db_err)?;
        let body: Value = serde_json::from_str(&body)?;
        if filter.matches(&body) {
            rows.push(StoredRow { id, body });
        }
    }
    Ok(rows)
}

/// Loads rows with their embeds attached. Column projection of the parent is
/// left to the caller so join columns stay available while resolving.
fn resolve<'a>(
    conn: &'a mut SqliteConnection,
    collection: Collection,
    filter: Filter,
    embeds: &'a [Embed],
) -> BoxFuture<'a, Result<Vec<Value>, BackendError>> {
    async move {
        let rows = load_rows(&mut *conn, collection, &filter).await?;

        let mut related = Vec::with_capacity(embeds.len());
        for embed in embeds {
            let children = resolve(
                &mut *conn,
                embed.collection,
                Filter::new(),
                &embed.projection.embeds,
            )
            .await?;
            related.push(children);
        }

        let mut resolved = Vec::with_capacity(rows.len());
        'rows: for StoredRow { mut body, .. } in rows {
            for (embed, children) in embeds.iter().zip(&related) {
                let key = body.get(&embed.join.local).cloned().unwrap_or(Value::Null);
                let matched: Vec<Value> = if key.is_null() {
                    Vec::new()
                } else {
                    children
                        .iter()
                        .filter(|child| child.get(&embed.join.foreign) == Some(&key))
                        .map(|child| project(child.clone(), &embed.projection))
                        .collect()
                };

                let value = match embed.cardinality {
                    Cardinality::One => matched.into_iter().next().unwrap_or(Value::Null),
                    Cardinality::Many => Value::Array(matched),
                };
                let missing = value.is_null() || value.as_array().is_some_and(Vec::is_empty);
                if embed.inner && missing {
                    continue 'rows;
                }
                if let Value::Object(fields) = &mut body {
                    fields.insert(embed.alias.clone(), value);
                }
            }
            resolved.push(body);
        }
        Ok(resolved)
    }
    .boxed()
}

fn project(row: Value, projection: &Projection) -> Value {
    let Columns::Only(columns) = &projection.columns else {
        return row;
    };
    let Value::Object(fields) = row else {
        return row;
    };

    let keep = |key: &String| {
        columns.contains(key) || projection.embeds.iter().any(|embed| &embed.alias == key)
    };
    Value::Object(fields.into_iter().filter(|(key, _)| keep(key)).collect())
}

fn prepare_insert(collection: Collection, row: Value) -> Result<Value, BackendError> {
    let Value::Object(mut fields) = row else {
        return Err(BackendError::validation(format!(
            "{collection} rows must be objects"
        )));
    };

    if fields.get("id").map_or(true, Value::is_null) {
        fields.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
    }
    fields
        .entry("created_at")
        .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
    apply_column_defaults(collection, &mut fields);

    Ok(Value::Object(fields))
}

fn apply_column_defaults(collection: Collection, fields: &mut Map<String, Value>) {
    let defaults: Vec<(&str, Value)> = match collection {
        Collection::Tasks => vec![("completed", false.into()), ("is_subtask", false.into())],
        Collection::Projects => vec![("privacy", "private".into())],
        _ => Vec::new(),
    };
    for (column, value) in defaults {
        fields.entry(column).or_insert(value);
    }
}

fn row_id(row: &Value) -> Result<String, BackendError> {
    row.get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BackendError::validation("record id must be a string"))
}

fn db_err(err: sqlx::Error) -> BackendError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return BackendError::new(ErrorCode::Conflict, db.message().to_string());
        }
    }
    BackendError::internal(format!("sqlite error: {err}"))
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
