//! SQLite StatusStore implementation.
//!
//! Each saga is one row holding the JSON document plus the columns needed
//! for filtering and the optimistic concurrency check.

use async_trait::async_trait;
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::model::{SagaInstance, SagaStatus};
use crate::storage::schema::{Sagas, CREATE_SAGAS_TABLE};
use crate::storage::{Result, StatusStore, StoreError};

/// SQLite implementation of StatusStore.
pub struct SqliteStatusStore {
    pool: SqlitePool,
}

impl SqliteStatusStore {
    /// Create a new SQLite status store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_SAGAS_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    async fn current_version(&self, id: Uuid) -> Result<Option<u64>> {
        let query = Query::select()
            .column(Sagas::Version)
            .from(Sagas::Table)
            .and_where(Expr::col(Sagas::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        Ok(row.map(|row| {
            let version: i64 = row.get(0);
            version as u64
        }))
    }
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<SagaInstance> {
    let document: String = row.try_get(0)?;
    Ok(serde_json::from_str(&document)?)
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    async fn insert(&self, saga: &SagaInstance) -> Result<()> {
        let document = serde_json::to_string(saga)?;

        let query = Query::insert()
            .into_table(Sagas::Table)
            .columns([
                Sagas::Id,
                Sagas::SagaType,
                Sagas::Status,
                Sagas::Version,
                Sagas::Document,
                Sagas::CreatedAt,
                Sagas::UpdatedAt,
            ])
            .values_panic([
                saga.id.to_string().into(),
                saga.saga_type.clone().into(),
                saga.status.as_str().into(),
                (saga.version as i64).into(),
                document.into(),
                saga.created_at.to_rfc3339().into(),
                saga.updated_at.to_rfc3339().into(),
            ])
            .to_string(SqliteQueryBuilder);

        match sqlx::query(&query).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::AlreadyExists(saga.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<SagaInstance>> {
        let query = Query::select()
            .column(Sagas::Document)
            .from(Sagas::Table)
            .and_where(Expr::col(Sagas::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(decode).transpose()
    }

    async fn update(&self, saga: &mut SagaInstance) -> Result<()> {
        let expected = saga.version;
        let mut next = saga.clone();
        next.version = expected + 1;
        let document = serde_json::to_string(&next)?;

        let query = Query::update()
            .table(Sagas::Table)
            .values([
                (Sagas::Status, next.status.as_str().into()),
                (Sagas::Version, (next.version as i64).into()),
                (Sagas::Document, document.into()),
                (Sagas::UpdatedAt, next.updated_at.to_rfc3339().into()),
            ])
            .and_where(Expr::col(Sagas::Id).eq(saga.id.to_string()))
            .and_where(Expr::col(Sagas::Version).eq(expected as i64))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return match self.current_version(saga.id).await? {
                None => Err(StoreError::NotFound(saga.id)),
                Some(actual) => Err(StoreError::VersionConflict {
                    id: saga.id,
                    expected,
                    actual,
                }),
            };
        }

        saga.version = next.version;
        Ok(())
    }

    async fn list(&self, status: Option<SagaStatus>) -> Result<Vec<SagaInstance>> {
        // SelectStatement is not Send; render it before the first await.
        let query = {
            let mut select = Query::select();
            select
                .column(Sagas::Document)
                .from(Sagas::Table)
                .order_by(Sagas::CreatedAt, Order::Desc);
            if let Some(status) = status {
                select.and_where(Expr::col(Sagas::Status).eq(status.as_str()));
            }
            select.to_string(SqliteQueryBuilder)
        };

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(decode).collect()
    }
}
