//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Sagas table schema.
#[derive(Iden)]
pub enum Sagas {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "saga_type"]
    SagaType,
    #[iden = "status"]
    Status,
    #[iden = "version"]
    Version,
    #[iden = "document"]
    Document,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// SQL for creating the sagas table.
pub const CREATE_SAGAS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sagas (
    id TEXT PRIMARY KEY NOT NULL,
    saga_type TEXT NOT NULL,
    status TEXT NOT NULL,
    version INTEGER NOT NULL,
    document TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sagas_status ON sagas(status);
"#;
