//! System CRUD (spec §3 "System", §4.2 deletion guard).

use shepherd_core::domain::System;
use snafu::OptionExt;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{DeletionBlockedSnafu, NotFoundSnafu, Result};

fn from_row(row: sqlx::postgres::PgRow) -> Result<System> {
    use sqlx::Row;
    Ok(System {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        owner: row.try_get("owner")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn create(conn: &mut PgConnection, name: &str, description: &str, owner: &str) -> Result<System> {
    let row = sqlx::query(
        "INSERT INTO systems (name, description, owner) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(name)
    .bind(description)
    .bind(owner)
    .fetch_one(&mut *conn)
    .await?;
    from_row(row)
}

pub async fn get(conn: &mut PgConnection, id: Uuid) -> Result<System> {
    let row = sqlx::query("SELECT * FROM systems WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .context(NotFoundSnafu {
            what: format!("system {id}"),
        })?;
    from_row(row)
}

/// Spec §3: "Cannot be deleted while any child Service exists."
pub async fn delete(conn: &mut PgConnection, id: Uuid) -> Result<()> {
    let child_count: i64 = sqlx::query_scalar("SELECT count(*) FROM services WHERE system_id = $1")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    if child_count > 0 {
        return DeletionBlockedSnafu {
            parent: format!("system {id}"),
            child_kind: "services".to_string(),
        }
        .fail();
    }
    sqlx::query("DELETE FROM systems WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
