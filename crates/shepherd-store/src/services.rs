//! Service CRUD and instance-index allocation (spec §3 "Service", §4.5, §5).

use shepherd_core::domain::Service;
use snafu::OptionExt;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{DeletionBlockedSnafu, NotFoundSnafu, Result};

fn from_row(row: sqlx::postgres::PgRow) -> Result<Service> {
    use sqlx::Row;
    Ok(Service {
        id: row.try_get("id")?,
        system_id: row.try_get("system_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        next_instance_index: row.try_get("next_instance_index")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn create(
    conn: &mut PgConnection,
    system_id: Uuid,
    name: &str,
    description: &str,
) -> Result<Service> {
    let row = sqlx::query(
        "INSERT INTO services (system_id, name, description) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(system_id)
    .bind(name)
    .bind(description)
    .fetch_one(&mut *conn)
    .await?;
    from_row(row)
}

pub async fn get(conn: &mut PgConnection, id: Uuid) -> Result<Service> {
    let row = sqlx::query("SELECT * FROM services WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .context(NotFoundSnafu {
            what: format!("service {id}"),
        })?;
    from_row(row)
}

/// Spec §3: "Cannot be deleted while any child VM exists."
pub async fn delete(conn: &mut PgConnection, id: Uuid) -> Result<()> {
    let child_count: i64 = sqlx::query_scalar("SELECT count(*) FROM vms WHERE service_id = $1")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    if child_count > 0 {
        return DeletionBlockedSnafu {
            parent: format!("service {id}"),
            child_kind: "vms".to_string(),
        }
        .fail();
    }
    sqlx::query("DELETE FROM services WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Allocates the next instance index for `service_id` via the conditional
/// `UPDATE ... RETURNING old` named in spec §4.5 and §5 — the sole
/// per-Service monotonic counter, guaranteeing uniqueness without a separate
/// lock table. Must be called inside the approval transaction.
pub async fn allocate_instance_index(conn: &mut PgConnection, service_id: Uuid) -> Result<i64> {
    let allocated: i64 = sqlx::query_scalar(
        "UPDATE services SET next_instance_index = next_instance_index + 1, updated_at = now()
         WHERE id = $1
         RETURNING next_instance_index - 1",
    )
    .bind(service_id)
    .fetch_optional(&mut *conn)
    .await?
    .context(NotFoundSnafu {
        what: format!("service {service_id}"),
    })?;
    Ok(allocated)
}
