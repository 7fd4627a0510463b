//! VM resource row lifecycle (spec §3 "VM", §4.7, §9.1 tombstone resolution).

use shepherd_core::domain::{Vm, VmStatus};
use snafu::OptionExt;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{decode_enum, NotFoundSnafu, Result};

fn from_row(row: sqlx::postgres::PgRow) -> Result<Vm> {
    use sqlx::Row;
    let status_raw: String = row.try_get("status")?;
    Ok(Vm {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        service_id: row.try_get("service_id")?,
        instance_index: row.try_get("instance_index")?,
        namespace: row.try_get("namespace")?,
        cluster_id: row.try_get("cluster_id")?,
        hostname: row.try_get("hostname")?,
        ticket_id: row.try_get("ticket_id")?,
        status: decode_enum::<VmStatus>("status", &status_raw)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Inserts the VM row at `status=CREATING`, per spec §4.5's approve
/// transaction. Only ever reached for APPROVED create tickets (invariant 4).
#[allow(clippy::too_many_arguments)]
pub async fn insert_creating(
    conn: &mut PgConnection,
    name: &str,
    service_id: Uuid,
    instance_index: i64,
    namespace: &str,
    cluster_id: Uuid,
    ticket_id: Uuid,
) -> Result<Vm> {
    let row = sqlx::query(
        "INSERT INTO vms (name, service_id, instance_index, namespace, cluster_id, ticket_id, status)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING *",
    )
    .bind(name)
    .bind(service_id)
    .bind(instance_index)
    .bind(namespace)
    .bind(cluster_id)
    .bind(ticket_id)
    .bind(VmStatus::Creating.to_string())
    .fetch_one(&mut *conn)
    .await?;
    from_row(row)
}

pub async fn get(conn: &mut PgConnection, id: Uuid) -> Result<Vm> {
    let row = sqlx::query("SELECT * FROM vms WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .context(NotFoundSnafu {
            what: format!("vm {id}"),
        })?;
    from_row(row)
}

/// Looks up the VM row created for `ticket_id`'s approval (spec §4.7 step
/// 4: the worker re-derives its resource row from the ticket, not from the
/// queue job's own args).
pub async fn get_by_ticket(conn: &mut PgConnection, ticket_id: Uuid) -> Result<Vm> {
    let row = sqlx::query("SELECT * FROM vms WHERE ticket_id = $1")
        .bind(ticket_id)
        .fetch_optional(&mut *conn)
        .await?
        .context(NotFoundSnafu {
            what: format!("vm for ticket {ticket_id}"),
        })?;
    from_row(row)
}

pub async fn set_status(conn: &mut PgConnection, id: Uuid, status: VmStatus) -> Result<()> {
    sqlx::query("UPDATE vms SET status = $1, updated_at = now() WHERE id = $2")
        .bind(status.to_string())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_hostname(conn: &mut PgConnection, id: Uuid, hostname: Option<&str>) -> Result<()> {
    sqlx::query("UPDATE vms SET hostname = $1, updated_at = now() WHERE id = $2")
        .bind(hostname)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Sweeps `DELETED` tombstones older than `retention` (the Open Question
/// resolution in SPEC_FULL.md §9.1), driven by the `vm_tombstone_sweep`
/// maintenance job.
pub async fn sweep_tombstones(conn: &mut PgConnection, retention: chrono::Duration) -> Result<u64> {
    let cutoff = chrono::Utc::now() - retention;
    let result = sqlx::query("DELETE FROM vms WHERE status = $1 AND updated_at < $2")
        .bind(VmStatus::Deleted.to_string())
        .bind(cutoff)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
