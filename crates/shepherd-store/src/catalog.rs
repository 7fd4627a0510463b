//! Read-side lookups for the reference tables spec §6 names but does not
//! otherwise specify the shape of (Template, InstanceSize, Cluster,
//! Namespace). These are plain rows, not domain entities with their own
//! lifecycle rules, so they live outside `shepherd-core::domain`.

use serde_json::Value as Json;
use snafu::OptionExt;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{NotFoundSnafu, Result};

#[derive(Debug, Clone)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub spec: Json,
}

#[derive(Debug, Clone)]
pub struct InstanceSize {
    pub id: Uuid,
    pub name: String,
    pub spec_overrides: Json,
}

#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: Uuid,
    pub name: String,
    pub environment: String,
    pub kubeconfig_secret_ref: String,
}

#[derive(Debug, Clone)]
pub struct Namespace {
    pub id: Uuid,
    pub name: String,
    pub environment: String,
}

pub async fn get_template(conn: &mut PgConnection, id: Uuid) -> Result<Template> {
    use sqlx::Row;
    let row = sqlx::query("SELECT * FROM templates WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .context(NotFoundSnafu {
            what: format!("template {id}"),
        })?;
    Ok(Template {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        version: row.try_get("version")?,
        spec: row.try_get("spec")?,
    })
}

pub async fn get_instance_size(conn: &mut PgConnection, id: Uuid) -> Result<InstanceSize> {
    use sqlx::Row;
    let row = sqlx::query("SELECT * FROM instance_sizes WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .context(NotFoundSnafu {
            what: format!("instance size {id}"),
        })?;
    Ok(InstanceSize {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        spec_overrides: row.try_get("spec_overrides")?,
    })
}

pub async fn get_cluster(conn: &mut PgConnection, id: Uuid) -> Result<Cluster> {
    use sqlx::Row;
    let row = sqlx::query("SELECT * FROM clusters WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .context(NotFoundSnafu {
            what: format!("cluster {id}"),
        })?;
    Ok(Cluster {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        environment: row.try_get("environment")?,
        kubeconfig_secret_ref: row.try_get("kubeconfig_secret_ref")?,
    })
}

/// Every registered cluster, used by `shepherd-cli` at startup to build one
/// `kube::Client` per cluster id (spec §6's `DetectCapabilities`/provider
/// wiring; the kubeconfig bootstrap plumbing itself is out of scope, spec
/// §1).
pub async fn list_clusters(conn: &mut PgConnection) -> Result<Vec<Cluster>> {
    use sqlx::Row;
    let rows = sqlx::query("SELECT * FROM clusters ORDER BY name").fetch_all(&mut *conn).await?;
    rows.into_iter()
        .map(|row| {
            Ok(Cluster {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                environment: row.try_get("environment")?,
                kubeconfig_secret_ref: row.try_get("kubeconfig_secret_ref")?,
            })
        })
        .collect()
}

pub async fn get_namespace_by_name(conn: &mut PgConnection, name: &str) -> Result<Namespace> {
    use sqlx::Row;
    let row = sqlx::query("SELECT * FROM namespaces WHERE name = $1")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?
        .context(NotFoundSnafu {
            what: format!("namespace {name}"),
        })?;
    Ok(Namespace {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        environment: row.try_get("environment")?,
    })
}
