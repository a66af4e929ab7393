//! The state store saves everything the daemon must remember across
//! restarts: containers, networks, attachments, volume mounts, filesystem
//! baselines and the subnet-allocation cursor.
//!
//! SQLite is the backing store, accessed through diesel on a single
//! connection. The connection lives behind a mutex and every operation is
//! executed on the blocking pool, so the store is one serialisation
//! domain: row-level operations are atomic, and the one compound
//! primitive — allocate-and-reserve an IP — runs inside an immediate
//! transaction backed by the `(network_id, ip)` unique index.

pub(crate) mod rows;
pub(crate) mod schema;

use std::{
    collections::HashSet,
    net::Ipv4Addr,
    path::Path,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use diesel::{
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
    sqlite::SqliteConnection,
};
use diesel_migrations::{
    embed_migrations,
    EmbeddedMigrations,
    MigrationHarness,
};
use parking_lot::Mutex;
use snafu::Snafu;

use self::{
    rows::{
        AllocatorRow,
        AttachmentRow,
        BaselineRow,
        ContainerRow,
        NetworkRow,
        VolumeMountRow,
    },
    schema::{
        allocator_state,
        containers,
        filesystem_baselines,
        network_attachments,
        networks,
        volume_mounts,
    },
};
use crate::{core::Container, diff::BaselineEntry, network::NetworkRecord};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

/// First byte tried by the subnet auto-allocator (172.18.0.0/16).
pub const SUBNET_BYTE_FIRST: u8 = 18;
/// Last byte usable by the subnet auto-allocator (172.31.0.0/16).
pub const SUBNET_BYTE_LAST: u8 = 31;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum StoreError {
    #[snafu(display("failed to open state store at {}: {}", path, source))]
    Open {
        path: String,
        source: diesel::ConnectionError,
    },
    #[snafu(display("failed to run schema migrations: {}", message))]
    Migrate {
        message: String,
    },
    #[snafu(context(false), display("state store query failed: {}", source))]
    Query {
        source: DieselError,
    },
    #[snafu(display("name '{}' is already taken by {}", name, holder))]
    NameTaken {
        name: String,
        holder: String,
    },
    #[snafu(display("address {} is already in use", ip))]
    IpTaken {
        ip: String,
    },
    #[snafu(display("no free address left in network {}", network))]
    NoFreeAddress {
        network: String,
    },
    #[snafu(display("failed to encode row payload: {}", source))]
    Serde {
        source: serde_json::Error,
    },
    #[snafu(display("state store row is corrupt: {}", reason))]
    Corrupt {
        reason: String,
    },
    #[snafu(display("state store task failed: {}", source))]
    Join {
        source: tokio::task::JoinError,
    },
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Persisted (container, network) attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRecord {
    pub network_id: String,
    pub container_id: String,
    pub ip: Ipv4Addr,
    pub mac: String,
    pub aliases: Vec<String>,
    /// Per-container network ordinal; stable across restarts.
    pub index: u32,
    pub attached_at: DateTime<Utc>,
}

/// Persisted volume mount of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMountRecord {
    pub container_id: String,
    pub volume_name: String,
    pub destination: String,
    pub anonymous: bool,
}

/// Input of the atomic allocate-and-reserve-IP primitive. The range is
/// inclusive, addresses as host-order integers.
#[derive(Debug, Clone)]
pub struct AllocateAttachment {
    pub network_id: String,
    pub container_id: String,
    pub mac: String,
    pub aliases: Vec<String>,
    pub range_start: u32,
    pub range_end: u32,
    pub gateway: u32,
    pub requested: Option<u32>,
}

pub struct StateStore {
    db: Arc<Mutex<SqliteConnection>>,
}

impl StateStore {
    /// Open (or create) the database and bring the schema up to date.
    pub fn open(path: &Path) -> Result<StateStore> {
        let url = path.display().to_string();
        Self::establish(&url)
    }

    /// Private in-memory store; unit tests only.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<StateStore> {
        Self::establish(":memory:")
    }

    fn establish(url: &str) -> Result<StateStore> {
        let mut conn =
            SqliteConnection::establish(url).map_err(|e| StoreError::Open {
                path: url.to_string(),
                source: e,
            })?;
        diesel::sql_query("PRAGMA foreign_keys = ON").execute(&mut conn)?;
        diesel::sql_query("PRAGMA busy_timeout = 5000").execute(&mut conn)?;
        conn.run_pending_migrations(MIGRATIONS).map_err(|e| {
            StoreError::Migrate {
                message: e.to_string(),
            }
        })?;
        info!("state store ready at {}", url);
        Ok(StateStore {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Join { source: e })?
    }

    fn name_taken(
        conn: &mut SqliteConnection,
        name: String,
        original: DieselError,
    ) -> StoreError {
        let is_name = matches!(
            &original,
            DieselError::DatabaseError(
                DatabaseErrorKind::UniqueViolation,
                info,
            ) if info.message().contains(".name")
        );
        if !is_name {
            return StoreError::Query { source: original };
        }
        let holder: String = containers::table
            .filter(containers::name.eq(&name))
            .select(containers::docker_id)
            .first(conn)
            .optional()
            .ok()
            .flatten()
            .unwrap_or_default();
        StoreError::NameTaken { name, holder }
    }

    // === containers ===

    /// Insert a new container; the unique name index is the reservation.
    pub async fn insert_container(&self, container: &Container) -> Result<()> {
        let row = ContainerRow::from_domain(container)?;
        let name = container.name.clone();
        self.with_conn(move |conn| {
            diesel::insert_into(containers::table)
                .values(&row)
                .execute(conn)
                .map_err(|e| Self::name_taken(conn, name, e))?;
            Ok(())
        })
        .await
    }

    /// Persist the current state of a container.
    pub async fn upsert_container(&self, container: &Container) -> Result<()> {
        let row = ContainerRow::from_domain(container)?;
        self.with_conn(move |conn| {
            diesel::insert_into(containers::table)
                .values(&row)
                .on_conflict(containers::docker_id)
                .do_update()
                .set(&row)
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    /// Rename; surfaces the uniqueness constraint as `NameTaken`.
    pub async fn rename_container(
        &self,
        docker_id: &str,
        new_name: &str,
    ) -> Result<()> {
        let id = docker_id.to_string();
        let name = new_name.to_string();
        self.with_conn(move |conn| {
            diesel::update(containers::table.find(&id))
                .set(containers::name.eq(&name))
                .execute(conn)
                .map_err(|e| Self::name_taken(conn, name, e))?;
            Ok(())
        })
        .await
    }

    pub async fn get_container(
        &self,
        docker_id: &str,
    ) -> Result<Option<Container>> {
        let id = docker_id.to_string();
        self.with_conn(move |conn| {
            containers::table
                .find(&id)
                .first::<ContainerRow>(conn)
                .optional()?
                .map(ContainerRow::into_domain)
                .transpose()
        })
        .await
    }

    pub async fn all_containers(&self) -> Result<Vec<Container>> {
        self.with_conn(|conn| {
            containers::table
                .order(containers::created_at.asc())
                .load::<ContainerRow>(conn)?
                .into_iter()
                .map(ContainerRow::into_domain)
                .collect()
        })
        .await
    }

    /// Delete the container row; attachment, volume-mount and baseline
    /// rows cascade. Missing rows are not an error.
    pub async fn delete_container(&self, docker_id: &str) -> Result<()> {
        let id = docker_id.to_string();
        self.with_conn(move |conn| {
            diesel::delete(containers::table.find(&id)).execute(conn)?;
            Ok(())
        })
        .await
    }

    // === networks ===

    pub async fn insert_network(&self, network: &NetworkRecord) -> Result<()> {
        let row = NetworkRow::from_domain(network)?;
        let name = network.name.clone();
        self.with_conn(move |conn| {
            diesel::insert_into(networks::table)
                .values(&row)
                .execute(conn)
                .map_err(|e| match e {
                    DieselError::DatabaseError(
                        DatabaseErrorKind::UniqueViolation,
                        _,
                    ) => StoreError::NameTaken {
                        name,
                        holder: String::new(),
                    },
                    other => StoreError::Query { source: other },
                })?;
            Ok(())
        })
        .await
    }

    pub async fn get_network(
        &self,
        id: &str,
    ) -> Result<Option<NetworkRecord>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            networks::table
                .find(&id)
                .first::<NetworkRow>(conn)
                .optional()?
                .map(NetworkRow::into_domain)
                .transpose()
        })
        .await
    }

    pub async fn get_network_by_name(
        &self,
        name: &str,
    ) -> Result<Option<NetworkRecord>> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            networks::table
                .filter(networks::name.eq(&name))
                .first::<NetworkRow>(conn)
                .optional()?
                .map(NetworkRow::into_domain)
                .transpose()
        })
        .await
    }

    pub async fn all_networks(&self) -> Result<Vec<NetworkRecord>> {
        self.with_conn(|conn| {
            networks::table
                .order(networks::created_at.asc())
                .load::<NetworkRow>(conn)?
                .into_iter()
                .map(NetworkRow::into_domain)
                .collect()
        })
        .await
    }

    pub async fn delete_network(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            diesel::delete(networks::table.find(&id)).execute(conn)?;
            Ok(())
        })
        .await
    }

    // === attachments ===

    pub async fn get_attachment(
        &self,
        network_id: &str,
        container_id: &str,
    ) -> Result<Option<AttachmentRecord>> {
        let key = (network_id.to_string(), container_id.to_string());
        self.with_conn(move |conn| {
            network_attachments::table
                .find((&key.0, &key.1))
                .first::<AttachmentRow>(conn)
                .optional()?
                .map(AttachmentRow::into_domain)
                .transpose()
        })
        .await
    }

    pub async fn attachments_for_network(
        &self,
        network_id: &str,
    ) -> Result<Vec<AttachmentRecord>> {
        let id = network_id.to_string();
        self.with_conn(move |conn| {
            network_attachments::table
                .filter(network_attachments::network_id.eq(&id))
                .order(network_attachments::attached_at.asc())
                .load::<AttachmentRow>(conn)?
                .into_iter()
                .map(AttachmentRow::into_domain)
                .collect()
        })
        .await
    }

    pub async fn attachments_for_container(
        &self,
        container_id: &str,
    ) -> Result<Vec<AttachmentRecord>> {
        let id = container_id.to_string();
        self.with_conn(move |conn| {
            network_attachments::table
                .filter(network_attachments::container_id.eq(&id))
                .order(network_attachments::cindex.asc())
                .load::<AttachmentRow>(conn)?
                .into_iter()
                .map(AttachmentRow::into_domain)
                .collect()
        })
        .await
    }

    /// Drop the attachment row, releasing its IP. Returns whether a row
    /// existed.
    pub async fn delete_attachment(
        &self,
        network_id: &str,
        container_id: &str,
    ) -> Result<bool> {
        let key = (network_id.to_string(), container_id.to_string());
        self.with_conn(move |conn| {
            let n = diesel::delete(
                network_attachments::table.find((&key.0, &key.1)),
            )
            .execute(conn)?;
            Ok(n > 0)
        })
        .await
    }

    /// The atomic allocate-and-reserve primitive. Selects the lowest
    /// unused address in the range (excluding the gateway) — or validates
    /// the requested one — and writes the attachment row in the same
    /// transaction that read the allocated set. An existing row for the
    /// same (network, container) is returned as-is (reconnect).
    ///
    /// Returns the record and whether it was created by this call.
    pub async fn allocate_attachment(
        &self,
        req: AllocateAttachment,
    ) -> Result<(AttachmentRecord, bool)> {
        self.with_conn(move |conn| {
            conn.immediate_transaction(|conn| {
                if let Some(existing) = network_attachments::table
                    .find((&req.network_id, &req.container_id))
                    .first::<AttachmentRow>(conn)
                    .optional()?
                {
                    return existing.into_domain().map(|a| (a, false));
                }

                let used: HashSet<u32> = network_attachments::table
                    .filter(
                        network_attachments::network_id.eq(&req.network_id),
                    )
                    .select(network_attachments::ip)
                    .load::<String>(conn)?
                    .iter()
                    .filter_map(|s| s.parse::<Ipv4Addr>().ok())
                    .map(u32::from)
                    .collect();

                let chosen = match req.requested {
                    Some(ip) => {
                        if used.contains(&ip) || ip == req.gateway {
                            return Err(StoreError::IpTaken {
                                ip: Ipv4Addr::from(ip).to_string(),
                            });
                        }
                        ip
                    }
                    None => (req.range_start ..= req.range_end)
                        .find(|c| *c != req.gateway && !used.contains(c))
                        .ok_or_else(|| StoreError::NoFreeAddress {
                            network: req.network_id.clone(),
                        })?,
                };

                let max_index: Option<i32> = network_attachments::table
                    .filter(
                        network_attachments::container_id
                            .eq(&req.container_id),
                    )
                    .select(diesel::dsl::max(network_attachments::cindex))
                    .first(conn)?;

                let record = AttachmentRecord {
                    network_id: req.network_id.clone(),
                    container_id: req.container_id.clone(),
                    ip: Ipv4Addr::from(chosen),
                    mac: req.mac.clone(),
                    aliases: req.aliases.clone(),
                    index: max_index.map(|i| i + 1).unwrap_or(0) as u32,
                    attached_at: Utc::now(),
                };
                let row = AttachmentRow::from_domain(&record)?;
                match diesel::insert_into(network_attachments::table)
                    .values(&row)
                    .execute(conn)
                {
                    Ok(_) => Ok((record, true)),
                    Err(DieselError::DatabaseError(
                        DatabaseErrorKind::UniqueViolation,
                        _,
                    )) => Err(StoreError::IpTaken {
                        ip: record.ip.to_string(),
                    }),
                    Err(e) => Err(e.into()),
                }
            })
        })
        .await
    }

    // === volume mounts ===

    pub async fn insert_volume_mounts(
        &self,
        mounts: Vec<VolumeMountRecord>,
    ) -> Result<()> {
        if mounts.is_empty() {
            return Ok(());
        }
        self.with_conn(move |conn| {
            let rows: Vec<VolumeMountRow> =
                mounts.iter().map(VolumeMountRow::from_domain).collect();
            diesel::insert_into(volume_mounts::table)
                .values(&rows)
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    pub async fn volume_mounts_for(
        &self,
        container_id: &str,
    ) -> Result<Vec<VolumeMountRecord>> {
        let id = container_id.to_string();
        self.with_conn(move |conn| {
            Ok(volume_mounts::table
                .filter(volume_mounts::container_id.eq(&id))
                .load::<VolumeMountRow>(conn)?
                .into_iter()
                .map(VolumeMountRow::into_domain)
                .collect())
        })
        .await
    }

    // === filesystem baselines ===

    pub async fn put_baseline(
        &self,
        container_id: &str,
        entries: &[BaselineEntry],
    ) -> Result<()> {
        let row = BaselineRow {
            container_id: container_id.to_string(),
            entries: serde_json::to_string(entries)
                .map_err(|e| StoreError::Serde { source: e })?,
            captured_at: Utc::now().naive_utc(),
        };
        self.with_conn(move |conn| {
            diesel::insert_into(filesystem_baselines::table)
                .values(&row)
                .on_conflict(filesystem_baselines::container_id)
                .do_update()
                .set(&row)
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    pub async fn get_baseline(
        &self,
        container_id: &str,
    ) -> Result<Option<Vec<BaselineEntry>>> {
        let id = container_id.to_string();
        self.with_conn(move |conn| {
            filesystem_baselines::table
                .find(&id)
                .first::<BaselineRow>(conn)
                .optional()?
                .map(|row| {
                    serde_json::from_str(&row.entries)
                        .map_err(|e| StoreError::Serde { source: e })
                })
                .transpose()
        })
        .await
    }

    // === subnet allocator cursor ===

    pub async fn next_subnet_byte(&self) -> Result<u8> {
        self.with_conn(|conn| {
            let row = allocator_state::table
                .find(0)
                .first::<AllocatorRow>(conn)
                .optional()?;
            Ok(row
                .map(|r| r.next_subnet_byte as u8)
                .unwrap_or(SUBNET_BYTE_FIRST))
        })
        .await
    }

    pub async fn set_next_subnet_byte(&self, byte: u8) -> Result<()> {
        let row = AllocatorRow {
            id: 0,
            next_subnet_byte: byte as i32,
        };
        self.with_conn(move |conn| {
            diesel::insert_into(allocator_state::table)
                .values(&row)
                .on_conflict(allocator_state::id)
                .do_update()
                .set(&row)
                .execute(conn)?;
            Ok(())
        })
        .await
    }
}
