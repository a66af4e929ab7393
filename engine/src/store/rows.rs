//! Sql row shapes and their conversions to the domain types.

use std::{collections::HashMap, net::Ipv4Addr, str::FromStr};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use diesel::prelude::*;

use super::{
    schema::{
        allocator_state,
        containers,
        filesystem_baselines,
        network_attachments,
        networks,
        volume_mounts,
    },
    AttachmentRecord,
    StoreError,
    VolumeMountRecord,
};
use crate::{
    core::{Container, ContainerConfig, ContainerState},
    network::{DriverKind, NetworkRecord},
};

fn to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&naive)
}

/// A Sql version of the container record; the full config travels as a
/// JSON document, the columns the store itself queries stay relational.
#[derive(Clone, Debug, PartialEq, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = containers)]
#[diesel(treat_none_as_null = true)]
pub struct ContainerRow {
    pub docker_id: String,
    pub native_id: String,
    pub name: String,
    pub image: String,
    pub image_id: String,
    pub config: String,
    pub state: String,
    pub pid: Option<i64>,
    pub exit_code: Option<i64>,
    pub needs_create: bool,
    pub stopped_by_user: bool,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,
}

impl ContainerRow {
    pub fn from_domain(c: &Container) -> Result<ContainerRow, StoreError> {
        let config = serde_json::to_string(&c.config)
            .map_err(|e| StoreError::Serde { source: e })?;
        Ok(ContainerRow {
            docker_id: c.id.as_str().to_string(),
            native_id: c.native_id.as_str().to_string(),
            name: c.name.clone(),
            image: c.config.image.clone(),
            image_id: c.config.image_id.clone(),
            config,
            state: c.state.to_string(),
            pid: c.pid,
            exit_code: c.exit_code,
            needs_create: c.needs_create,
            stopped_by_user: c.stopped_by_user,
            created_at: c.created_at.naive_utc(),
            started_at: c.started_at.map(|t| t.naive_utc()),
            finished_at: c.finished_at.map(|t| t.naive_utc()),
        })
    }

    /// Rehydrate the domain record; attachments are loaded separately.
    pub fn into_domain(self) -> Result<Container, StoreError> {
        let config: ContainerConfig = serde_json::from_str(&self.config)
            .map_err(|e| StoreError::Serde { source: e })?;
        let state = ContainerState::from_str(&self.state).map_err(|_| {
            StoreError::Corrupt {
                reason: format!("unknown container state '{}'", self.state),
            }
        })?;
        let id = crate::core::DockerId::parse(&self.docker_id).ok_or_else(
            || StoreError::Corrupt {
                reason: format!("malformed docker id '{}'", self.docker_id),
            },
        )?;
        Ok(Container {
            native_id: crate::core::NativeId::from_string(self.native_id),
            id,
            name: self.name,
            config,
            state,
            pid: self.pid,
            exit_code: self.exit_code,
            created_at: to_utc(self.created_at),
            started_at: self.started_at.map(to_utc),
            finished_at: self.finished_at.map(to_utc),
            stopped_by_user: self.stopped_by_user,
            needs_create: self.needs_create,
            attachments: HashMap::new(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = networks)]
#[diesel(treat_none_as_null = true)]
pub struct NetworkRow {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub subnet: String,
    pub gateway: String,
    pub ip_range: Option<String>,
    pub options: String,
    pub labels: String,
    pub is_default: bool,
    pub created_at: NaiveDateTime,
}

impl NetworkRow {
    pub fn from_domain(n: &NetworkRecord) -> Result<NetworkRow, StoreError> {
        Ok(NetworkRow {
            id: n.id.clone(),
            name: n.name.clone(),
            driver: n.driver.as_str().to_string(),
            subnet: n.subnet.clone(),
            gateway: n.gateway.clone(),
            ip_range: n.ip_range.clone(),
            options: serde_json::to_string(&n.options)
                .map_err(|e| StoreError::Serde { source: e })?,
            labels: serde_json::to_string(&n.labels)
                .map_err(|e| StoreError::Serde { source: e })?,
            is_default: n.is_default,
            created_at: n.created_at.naive_utc(),
        })
    }

    pub fn into_domain(self) -> Result<NetworkRecord, StoreError> {
        let driver =
            DriverKind::from_str(&self.driver).map_err(|_| {
                StoreError::Corrupt {
                    reason: format!("unknown network driver '{}'", self.driver),
                }
            })?;
        Ok(NetworkRecord {
            id: self.id,
            name: self.name,
            driver,
            subnet: self.subnet,
            gateway: self.gateway,
            ip_range: self.ip_range,
            options: serde_json::from_str(&self.options)
                .map_err(|e| StoreError::Serde { source: e })?,
            labels: serde_json::from_str(&self.labels)
                .map_err(|e| StoreError::Serde { source: e })?,
            is_default: self.is_default,
            created_at: to_utc(self.created_at),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Queryable, Insertable)]
#[diesel(table_name = network_attachments)]
pub struct AttachmentRow {
    pub network_id: String,
    pub container_id: String,
    pub ip: String,
    pub mac: String,
    pub aliases: String,
    pub cindex: i32,
    pub attached_at: NaiveDateTime,
}

impl AttachmentRow {
    pub fn from_domain(
        a: &AttachmentRecord,
    ) -> Result<AttachmentRow, StoreError> {
        Ok(AttachmentRow {
            network_id: a.network_id.clone(),
            container_id: a.container_id.clone(),
            ip: a.ip.to_string(),
            mac: a.mac.clone(),
            aliases: serde_json::to_string(&a.aliases)
                .map_err(|e| StoreError::Serde { source: e })?,
            cindex: a.index as i32,
            attached_at: a.attached_at.naive_utc(),
        })
    }

    pub fn into_domain(self) -> Result<AttachmentRecord, StoreError> {
        let ip: Ipv4Addr = self.ip.parse().map_err(|_| StoreError::Corrupt {
            reason: format!("malformed attachment ip '{}'", self.ip),
        })?;
        Ok(AttachmentRecord {
            network_id: self.network_id,
            container_id: self.container_id,
            ip,
            mac: self.mac,
            aliases: serde_json::from_str(&self.aliases)
                .map_err(|e| StoreError::Serde { source: e })?,
            index: self.cindex as u32,
            attached_at: to_utc(self.attached_at),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Queryable, Insertable)]
#[diesel(table_name = volume_mounts)]
pub struct VolumeMountRow {
    pub container_id: String,
    pub volume_name: String,
    pub destination: String,
    pub anonymous: bool,
}

impl VolumeMountRow {
    pub fn from_domain(m: &VolumeMountRecord) -> VolumeMountRow {
        VolumeMountRow {
            container_id: m.container_id.clone(),
            volume_name: m.volume_name.clone(),
            destination: m.destination.clone(),
            anonymous: m.anonymous,
        }
    }

    pub fn into_domain(self) -> VolumeMountRecord {
        VolumeMountRecord {
            container_id: self.container_id,
            volume_name: self.volume_name,
            destination: self.destination,
            anonymous: self.anonymous,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = filesystem_baselines)]
pub struct BaselineRow {
    pub container_id: String,
    pub entries: String,
    pub captured_at: NaiveDateTime,
}

#[derive(Clone, Debug, PartialEq, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = allocator_state)]
pub struct AllocatorRow {
    pub id: i32,
    pub next_subnet_byte: i32,
}
