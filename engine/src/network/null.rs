//! The `null` driver: containers get only loopback. Attach and detach
//! are accepted and do nothing, so `none`-networked containers flow
//! through the same lifecycle paths as everything else.

use async_trait::async_trait;

use super::{
    driver::{AttachOutcome, AttachRequest, DetachRequest, NetworkDriver},
    DriverKind,
    NetworkRecord,
    Result,
};

#[derive(Debug, Default)]
pub struct NullDriver;

#[async_trait]
impl NetworkDriver for NullDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Null
    }

    async fn create(&self, _network: &NetworkRecord) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _network: &NetworkRecord) -> Result<()> {
        Ok(())
    }

    async fn attach(
        &self,
        network: &NetworkRecord,
        request: AttachRequest,
    ) -> Result<AttachOutcome> {
        Ok(AttachOutcome {
            network_id: network.id.clone(),
            network_name: network.name.clone(),
            ip: String::new(),
            mac: String::new(),
            gateway: String::new(),
            subnet: String::new(),
            aliases: request.aliases,
            index: 0,
        })
    }

    async fn detach(
        &self,
        _network: &NetworkRecord,
        _request: DetachRequest,
    ) -> Result<()> {
        Ok(())
    }
}
