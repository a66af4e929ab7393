//! The `vmnet` driver: native host NAT. A guest joins vmnet when its VM
//! is configured, so there is nothing to do at runtime — and a dynamic
//! `network connect` is a hard error rather than a silent no-op.

use async_trait::async_trait;

use super::{
    driver::{AttachOutcome, AttachRequest, DetachRequest, NetworkDriver},
    DriverKind,
    NetworkError,
    NetworkRecord,
    Result,
};

#[derive(Debug, Default)]
pub struct VmnetDriver;

#[async_trait]
impl NetworkDriver for VmnetDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Vmnet
    }

    async fn create(&self, _network: &NetworkRecord) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _network: &NetworkRecord) -> Result<()> {
        Ok(())
    }

    async fn attach(
        &self,
        _network: &NetworkRecord,
        _request: AttachRequest,
    ) -> Result<AttachOutcome> {
        Err(NetworkError::DynamicAttachNotSupported {
            driver: DriverKind::Vmnet.as_str().to_string(),
        })
    }

    async fn detach(
        &self,
        _network: &NetworkRecord,
        _request: DetachRequest,
    ) -> Result<()> {
        // nothing to tear down; the NAT attachment dies with the VM
        Ok(())
    }
}
