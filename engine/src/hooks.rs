//! Side-service contracts the core drives but does not implement: the
//! event stream, the host port mapper and the health checker. Failures of
//! these collaborators never fail a lifecycle operation; the core logs
//! and proceeds.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    core::{HealthConfig, PortBinding},
    vm::ContainerVm,
};

/// Actions surfaced on the Docker event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Create,
    Start,
    Stop,
    Die,
    Destroy,
    Pause,
    Unpause,
    Rename,
    Update,
    Restart,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Create => "create",
            EventAction::Start => "start",
            EventAction::Stop => "stop",
            EventAction::Die => "die",
            EventAction::Destroy => "destroy",
            EventAction::Pause => "pause",
            EventAction::Unpause => "unpause",
            EventAction::Rename => "rename",
            EventAction::Update => "update",
            EventAction::Restart => "restart",
        }
    }
}

/// One container event.
#[derive(Debug, Clone)]
pub struct ContainerEvent {
    pub action: EventAction,
    pub id: String,
    pub name: String,
    pub attributes: HashMap<String, String>,
}

/// Event sink; implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ContainerEvent);
}

/// Default sink: events become structured log lines.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: ContainerEvent) {
        info!(
            action = event.action.as_str(),
            container = %event.id,
            name = %event.name,
            "container event"
        );
    }
}

/// Host port publication, backed by the guest's port service plus the
/// host-side proxy.
#[async_trait]
pub trait PortPublisher: Send + Sync {
    async fn publish(
        &self,
        container_id: &str,
        vm: &Arc<dyn ContainerVm>,
        bindings: &HashMap<String, Vec<PortBinding>>,
    ) -> Result<(), String>;

    async fn unpublish(&self, container_id: &str) -> Result<(), String>;
}

/// No-op publisher for deployments without a port proxy.
#[derive(Debug, Default)]
pub struct NullPortPublisher;

#[async_trait]
impl PortPublisher for NullPortPublisher {
    async fn publish(
        &self,
        _container_id: &str,
        _vm: &Arc<dyn ContainerVm>,
        _bindings: &HashMap<String, Vec<PortBinding>>,
    ) -> Result<(), String> {
        Ok(())
    }

    async fn unpublish(&self, _container_id: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Health-probe scheduling.
#[async_trait]
pub trait HealthMonitor: Send + Sync {
    async fn start(
        &self,
        container_id: &str,
        config: &HealthConfig,
        vm: &Arc<dyn ContainerVm>,
    );

    async fn stop(&self, container_id: &str);

    /// Current status string (`starting`/`healthy`/`unhealthy`), if the
    /// container has a health check.
    fn status(&self, container_id: &str) -> Option<String>;
}

/// No-op health monitor.
#[derive(Debug, Default)]
pub struct NullHealthMonitor;

#[async_trait]
impl HealthMonitor for NullHealthMonitor {
    async fn start(
        &self,
        _container_id: &str,
        _config: &HealthConfig,
        _vm: &Arc<dyn ContainerVm>,
    ) {
    }

    async fn stop(&self, _container_id: &str) {}

    fn status(&self, _container_id: &str) -> Option<String> {
        None
    }
}
