//! Shared application state.

use std::sync::Arc;

use parking_lot::RwLock;

use plugind_core::Config;
use plugind_service::PluginService;

use crate::auth::AuthClient;

/// Cloned into every handler; all members are cheap `Arc` handles.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: Arc<PluginService>,
    pub auth: Arc<AuthClient>,
    master_tenant: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(config: Arc<Config>, service: Arc<PluginService>, auth: Arc<AuthClient>) -> Self {
        Self {
            config,
            service,
            auth,
            master_tenant: Arc::new(RwLock::new(None)),
        }
    }

    /// The master tenant, once learned from the identity service.
    pub fn master_tenant(&self) -> Option<String> {
        self.master_tenant.read().clone()
    }

    pub fn set_master_tenant(&self, tenant_uuid: String) {
        tracing::info!("master tenant learned: {tenant_uuid}");
        *self.master_tenant.write() = Some(tenant_uuid);
    }
}
