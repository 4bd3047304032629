use std::sync::Arc;

use landlord_compute::ComputeRegistry;
use landlord_store::TenantStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TenantStore>,
    pub computes: Arc<ComputeRegistry>,
    pub auth_token: Arc<String>,
}
