//! Registry-backed [`RoleOracle`].

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::trace;

use certgate_auth::identity::{Role, WalletAddress};
use certgate_auth::resolver::{OracleError, RoleOracle};

use crate::certificate_registry::CertificateRegistry;

/// Reads role claims from a shared [`CertificateRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryOracle {
    registry: Arc<RwLock<CertificateRegistry>>,
}

impl RegistryOracle {
    pub fn new(registry: Arc<RwLock<CertificateRegistry>>) -> Self {
        Self { registry }
    }

    /// Wrap a registry nobody else writes to (e.g. a loaded snapshot).
    pub fn from_registry(registry: CertificateRegistry) -> Self {
        Self::new(Arc::new(RwLock::new(registry)))
    }

    pub fn registry(&self) -> &Arc<RwLock<CertificateRegistry>> {
        &self.registry
    }
}

#[async_trait]
impl RoleOracle for RegistryOracle {
    async fn role_claim(&self, address: &WalletAddress) -> Result<Option<Role>, OracleError> {
        let claim = self.registry.read().role_of(address);
        trace!(address = %address, ?claim, "registry role claim");
        Ok(claim)
    }
}
