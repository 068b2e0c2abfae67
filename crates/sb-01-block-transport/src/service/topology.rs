//! # Transport Topology
//!
//! Registry of live transport servers keyed by owning object, used by the
//! control plane to route requests.
//!
//! ```rust,ignore
//! let topology = TransportTopology::new();
//! topology.register(server)?;
//! let server = topology.server(ObjectId(0x10b))?;
//! ```

use parking_lot::RwLock;
use shared_types::ObjectId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::TransportError;
use crate::service::BlockTransportServer;

/// Live servers by owning object.
#[derive(Default)]
pub struct TransportTopology {
    servers: RwLock<HashMap<ObjectId, Arc<BlockTransportServer>>>,
}

impl TransportTopology {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a server. An object may own only one.
    pub fn register(&self, server: Arc<BlockTransportServer>) -> Result<(), TransportError> {
        let object = server.owner_id();
        let mut servers = self.servers.write();
        if servers.contains_key(&object) {
            warn!(%object, "Transport server already registered");
            return Err(TransportError::InvalidRequest(format!(
                "{object} already owns a transport server"
            )));
        }
        info!(%object, server = %server.id(), "Transport server registered");
        servers.insert(object, server);
        Ok(())
    }

    pub fn unregister(&self, object: ObjectId) -> Option<Arc<BlockTransportServer>> {
        self.servers.write().remove(&object)
    }

    pub fn server(&self, object: ObjectId) -> Result<Arc<BlockTransportServer>, TransportError> {
        self.servers
            .read()
            .get(&object)
            .cloned()
            .ok_or(TransportError::ServerNotFound(object))
    }

    /// Destroy the server owned by `object` and forget it. Fails, leaving
    /// the server registered, while it still has queued work.
    pub fn destroy(&self, object: ObjectId) -> Result<(), TransportError> {
        let server = self.server(object)?;
        server.destroy()?;
        self.servers.write().remove(&object);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.read().is_empty()
    }

    /// Registered owners in ascending order.
    #[must_use]
    pub fn objects(&self) -> Vec<ObjectId> {
        let mut objects: Vec<_> = self.servers.read().keys().copied().collect();
        objects.sort_unstable();
        objects
    }
}
