//! Group construction
//!
//! Builds one vendor sub-group per device family present on this node and,
//! when a cross-domain section is configured, joins local rank 0 to the
//! full-mesh transport.

use crate::context::BackendContext;
use crate::dispatcher::HeteroProcessGroup;
use mosaic_interfaces::{GroupFactory, GroupRef, Store};
use mosaic_rendezvous::{FileStore, MeshContext, PrefixStore};
use mosaic_types::{MosaicError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Name under which heterogeneous groups are registered
pub const BACKEND_NAME: &str = "mosaic";

/// Creates [`HeteroProcessGroup`]s from a shared [`BackendContext`]
#[derive(Debug, Clone)]
pub struct HeteroGroupFactory {
    context: Arc<BackendContext>,
    cross_domain_store: Option<Arc<dyn Store>>,
}

impl HeteroGroupFactory {
    pub fn new(context: Arc<BackendContext>) -> Self {
        Self {
            context,
            cross_domain_store: None,
        }
    }

    /// Use `store` for the cross-domain rendezvous instead of the configured
    /// shared directory
    pub fn with_cross_domain_store(mut self, store: Arc<dyn Store>) -> Self {
        self.cross_domain_store = Some(store);
        self
    }

    pub fn context(&self) -> &Arc<BackendContext> {
        &self.context
    }

    /// Form the local group, blocking until every vendor sub-group and the
    /// cross-domain mesh (if any) are connected.
    pub fn create(
        &self,
        store: Arc<dyn Store>,
        rank: usize,
        size: usize,
        timeout: Duration,
    ) -> Result<Arc<HeteroProcessGroup>> {
        if size == 0 || rank >= size {
            return Err(MosaicError::config(format!(
                "rank {} invalid for group of size {}",
                rank, size
            )));
        }

        let world_size = self.context.require_devices()?;
        if world_size != size {
            warn!(
                "Group size {} differs from the {} usable device(s) discovered",
                size, world_size
            );
        }

        let mut vendor_groups = HashMap::new();
        for vendor in self.context.scheduler().vendors() {
            let Some(backend) = self.context.vendors().get(vendor) else {
                warn!("No collective library registered for {}; its devices are unreachable", vendor.label());
                continue;
            };
            let scoped: Arc<dyn Store> =
                Arc::new(PrefixStore::new(format!("vendor/{}", vendor), store.clone()));
            let group = backend.create_group(scoped, rank, size, timeout)?;
            info!(
                "Rank {} joined {} sub-group via {}",
                rank,
                vendor.label(),
                backend.backend_name()
            );
            vendor_groups.insert(vendor, group);
        }

        if vendor_groups.is_empty() {
            return Err(MosaicError::no_devices(
                "no discovered device family has a registered collective library",
            ));
        }

        let cross_domain = match (&self.context.config().rendezvous, rank) {
            (Some(rendezvous), 0) => {
                let store = match &self.cross_domain_store {
                    Some(store) => store.clone(),
                    None => Arc::new(FileStore::new(&rendezvous.store_path)?) as Arc<dyn Store>,
                };
                let mesh = MeshContext::connect(
                    rendezvous.rank,
                    rendezvous.world_size,
                    &rendezvous.transport_addr,
                    store,
                    rendezvous.connect_timeout(),
                )?;
                Some(Arc::new(mesh))
            }
            _ => None,
        };

        info!(
            "Rank {}/{} ready: {} vendor sub-group(s), cross-domain {}",
            rank,
            size,
            vendor_groups.len(),
            if cross_domain.is_some() {
                "attached"
            } else {
                "not attached"
            }
        );

        Ok(Arc::new(HeteroProcessGroup::new(
            rank,
            size,
            timeout,
            self.context.clone(),
            vendor_groups,
            cross_domain,
        )))
    }
}

impl GroupFactory for HeteroGroupFactory {
    fn backend_name(&self) -> &str {
        BACKEND_NAME
    }

    fn create_group(
        &self,
        store: Arc<dyn Store>,
        rank: usize,
        size: usize,
        timeout: Duration,
    ) -> Result<GroupRef> {
        let group: GroupRef = self.create(store, rank, size, timeout)?;
        Ok(group)
    }
}
