//! Path Resolver - walks relation hops to a concrete field address
//!
//! ```text
//! E1 ──Parent──▶ E2 ──Parent──▶ E5 .Status
//!    hop 0          hop 1          target
//! ```
//!
//! Every hop is a one-shot read of a relation field. A null, empty or
//! unreadable relation stops the walk: the path is unresolved until that
//! relation changes. The broken hop is still recorded so the caller can
//! subscribe to it and rebind when it is set.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::error::{BindError, Result};
use crate::lang::{FieldPath, PathExpr};
use crate::store::{entity_ref, EntityId, FieldAddress, StoreAdapter};

/// One walked relation: where it was read and what it pointed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopLink {
    pub relation: FieldAddress,
    pub next: Option<EntityId>,
}

/// Result of walking a [`FieldPath`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    /// Relations read, up to and including the first broken one
    pub hops: Vec<HopLink>,
    /// Final `(entity, field)`, `None` while a hop is broken
    pub target: Option<FieldAddress>,
    pub generation: u64,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        self.target.is_some()
    }

    /// Index of the hop that stopped the walk
    pub fn broken_hop(&self) -> Option<usize> {
        self.hops.iter().position(|link| link.next.is_none())
    }

    /// Every address a consumer of this resolution must watch
    pub fn watched_addresses(&self) -> Vec<FieldAddress> {
        self.hops
            .iter()
            .map(|link| link.relation.clone())
            .chain(self.target.clone())
            .collect()
    }

    /// The steady-state error describing an unresolved walk
    pub fn unresolved_error(&self, path: &FieldPath) -> Option<BindError> {
        self.broken_hop().map(|hop| BindError::UnresolvedPath {
            path: path.to_string(),
            hop,
        })
    }
}

/// Walks paths against a store
#[derive(Clone)]
pub struct PathResolver {
    store: Arc<dyn StoreAdapter>,
    max_hops: usize,
}

impl PathResolver {
    pub fn new(store: Arc<dyn StoreAdapter>, max_hops: usize) -> Self {
        Self { store, max_hops }
    }

    pub fn max_hops(&self) -> usize {
        self.max_hops
    }

    /// Reject paths with more relation hops than allowed
    pub fn check_depth(&self, path: &PathExpr) -> Result<()> {
        if path.hop_count() > self.max_hops {
            return Err(BindError::PathTooDeep {
                path: path.canonical(),
                hops: path.hop_count(),
                max: self.max_hops,
            });
        }
        Ok(())
    }

    /// Walk `path` from its root
    #[instrument(level = "debug", skip(self, path), fields(path = %path))]
    pub async fn resolve(&self, path: &FieldPath, generation: u64) -> Resolution {
        self.walk(path, path.root.clone(), Vec::new(), generation).await
    }

    /// Re-walk from hop `hop` onward, keeping the hops before it
    ///
    /// Used when the relation read at `hop` changed; the earlier links are
    /// still valid.
    #[instrument(level = "debug", skip(self, path, previous), fields(path = %path))]
    pub async fn resolve_from(
        &self,
        path: &FieldPath,
        previous: &Resolution,
        hop: usize,
        generation: u64,
    ) -> Resolution {
        let start = match hop {
            0 => Some(path.root.clone()),
            n => previous.hops.get(n - 1).and_then(|link| link.next.clone()),
        };

        match start {
            Some(entity) if hop <= previous.hops.len() => {
                let kept = previous.hops[..hop].to_vec();
                self.walk(path, entity, kept, generation).await
            }
            _ => {
                debug!(hop, "previous chain does not reach hop, walking from root");
                self.resolve(path, generation).await
            }
        }
    }

    async fn walk(
        &self,
        path: &FieldPath,
        mut current: EntityId,
        mut hops: Vec<HopLink>,
        generation: u64,
    ) -> Resolution {
        let relations = path.path.relations();

        for relation in &relations[hops.len().min(relations.len())..] {
            let address = FieldAddress::new(current.clone(), relation.clone());
            let next = self.read_reference(&address).await;
            hops.push(HopLink {
                relation: address,
                next: next.clone(),
            });

            match next {
                Some(entity) => current = entity,
                None => {
                    debug!(path = %path, hop = hops.len() - 1, "relation is empty, path unresolved");
                    return Resolution {
                        hops,
                        target: None,
                        generation,
                    };
                }
            }
        }

        Resolution {
            hops,
            target: Some(FieldAddress::new(current, path.path.field().clone())),
            generation,
        }
    }

    /// Read a relation field as an entity reference; failures read as empty
    async fn read_reference(&self, address: &FieldAddress) -> Option<EntityId> {
        match self.store.read(address).await {
            Ok(Some(sample)) => entity_ref(&sample.value),
            Ok(None) => None,
            Err(e) => {
                warn!(relation = %address, error = %e, "relation read failed, treating hop as unresolved");
                None
            }
        }
    }
}
