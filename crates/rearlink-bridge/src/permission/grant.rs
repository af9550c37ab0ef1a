//! Session-scoped permission grants.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use rearlink_core::OperationId;

/// The broker's decision to allow one operation for the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionGrant {
    pub operation: OperationId,
    pub granted: bool,
    pub granted_at: DateTime<Utc>,
    /// Session epoch the grant was issued in.
    #[serde(skip)]
    epoch: u64,
}

impl PermissionGrant {
    pub fn new(operation: OperationId, epoch: u64) -> Self {
        Self {
            operation,
            granted: true,
            granted_at: Utc::now(),
            epoch,
        }
    }

    pub const fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Grants keyed by operation. At most one per operation.
#[derive(Debug, Default)]
pub struct GrantTable {
    grants: HashMap<OperationId, PermissionGrant>,
}

impl GrantTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the grant for its operation.
    pub fn insert(&mut self, grant: PermissionGrant) {
        self.grants.insert(grant.operation.clone(), grant);
    }

    pub fn get(&self, operation: &OperationId) -> Option<&PermissionGrant> {
        self.grants.get(operation)
    }

    pub fn revoke(&mut self, operation: &OperationId) -> Option<PermissionGrant> {
        self.grants.remove(operation)
    }

    /// Drop every grant, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.grants.len();
        self.grants.clear();
        count
    }

    pub fn iter(&self) -> impl Iterator<Item = &PermissionGrant> {
        self.grants.values()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}
