//! Descriptor cache
//!
//! Memoizes the per-branch connection descriptor so it is built once per
//! process, not once per operation. Purely in-memory; a restart clears it
//! and the next access rebuilds.

use crate::branch::Branch;
use crate::config::BranchDbConfig;
use crate::descriptor::{ConnectionDescriptor, build_descriptor};
use crate::error::BranchDbResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use tillpoint_log::debug;

/// Per-branch connection descriptor cache.
///
/// One instance is constructed at process start and passed by reference to
/// anything that needs branch contexts; there is no ambient singleton. All
/// lookups, inserts, and evictions run under a single mutex — builds and
/// invalidations are rare relative to use, so the coarse lock is not a
/// bottleneck.
///
/// The cache has no TTL: an administrative change to a branch's connection
/// settings **must** call [`invalidate`](Self::invalidate), otherwise
/// operations keep routing to the old database with the old credentials.
pub struct DescriptorCache {
    config: BranchDbConfig,
    entries: Mutex<HashMap<String, ConnectionDescriptor>>,
}

impl DescriptorCache {
    /// Create an empty cache using the given process configuration.
    pub fn new(config: BranchDbConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get the cached descriptor for a branch, building it on first access.
    ///
    /// A hit returns the stored descriptor without invoking the builder; a
    /// miss builds from the branch's current field values, stores, and
    /// returns. At most one entry exists per branch id.
    pub fn get_or_build(&self, branch: &Branch) -> BranchDbResult<ConnectionDescriptor> {
        let mut entries = self.entries.lock();

        if let Some(descriptor) = entries.get(&branch.id) {
            return Ok(descriptor.clone());
        }

        let descriptor = build_descriptor(branch, &self.config)?;
        debug!(
            target: "tillpoint::branchdb",
            "built {} descriptor for branch {}",
            descriptor.dialect,
            branch.code
        );
        entries.insert(branch.id.clone(), descriptor.clone());
        Ok(descriptor)
    }

    /// Remove the cached descriptor for one branch.
    ///
    /// Must be called whenever a branch's dialect, host, port, database,
    /// credentials, TLS settings, or extra parameters change.
    pub fn invalidate(&self, branch_id: &str) {
        let mut entries = self.entries.lock();
        if entries.remove(branch_id).is_some() {
            debug!(
                target: "tillpoint::branchdb",
                "invalidated descriptor for branch id {}",
                branch_id
            );
        }
    }

    /// Remove all cached descriptors.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of cached descriptors.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// The process configuration this cache builds with.
    pub fn config(&self) -> &BranchDbConfig {
        &self.config
    }
}
