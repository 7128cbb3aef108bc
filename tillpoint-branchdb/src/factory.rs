//! Branch context factory
//!
//! Produces a ready-to-use, branch-scoped data-access handle for exactly
//! one unit of work. The descriptor is shared and cached; the handle never
//! is.
//!
//! # Usage
//!
//! The host application injects its dialect driver:
//!
//! ```rust,ignore
//! use tillpoint_branchdb::*;
//!
//! struct SqlxDriver;
//!
//! #[async_trait]
//! impl DialectDriver for SqlxDriver {
//!     type Connection = sqlx::AnyConnection;
//!
//!     async fn open(&self, descriptor: &ConnectionDescriptor)
//!         -> BranchDbResult<Self::Connection>
//!     {
//!         // translate the descriptor and connect
//!     }
//! }
//!
//! let cache = Arc::new(DescriptorCache::new(BranchDbConfig::default()));
//! let factory = BranchContextFactory::new(Arc::new(SqlxDriver), cache);
//!
//! let mut ctx = factory.context(&branch)?;
//! let conn = ctx.connection().await?; // connection opens here
//! ```

use crate::branch::Branch;
use crate::cache::DescriptorCache;
use crate::descriptor::ConnectionDescriptor;
use crate::error::{BranchDbError, BranchDbResult};
use async_trait::async_trait;
use std::sync::Arc;
use tillpoint_log::debug;

/// Dialect driver trait.
///
/// The host application implements this with its database client of
/// choice and injects it into the factory. Opening a connection is the
/// driver's business; this layer only routes descriptors to it.
#[async_trait]
pub trait DialectDriver: Send + Sync {
    /// The connection type produced by this driver.
    type Connection: Send;

    /// Open a connection from a built descriptor.
    async fn open(&self, descriptor: &ConnectionDescriptor) -> BranchDbResult<Self::Connection>;

    /// Check a connection is still usable (optional).
    async fn ping(&self, _connection: &mut Self::Connection) -> BranchDbResult<()> {
        Ok(())
    }
}

/// Factory producing branch-scoped contexts.
///
/// Descriptors are resolved through the injected [`DescriptorCache`];
/// every call returns a fresh, fully independent [`BranchContext`]. Two
/// concurrent operations on the same branch get two handles and two
/// connections — transactional isolation between them is the underlying
/// database's business, not this layer's.
pub struct BranchContextFactory<D: DialectDriver> {
    driver: Arc<D>,
    cache: Arc<DescriptorCache>,
}

impl<D: DialectDriver> BranchContextFactory<D> {
    /// Create a factory with an injected driver and descriptor cache.
    pub fn new(driver: Arc<D>, cache: Arc<DescriptorCache>) -> Self {
        Self { driver, cache }
    }

    /// Create a context for one unit of work against a branch.
    ///
    /// Resolves the descriptor (from cache, or built on first access) but
    /// does not open a connection: driver failures surface at first use of
    /// the handle, not here.
    pub fn context(&self, branch: &Branch) -> BranchDbResult<BranchContext<D>> {
        if !branch.active {
            return Err(BranchDbError::Inactive(branch.code.clone()));
        }

        let descriptor = self.cache.get_or_build(branch)?;
        Ok(BranchContext {
            branch_code: branch.code.clone(),
            descriptor,
            driver: Arc::clone(&self.driver),
            connection: None,
        })
    }

    /// The descriptor cache this factory resolves through.
    pub fn cache(&self) -> &DescriptorCache {
        &self.cache
    }
}

/// A short-lived, branch-scoped data-access handle.
///
/// Bound to one branch's descriptor for the duration of a single unit of
/// work; never shared across branches and never outliving the operation.
/// The connection opens lazily on first [`connection`](Self::connection)
/// call and is released when the context drops.
pub struct BranchContext<D: DialectDriver> {
    branch_code: String,
    descriptor: ConnectionDescriptor,
    driver: Arc<D>,
    connection: Option<D::Connection>,
}

impl<D: DialectDriver> std::fmt::Debug for BranchContext<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchContext")
            .field("branch_code", &self.branch_code)
            .field("descriptor", &self.descriptor)
            .field("open", &self.connection.is_some())
            .finish()
    }
}

impl<D: DialectDriver> BranchContext<D> {
    /// Code of the branch this context is bound to.
    pub fn branch_code(&self) -> &str {
        &self.branch_code
    }

    /// The descriptor this context was built from.
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Whether the underlying connection has been opened yet.
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Get the underlying connection, opening it on first use.
    pub async fn connection(&mut self) -> BranchDbResult<&mut D::Connection> {
        if self.connection.is_none() {
            debug!(
                target: "tillpoint::branchdb",
                "opening connection for branch {}",
                self.branch_code
            );
            let conn = self.driver.open(&self.descriptor).await?;
            self.connection = Some(conn);
        }

        self.connection
            .as_mut()
            .ok_or_else(|| BranchDbError::Connection("connection unavailable".to_string()))
    }

    /// Ping the underlying connection, opening it if needed.
    pub async fn ping(&mut self) -> BranchDbResult<()> {
        let driver = Arc::clone(&self.driver);
        let conn = self.connection().await?;
        driver.ping(conn).await
    }

    /// Close the context, dropping any open connection.
    pub fn close(self) {}
}
