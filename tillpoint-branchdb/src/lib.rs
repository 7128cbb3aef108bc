//! # Tillpoint Branch Database Routing
//!
//! Per-branch database routing for the Tillpoint multi-branch POS
//! platform. Head office keeps one connection record per shop; this crate
//! turns those records into dialect-specific connection strings, caches
//! them, hands out scoped per-operation contexts, and provisions branch
//! schemas.
//!
//! ## Features
//!
//! - **Four Dialects**: SQLite, SQL Server, PostgreSQL, and MySQL
//!   connection strings built from one branch record
//! - **Descriptor Caching**: each branch's connection string is built once
//!   and invalidated explicitly on admin changes
//! - **Scoped Contexts**: short-lived per-operation handles with lazy
//!   connection open (with DI for the dialect driver)
//! - **Schema Provisioning**: idempotent ensure/migrate with per-branch
//!   failure isolation in bulk sweeps
//! - **Branch Management**: create, update, and deactivate branches with
//!   automatic cache invalidation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tillpoint_branchdb::prelude::*;
//!
//! // One cache per process, injected everywhere.
//! let cache = Arc::new(DescriptorCache::new(BranchDbConfig::from_env()?));
//!
//! // The host application implements DialectDriver with its DB client.
//! let factory = BranchContextFactory::new(Arc::new(MyDriver), Arc::clone(&cache));
//!
//! // Every branch-scoped business operation:
//! let mut ctx = factory.context(&branch)?;
//! let conn = ctx.connection().await?;
//! ```
//!
//! ## Administration
//!
//! ```rust,ignore
//! let registry = Arc::new(InMemoryBranchRegistry::new());
//! let admin = BranchAdmin::with_registry(registry, Arc::clone(&cache));
//!
//! let record = admin
//!     .create(CreateBranchRequest::new("B001", SqlDialect::Sqlite))
//!     .await?;
//!
//! // Connection-affecting updates invalidate the cached descriptor.
//! admin
//!     .update(&record.branch.id, UpdateBranchRequest::new().with_host("db2.local"))
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod admin;
mod branch;
mod cache;
mod config;
mod descriptor;
mod error;
mod factory;
mod migrate;

pub use admin::*;
pub use branch::*;
pub use cache::*;
pub use config::*;
pub use descriptor::*;
pub use error::*;
pub use factory::*;
pub use migrate::*;

// Re-export for driver implementations.
pub use async_trait::async_trait;

/// Prelude module for commonly used types.
pub mod prelude {
    pub use super::{Branch, SqlDialect, TlsMode};
    pub use super::{BranchContext, BranchContextFactory, DialectDriver};
    pub use super::{BranchDbConfig, BranchDbError, BranchDbResult};
    pub use super::{BranchMigrator, Migration, SchemaExecutor, SweepReport};
    pub use super::{ConnectionDescriptor, build_descriptor};
    pub use super::{
        BranchAdmin, BranchRegistry, CreateBranchRequest, InMemoryBranchRegistry,
        UpdateBranchRequest,
    };
    pub use super::DescriptorCache;
}
