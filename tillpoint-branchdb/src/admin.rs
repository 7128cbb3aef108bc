//! Branch administration
//!
//! Head-office lifecycle management for branches: create, update,
//! deactivate. Any mutation of connection-affecting fields invalidates the
//! branch's cached descriptor — the cache has no TTL, so forgetting that
//! would leave operations routed at the old database with the old
//! credentials.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tillpoint_branchdb::*;
//!
//! let cache = Arc::new(DescriptorCache::new(BranchDbConfig::default()));
//! let registry = Arc::new(InMemoryBranchRegistry::new());
//! let admin = BranchAdmin::with_registry(registry, Arc::clone(&cache));
//!
//! let request = CreateBranchRequest::new("B001", SqlDialect::Sqlite)
//!     .with_name("Harbour Road");
//! let record = admin.create(request).await?;
//!
//! // Later: moving the branch to a new database server
//! let update = UpdateBranchRequest::new().with_host("db2.local");
//! admin.update(&record.branch.id, update).await?;
//! ```

use crate::branch::{Branch, SqlDialect, TlsMode};
use crate::cache::DescriptorCache;
use crate::error::{BranchDbError, BranchDbResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tillpoint_log::{info, warn};

/// Branch with administrative bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRecord {
    /// The branch connection record.
    pub branch: Branch,
    /// Created timestamp.
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp.
    pub updated_at: DateTime<Utc>,
    /// Provisioning failure message, if initial provisioning failed.
    pub provision_error: Option<String>,
}

impl BranchRecord {
    fn new(branch: Branch) -> Self {
        let now = Utc::now();
        Self {
            branch,
            created_at: now,
            updated_at: now,
            provision_error: None,
        }
    }
}

/// Request to create a new branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBranchRequest {
    /// Stable branch code (must be unique).
    pub code: String,
    /// Display name.
    pub name: Option<String>,
    /// Database dialect.
    pub dialect: SqlDialect,
    /// Server host.
    pub host: Option<String>,
    /// Server port.
    pub port: Option<u16>,
    /// Database name.
    pub database: Option<String>,
    /// Username.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Extra connection parameters.
    pub extra_params: Option<String>,
    /// TLS requirement.
    pub tls: Option<TlsMode>,
    /// Trust the server certificate (SQL Server).
    pub trust_server_certificate: bool,
    /// Initial metadata.
    pub metadata: HashMap<String, String>,
}

impl CreateBranchRequest {
    /// Create a request for the given code and dialect.
    pub fn new(code: impl Into<String>, dialect: SqlDialect) -> Self {
        Self {
            code: code.into(),
            name: None,
            dialect,
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            extra_params: None,
            tls: None,
            trust_server_certificate: false,
            metadata: HashMap::new(),
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the server host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the server port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set extra connection parameters.
    pub fn with_extra_params(mut self, params: impl Into<String>) -> Self {
        self.extra_params = Some(params.into());
        self
    }

    /// Set the TLS mode.
    pub fn with_tls(mut self, tls: TlsMode) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Trust the server certificate (SQL Server).
    pub fn with_trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn into_branch(self, id: String) -> Branch {
        Branch {
            id,
            code: self.code,
            name: self.name,
            dialect: self.dialect,
            host: self.host,
            port: self.port,
            database: self.database,
            username: self.username,
            password: self.password,
            extra_params: self.extra_params,
            tls: self.tls,
            trust_server_certificate: self.trust_server_certificate,
            active: true,
            metadata: self.metadata,
        }
    }
}

/// Request to update a branch.
///
/// Unset fields are left unchanged. Double-option fields (`extra_params`,
/// `tls`) distinguish "leave alone" from "clear".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateBranchRequest {
    /// New display name.
    pub name: Option<String>,
    /// New dialect.
    pub dialect: Option<SqlDialect>,
    /// New server host.
    pub host: Option<String>,
    /// New server port.
    pub port: Option<u16>,
    /// New database name.
    pub database: Option<String>,
    /// New credentials.
    pub credentials: Option<(String, String)>,
    /// New extra parameters (inner `None` clears them).
    pub extra_params: Option<Option<String>>,
    /// New TLS mode (inner `None` clears it).
    pub tls: Option<Option<TlsMode>>,
    /// New certificate-trust flag.
    pub trust_server_certificate: Option<bool>,
    /// Metadata to add/update.
    pub metadata: Option<HashMap<String, String>>,
}

impl UpdateBranchRequest {
    /// Create an empty update request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the dialect.
    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Set the server host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the server port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Set or clear extra parameters.
    pub fn with_extra_params(mut self, params: Option<String>) -> Self {
        self.extra_params = Some(params);
        self
    }

    /// Set or clear the TLS mode.
    pub fn with_tls(mut self, tls: Option<TlsMode>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Set the certificate-trust flag.
    pub fn with_trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = Some(trust);
        self
    }

    /// Set metadata to merge in.
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Whether this update touches any connection-affecting field.
    ///
    /// Such updates must invalidate the branch's cached descriptor.
    pub fn affects_connection(&self) -> bool {
        self.dialect.is_some()
            || self.host.is_some()
            || self.port.is_some()
            || self.database.is_some()
            || self.credentials.is_some()
            || self.extra_params.is_some()
            || self.tls.is_some()
            || self.trust_server_certificate.is_some()
    }
}

/// Branch registry trait.
///
/// The host application implements this against its head-office database;
/// [`InMemoryBranchRegistry`] is the reference implementation.
#[async_trait]
pub trait BranchRegistry: Send + Sync {
    /// Insert a new branch record.
    async fn insert(&self, record: &BranchRecord) -> BranchDbResult<()>;

    /// Get a branch record by id.
    async fn get(&self, id: &str) -> BranchDbResult<Option<BranchRecord>>;

    /// Get a branch record by code.
    async fn get_by_code(&self, code: &str) -> BranchDbResult<Option<BranchRecord>>;

    /// Update an existing branch record.
    async fn update(&self, record: &BranchRecord) -> BranchDbResult<()>;

    /// List all branch records.
    async fn list(&self) -> BranchDbResult<Vec<BranchRecord>>;
}

/// In-memory branch registry.
pub struct InMemoryBranchRegistry {
    records: tokio::sync::RwLock<HashMap<String, BranchRecord>>,
}

impl InMemoryBranchRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            records: tokio::sync::RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryBranchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BranchRegistry for InMemoryBranchRegistry {
    async fn insert(&self, record: &BranchRecord) -> BranchDbResult<()> {
        let mut records = self.records.write().await;
        records.insert(record.branch.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> BranchDbResult<Option<BranchRecord>> {
        let records = self.records.read().await;
        Ok(records.get(id).cloned())
    }

    async fn get_by_code(&self, code: &str) -> BranchDbResult<Option<BranchRecord>> {
        let records = self.records.read().await;
        Ok(records.values().find(|r| r.branch.code == code).cloned())
    }

    async fn update(&self, record: &BranchRecord) -> BranchDbResult<()> {
        let mut records = self.records.write().await;
        if !records.contains_key(&record.branch.id) {
            return Err(BranchDbError::NotFound(record.branch.id.clone()));
        }
        records.insert(record.branch.id.clone(), record.clone());
        Ok(())
    }

    async fn list(&self) -> BranchDbResult<Vec<BranchRecord>> {
        let records = self.records.read().await;
        let mut all: Vec<_> = records.values().cloned().collect();
        all.sort_by(|a, b| a.branch.code.cmp(&b.branch.code));
        Ok(all)
    }
}

/// Branch provisioner trait.
///
/// Implement this to set up branch resources on creation; the usual
/// implementation runs the schema migrator against the new branch.
#[async_trait]
pub trait BranchProvisioner: Send + Sync {
    /// Provision resources for a new branch.
    async fn provision(&self, branch: &Branch) -> BranchDbResult<()>;
}

/// No-op provisioner for testing or manual provisioning.
#[derive(Debug, Clone, Default)]
pub struct NoOpProvisioner;

#[async_trait]
impl BranchProvisioner for NoOpProvisioner {
    async fn provision(&self, _branch: &Branch) -> BranchDbResult<()> {
        Ok(())
    }
}

/// High-level branch administration API.
pub struct BranchAdmin {
    registry: Arc<dyn BranchRegistry>,
    provisioner: Arc<dyn BranchProvisioner>,
    cache: Arc<DescriptorCache>,
}

impl BranchAdmin {
    /// Create an admin with an injected registry, provisioner, and cache.
    pub fn new(
        registry: Arc<dyn BranchRegistry>,
        provisioner: Arc<dyn BranchProvisioner>,
        cache: Arc<DescriptorCache>,
    ) -> Self {
        Self {
            registry,
            provisioner,
            cache,
        }
    }

    /// Create an admin with a no-op provisioner.
    pub fn with_registry(registry: Arc<dyn BranchRegistry>, cache: Arc<DescriptorCache>) -> Self {
        Self::new(registry, Arc::new(NoOpProvisioner), cache)
    }

    /// Create a new branch.
    ///
    /// The code must be unique. On provisioning failure the branch is kept
    /// in the registry, deactivated, with the failure recorded.
    pub async fn create(&self, request: CreateBranchRequest) -> BranchDbResult<BranchRecord> {
        if self.registry.get_by_code(&request.code).await?.is_some() {
            return Err(BranchDbError::Storage(format!(
                "Branch code '{}' already exists",
                request.code
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let branch = request.into_branch(id);
        let mut record = BranchRecord::new(branch);
        self.registry.insert(&record).await?;

        match self.provisioner.provision(&record.branch).await {
            Ok(()) => {
                info!(
                    target: "tillpoint::branchdb",
                    "branch {} created and provisioned",
                    record.branch.code
                );
                Ok(record)
            }
            Err(e) => {
                warn!(
                    target: "tillpoint::branchdb",
                    "branch {} provisioning failed: {}",
                    record.branch.code,
                    e
                );
                record.branch.active = false;
                record.provision_error = Some(e.to_string());
                record.updated_at = Utc::now();
                self.registry.update(&record).await?;
                Err(e)
            }
        }
    }

    /// Get a branch record by id.
    pub async fn get(&self, id: &str) -> BranchDbResult<Option<BranchRecord>> {
        self.registry.get(id).await
    }

    /// Get a branch record by code.
    pub async fn get_by_code(&self, code: &str) -> BranchDbResult<Option<BranchRecord>> {
        self.registry.get_by_code(code).await
    }

    /// List all branch records.
    pub async fn list(&self) -> BranchDbResult<Vec<BranchRecord>> {
        self.registry.list().await
    }

    /// Update a branch.
    ///
    /// When the update touches any connection-affecting field, the cached
    /// descriptor is invalidated so the next operation rebuilds from the
    /// new values.
    pub async fn update(
        &self,
        id: &str,
        request: UpdateBranchRequest,
    ) -> BranchDbResult<BranchRecord> {
        let mut record = self
            .registry
            .get(id)
            .await?
            .ok_or_else(|| BranchDbError::NotFound(id.to_string()))?;

        let invalidate = request.affects_connection();

        if let Some(name) = request.name {
            record.branch.name = Some(name);
        }
        if let Some(dialect) = request.dialect {
            record.branch.dialect = dialect;
        }
        if let Some(host) = request.host {
            record.branch.host = Some(host);
        }
        if let Some(port) = request.port {
            record.branch.port = Some(port);
        }
        if let Some(database) = request.database {
            record.branch.database = Some(database);
        }
        if let Some((username, password)) = request.credentials {
            record.branch.username = Some(username);
            record.branch.password = Some(password);
        }
        if let Some(extra_params) = request.extra_params {
            record.branch.extra_params = extra_params;
        }
        if let Some(tls) = request.tls {
            record.branch.tls = tls;
        }
        if let Some(trust) = request.trust_server_certificate {
            record.branch.trust_server_certificate = trust;
        }
        if let Some(metadata) = request.metadata {
            record.branch.metadata.extend(metadata);
        }
        record.updated_at = Utc::now();

        self.registry.update(&record).await?;

        if invalidate {
            self.cache.invalidate(id);
        }

        Ok(record)
    }

    /// Deactivate a branch.
    ///
    /// Logical only: the record stays in the registry with `active` unset
    /// and its cached descriptor removed. There is no hard delete.
    pub async fn deactivate(&self, id: &str) -> BranchDbResult<BranchRecord> {
        let mut record = self
            .registry
            .get(id)
            .await?
            .ok_or_else(|| BranchDbError::NotFound(id.to_string()))?;

        record.branch.active = false;
        record.updated_at = Utc::now();
        self.registry.update(&record).await?;
        self.cache.invalidate(id);

        info!(
            target: "tillpoint::branchdb",
            "branch {} deactivated",
            record.branch.code
        );
        Ok(record)
    }

    /// Reactivate a previously deactivated branch.
    pub async fn reactivate(&self, id: &str) -> BranchDbResult<BranchRecord> {
        let mut record = self
            .registry
            .get(id)
            .await?
            .ok_or_else(|| BranchDbError::NotFound(id.to_string()))?;

        record.branch.active = true;
        record.updated_at = Utc::now();
        self.registry.update(&record).await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BranchDbConfig;

    fn admin() -> (BranchAdmin, Arc<DescriptorCache>) {
        let cache = Arc::new(DescriptorCache::new(BranchDbConfig::default()));
        let registry = Arc::new(InMemoryBranchRegistry::new());
        (
            BranchAdmin::with_registry(registry, Arc::clone(&cache)),
            cache,
        )
    }

    fn postgres_request(code: &str) -> CreateBranchRequest {
        CreateBranchRequest::new(code, SqlDialect::Postgres)
            .with_host("a")
            .with_database("shop")
            .with_credentials("u", "p")
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (admin, _cache) = admin();

        let record = admin
            .create(postgres_request("B001").with_name("Harbour Road"))
            .await
            .unwrap();

        assert!(record.branch.active);
        assert!(record.provision_error.is_none());

        let fetched = admin.get_by_code("B001").await.unwrap().unwrap();
        assert_eq!(fetched.branch.id, record.branch.id);
        assert_eq!(fetched.branch.name, Some("Harbour Road".to_string()));
    }

    #[tokio::test]
    async fn test_duplicate_code_rejected() {
        let (admin, _cache) = admin();

        admin.create(postgres_request("B001")).await.unwrap();
        let err = admin.create(postgres_request("B001")).await.unwrap_err();
        assert!(matches!(err, BranchDbError::Storage(_)));
    }

    #[tokio::test]
    async fn test_connection_update_invalidates_cache() {
        let (admin, cache) = admin();
        let record = admin.create(postgres_request("B001")).await.unwrap();
        let id = record.branch.id.clone();

        let descriptor = cache.get_or_build(&record.branch).unwrap();
        assert!(descriptor.as_str().contains("Host=a"));

        let updated = admin
            .update(&id, UpdateBranchRequest::new().with_host("b"))
            .await
            .unwrap();

        // Cache entry gone; next build reflects the new host.
        let rebuilt = cache.get_or_build(&updated.branch).unwrap();
        assert!(rebuilt.as_str().contains("Host=b"));
    }

    #[tokio::test]
    async fn test_name_only_update_keeps_cache() {
        let (admin, cache) = admin();
        let record = admin.create(postgres_request("B001")).await.unwrap();

        cache.get_or_build(&record.branch).unwrap();
        assert_eq!(cache.len(), 1);

        admin
            .update(
                &record.branch.id,
                UpdateBranchRequest::new().with_name("Renamed"),
            )
            .await
            .unwrap();

        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_deactivate_is_logical() {
        let (admin, cache) = admin();
        let record = admin.create(postgres_request("B001")).await.unwrap();
        cache.get_or_build(&record.branch).unwrap();

        let deactivated = admin.deactivate(&record.branch.id).await.unwrap();
        assert!(!deactivated.branch.active);
        assert!(cache.is_empty());

        // Still present in the registry.
        assert!(admin.get(&record.branch.id).await.unwrap().is_some());

        let reactivated = admin.reactivate(&record.branch.id).await.unwrap();
        assert!(reactivated.branch.active);
    }

    #[tokio::test]
    async fn test_provision_failure_marks_branch() {
        struct FailingProvisioner;

        #[async_trait]
        impl BranchProvisioner for FailingProvisioner {
            async fn provision(&self, _branch: &Branch) -> BranchDbResult<()> {
                Err(BranchDbError::Schema("disk full".to_string()))
            }
        }

        let cache = Arc::new(DescriptorCache::new(BranchDbConfig::default()));
        let registry = Arc::new(InMemoryBranchRegistry::new());
        let admin = BranchAdmin::new(
            Arc::clone(&registry) as Arc<dyn BranchRegistry>,
            Arc::new(FailingProvisioner),
            cache,
        );

        let err = admin.create(postgres_request("B001")).await.unwrap_err();
        assert!(matches!(err, BranchDbError::Schema(_)));

        let record = admin.get_by_code("B001").await.unwrap().unwrap();
        assert!(!record.branch.active);
        assert_eq!(record.provision_error, Some("Schema error: disk full".to_string()));
    }

    #[tokio::test]
    async fn test_list_sorted_by_code() {
        let (admin, _cache) = admin();
        admin.create(postgres_request("B002")).await.unwrap();
        admin.create(postgres_request("B001")).await.unwrap();

        let all = admin.list().await.unwrap();
        let codes: Vec<_> = all.iter().map(|r| r.branch.code.as_str()).collect();
        assert_eq!(codes, vec!["B001", "B002"]);
    }

    #[test]
    fn test_affects_connection() {
        assert!(!UpdateBranchRequest::new().affects_connection());
        assert!(!UpdateBranchRequest::new().with_name("x").affects_connection());
        assert!(UpdateBranchRequest::new().with_host("x").affects_connection());
        assert!(UpdateBranchRequest::new().with_port(1).affects_connection());
        assert!(
            UpdateBranchRequest::new()
                .with_credentials("u", "p")
                .affects_connection()
        );
        assert!(UpdateBranchRequest::new().with_tls(None).affects_connection());
    }
}
