//! Branch records
//!
//! A branch is one shop in the chain, with its own database and its own
//! connection settings chosen by head office.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Supported SQL dialects for branch databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlDialect {
    /// File-backed SQLite database, local to the branch host.
    Sqlite,
    /// Microsoft SQL Server.
    SqlServer,
    /// PostgreSQL.
    Postgres,
    /// MySQL/MariaDB.
    MySql,
}

impl SqlDialect {
    /// Get the dialect name.
    pub fn name(&self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "SQLite",
            SqlDialect::SqlServer => "SQL Server",
            SqlDialect::Postgres => "PostgreSQL",
            SqlDialect::MySql => "MySQL",
        }
    }

    /// Default server port, if the dialect uses one.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            SqlDialect::Sqlite => None,
            SqlDialect::SqlServer => Some(1433),
            SqlDialect::Postgres => Some(5432),
            SqlDialect::MySql => Some(3306),
        }
    }

    /// Check if this dialect is server-based (everything except SQLite).
    pub fn is_server_based(&self) -> bool {
        !matches!(self, SqlDialect::Sqlite)
    }
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// TLS requirement for a branch connection.
///
/// Each dialect spells these differently in its connection string; the
/// descriptor builder owns that mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// No TLS.
    Disabled,
    /// TLS required, certificate not verified.
    Required,
    /// TLS required, CA-signed certificate verified.
    VerifyCa,
    /// TLS required, certificate and host name verified.
    VerifyFull,
}

impl TlsMode {
    /// Keyword used in PostgreSQL connection strings (`SSL Mode=...`).
    pub fn postgres_keyword(&self) -> &'static str {
        match self {
            TlsMode::Disabled => "Disable",
            TlsMode::Required => "Require",
            TlsMode::VerifyCa => "VerifyCA",
            TlsMode::VerifyFull => "VerifyFull",
        }
    }

    /// Keyword used in MySQL connection strings (`SSL Mode=...`).
    pub fn mysql_keyword(&self) -> &'static str {
        match self {
            TlsMode::Disabled => "None",
            TlsMode::Required => "Required",
            TlsMode::VerifyCa => "VerifyCA",
            TlsMode::VerifyFull => "VerifyFull",
        }
    }

    /// Whether this mode requires an encrypted channel.
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, TlsMode::Disabled)
    }
}

/// Branch connection record.
///
/// Head office stores one of these per shop. `code` is the stable display
/// code (printed on receipts, used for SQLite file placement); `id` is the
/// opaque registry identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Branch {
    /// Unique branch identifier.
    pub id: String,

    /// Stable branch code (e.g. "B001").
    pub code: String,

    /// Display name.
    pub name: Option<String>,

    /// Database dialect used by this branch.
    pub dialect: SqlDialect,

    /// Server host (ignored for SQLite).
    pub host: Option<String>,

    /// Server port (ignored for SQLite; dialect default when absent).
    pub port: Option<u16>,

    /// Database name (ignored for SQLite).
    pub database: Option<String>,

    /// Username, when not using integrated auth.
    pub username: Option<String>,

    /// Password, when not using integrated auth.
    pub password: Option<String>,

    /// Extra connection parameters, appended verbatim.
    pub extra_params: Option<String>,

    /// TLS requirement, when the branch mandates one.
    pub tls: Option<TlsMode>,

    /// Trust the server certificate without validation (SQL Server).
    pub trust_server_certificate: bool,

    /// Whether the branch is active.
    pub active: bool,

    /// Additional metadata.
    pub metadata: HashMap<String, String>,
}

impl Branch {
    /// Create a new branch with the given identity and code.
    ///
    /// # Examples
    ///
    /// ```
    /// use tillpoint_branchdb::{Branch, SqlDialect};
    ///
    /// let branch = Branch::new("br-123", "B001", SqlDialect::Sqlite);
    /// assert!(branch.active);
    /// ```
    pub fn new(id: impl Into<String>, code: impl Into<String>, dialect: SqlDialect) -> Self {
        Self {
            id: id.into(),
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
            active: true,
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

    /// Set username and password.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set extra passthrough connection parameters.
    pub fn with_extra_params(mut self, params: impl Into<String>) -> Self {
        self.extra_params = Some(params.into());
        self
    }

    /// Set the TLS mode.
    pub fn with_tls(mut self, tls: TlsMode) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Trust the server certificate without validation (SQL Server).
    pub fn with_trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    /// Set active status.
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Check if username and password are both present.
    pub fn has_credentials(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty())
            && self.password.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_new() {
        let branch = Branch::new("br-1", "B001", SqlDialect::Sqlite);
        assert_eq!(branch.id, "br-1");
        assert_eq!(branch.code, "B001");
        assert_eq!(branch.dialect, SqlDialect::Sqlite);
        assert!(branch.active);
        assert!(!branch.has_credentials());
    }

    #[test]
    fn test_branch_builder() {
        let branch = Branch::new("br-1", "B002", SqlDialect::Postgres)
            .with_name("Harbour Road")
            .with_host("db.local")
            .with_port(5433)
            .with_database("shop")
            .with_credentials("u", "p")
            .with_tls(TlsMode::Required)
            .with_metadata("region", "south");

        assert_eq!(branch.name, Some("Harbour Road".to_string()));
        assert_eq!(branch.host, Some("db.local".to_string()));
        assert_eq!(branch.port, Some(5433));
        assert!(branch.has_credentials());
        assert_eq!(branch.metadata.get("region"), Some(&"south".to_string()));
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(SqlDialect::Sqlite.default_port(), None);
        assert_eq!(SqlDialect::SqlServer.default_port(), Some(1433));
        assert_eq!(SqlDialect::Postgres.default_port(), Some(5432));
        assert_eq!(SqlDialect::MySql.default_port(), Some(3306));
    }

    #[test]
    fn test_tls_keywords() {
        assert_eq!(TlsMode::Required.postgres_keyword(), "Require");
        assert_eq!(TlsMode::Required.mysql_keyword(), "Required");
        assert_eq!(TlsMode::VerifyCa.postgres_keyword(), "VerifyCA");
        assert_eq!(TlsMode::VerifyFull.mysql_keyword(), "VerifyFull");
        assert_eq!(TlsMode::Disabled.mysql_keyword(), "None");
        assert!(!TlsMode::Disabled.is_encrypted());
        assert!(TlsMode::Required.is_encrypted());
    }
}
