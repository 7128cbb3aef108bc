//! Connection descriptor builder
//!
//! Pure translation from a branch record into a dialect-specific connection
//! string. The only side effect is creating the containing directory for
//! SQLite files; no connection is opened here.

use crate::branch::{Branch, SqlDialect};
use crate::config::BranchDbConfig;
use crate::error::{BranchDbError, BranchDbResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A fully-built, dialect-specific connection descriptor.
///
/// Descriptors are cheap to clone and are shared across many contexts; the
/// contexts themselves are never shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// Dialect the descriptor was built for.
    pub dialect: SqlDialect,

    /// The connection string handed to the dialect driver.
    pub value: String,
}

impl ConnectionDescriptor {
    /// Get the raw connection string.
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Connection string with the password masked, safe for logs.
    pub fn redacted(&self) -> String {
        self.value
            .split(';')
            .map(|pair| {
                let key = pair.split('=').next().unwrap_or("");
                if key.eq_ignore_ascii_case("Password") || key.eq_ignore_ascii_case("Pwd") {
                    format!("{}=***", key)
                } else {
                    pair.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl std::fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Build the connection descriptor for a branch.
///
/// Dispatches on the branch's dialect; every dialect is handled
/// exhaustively, so an unsupported value cannot slip through. Required
/// fields are validated up front and no partial descriptor is ever
/// returned.
///
/// # Examples
///
/// ```
/// use tillpoint_branchdb::{build_descriptor, Branch, BranchDbConfig, SqlDialect, TlsMode};
///
/// let branch = Branch::new("br-1", "B002", SqlDialect::Postgres)
///     .with_host("db.local")
///     .with_database("shop")
///     .with_credentials("u", "p")
///     .with_tls(TlsMode::Required);
///
/// let descriptor = build_descriptor(&branch, &BranchDbConfig::default()).unwrap();
/// assert!(descriptor.as_str().contains("Host=db.local"));
/// ```
pub fn build_descriptor(
    branch: &Branch,
    config: &BranchDbConfig,
) -> BranchDbResult<ConnectionDescriptor> {
    let value = match branch.dialect {
        SqlDialect::Sqlite => build_sqlite(branch, config)?,
        SqlDialect::SqlServer => build_sql_server(branch)?,
        SqlDialect::Postgres => build_postgres(branch)?,
        SqlDialect::MySql => build_mysql(branch)?,
    };

    Ok(ConnectionDescriptor {
        dialect: branch.dialect,
        value,
    })
}

/// File path for a branch's SQLite database.
///
/// Derived solely from the branch's stable code; server, port, and
/// credential fields are ignored for this dialect.
pub fn sqlite_path(branch: &Branch, config: &BranchDbConfig) -> PathBuf {
    config
        .sqlite_root
        .join(&branch.code)
        .join("Database")
        .join(format!("{}.db", branch.code))
}

fn build_sqlite(branch: &Branch, config: &BranchDbConfig) -> BranchDbResult<String> {
    if branch.code.trim().is_empty() {
        return Err(BranchDbError::Configuration(format!(
            "Branch '{}' has no code; SQLite file placement requires one",
            branch.id
        )));
    }

    let path = sqlite_path(branch, config);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    Ok(format!("Data Source={}", path.display()))
}

fn require_server_fields<'a>(branch: &'a Branch) -> BranchDbResult<(&'a str, &'a str, u16)> {
    let host = branch
        .host
        .as_deref()
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| {
            BranchDbError::Configuration(format!(
                "Branch '{}' uses {} but has no server host",
                branch.code, branch.dialect
            ))
        })?;

    let database = branch
        .database
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| {
            BranchDbError::Configuration(format!(
                "Branch '{}' uses {} but has no database name",
                branch.code, branch.dialect
            ))
        })?;

    // default_port is always Some for server-based dialects
    let port = branch
        .port
        .or_else(|| branch.dialect.default_port())
        .unwrap_or_default();

    Ok((host, database, port))
}

fn require_credentials<'a>(branch: &'a Branch) -> BranchDbResult<(&'a str, &'a str)> {
    match (branch.username.as_deref(), branch.password.as_deref()) {
        (Some(user), Some(pass)) if !user.is_empty() => Ok((user, pass)),
        _ => Err(BranchDbError::Configuration(format!(
            "Branch '{}' uses {} which requires a username and password",
            branch.code, branch.dialect
        ))),
    }
}

fn build_sql_server(branch: &Branch) -> BranchDbResult<String> {
    let (host, database, port) = require_server_fields(branch)?;

    let mut pairs = vec![
        format!("Server={},{}", host, port),
        format!("Database={}", database),
    ];

    if branch.has_credentials() {
        let (user, pass) = require_credentials(branch)?;
        pairs.push(format!("User Id={}", user));
        pairs.push(format!("Password={}", pass));
    } else {
        // No credentials means Windows integrated auth.
        pairs.push("Integrated Security=True".to_string());
    }

    if branch.tls.is_some_and(|t| t.is_encrypted()) {
        pairs.push("Encrypt=True".to_string());
    }
    if branch.trust_server_certificate {
        pairs.push("TrustServerCertificate=True".to_string());
    }

    push_extra_params(&mut pairs, branch);
    Ok(pairs.join(";"))
}

fn build_postgres(branch: &Branch) -> BranchDbResult<String> {
    let (host, database, port) = require_server_fields(branch)?;
    let (user, pass) = require_credentials(branch)?;

    let mut pairs = vec![
        format!("Host={}", host),
        format!("Port={}", port),
        format!("Database={}", database),
        format!("Username={}", user),
        format!("Password={}", pass),
    ];

    if let Some(tls) = branch.tls {
        pairs.push(format!("SSL Mode={}", tls.postgres_keyword()));
    }

    push_extra_params(&mut pairs, branch);
    Ok(pairs.join(";"))
}

fn build_mysql(branch: &Branch) -> BranchDbResult<String> {
    let (host, database, port) = require_server_fields(branch)?;
    let (user, pass) = require_credentials(branch)?;

    let mut pairs = vec![
        format!("Server={}", host),
        format!("Port={}", port),
        format!("Database={}", database),
        format!("Uid={}", user),
        format!("Pwd={}", pass),
    ];

    if let Some(tls) = branch.tls {
        pairs.push(format!("SSL Mode={}", tls.mysql_keyword()));
    }

    // caching_sha2_password servers reject non-TLS logins unless the client
    // may fetch the server's RSA key, so this is always on.
    pairs.push("AllowPublicKeyRetrieval=True".to_string());

    push_extra_params(&mut pairs, branch);
    Ok(pairs.join(";"))
}

fn push_extra_params(pairs: &mut Vec<String>, branch: &Branch) {
    if let Some(extra) = branch.extra_params.as_deref() {
        let extra = extra.trim().trim_matches(';');
        if !extra.is_empty() {
            pairs.push(extra.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::TlsMode;

    fn config_in(dir: &std::path::Path) -> BranchDbConfig {
        BranchDbConfig::new(dir)
    }

    #[test]
    fn test_sqlite_path_from_code_only() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path());

        // Garbage server fields must not influence the path.
        let branch = Branch::new("br-1", "B001", SqlDialect::Sqlite)
            .with_host("nonsense")
            .with_port(9)
            .with_database("ignored")
            .with_credentials("x", "y");

        let descriptor = build_descriptor(&branch, &config).unwrap();
        let expected = tmp.path().join("B001").join("Database").join("B001.db");

        assert_eq!(
            descriptor.as_str(),
            format!("Data Source={}", expected.display())
        );
        assert!(expected.parent().unwrap().is_dir());
    }

    #[test]
    fn test_sqlite_requires_code() {
        let tmp = tempfile::tempdir().unwrap();
        let branch = Branch::new("br-1", "  ", SqlDialect::Sqlite);

        let err = build_descriptor(&branch, &config_in(tmp.path())).unwrap_err();
        assert!(matches!(err, BranchDbError::Configuration(_)));
    }

    #[test]
    fn test_sql_server_integrated_auth_without_credentials() {
        let branch = Branch::new("br-1", "B003", SqlDialect::SqlServer)
            .with_host("sql.local")
            .with_database("shop");

        let descriptor = build_descriptor(&branch, &BranchDbConfig::default()).unwrap();
        assert_eq!(
            descriptor.as_str(),
            "Server=sql.local,1433;Database=shop;Integrated Security=True"
        );
    }

    #[test]
    fn test_sql_server_with_credentials_and_trust() {
        let branch = Branch::new("br-1", "B003", SqlDialect::SqlServer)
            .with_host("sql.local")
            .with_port(14330)
            .with_database("shop")
            .with_credentials("sa", "secret")
            .with_tls(TlsMode::Required)
            .with_trust_server_certificate(true);

        let descriptor = build_descriptor(&branch, &BranchDbConfig::default()).unwrap();
        assert!(descriptor.as_str().contains("Server=sql.local,14330"));
        assert!(descriptor.as_str().contains("User Id=sa"));
        assert!(descriptor.as_str().contains("Password=secret"));
        assert!(descriptor.as_str().contains("Encrypt=True"));
        assert!(descriptor.as_str().contains("TrustServerCertificate=True"));
        assert!(!descriptor.as_str().contains("Integrated Security"));
    }

    #[test]
    fn test_postgres_full_descriptor() {
        let branch = Branch::new("br-1", "B002", SqlDialect::Postgres)
            .with_host("db.local")
            .with_port(5432)
            .with_database("shop")
            .with_credentials("u", "p")
            .with_tls(TlsMode::Required);

        let descriptor = build_descriptor(&branch, &BranchDbConfig::default()).unwrap();
        let value = descriptor.as_str();
        assert!(value.contains("Host=db.local"));
        assert!(value.contains("Port=5432"));
        assert!(value.contains("Database=shop"));
        assert!(value.contains("Username=u"));
        assert!(value.contains("Password=p"));
        assert!(value.contains("SSL Mode=Require"));
    }

    #[test]
    fn test_postgres_requires_credentials() {
        let branch = Branch::new("br-1", "B002", SqlDialect::Postgres)
            .with_host("db.local")
            .with_database("shop");

        let err = build_descriptor(&branch, &BranchDbConfig::default()).unwrap_err();
        assert!(matches!(err, BranchDbError::Configuration(_)));
    }

    #[test]
    fn test_mysql_requires_credentials() {
        let branch = Branch::new("br-1", "B004", SqlDialect::MySql)
            .with_host("db.local")
            .with_database("shop");

        let err = build_descriptor(&branch, &BranchDbConfig::default()).unwrap_err();
        assert!(matches!(err, BranchDbError::Configuration(_)));
    }

    #[test]
    fn test_mysql_always_allows_public_key_retrieval() {
        let without_tls = Branch::new("br-1", "B004", SqlDialect::MySql)
            .with_host("db.local")
            .with_database("shop")
            .with_credentials("u", "p");
        let with_tls = without_tls.clone().with_tls(TlsMode::VerifyFull);

        let config = BranchDbConfig::default();
        for branch in [without_tls, with_tls] {
            let descriptor = build_descriptor(&branch, &config).unwrap();
            assert!(descriptor.as_str().contains("AllowPublicKeyRetrieval=True"));
        }
    }

    #[test]
    fn test_mysql_tls_keyword() {
        let branch = Branch::new("br-1", "B004", SqlDialect::MySql)
            .with_host("db.local")
            .with_database("shop")
            .with_credentials("u", "p")
            .with_tls(TlsMode::VerifyCa);

        let descriptor = build_descriptor(&branch, &BranchDbConfig::default()).unwrap();
        assert!(descriptor.as_str().contains("SSL Mode=VerifyCA"));
        assert!(descriptor.as_str().contains("Uid=u"));
        assert!(descriptor.as_str().contains("Pwd=p"));
    }

    #[test]
    fn test_missing_host_fails() {
        let branch = Branch::new("br-1", "B005", SqlDialect::SqlServer).with_database("shop");
        let err = build_descriptor(&branch, &BranchDbConfig::default()).unwrap_err();
        assert!(matches!(err, BranchDbError::Configuration(_)));
    }

    #[test]
    fn test_extra_params_passthrough() {
        let branch = Branch::new("br-1", "B002", SqlDialect::Postgres)
            .with_host("db.local")
            .with_database("shop")
            .with_credentials("u", "p")
            .with_extra_params("Timeout=15;Keepalive=30");

        let descriptor = build_descriptor(&branch, &BranchDbConfig::default()).unwrap();
        assert!(descriptor.as_str().ends_with("Timeout=15;Keepalive=30"));
    }

    #[test]
    fn test_redacted_masks_password() {
        let branch = Branch::new("br-1", "B002", SqlDialect::Postgres)
            .with_host("db.local")
            .with_database("shop")
            .with_credentials("u", "hunter2");

        let descriptor = build_descriptor(&branch, &BranchDbConfig::default()).unwrap();
        let redacted = descriptor.redacted();
        assert!(redacted.contains("Password=***"));
        assert!(!redacted.contains("hunter2"));
    }
}
