//! Schema ensure/migrate
//!
//! Idempotently brings a branch database up to the schema version the
//! application expects, on demand. A bulk sweep over all branches isolates
//! per-branch failures: one unreachable shop must not stop provisioning of
//! the rest.

use crate::branch::{Branch, SqlDialect};
use crate::error::{BranchDbError, BranchDbResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tillpoint_log::{debug, error, info};

/// SQL that checks whether a column exists, per dialect.
///
/// Each dialect has its own introspection syntax; the query returns a
/// single count that is non-zero when the column is present.
pub fn column_exists_sql(dialect: SqlDialect, table: &str, column: &str) -> String {
    match dialect {
        SqlDialect::Sqlite => format!(
            "SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name = '{}'",
            table, column
        ),
        SqlDialect::MySql => format!(
            "SELECT COUNT(*) FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = '{}' AND COLUMN_NAME = '{}'",
            table, column
        ),
        SqlDialect::SqlServer => format!(
            "SELECT COUNT(*) FROM sys.columns \
             WHERE object_id = OBJECT_ID('{}') AND name = '{}'",
            table, column
        ),
        SqlDialect::Postgres => format!(
            "SELECT COUNT(*) FROM information_schema.columns \
             WHERE table_name = '{}' AND column_name = '{}'",
            table, column
        ),
    }
}

/// Existence guard for an ad hoc schema patch.
///
/// A guarded migration runs only when the named column is absent, which is
/// what makes re-running a sweep against an already-current schema a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnGuard {
    /// Table the patch targets.
    pub table: String,
    /// Column the patch adds.
    pub column: String,
}

/// One schema migration step.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Monotonic version; migrations apply in ascending order.
    pub version: u32,

    /// Human-readable name, used in logs.
    pub name: String,

    /// SQL applied for dialects without an override.
    pub sql: String,

    /// Dialect-specific SQL overrides.
    pub overrides: HashMap<SqlDialect, String>,

    /// Optional column-existence guard.
    pub guard: Option<ColumnGuard>,
}

impl Migration {
    /// Create a migration step.
    pub fn new(version: u32, name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            sql: sql.into(),
            overrides: HashMap::new(),
            guard: None,
        }
    }

    /// Override the SQL for one dialect.
    pub fn with_override(mut self, dialect: SqlDialect, sql: impl Into<String>) -> Self {
        self.overrides.insert(dialect, sql.into());
        self
    }

    /// Guard the step on a column being absent.
    pub fn guard_column(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.guard = Some(ColumnGuard {
            table: table.into(),
            column: column.into(),
        });
        self
    }

    /// SQL to apply for the given dialect.
    pub fn sql_for(&self, dialect: SqlDialect) -> &str {
        self.overrides.get(&dialect).unwrap_or(&self.sql)
    }
}

/// Schema executor trait.
///
/// The host application implements this against its driver; one executor
/// serves every branch, receiving the branch record on each call.
#[async_trait]
pub trait SchemaExecutor: Send + Sync {
    /// Check the branch database exists.
    async fn database_exists(&self, branch: &Branch) -> BranchDbResult<bool>;

    /// Create the branch database (for dialects that support/need it).
    async fn create_database(&self, branch: &Branch) -> BranchDbResult<()>;

    /// Execute a statement against the branch database.
    async fn execute(&self, branch: &Branch, sql: &str) -> BranchDbResult<()>;

    /// Check a column exists in the branch database.
    async fn column_exists(&self, branch: &Branch, table: &str, column: &str)
    -> BranchDbResult<bool>;
}

/// Outcome of one branch in a sweep.
#[derive(Debug)]
pub enum SweepStatus {
    /// Schema ensured; number of migration steps applied.
    Applied(usize),
    /// Branch skipped (deactivated).
    Skipped,
    /// Ensure failed for this branch only.
    Failed(BranchDbError),
}

/// Per-branch result of a bulk ensure sweep.
#[derive(Debug)]
pub struct SweepOutcome {
    /// Branch identity.
    pub branch_id: String,
    /// Branch display code.
    pub branch_code: String,
    /// What happened.
    pub status: SweepStatus,
}

/// Report for a whole sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// One outcome per branch, in sweep order.
    pub outcomes: Vec<SweepOutcome>,
}

impl SweepReport {
    /// Codes of branches whose schema was ensured.
    pub fn succeeded(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, SweepStatus::Applied(_)))
            .map(|o| o.branch_code.as_str())
            .collect()
    }

    /// Codes of branches that failed.
    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, SweepStatus::Failed(_)))
            .map(|o| o.branch_code.as_str())
            .collect()
    }

    /// Check every processed branch succeeded.
    pub fn all_ok(&self) -> bool {
        self.failed().is_empty()
    }
}

/// Branch schema migrator.
///
/// Holds the fixed migration table and applies it through an injected
/// [`SchemaExecutor`].
pub struct BranchMigrator<E: SchemaExecutor> {
    executor: E,
    migrations: Vec<Migration>,
}

impl<E: SchemaExecutor> BranchMigrator<E> {
    /// Create a migrator with an injected executor and migration table.
    ///
    /// Migrations are sorted by version once, here, and applied in that
    /// order everywhere.
    pub fn new(executor: E, mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by_key(|m| m.version);
        Self {
            executor,
            migrations,
        }
    }

    /// The migration table, in application order.
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Ensure one branch's database exists and its schema is current.
    ///
    /// Safe to re-run: guarded steps are skipped when their column is
    /// already present. Returns the number of steps applied.
    pub async fn ensure_branch(&self, branch: &Branch) -> BranchDbResult<usize> {
        if !self.executor.database_exists(branch).await? {
            info!(
                target: "tillpoint::branchdb",
                "creating database for branch {}",
                branch.code
            );
            self.executor.create_database(branch).await?;
        }

        let mut applied = 0;
        for migration in &self.migrations {
            if let Some(guard) = &migration.guard {
                let present = self
                    .executor
                    .column_exists(branch, &guard.table, &guard.column)
                    .await?;
                if present {
                    debug!(
                        target: "tillpoint::branchdb",
                        "branch {}: migration {} '{}' already applied",
                        branch.code,
                        migration.version,
                        migration.name
                    );
                    continue;
                }
            }

            let sql = migration.sql_for(branch.dialect);
            self.executor
                .execute(branch, sql)
                .await
                .map_err(|e| match e {
                    BranchDbError::Schema(_) => e,
                    other => BranchDbError::Schema(format!(
                        "migration {} '{}' failed: {}",
                        migration.version, migration.name, other
                    )),
                })?;
            applied += 1;
        }

        Ok(applied)
    }

    /// Ensure every branch in a bulk sweep.
    ///
    /// Deactivated branches are skipped. A failure for one branch is
    /// logged and recorded; the sweep always continues to the next branch.
    pub async fn ensure_all(&self, branches: &[Branch]) -> SweepReport {
        let mut report = SweepReport::default();

        for branch in branches {
            if !branch.active {
                debug!(
                    target: "tillpoint::branchdb",
                    "skipping deactivated branch {}",
                    branch.code
                );
                report.outcomes.push(SweepOutcome {
                    branch_id: branch.id.clone(),
                    branch_code: branch.code.clone(),
                    status: SweepStatus::Skipped,
                });
                continue;
            }

            let status = match self.ensure_branch(branch).await {
                Ok(applied) => {
                    info!(
                        target: "tillpoint::branchdb",
                        "branch {}: schema current, {} step(s) applied",
                        branch.code,
                        applied
                    );
                    SweepStatus::Applied(applied)
                }
                Err(e) => {
                    error!(
                        target: "tillpoint::branchdb",
                        "branch {}: schema ensure failed: {}",
                        branch.code,
                        e
                    );
                    SweepStatus::Failed(e)
                }
            };

            report.outcomes.push(SweepOutcome {
                branch_id: branch.id.clone(),
                branch_code: branch.code.clone(),
                status,
            });
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Executor that tracks created databases, executed statements, and a
    /// set of existing columns. Branches whose host is "unreachable" fail.
    struct MockExecutor {
        databases: Mutex<HashSet<String>>,
        columns: Mutex<HashSet<(String, String)>>,
        executed: Mutex<Vec<(String, String)>>,
    }

    impl MockExecutor {
        fn new() -> Self {
            Self {
                databases: Mutex::new(HashSet::new()),
                columns: Mutex::new(HashSet::new()),
                executed: Mutex::new(Vec::new()),
            }
        }

        fn check_reachable(&self, branch: &Branch) -> BranchDbResult<()> {
            if branch.host.as_deref() == Some("unreachable") {
                return Err(BranchDbError::Connection(format!(
                    "cannot reach {}",
                    branch.code
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SchemaExecutor for MockExecutor {
        async fn database_exists(&self, branch: &Branch) -> BranchDbResult<bool> {
            self.check_reachable(branch)?;
            Ok(self.databases.lock().contains(&branch.code))
        }

        async fn create_database(&self, branch: &Branch) -> BranchDbResult<()> {
            self.check_reachable(branch)?;
            self.databases.lock().insert(branch.code.clone());
            Ok(())
        }

        async fn execute(&self, branch: &Branch, sql: &str) -> BranchDbResult<()> {
            self.check_reachable(branch)?;
            self.executed
                .lock()
                .push((branch.code.clone(), sql.to_string()));
            // Mark the column added by guarded "ADD COLUMN x" patches.
            if let Some(idx) = sql.find("ADD COLUMN ") {
                let column = sql[idx + "ADD COLUMN ".len()..]
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .to_string();
                let table = sql
                    .split_whitespace()
                    .nth(2)
                    .unwrap_or("")
                    .to_string();
                self.columns.lock().insert((table, column));
            }
            Ok(())
        }

        async fn column_exists(
            &self,
            branch: &Branch,
            table: &str,
            column: &str,
        ) -> BranchDbResult<bool> {
            self.check_reachable(branch)?;
            Ok(self
                .columns
                .lock()
                .contains(&(table.to_string(), column.to_string())))
        }
    }

    fn sqlite_branch(id: &str, code: &str) -> Branch {
        Branch::new(id, code, SqlDialect::Sqlite)
    }

    fn migrations() -> Vec<Migration> {
        vec![
            Migration::new(2, "add sale discount", "ALTER TABLE sales ADD COLUMN discount REAL")
                .guard_column("sales", "discount"),
            Migration::new(
                1,
                "create sales",
                "CREATE TABLE IF NOT EXISTS sales (id INTEGER PRIMARY KEY)",
            ),
        ]
    }

    #[tokio::test]
    async fn test_migrations_sorted_by_version() {
        let migrator = BranchMigrator::new(MockExecutor::new(), migrations());
        let versions: Vec<u32> = migrator.migrations().iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_ensure_branch_creates_database_and_applies() {
        let migrator = BranchMigrator::new(MockExecutor::new(), migrations());
        let branch = sqlite_branch("br-1", "B001");

        let applied = migrator.ensure_branch(&branch).await.unwrap();
        assert_eq!(applied, 2);
        assert!(migrator.executor.databases.lock().contains("B001"));
    }

    #[tokio::test]
    async fn test_ensure_branch_is_idempotent() {
        let migrator = BranchMigrator::new(MockExecutor::new(), migrations());
        let branch = sqlite_branch("br-1", "B001");

        migrator.ensure_branch(&branch).await.unwrap();
        let executed_before = migrator.executor.executed.lock().len();

        // Second run: the guarded patch sees its column and skips.
        let applied = migrator.ensure_branch(&branch).await.unwrap();
        assert_eq!(applied, 1); // only the unguarded CREATE TABLE re-runs
        let executed_after = migrator.executor.executed.lock().len();
        assert_eq!(executed_after, executed_before + 1);
    }

    #[tokio::test]
    async fn test_dialect_override_selected() {
        let migration = Migration::new(1, "ids", "CREATE TABLE t (id INTEGER)")
            .with_override(SqlDialect::SqlServer, "CREATE TABLE t (id BIGINT IDENTITY)");

        assert_eq!(
            migration.sql_for(SqlDialect::SqlServer),
            "CREATE TABLE t (id BIGINT IDENTITY)"
        );
        assert_eq!(
            migration.sql_for(SqlDialect::Postgres),
            "CREATE TABLE t (id INTEGER)"
        );
    }

    #[tokio::test]
    async fn test_sweep_isolates_failures() {
        let migrator = BranchMigrator::new(MockExecutor::new(), migrations());

        let branches = vec![
            sqlite_branch("br-1", "B001"),
            Branch::new("br-2", "B002", SqlDialect::Postgres)
                .with_host("unreachable")
                .with_database("shop")
                .with_credentials("u", "p"),
            sqlite_branch("br-3", "B003"),
        ];

        let report = migrator.ensure_all(&branches).await;

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.succeeded(), vec!["B001", "B003"]);
        assert_eq!(report.failed(), vec!["B002"]);
        assert!(!report.all_ok());
    }

    #[tokio::test]
    async fn test_sweep_skips_deactivated() {
        let migrator = BranchMigrator::new(MockExecutor::new(), migrations());
        let branches = vec![sqlite_branch("br-1", "B001").with_active(false)];

        let report = migrator.ensure_all(&branches).await;
        assert!(matches!(report.outcomes[0].status, SweepStatus::Skipped));
        assert!(report.all_ok());
    }

    #[test]
    fn test_column_exists_sql_per_dialect() {
        let sqlite = column_exists_sql(SqlDialect::Sqlite, "sales", "discount");
        assert!(sqlite.contains("pragma_table_info('sales')"));

        let mysql = column_exists_sql(SqlDialect::MySql, "sales", "discount");
        assert!(mysql.contains("INFORMATION_SCHEMA.COLUMNS"));
        assert!(mysql.contains("DATABASE()"));

        let mssql = column_exists_sql(SqlDialect::SqlServer, "sales", "discount");
        assert!(mssql.contains("sys.columns"));
        assert!(mssql.contains("OBJECT_ID('sales')"));

        let pg = column_exists_sql(SqlDialect::Postgres, "sales", "discount");
        assert!(pg.contains("information_schema.columns"));
        assert!(pg.contains("column_name = 'discount'"));
    }
}
