//! Schema migrations
//!
//! The schema ships inside the binary as an ordered list of versioned SQL
//! scripts, one per dialect. Applied versions are tracked in `_migrations`;
//! startup runs whatever is missing.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeSet;

use super::{Backend, DynDatabasePool};
use crate::config::DatabaseDriver;

#[derive(Debug, Clone)]
pub struct Migration {
    /// Position in [`MIGRATIONS`], starting at 1
    pub version: i32,
    pub name: &'static str,
    pub up_sqlite: &'static str,
    pub up_mysql: &'static str,
}

impl Migration {
    /// The script for `driver`, split on `;` with blank and comment-only
    /// pieces dropped
    pub fn statements(&self, driver: DatabaseDriver) -> Vec<&'static str> {
        let script = match driver {
            DatabaseDriver::Sqlite => self.up_sqlite,
            DatabaseDriver::Mysql => self.up_mysql,
        };
        script
            .split(';')
            .map(str::trim)
            .filter(|piece| {
                piece
                    .lines()
                    .map(str::trim)
                    .any(|line| !line.is_empty() && !line.starts_with("--"))
            })
            .collect()
    }
}

/// All migrations, in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                first_name VARCHAR(100) NOT NULL,
                last_name VARCHAR(100) NOT NULL,
                phone VARCHAR(40),
                role VARCHAR(20) NOT NULL DEFAULT 'guardian',
                is_admin BOOLEAN NOT NULL DEFAULT 0,
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                first_name VARCHAR(100) NOT NULL,
                last_name VARCHAR(100) NOT NULL,
                phone VARCHAR(40),
                role VARCHAR(20) NOT NULL DEFAULT 'guardian',
                is_admin BOOLEAN NOT NULL DEFAULT 0,
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_users_role ON users(role);
        "#,
    },
    Migration {
        version: 2,
        name: "create_sessions",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(64) PRIMARY KEY,
                user_id INTEGER NOT NULL,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(64) PRIMARY KEY,
                user_id BIGINT NOT NULL,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX idx_sessions_expires_at ON sessions(expires_at);
        "#,
    },
    Migration {
        version: 3,
        name: "create_students",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS students (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guardian_id INTEGER NOT NULL,
                first_name VARCHAR(100) NOT NULL,
                last_name VARCHAR(100) NOT NULL,
                date_of_birth DATE,
                grade INTEGER,
                school VARCHAR(255),
                medical_notes TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (guardian_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_students_guardian_id ON students(guardian_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS students (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                guardian_id BIGINT NOT NULL,
                first_name VARCHAR(100) NOT NULL,
                last_name VARCHAR(100) NOT NULL,
                date_of_birth DATE,
                grade INT,
                school VARCHAR(255),
                medical_notes TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                FOREIGN KEY (guardian_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_students_guardian_id ON students(guardian_id);
        "#,
    },
    Migration {
        version: 4,
        name: "create_programs",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS programs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(255) NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                location VARCHAR(255),
                schedule VARCHAR(255),
                start_date DATE,
                end_date DATE,
                capacity INTEGER,
                price_cents INTEGER NOT NULL DEFAULT 0,
                min_grade INTEGER,
                max_grade INTEGER,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_programs_is_active ON programs(is_active);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS programs (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                name VARCHAR(255) NOT NULL,
                description TEXT NOT NULL,
                location VARCHAR(255),
                schedule VARCHAR(255),
                start_date DATE,
                end_date DATE,
                capacity INT,
                price_cents BIGINT NOT NULL DEFAULT 0,
                min_grade INT,
                max_grade INT,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_programs_is_active ON programs(is_active);
        "#,
    },
    Migration {
        version: 5,
        name: "create_registrations",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS registrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                student_id INTEGER NOT NULL,
                program_id INTEGER NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                notes TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (student_id) REFERENCES students(id) ON DELETE CASCADE,
                FOREIGN KEY (program_id) REFERENCES programs(id) ON DELETE CASCADE,
                UNIQUE(student_id, program_id)
            );
            CREATE INDEX IF NOT EXISTS idx_registrations_program_id ON registrations(program_id);
            CREATE INDEX IF NOT EXISTS idx_registrations_status ON registrations(status);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS registrations (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                student_id BIGINT NOT NULL,
                program_id BIGINT NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                notes TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                FOREIGN KEY (student_id) REFERENCES students(id) ON DELETE CASCADE,
                FOREIGN KEY (program_id) REFERENCES programs(id) ON DELETE CASCADE,
                UNIQUE KEY uk_registrations_student_program (student_id, program_id)
            );
            CREATE INDEX idx_registrations_program_id ON registrations(program_id);
            CREATE INDEX idx_registrations_status ON registrations(status);
        "#,
    },
    Migration {
        version: 6,
        name: "create_waivers",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS waivers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                student_id INTEGER NOT NULL,
                title VARCHAR(255) NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                signed_by VARCHAR(255),
                signed_at TIMESTAMP,
                expires_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (student_id) REFERENCES students(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_waivers_student_id ON waivers(student_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS waivers (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                student_id BIGINT NOT NULL,
                title VARCHAR(255) NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                signed_by VARCHAR(255),
                signed_at TIMESTAMP NULL,
                expires_at TIMESTAMP NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (student_id) REFERENCES students(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_waivers_student_id ON waivers(student_id);
        "#,
    },
    Migration {
        version: 7,
        name: "create_announcements",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS announcements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title VARCHAR(255) NOT NULL,
                body TEXT NOT NULL,
                priority VARCHAR(20) NOT NULL DEFAULT 'normal',
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                recipients VARCHAR(20) NOT NULL DEFAULT 'all',
                author_id INTEGER,
                published_at TIMESTAMP,
                expires_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_announcements_status ON announcements(status);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS announcements (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                title VARCHAR(255) NOT NULL,
                body TEXT NOT NULL,
                priority VARCHAR(20) NOT NULL DEFAULT 'normal',
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                recipients VARCHAR(20) NOT NULL DEFAULT 'all',
                author_id BIGINT,
                published_at TIMESTAMP NULL,
                expires_at TIMESTAMP NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                FOREIGN KEY (author_id) REFERENCES users(id) ON DELETE SET NULL
            );
            CREATE INDEX idx_announcements_status ON announcements(status);
        "#,
    },
    Migration {
        version: 8,
        name: "create_announcement_receipts",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS announcement_receipts (
                announcement_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                read_at TIMESTAMP,
                hidden BOOLEAN NOT NULL DEFAULT 0,
                PRIMARY KEY (announcement_id, user_id),
                FOREIGN KEY (announcement_id) REFERENCES announcements(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_receipts_user_id ON announcement_receipts(user_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS announcement_receipts (
                announcement_id BIGINT NOT NULL,
                user_id BIGINT NOT NULL,
                read_at TIMESTAMP NULL,
                hidden BOOLEAN NOT NULL DEFAULT 0,
                PRIMARY KEY (announcement_id, user_id),
                FOREIGN KEY (announcement_id) REFERENCES announcements(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX idx_receipts_user_id ON announcement_receipts(user_id);
        "#,
    },
    Migration {
        version: 9,
        name: "create_email_events",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS email_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email VARCHAR(255) NOT NULL,
                event VARCHAR(50) NOT NULL,
                message_id VARCHAR(255),
                reason TEXT,
                occurred_at TIMESTAMP NOT NULL,
                received_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_email_events_email ON email_events(email);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS email_events (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                email VARCHAR(255) NOT NULL,
                event VARCHAR(50) NOT NULL,
                message_id VARCHAR(255),
                reason TEXT,
                occurred_at TIMESTAMP NOT NULL,
                received_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_email_events_email ON email_events(email);
        "#,
    },
    Migration {
        version: 10,
        name: "create_login_logs",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS login_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email VARCHAR(255) NOT NULL,
                ip_address VARCHAR(45),
                user_agent TEXT,
                success BOOLEAN NOT NULL,
                failure_reason VARCHAR(255),
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_login_logs_email ON login_logs(email);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS login_logs (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                email VARCHAR(255) NOT NULL,
                ip_address VARCHAR(45),
                user_agent TEXT,
                success BOOLEAN NOT NULL,
                failure_reason VARCHAR(255),
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX idx_login_logs_email ON login_logs(email);
        "#,
    },
];

const LEDGER_SQLITE: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    applied_at TIMESTAMP NOT NULL
)";
const LEDGER_MYSQL: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version BIGINT PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    applied_at TIMESTAMP NOT NULL
)";

/// Bring the schema up to date, returning how many migrations ran
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    let done = applied_versions(pool).await?;
    let mut ran = 0;

    for migration in MIGRATIONS.iter().filter(|m| !done.contains(&m.version)) {
        tracing::info!("Migrating to v{} ({})", migration.version, migration.name);
        apply(pool, migration)
            .await
            .with_context(|| format!("Migration v{} ({}) failed", migration.version, migration.name))?;
        ran += 1;
    }

    if ran == 0 {
        tracing::debug!("Schema already current at v{}", MIGRATIONS.len());
    }
    Ok(ran)
}

/// Number of migrations not yet applied
pub async fn pending_count(pool: &DynDatabasePool) -> Result<usize> {
    let done = applied_versions(pool).await?;
    Ok(MIGRATIONS.iter().filter(|m| !done.contains(&m.version)).count())
}

/// Versions recorded in the ledger, creating the ledger on first use
async fn applied_versions(pool: &DynDatabasePool) -> Result<BTreeSet<i32>> {
    let ledger = match pool.driver() {
        DatabaseDriver::Sqlite => LEDGER_SQLITE,
        DatabaseDriver::Mysql => LEDGER_MYSQL,
    };
    pool.execute(ledger).await?;

    let sql = "SELECT version FROM _migrations";
    let versions: Vec<i64> = match pool.backend() {
        Backend::Sqlite(p) => sqlx::query_scalar(sql).fetch_all(p).await,
        Backend::Mysql(p) => sqlx::query_scalar(sql).fetch_all(p).await,
    }
    .context("Cannot read migration ledger")?;

    Ok(versions.into_iter().map(|v| v as i32).collect())
}

async fn apply(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    for statement in migration.statements(pool.driver()) {
        pool.execute(statement).await?;
    }

    let record = "INSERT INTO _migrations (version, name, applied_at) VALUES (?, ?, ?)";
    let recorded = match pool.backend() {
        Backend::Sqlite(p) => sqlx::query(record)
            .bind(migration.version)
            .bind(migration.name)
            .bind(Utc::now())
            .execute(p)
            .await
            .map(|_| ()),
        Backend::Mysql(p) => sqlx::query(record)
            .bind(migration.version)
            .bind(migration.name)
            .bind(Utc::now())
            .execute(p)
            .await
            .map(|_| ()),
    };
    recorded.context("Cannot record migration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    async fn table_exists(pool: &DynDatabasePool, table: &str) -> bool {
        let Backend::Sqlite(p) = pool.backend() else {
            panic!("tests run on sqlite");
        };
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(p)
        .await
        .expect("Failed to query sqlite_master");
        count == 1
    }

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        let applied = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(applied, MIGRATIONS.len());

        // Second run is a no-op
        let applied = run_migrations(&pool).await.expect("Failed to rerun migrations");
        assert_eq!(applied, 0);
    }

    #[tokio::test]
    async fn test_pending_count_drops_to_zero() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        assert_eq!(pending_count(&pool).await.unwrap(), MIGRATIONS.len());
        run_migrations(&pool).await.unwrap();
        assert_eq!(pending_count(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_all_tables_created() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.unwrap();

        for table in [
            "users",
            "sessions",
            "students",
            "programs",
            "registrations",
            "waivers",
            "announcements",
            "announcement_receipts",
            "email_events",
            "login_logs",
        ] {
            assert!(table_exists(&pool, table).await, "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_registration_unique_per_student_and_program() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.unwrap();

        pool.execute(
            "INSERT INTO users (email, password_hash, first_name, last_name) VALUES ('g@x.org', 'h', 'G', 'X')",
        )
        .await
        .unwrap();
        pool.execute("INSERT INTO students (guardian_id, first_name, last_name) VALUES (1, 'Ada', 'X')")
            .await
            .unwrap();
        pool.execute("INSERT INTO programs (name) VALUES ('Robotics')")
            .await
            .unwrap();
        pool.execute("INSERT INTO registrations (student_id, program_id) VALUES (1, 1)")
            .await
            .unwrap();

        let duplicate = pool
            .execute("INSERT INTO registrations (student_id, program_id) VALUES (1, 1)")
            .await;
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_statements_skip_blank_and_comment_pieces() {
        let migration = Migration {
            version: 99,
            name: "scratch",
            up_sqlite: "CREATE TABLE a (id INT);\n-- comment only\n;\nCREATE INDEX i ON a(id);",
            up_mysql: "-- nothing here",
        };

        let statements = migration.statements(DatabaseDriver::Sqlite);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE"));
        assert!(statements[1].starts_with("CREATE INDEX"));
        assert!(migration.statements(DatabaseDriver::Mysql).is_empty());
    }

    #[test]
    fn test_every_migration_has_both_dialects() {
        for migration in MIGRATIONS {
            assert!(!migration.statements(DatabaseDriver::Sqlite).is_empty(), "{}", migration.name);
            assert!(!migration.statements(DatabaseDriver::Mysql).is_empty(), "{}", migration.name);
        }
    }

    #[test]
    fn test_migration_versions_are_sequential() {
        for (i, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version as usize, i + 1);
        }
    }
}
