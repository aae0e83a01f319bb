//! Replication statements, built as plain text with escaped literals.
//!
//! Replication commands are not preparable on MySQL, so values are inlined.

use crate::backend::MasterStatus;
use hostplane_common::types::ServerProfile;

/// A statement plus the form that is safe to log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    redacted: String,
}

impl Statement {
    pub fn plain(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self {
            redacted: sql.clone(),
            sql,
        }
    }

    /// Statement embedding `secret` as a quoted literal
    fn with_secret(sql: String, secret: &str) -> Self {
        let redacted = if secret.is_empty() {
            sql.clone()
        } else {
            sql.replace(&quote_literal(secret), "'***'")
        };
        Self { sql, redacted }
    }

    pub fn redacted(&self) -> &str {
        &self.redacted
    }
}

/// Quote a string literal for MySQL
pub fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\'' => quoted.push_str("''"),
            '\\' => quoted.push_str("\\\\"),
            '\0' => quoted.push_str("\\0"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

pub fn enable_row_binlog() -> Statement {
    Statement::plain("SET GLOBAL binlog_format = 'ROW'")
}

pub fn create_replication_user(user: &str, password: &str) -> Statement {
    Statement::with_secret(
        format!(
            "CREATE USER IF NOT EXISTS {}@'%' IDENTIFIED BY {}",
            quote_literal(user),
            quote_literal(password)
        ),
        password,
    )
}

pub fn grant_replication(user: &str) -> Statement {
    Statement::plain(format!(
        "GRANT REPLICATION SLAVE ON *.* TO {}@'%'",
        quote_literal(user)
    ))
}

pub fn flush_privileges() -> Statement {
    Statement::plain("FLUSH PRIVILEGES")
}

pub fn stop_replica() -> Statement {
    Statement::plain("STOP SLAVE")
}

pub fn start_replica() -> Statement {
    Statement::plain("START SLAVE")
}

pub fn reset_replica_all() -> Statement {
    Statement::plain("RESET SLAVE ALL")
}

pub fn disable_read_only() -> Statement {
    Statement::plain("SET GLOBAL read_only = OFF")
}

/// Point a replica at `master`, starting from `snapshot`
pub fn change_master_to(master: &ServerProfile, user: &str, password: &str, snapshot: &MasterStatus) -> Statement {
    Statement::with_secret(
        format!(
            "CHANGE MASTER TO MASTER_HOST = {}, MASTER_PORT = {}, MASTER_USER = {}, \
             MASTER_PASSWORD = {}, MASTER_LOG_FILE = {}, MASTER_LOG_POS = {}",
            quote_literal(&master.host),
            master.port,
            quote_literal(user),
            quote_literal(password),
            quote_literal(&snapshot.file),
            snapshot.position
        ),
        password,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_literal_escapes() {
        assert_eq!(quote_literal("repl"), "'repl'");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal(r"a\b"), r"'a\\b'");
    }

    #[test]
    fn test_secrets_are_redacted() {
        let statement = create_replication_user("repl", "s3cr'et");
        assert!(statement.sql.contains("'s3cr''et'"));
        assert!(!statement.redacted().contains("s3cr"));
        assert!(statement.redacted().contains("'repl'@'%'"));
    }

    #[test]
    fn test_change_master_statement() {
        let master = ServerProfile {
            host: "db1.internal".to_string(),
            port: 3307,
            user: "root".to_string(),
            password: "rootpw".to_string(),
            database: None,
        };
        let snapshot = MasterStatus {
            file: "mysql-bin.000042".to_string(),
            position: 1337,
        };
        let statement = change_master_to(&master, "repl", "replpw", &snapshot);

        assert_eq!(
            statement.sql,
            "CHANGE MASTER TO MASTER_HOST = 'db1.internal', MASTER_PORT = 3307, MASTER_USER = 'repl', \
             MASTER_PASSWORD = 'replpw', MASTER_LOG_FILE = 'mysql-bin.000042', MASTER_LOG_POS = 1337"
        );
        assert!(statement.redacted().contains("MASTER_PASSWORD = '***'"));
    }
}
