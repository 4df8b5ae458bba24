//! Configuration for Crossview
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, Subcommand};

/// Crossview - cross-tenant mirroring and reconciliation engine
#[derive(Parser, Debug, Clone)]
#[command(name = "crossview")]
#[command(about = "Reconciliation jobs and backfill for the aggregation-context directory")]
pub struct Args {
    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "crossview")]
    pub mongodb_db: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Reconciliation job surface plus the mirror backfill.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Repair role/tenant mismatches left by accepted role-change invitations
    RoleRepair {
        /// Report findings without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Repair stale aggregation-context tenant pointers
    PointerRepair {
        /// Report findings without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Repair cross-tenant links built from the wrong tenant pointer
    LinkRepair {
        /// Report findings without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Mirror every active tagged member of a canonical tenant into the
    /// aggregation tenants matching the tag
    Backfill {
        /// Canonical tenant to scan
        #[arg(long)]
        tenant: String,

        /// Classification tag to fan out
        #[arg(long)]
        tag: String,
    },
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.mongodb_uri.trim().is_empty() {
            return Err("MONGODB_URI must not be empty".to_string());
        }
        if self.mongodb_db.trim().is_empty() {
            return Err("MONGODB_DB must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repair_subcommand() {
        let args = Args::parse_from(["crossview", "role-repair", "--dry-run"]);
        assert!(matches!(args.command, Command::RoleRepair { dry_run: true }));
    }

    #[test]
    fn test_parse_backfill() {
        let args = Args::parse_from([
            "crossview",
            "backfill",
            "--tenant",
            "c1",
            "--tag",
            "worship",
        ]);
        match args.command {
            Command::Backfill { tenant, tag } => {
                assert_eq!(tenant, "c1");
                assert_eq!(tag, "worship");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_empty_db() {
        let mut args = Args::parse_from(["crossview", "link-repair"]);
        args.mongodb_db = " ".to_string();
        assert!(args.validate().is_err());
    }
}
