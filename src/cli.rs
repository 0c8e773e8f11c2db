//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use ingestor_core::{IngestEntity, PageParams};

/// Keep member and universe data from the telemetry API in a local store.
///
/// Every sync honours server cache validators, so re-running it within an
/// expiry window costs no requests.
#[derive(Parser, Debug)]
#[command(name = "ingestor")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// SQLite database file (default: from config, else ./ingestor.db)
    #[arg(long, global = true, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// API root URL
    #[arg(long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bring a member's entities up to date
    Sync(SyncArgs),
    /// Bulk-import the public catalog trees
    Import(ImportArgs),
    /// Print a member's stored entity snapshot as JSON
    Show(ShowArgs),
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Member (character) id
    #[arg(long, value_name = "ID")]
    pub member: i64,

    /// Only sync these entities (repeatable; default: all)
    #[arg(long = "only", value_name = "ENTITY", value_parser = parse_entity)]
    pub only: Vec<IngestEntity>,
}

#[derive(Args, Debug, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ImportArgs {
    /// Skip races, bloodlines and ancestries
    #[arg(long)]
    pub skip_character_tree: bool,

    /// Skip categories, groups and types
    #[arg(long)]
    pub skip_inventory_tree: bool,

    /// Skip regions, constellations and systems
    #[arg(long)]
    pub skip_location_tree: bool,

    /// Disable progress bars
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Entity to show
    #[arg(value_parser = parse_entity)]
    pub entity: IngestEntity,

    /// Member (character) id
    #[arg(long, value_name = "ID")]
    pub member: i64,

    /// Records to skip
    #[arg(long)]
    pub offset: Option<usize>,

    /// Maximum records to print
    #[arg(long)]
    pub limit: Option<usize>,
}

impl ShowArgs {
    /// Page window, if either bound was given.
    #[must_use]
    pub fn page(&self) -> Option<PageParams> {
        if self.offset.is_none() && self.limit.is_none() {
            return None;
        }
        Some(PageParams {
            offset: self.offset.unwrap_or(0),
            limit: self.limit.unwrap_or(usize::MAX),
        })
    }
}

fn parse_entity(value: &str) -> Result<IngestEntity, String> {
    value.parse()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_sync_parses_member_and_selection() {
        let cli = Cli::try_parse_from([
            "ingestor", "sync", "--member", "90000001", "--only", "assets", "--only", "skill-queue",
        ])
        .unwrap();
        let Command::Sync(args) = cli.command else {
            panic!("expected sync");
        };
        assert_eq!(args.member, 90_000_001);
        assert_eq!(args.only, vec![IngestEntity::Assets, IngestEntity::SkillQueue]);
    }

    #[test]
    fn test_cli_sync_requires_member() {
        let err = Cli::try_parse_from(["ingestor", "sync"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_sync_rejects_unknown_entity() {
        let err = Cli::try_parse_from(["ingestor", "sync", "--member", "1", "--only", "ships"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_import_skip_flags() {
        let cli = Cli::try_parse_from([
            "ingestor",
            "import",
            "--skip-character-tree",
            "--skip-location-tree",
            "--no-progress",
        ])
        .unwrap();
        let Command::Import(args) = cli.command else {
            panic!("expected import");
        };
        assert!(args.skip_character_tree);
        assert!(!args.skip_inventory_tree);
        assert!(args.skip_location_tree);
        assert!(args.no_progress);
    }

    #[test]
    fn test_cli_show_with_paging() {
        let cli = Cli::try_parse_from([
            "ingestor", "show", "wallet-journal", "--member", "7", "--offset", "10", "--limit", "5",
        ])
        .unwrap();
        let Command::Show(args) = cli.command else {
            panic!("expected show");
        };
        assert_eq!(args.entity, IngestEntity::WalletJournal);
        assert_eq!(args.offset, Some(10));
        assert_eq!(args.limit, Some(5));
        assert_eq!(args.page(), Some(PageParams { offset: 10, limit: 5 }));
    }

    #[test]
    fn test_cli_show_without_paging_reads_everything() {
        let cli = Cli::try_parse_from(["ingestor", "show", "assets", "--member", "7"]).unwrap();
        let Command::Show(args) = cli.command else {
            panic!("expected show");
        };
        assert_eq!(args.page(), None);
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ingestor", "import", "-vv", "--database", "/tmp/x.db", "--base-url", "http://localhost:1",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.database, Some(PathBuf::from("/tmp/x.db")));
        assert_eq!(cli.base_url.as_deref(), Some("http://localhost:1"));
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["ingestor"]).is_err());
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Cli::try_parse_from(["ingestor", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
