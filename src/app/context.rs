//! Effective settings and the object graph built from them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ingestor_core::client::constants::{
    DEFAULT_CATALOG_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAIL_DELAY, LANE_CATALOG, LANE_MAIL,
};
use ingestor_core::catalog::{DEFAULT_GROUP_WORKERS, DEFAULT_TYPE_WORKERS};
use ingestor_core::{
    ApiClient, CacheStore, CatalogImporter, ClientConfig, ConditionalFetcher, Database,
    EndpointTable, EntityStore, IngestContext, MemoryCache, Pacer, ReferenceResolver,
    SqliteValidatorStore, StaticTokenSource, SyncService, TokenSource, UniverseService,
    ValidatorStore,
};
use tracing::debug;

use super::config::FileConfig;
use crate::cli::Cli;

const DEFAULT_DATABASE_FILE: &str = "ingestor.db";

/// CLI values merged over file config merged over built-in defaults.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) database_path: PathBuf,
    pub(crate) client: ClientConfig,
    pub(crate) max_attempts: u32,
    pub(crate) catalog_delay: Duration,
    pub(crate) mail_delay: Duration,
    pub(crate) group_workers: usize,
    pub(crate) type_workers: usize,
}

impl Settings {
    pub(crate) fn resolve(cli: &Cli, file: Option<&FileConfig>) -> Self {
        let file = file.cloned().unwrap_or_default();
        let mut client = ClientConfig::default();

        if let Some(base_url) = cli.base_url.clone().or(file.base_url) {
            client.base_url = base_url;
        }
        if let Some(user_agent) = file.user_agent {
            client.user_agent = user_agent;
        }
        if let Some(secs) = file.connect_timeout_secs {
            client.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.read_timeout_secs {
            client.read_timeout = Duration::from_secs(secs);
        }
        if let Some(floor) = file.error_budget_floor {
            client.error_budget_floor = floor;
        }

        Self {
            database_path: cli
                .database
                .clone()
                .or(file.database_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_FILE)),
            client,
            max_attempts: file.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            catalog_delay: file
                .catalog_delay_ms
                .map_or(DEFAULT_CATALOG_DELAY, Duration::from_millis),
            mail_delay: file.mail_delay_ms.map_or(DEFAULT_MAIL_DELAY, Duration::from_millis),
            group_workers: file.group_workers.unwrap_or(DEFAULT_GROUP_WORKERS),
            type_workers: file.type_workers.unwrap_or(DEFAULT_TYPE_WORKERS),
        }
    }
}

/// Default log level: `--quiet` > `-v` > config `verbosity` > `info`.
///
/// `RUST_LOG` still wins over all of these at subscriber setup.
pub(crate) fn resolve_default_log_level(cli: &Cli, file: Option<&FileConfig>) -> &'static str {
    if cli.quiet {
        return "error";
    }
    match cli.verbose {
        0 => file
            .and_then(|f| f.verbosity)
            .map_or("info", |v| v.level()),
        1 => "debug",
        _ => "trace",
    }
}

/// Services shared by every subcommand.
pub(crate) struct AppContext {
    pub(crate) db: Database,
    pub(crate) sync: SyncService,
    pub(crate) importer: CatalogImporter,
}

impl AppContext {
    pub(crate) async fn build(settings: &Settings) -> Result<Self> {
        let db = Database::new(&settings.database_path)
            .await
            .with_context(|| format!("Failed to open database '{}'", settings.database_path.display()))?;
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());

        let client = ApiClient::new(&settings.client).context("Failed to build HTTP client")?;
        let validators: Arc<dyn ValidatorStore> =
            Arc::new(SqliteValidatorStore::with_cache(db.clone(), Arc::clone(&cache)));
        let tokens: Arc<dyn TokenSource> = Arc::new(StaticTokenSource::from_env());
        let fetcher = ConditionalFetcher::new(client, Arc::new(EndpointTable::new()), validators, tokens)
            .with_max_attempts(settings.max_attempts);

        let universe = Arc::new(UniverseService::new(
            fetcher.clone(),
            EntityStore::new(db.clone()),
            Arc::clone(&cache),
        ));
        let pacer = Arc::new(
            Pacer::new()
                .with_lane(LANE_CATALOG, settings.catalog_delay)
                .with_lane(LANE_MAIL, settings.mail_delay),
        );

        let ctx = IngestContext::new(
            fetcher,
            ReferenceResolver::new(Arc::clone(&universe)),
            cache,
            db.clone(),
            Arc::clone(&pacer),
        );
        let sync = SyncService::new(&ctx);
        let importer = CatalogImporter::new(universe, pacer)
            .with_workers(settings.group_workers, settings.type_workers);

        debug!(database = %settings.database_path.display(), "application context ready");
        Ok(Self { db, sync, importer })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::app::config::{VerbositySetting, parse_config_str};

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_settings_cli_wins_over_file() {
        let file = parse_config_str(
            r#"
base_url = "http://file.example/latest"
database_path = "/tmp/file.db"
"#,
        )
        .unwrap();
        let cli = cli(&["ingestor", "--base-url", "http://cli.example", "import"]);

        let settings = Settings::resolve(&cli, Some(&file));
        assert_eq!(settings.client.base_url, "http://cli.example");
        assert_eq!(settings.database_path, PathBuf::from("/tmp/file.db"));
    }

    #[test]
    fn test_settings_defaults_without_file() {
        let settings = Settings::resolve(&cli(&["ingestor", "import"]), None);
        assert_eq!(settings.database_path, PathBuf::from(DEFAULT_DATABASE_FILE));
        assert_eq!(settings.group_workers, DEFAULT_GROUP_WORKERS);
        assert_eq!(settings.type_workers, DEFAULT_TYPE_WORKERS);
        assert_eq!(settings.catalog_delay, DEFAULT_CATALOG_DELAY);
        assert_eq!(settings.mail_delay, DEFAULT_MAIL_DELAY);
        assert_eq!(settings.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_settings_file_tuning_applies() {
        let file = parse_config_str(
            "catalog_delay_ms = 0\nmail_delay_ms = 500\ngroup_workers = 2\nconnect_timeout_secs = 3\n",
        )
        .unwrap();
        let settings = Settings::resolve(&cli(&["ingestor", "import"]), Some(&file));
        assert_eq!(settings.catalog_delay, Duration::ZERO);
        assert_eq!(settings.mail_delay, Duration::from_millis(500));
        assert_eq!(settings.group_workers, 2);
        assert_eq!(settings.client.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_log_level_priority() {
        let file = FileConfig {
            verbosity: Some(VerbositySetting::Debug),
            ..FileConfig::default()
        };

        assert_eq!(resolve_default_log_level(&cli(&["ingestor", "import"]), None), "info");
        assert_eq!(resolve_default_log_level(&cli(&["ingestor", "import"]), Some(&file)), "trace");
        assert_eq!(resolve_default_log_level(&cli(&["ingestor", "-v", "import"]), Some(&file)), "debug");
        assert_eq!(resolve_default_log_level(&cli(&["ingestor", "-q", "-vv", "import"]), Some(&file)), "error");
    }
}
