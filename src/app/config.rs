//! File configuration: `key = value` lines under the XDG config directory.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// Defaults read from `config.toml`; every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FileConfig {
    pub(crate) base_url: Option<String>,
    pub(crate) database_path: Option<PathBuf>,
    pub(crate) user_agent: Option<String>,
    pub(crate) connect_timeout_secs: Option<u64>,
    pub(crate) read_timeout_secs: Option<u64>,
    pub(crate) max_attempts: Option<u32>,
    /// Minimum gap between catalog import requests.
    pub(crate) catalog_delay_ms: Option<u64>,
    /// Minimum gap between mail sender lookups.
    pub(crate) mail_delay_ms: Option<u64>,
    pub(crate) group_workers: Option<usize>,
    pub(crate) type_workers: Option<usize>,
    /// Remaining-error count below which requests wait for the window reset.
    pub(crate) error_budget_floor: Option<u32>,
    pub(crate) verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Checks values against the ranges the runtime accepts.
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(url) = &self.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("Invalid config value for `base_url`: '{url}'. Expected an http(s) URL");
            }
        }
        validate_range("connect_timeout_secs", self.connect_timeout_secs, 1, 3600)?;
        validate_range("read_timeout_secs", self.read_timeout_secs, 1, 3600)?;
        validate_range("max_attempts", self.max_attempts.map(u64::from), 1, 10)?;
        validate_range("catalog_delay_ms", self.catalog_delay_ms, 0, 60_000)?;
        validate_range("mail_delay_ms", self.mail_delay_ms, 0, 60_000)?;
        validate_range("group_workers", self.group_workers.map(|n| n as u64), 1, 64)?;
        validate_range("type_workers", self.type_workers.map(|n| n as u64), 1, 64)?;
        validate_range("error_budget_floor", self.error_budget_floor.map(u64::from), 0, 100)?;
        Ok(())
    }
}

fn validate_range(field: &str, value: Option<u64>, min: u64, max: u64) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(min..=max).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Default log level this setting stands for.
    pub(crate) fn level(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

/// Resolves the config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/ingestor/config.toml`
/// 2. `$HOME/.config/ingestor/config.toml`
pub(crate) fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("ingestor").join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("ingestor")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file if one exists.
pub(crate) fn load_default_file_config() -> Result<Option<FileConfig>> {
    match resolve_default_config_path() {
        Some(path) if path.exists() => load_file_config(&path).map(Some),
        _ => Ok(None),
    }
}

pub(crate) fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw).with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

pub(crate) fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };
        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "base_url" => cfg.base_url = Some(parse_string_literal(value).with_context(context)?),
            "database_path" => {
                cfg.database_path = Some(PathBuf::from(parse_string_literal(value).with_context(context)?));
            }
            "user_agent" => cfg.user_agent = Some(parse_string_literal(value).with_context(context)?),
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "read_timeout_secs" => {
                cfg.read_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "max_attempts" => cfg.max_attempts = Some(parse_narrow(value).with_context(context)?),
            "catalog_delay_ms" => {
                cfg.catalog_delay_ms = Some(parse_integer_u64(value).with_context(context)?);
            }
            "mail_delay_ms" => cfg.mail_delay_ms = Some(parse_integer_u64(value).with_context(context)?),
            "group_workers" => cfg.group_workers = Some(parse_narrow(value).with_context(context)?),
            "type_workers" => cfg.type_workers = Some(parse_narrow(value).with_context(context)?),
            "error_budget_floor" => {
                cfg.error_budget_floor = Some(parse_narrow(value).with_context(context)?);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.verbosity = Some(
                    parse_verbosity(&parsed)
                        .with_context(|| format!("Invalid `verbosity` value '{parsed}' on line {line_no}"))?,
                );
            }
            unknown => bail!("Unknown configuration key: '{unknown}' on line {line_no}"),
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_narrow<T: TryFrom<u64>>(raw_value: &str) -> Result<T> {
    let value = parse_integer_u64(raw_value)?;
    T::try_from(value).map_err(|_| anyhow::anyhow!("Integer value {value} out of range"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_all_keys() {
        let cfg = parse_config_str(
            r#"
base_url = "http://localhost:8080/latest"
database_path = "/var/lib/ingestor/data.db"
user_agent = "ingestor-test"
connect_timeout_secs = 5
read_timeout_secs = 30
max_attempts = 4
catalog_delay_ms = 50
mail_delay_ms = 300
group_workers = 8
type_workers = 4
error_budget_floor = 20
verbosity = "verbose"
"#,
        )
        .unwrap();

        assert_eq!(cfg.base_url.as_deref(), Some("http://localhost:8080/latest"));
        assert_eq!(cfg.database_path, Some(PathBuf::from("/var/lib/ingestor/data.db")));
        assert_eq!(cfg.user_agent.as_deref(), Some("ingestor-test"));
        assert_eq!(cfg.connect_timeout_secs, Some(5));
        assert_eq!(cfg.read_timeout_secs, Some(30));
        assert_eq!(cfg.max_attempts, Some(4));
        assert_eq!(cfg.catalog_delay_ms, Some(50));
        assert_eq!(cfg.mail_delay_ms, Some(300));
        assert_eq!(cfg.group_workers, Some(8));
        assert_eq!(cfg.type_workers, Some(4));
        assert_eq!(cfg.error_budget_floor, Some(20));
        assert_eq!(cfg.verbosity, Some(VerbositySetting::Verbose));
    }

    #[test]
    fn test_parse_config_empty_is_default() {
        assert_eq!(parse_config_str("\n# nothing\n").unwrap(), FileConfig::default());
    }

    #[test]
    fn test_parse_config_supports_inline_comments() {
        let cfg = parse_config_str(
            r#"
group_workers = 4 # fewer workers
user_agent = "agent # with hash" # trailing
"#,
        )
        .unwrap();
        assert_eq!(cfg.group_workers, Some(4));
        assert_eq!(cfg.user_agent.as_deref(), Some("agent # with hash"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys() {
        let err = parse_config_str("concurrency = 4").unwrap_err();
        assert!(err.to_string().contains("Unknown configuration key"));
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_parse_config_rejects_missing_equals() {
        let err = parse_config_str("group_workers 4").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_parse_config_rejects_out_of_range_workers() {
        let err = parse_config_str("type_workers = 0").unwrap_err();
        assert!(err.to_string().contains("type_workers"));
    }

    #[test]
    fn test_parse_config_rejects_unquoted_string() {
        let err = parse_config_str("base_url = http://localhost").unwrap_err();
        assert!(format!("{err:#}").contains("base_url"));
    }

    #[test]
    fn test_parse_config_rejects_non_http_base_url() {
        let err = parse_config_str(r#"base_url = "ftp://example.com""#).unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn test_parse_config_rejects_negative_delay() {
        let err = parse_config_str("mail_delay_ms = -5").unwrap_err();
        assert!(format!("{err:#}").contains("non-negative"));
    }

    #[test]
    fn test_parse_config_rejects_bad_verbosity() {
        let err = parse_config_str(r#"verbosity = "loud""#).unwrap_err();
        assert!(err.to_string().contains("verbosity"));
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(VerbositySetting::Default.level(), "info");
        assert_eq!(VerbositySetting::Verbose.level(), "debug");
        assert_eq!(VerbositySetting::Quiet.level(), "error");
        assert_eq!(VerbositySetting::Debug.level(), "trace");
    }

    #[test]
    fn test_load_file_config_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "mail_delay_ms = 125\n").unwrap();
        let cfg = load_file_config(&path).unwrap();
        assert_eq!(cfg.mail_delay_ms, Some(125));
    }
}
