use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow, bail, ensure};
use tracing::{debug, warn};
use url::Url;

use crate::models::{ManagerConfig, ProviderMode};

pub const CONFIG_PATH_ENV: &str = "SMARTEVENTS_CONFIG_PATH";
pub const CONFIG_JSON_ENV: &str = "SMARTEVENTS_CONFIG_JSON";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Longest orphan lease accepted: one year.
const MAX_ORPHAN_LEASE_SECS: u64 = 365 * 24 * 60 * 60;

const DEFAULT_FILES: &[&str] = &[
    "smartevents.toml",
    "smartevents.json",
    "config/smartevents.toml",
    "config/smartevents.json",
];

/// Source that produced the manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

impl ManagerConfig {
    /// Load configuration using `.env` and the process environment.
    ///
    /// Evaluation order:
    /// 1) `$SMARTEVENTS_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$SMARTEVENTS_CONFIG_JSON` (inline JSON),
    /// 3) the first default file found in the working directory,
    /// 4) defaults.
    ///
    /// `$DATABASE_URL` overrides `database.url` whichever source won.
    pub fn load_from_env() -> anyhow::Result<(Self, ConfigSource)> {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            warn!("ignoring unreadable .env file: {err}");
        }
        Self::load_with(|key| env::var(key).ok(), Path::new("."))
    }

    /// Same as [`ManagerConfig::load_from_env`] with an explicit variable
    /// lookup and default-file search root.
    pub fn load_with<F>(lookup: F, search_root: &Path) -> anyhow::Result<(Self, ConfigSource)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let (mut config, source) = if let Some(path) = non_blank(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            (Self::load_from_file(&path)?, ConfigSource::EnvPath(path))
        } else if let Some(raw) = non_blank(CONFIG_JSON_ENV) {
            let parsed = Self::parse_json(&raw)
                .with_context(|| format!("failed to parse {CONFIG_JSON_ENV}"))?;
            (parsed, ConfigSource::EnvInline)
        } else if let Some(path) = Self::find_default_file(search_root) {
            (Self::load_from_file(&path)?, ConfigSource::File(path))
        } else {
            (Self::default(), ConfigSource::Default)
        };

        if let Some(url) = non_blank(DATABASE_URL_ENV) {
            debug!("database url taken from {DATABASE_URL_ENV}");
            config.database.url = Some(url);
        }

        config.validate()?;
        Ok((config, source))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read manager config from {}", path.display())
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid manager config {}", path.display())),
            Some("toml") => toml::from_str(&contents).map_err(|err| {
                anyhow!("invalid manager config {}: {}", path.display(), err)
            }),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    /// Parses TOML, falling back to JSON.
    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse manager config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw)
            .map_err(|err| anyhow!("invalid manager config json: {err}"))
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let work = &self.work;
        ensure!(
            work.dispatch_interval_ms > 0,
            "work.dispatch_interval_ms must be greater than zero"
        );
        ensure!(
            work.rebalance_interval_ms > 0,
            "work.rebalance_interval_ms must be greater than zero"
        );
        ensure!(
            work.orphan_lease_secs.saturating_mul(1_000) >= work.dispatch_interval_ms,
            "work.orphan_lease_secs ({}s) is shorter than the dispatch interval ({}ms); \
             live work would be adopted by other managers",
            work.orphan_lease_secs,
            work.dispatch_interval_ms
        );
        ensure!(
            work.orphan_lease_secs <= MAX_ORPHAN_LEASE_SECS,
            "work.orphan_lease_secs ({}s) exceeds the maximum of {}s",
            work.orphan_lease_secs,
            MAX_ORPHAN_LEASE_SECS
        );
        if let Some(max) = work.max_attempts {
            ensure!(max > 0, "work.max_attempts must be greater than zero when set");
        }
        ensure!(
            self.database.max_connections > 0,
            "database.max_connections must be greater than zero"
        );
        ensure!(
            !self.topics.prefix.trim().is_empty(),
            "topics.prefix must not be empty"
        );

        if self.providers.mode == ProviderMode::Http {
            ensure!(
                self.providers.request_timeout_ms > 0,
                "providers.request_timeout_ms must be greater than zero"
            );
            for (key, value) in [
                ("providers.topics_url", &self.providers.topics_url),
                ("providers.connectors_url", &self.providers.connectors_url),
            ] {
                let Some(raw) = value else {
                    bail!("{key} is required when providers.mode = \"http\"");
                };
                Url::parse(raw).with_context(|| format!("{key} is not a valid url"))?;
            }
        }
        Ok(())
    }

    fn find_default_file(root: &Path) -> Option<PathBuf> {
        DEFAULT_FILES
            .iter()
            .map(|candidate| root.join(candidate))
            .find(|path| path.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const HTTP_TOML: &str = r#"
shard_id = "shard-a"

[work]
dispatch_interval_ms = 1000
max_attempts = 20

[providers]
topics_url = "https://topics.example.test/api/v1/"
connectors_url = "https://connectors.example.test/api/v1/"
token = "secret"

[topics]
prefix = "se-"
"#;

    fn lookup(vars: &[(&str, String)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn inline_json_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let in_memory = r#"{"providers": {"mode": "in_memory"}}"#.to_string();
        let (config, source) =
            ManagerConfig::load_with(lookup(&[(CONFIG_JSON_ENV, in_memory)]), dir.path())
                .unwrap();
        assert_eq!(source, ConfigSource::EnvInline);
        assert_eq!(config.providers.mode, ProviderMode::InMemory);
        assert_eq!(config.work.dispatch_interval_ms, 5_000);
        assert_eq!(config.topics.prefix, "ob-");
        assert!(config.database.url.is_none());
    }

    #[test]
    fn default_http_mode_requires_provider_urls() {
        let dir = tempfile::tempdir().unwrap();
        let err = ManagerConfig::load_with(lookup(&[]), dir.path()).unwrap_err();
        assert!(err.to_string().contains("providers.topics_url"));
    }

    #[test]
    fn env_path_wins_over_default_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("smartevents.toml"),
            "[providers]\nmode = \"in_memory\"\n",
        )
        .unwrap();
        let explicit = dir.path().join("custom.toml");
        fs::write(&explicit, HTTP_TOML).unwrap();

        let (config, source) = ManagerConfig::load_with(
            lookup(&[(CONFIG_PATH_ENV, explicit.display().to_string())]),
            dir.path(),
        )
        .unwrap();
        assert_eq!(source, ConfigSource::EnvPath(explicit));
        assert_eq!(config.shard_id, "shard-a");
        assert_eq!(config.work.max_attempts, Some(20));
        assert_eq!(config.work.orphan_lease_secs, 300);
        assert_eq!(config.topics.prefix, "se-");
        assert_eq!(config.providers.token.as_deref(), Some("secret"));
    }

    #[test]
    fn default_file_is_discovered() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("config")).unwrap();
        let path = dir.path().join("config/smartevents.json");
        fs::write(&path, r#"{"providers": {"mode": "in_memory"}, "shard_id": "s"}"#)
            .unwrap();

        let (config, source) = ManagerConfig::load_with(lookup(&[]), dir.path()).unwrap();
        assert_eq!(source, ConfigSource::File(path));
        assert_eq!(config.shard_id, "s");
    }

    #[test]
    fn database_url_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smartevents.toml");
        fs::write(
            &path,
            "[database]\nurl = \"postgres://file/db\"\n[providers]\nmode = \"in_memory\"\n",
        )
        .unwrap();

        let (config, _) = ManagerConfig::load_with(
            lookup(&[(DATABASE_URL_ENV, "postgres://env/db".to_string())]),
            dir.path(),
        )
        .unwrap();
        assert_eq!(config.database.url.as_deref(), Some("postgres://env/db"));
    }

    #[test]
    fn unknown_extension_falls_back_to_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manager.conf");
        fs::write(&path, r#"{"work": {"dispatch_interval_ms": 250}}"#).unwrap();

        let config = ManagerConfig::load_from_file(&path).unwrap();
        assert_eq!(config.work.dispatch_interval_ms, 250);
    }

    #[test]
    fn lease_shorter_than_dispatch_interval_is_rejected() {
        let mut config = ManagerConfig::parse_from_str(HTTP_TOML, "test").unwrap();
        config.validate().unwrap();

        config.work.orphan_lease_secs = 1;
        config.work.dispatch_interval_ms = 5_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("orphan_lease_secs"));

        config.work.orphan_lease_secs = 300;
        config.work.dispatch_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn lease_longer_than_a_year_is_rejected() {
        let mut config = ManagerConfig::parse_from_str(HTTP_TOML, "test").unwrap();
        config.work.orphan_lease_secs = MAX_ORPHAN_LEASE_SECS;
        config.validate().unwrap();

        config.work.orphan_lease_secs = 1_000_000_000_000_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("exceeds the maximum"));
    }

    #[test]
    fn token_is_not_printed() {
        let config = ManagerConfig::parse_from_str(HTTP_TOML, "test").unwrap();
        let printed = format!("{config:?}");
        assert!(!printed.contains("secret"));
    }
}
