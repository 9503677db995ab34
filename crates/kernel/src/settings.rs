use std::path::PathBuf;

use anyhow::{anyhow, Context};
use serde::Deserialize;

const DEFAULT_ENV: &str = "local";
const ENV_VAR_NAME: &str = "LIBRIS_ENV";
const CONFIG_DIR_ENV: &str = "LIBRIS_CONFIG_DIR";

/// Plain variable names understood by existing deployments, applied last.
const LEGACY_OVERRIDES: &[(&str, &str)] = &[
    ("MONGO_URL", "database.url"),
    ("KAFKA_BOOTSTRAP_SERVERS", "broker.url"),
    ("ELASTIC_URL", "search.url"),
    ("CORE_API_URL", "core_api.base_url"),
];

/// Deployment environment the application is running in.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Staging,
    Production,
}

impl Environment {
    fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "local" => Ok(Environment::Local),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(anyhow!(
                "unsupported environment '{}'; expected local/staging/production",
                other
            )),
        }
    }
}

/// Top-level configuration structure loaded from layered sources.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub broker: BrokerSettings,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub core_api: CoreApiSettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl Settings {
    /// Load configuration by layering `.env`, base file, environment overlay and
    /// process environment.
    pub fn load() -> anyhow::Result<Self> {
        // Allow missing `.env` files without failing.
        let _ = dotenvy::dotenv();

        let environment = std::env::var(ENV_VAR_NAME).unwrap_or_else(|_| DEFAULT_ENV.to_string());
        let environment = Environment::parse(&environment)?;

        let config_dir = match std::env::var(CONFIG_DIR_ENV) {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => std::env::current_dir()
                .context("unable to resolve current directory")?
                .join("config"),
        };

        let legacy = legacy_overrides(|var| std::env::var(var).ok());

        Self::from_sources(&config_dir, environment, legacy)
    }

    /// Build settings from a config directory plus explicit overrides.
    ///
    /// Split out of [`Settings::load`] so layering can be exercised without
    /// touching the process environment.
    pub fn from_sources<'a>(
        config_dir: &std::path::Path,
        environment: Environment,
        overrides: impl IntoIterator<Item = (&'a str, String)>,
    ) -> anyhow::Result<Self> {
        let environment_name = match environment {
            Environment::Local => "local",
            Environment::Staging => "staging",
            Environment::Production => "production",
        };
        let base_path = config_dir.join("base.toml");
        let environment_path = config_dir.join(format!("{}.toml", environment_name));

        let mut builder = config::Config::builder()
            .add_source(config::File::from(base_path).required(false))
            .add_source(config::File::from(environment_path).required(false))
            .add_source(
                config::Environment::with_prefix("LIBRIS")
                    .prefix_separator("_")
                    .separator("__"),
            );

        for (key, value) in overrides {
            builder = builder
                .set_override(key, value)
                .with_context(|| format!("invalid override for '{}'", key))?;
        }

        let cfg = builder
            .build()
            .with_context(|| "failed to build configuration")?;

        let mut settings: Settings = cfg
            .try_deserialize()
            .with_context(|| "failed to deserialize configuration")?;

        settings.environment = environment;

        if !is_amqp_uri(&settings.broker.url) {
            return Err(anyhow!(
                "broker.url '{}' must be an amqp:// or amqps:// URI",
                settings.broker.url
            ));
        }

        Ok(settings)
    }
}

fn is_amqp_uri(value: &str) -> bool {
    let value = value.trim().to_ascii_lowercase();
    value.starts_with("amqp://") || value.starts_with("amqps://")
}

/// Resolve the legacy variables through `lookup`.
///
/// `KAFKA_BOOTSTRAP_SERVERS` usually carries a `host:port` list for a Kafka
/// cluster; it only overrides `broker.url` when it holds an AMQP URI.
fn legacy_overrides(
    lookup: impl Fn(&str) -> Option<String>,
) -> Vec<(&'static str, String)> {
    LEGACY_OVERRIDES
        .iter()
        .filter_map(|(var, key)| {
            let value = lookup(*var)?;
            if *key == "broker.url" && !is_amqp_uri(&value) {
                tracing::warn!(
                    variable = *var,
                    value = %value,
                    "ignoring non-AMQP broker address"
                );
                return None;
            }
            Some((*key, value))
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "ServerSettings::default_host")]
    pub host: String,
    /// Listen port of the core service.
    #[serde(default = "ServerSettings::default_port")]
    pub port: u16,
    /// Listen port of the search service.
    #[serde(default = "ServerSettings::default_search_port")]
    pub search_port: u16,
    #[serde(default = "ServerSettings::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ServerSettings {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8000
    }

    fn default_search_port() -> u16 {
        8001
    }

    fn default_request_timeout_ms() -> u64 {
        15000
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            search_port: Self::default_search_port(),
            request_timeout_ms: Self::default_request_timeout_ms(),
        }
    }
}

/// Document store connection.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "DatabaseSettings::default_url")]
    pub url: String,
    #[serde(default = "DatabaseSettings::default_name")]
    pub name: String,
}

impl DatabaseSettings {
    fn default_url() -> String {
        "mongodb://localhost:27017".to_string()
    }

    fn default_name() -> String {
        "library_database".to_string()
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            name: Self::default_name(),
        }
    }
}

/// Event bus connection and naming.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSettings {
    #[serde(default = "BrokerSettings::default_url")]
    pub url: String,
    #[serde(default = "BrokerSettings::default_topic")]
    pub topic: String,
    #[serde(default = "BrokerSettings::default_consumer_group")]
    pub consumer_group: String,
}

impl BrokerSettings {
    fn default_url() -> String {
        "amqp://localhost:5672/%2f".to_string()
    }

    fn default_topic() -> String {
        "library.events".to_string()
    }

    fn default_consumer_group() -> String {
        "search_group".to_string()
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            topic: Self::default_topic(),
            consumer_group: Self::default_consumer_group(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "SearchSettings::default_url")]
    pub url: String,
}

impl SearchSettings {
    fn default_url() -> String {
        "http://localhost:9200".to_string()
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
        }
    }
}

/// Where the search service reads the authoritative catalog from.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreApiSettings {
    #[serde(default = "CoreApiSettings::default_base_url")]
    pub base_url: String,
}

impl CoreApiSettings {
    fn default_base_url() -> String {
        "http://localhost:8000".to_string()
    }
}

impl Default for CoreApiSettings {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSettings {
    /// Maximum number of documents returned by list endpoints.
    #[serde(default = "CatalogSettings::default_list_limit")]
    pub list_limit: i64,
    /// Attempts made to link a new book back to its authors.
    #[serde(default = "CatalogSettings::default_link_attempts")]
    pub link_attempts: u32,
}

impl CatalogSettings {
    fn default_list_limit() -> i64 {
        100
    }

    fn default_link_attempts() -> u32 {
        3
    }
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            list_limit: Self::default_list_limit(),
            link_attempts: Self::default_link_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "TelemetrySettings::default_log_filter")]
    pub log_filter: String,
}

impl TelemetrySettings {
    fn default_log_filter() -> String {
        "info".to_string()
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_filter: Self::default_log_filter(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_config_dir() -> PathBuf {
        std::env::temp_dir().join("libris-settings-missing")
    }

    #[test]
    fn default_environment_is_local() {
        let settings = Settings::default();
        assert_eq!(settings.environment, Environment::Local);
    }

    #[test]
    fn defaults_point_at_localhost() {
        let settings = Settings::default();
        assert_eq!(settings.database.url, "mongodb://localhost:27017");
        assert_eq!(settings.database.name, "library_database");
        assert_eq!(settings.broker.topic, "library.events");
        assert_eq!(settings.broker.consumer_group, "search_group");
        assert_eq!(settings.search.url, "http://localhost:9200");
        assert_eq!(settings.core_api.base_url, "http://localhost:8000");
        assert_eq!(settings.catalog.list_limit, 100);
    }

    #[test]
    fn services_default_to_distinct_ports() {
        let settings = Settings::default();
        assert_ne!(settings.server.port, settings.server.search_port);
        assert!(settings
            .core_api
            .base_url
            .ends_with(&format!(":{}", settings.server.port)));
    }

    #[test]
    fn non_amqp_broker_url_is_rejected() {
        let err = Settings::from_sources(
            &empty_config_dir(),
            Environment::Local,
            [("broker.url", "kafka:9092".to_string())],
        )
        .unwrap_err();
        assert!(err.to_string().contains("amqp://"));

        let settings = Settings::from_sources(
            &empty_config_dir(),
            Environment::Local,
            [("broker.url", "amqps://rabbit:5671/%2f".to_string())],
        )
        .unwrap();
        assert_eq!(settings.broker.url, "amqps://rabbit:5671/%2f");
    }

    #[test]
    fn kafka_bootstrap_address_is_not_used_as_broker_url() {
        let overrides = legacy_overrides(|var| match var {
            "KAFKA_BOOTSTRAP_SERVERS" => Some("localhost:9092".to_string()),
            "MONGO_URL" => Some("mongodb://db:27017".to_string()),
            _ => None,
        });
        assert_eq!(overrides, vec![("database.url", "mongodb://db:27017".to_string())]);

        let settings =
            Settings::from_sources(&empty_config_dir(), Environment::Local, overrides).unwrap();
        assert_eq!(settings.broker.url, "amqp://localhost:5672/%2f");
    }

    #[test]
    fn amqp_value_in_kafka_variable_is_honored() {
        let overrides = legacy_overrides(|var| {
            (var == "KAFKA_BOOTSTRAP_SERVERS").then(|| "amqp://rabbit:5672/%2f".to_string())
        });
        assert_eq!(overrides, vec![("broker.url", "amqp://rabbit:5672/%2f".to_string())]);
    }

    #[test]
    fn unknown_environment_is_rejected() {
        let err = Environment::parse("qa").unwrap_err();
        assert!(err.to_string().contains("unsupported environment 'qa'"));
    }

    #[test]
    fn overrides_replace_defaults() {
        let settings = Settings::from_sources(
            &empty_config_dir(),
            Environment::Staging,
            [
                ("database.url", "mongodb://db:27017".to_string()),
                ("core_api.base_url", "http://core:8000".to_string()),
            ],
        )
        .unwrap();

        assert_eq!(settings.environment, Environment::Staging);
        assert_eq!(settings.database.url, "mongodb://db:27017");
        assert_eq!(settings.core_api.base_url, "http://core:8000");
        assert_eq!(settings.search.url, "http://localhost:9200");
    }
}
