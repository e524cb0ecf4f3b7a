use composer::sync::LabelSelector;
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("feed_capacity must be greater than 0")]
    ZeroFeedCapacity,

    #[error("Empty label key: {0}")]
    EmptyLabel(&'static str),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3001,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: Option<String>,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_feed_capacity() -> usize {
    1024
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub admin_listener: Listener,
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub labels: LabelSelector,
    /// Events buffered per subscriber of the configuration feed.
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
    /// Optional YAML file replayed into the feeds at startup.
    pub seed: Option<PathBuf>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.admin_listener.validate()?;

        if let Some(metrics) = &self.metrics
            && metrics.statsd_port == 0
        {
            return Err(ValidationError::InvalidPort);
        }

        if self.feed_capacity == 0 {
            return Err(ValidationError::ZeroFeedCapacity);
        }

        for (name, value) in [
            ("tenant", &self.labels.tenant),
            ("kind", &self.labels.kind),
            ("kind_value", &self.labels.kind_value),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::EmptyLabel(name));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
            admin_listener:
                host: 0.0.0.0
                port: 9001
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            logging:
                sentry_dsn: https://key@sentry.example/1
                format: json
            labels:
                tenant: example.com/app
            feed_capacity: 64
            seed: /etc/gateway/seed.yaml
        "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        assert_eq!(config.admin_listener.port, 9001);
        assert_eq!(config.metrics.unwrap().statsd_port, 8125);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.labels.tenant, "example.com/app");
        // Unset label keys keep their defaults
        assert_eq!(config.labels.kind, LabelSelector::default().kind);
        assert_eq!(config.feed_capacity, 64);
        assert_eq!(config.seed, Some(PathBuf::from("/etc/gateway/seed.yaml")));
    }

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.admin_listener, Listener::default());
        assert!(config.metrics.is_none());
        assert!(config.logging.sentry_dsn.is_none());
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.feed_capacity, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config: Config = serde_yaml::from_str("{}").unwrap();

        config.admin_listener.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));
        config.admin_listener.port = 3001;

        config.feed_capacity = 0;
        assert_eq!(config.validate(), Err(ValidationError::ZeroFeedCapacity));
        config.feed_capacity = 1;

        config.labels.kind_value = " ".into();
        assert_eq!(config.validate(), Err(ValidationError::EmptyLabel("kind_value")));
    }

    #[test]
    fn test_load_errors() {
        let missing = Config::from_file(Path::new("/nonexistent/gateway.yaml"));
        assert!(matches!(missing, Err(ConfigError::LoadError(_))));

        let tmp = write_tmp_file("admin_listener: [not, a, map]");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));

        let tmp = write_tmp_file("feed_capacity: 0");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::Invalid(ValidationError::ZeroFeedCapacity))
        ));
    }
}
