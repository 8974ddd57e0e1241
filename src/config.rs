//! Configuration file loading and validation
//!
//! The file is TOML. Every connection lists its stale series jobs; all of
//! them are validated up front so a bad job stops the run before any
//! statement reaches a server.

use crate::error::{AppError, Result};
use crate::models::{parse_duration, JobSpec, TagDimensions, TimeWindow};
use crate::query::Ident;
use reqwest::Url;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Request timeout used when a connection does not set one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub connections: Vec<ConnectionConfig>,
}

/// One InfluxDB server and the jobs to run against it
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: Url,
    pub user: Option<String>,
    pub password: Option<String>,
    pub insecure_skip_verify: bool,
    /// Timeout applied to every query and drop request
    pub timeout: Duration,
    pub jobs: Vec<JobSpec>,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    name: String,
    #[serde(default)]
    influxdb1: Vec<RawConnection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConnection {
    url: String,
    user: String,
    password: String,
    env_user: String,
    env_password: String,
    insecure_skip_verify: bool,
    timeout: String,
    oldseries: Vec<RawJob>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawJob {
    name: String,
    databases: Vec<String>,
    rp: String,
    measurement: String,
    field: String,
    filter: String,
    tags: Vec<String>,
    drop_from_all: bool,
    sleep_duration: String,
    history_window: Vec<String>,
    current_window: Vec<String>,
    batch_size: Option<usize>,
}

impl Config {
    /// Read and validate the file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AppError::ConfigError(format!("Cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse configuration text, taking credentials from the process environment
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Self::from_toml_str_with_env(text, |key| std::env::var(key).ok())
    }

    /// Parse configuration text with a custom environment lookup
    pub fn from_toml_str_with_env<F>(text: &str, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = toml::from_str(text)?;

        let connections = raw
            .influxdb1
            .into_iter()
            .map(|connection| connection.validate(&env))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: raw.name,
            connections,
        })
    }

    pub fn job_count(&self) -> usize {
        self.connections.iter().map(|c| c.jobs.len()).sum()
    }
}

impl RawConnection {
    fn validate<F>(self, env: &F) -> Result<ConnectionConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = Url::parse(&self.url).map_err(|e| {
            AppError::ValidationError(format!("Invalid url '{}': {}", self.url, e))
        })?;

        let mut user = self.user;
        if !self.env_user.is_empty() {
            user = env(&self.env_user).unwrap_or_default();
        }
        let mut password = self.password;
        if !self.env_password.is_empty() {
            password = env(&self.env_password).unwrap_or_default();
        }

        let timeout = if self.timeout.trim().is_empty() {
            DEFAULT_TIMEOUT
        } else {
            parse_duration(&self.timeout)?
        };

        let jobs = self
            .oldseries
            .into_iter()
            .map(RawJob::validate)
            .collect::<Result<Vec<_>>>()?;

        Ok(ConnectionConfig {
            url,
            user: Some(user).filter(|u| !u.is_empty()),
            password: Some(password).filter(|p| !p.is_empty()),
            insecure_skip_verify: self.insecure_skip_verify,
            timeout,
            jobs,
        })
    }
}

impl RawJob {
    fn validate(self) -> Result<JobSpec> {
        let name = if self.name.is_empty() {
            self.measurement.clone()
        } else {
            self.name.clone()
        };
        self.build(&name).map_err(|e| match e {
            AppError::ValidationError(msg) => {
                AppError::ValidationError(format!("Job '{}': {}", name, msg))
            }
            other => other,
        })
    }

    fn build(self, name: &str) -> Result<JobSpec> {
        let dimensions = TagDimensions::from_tags(&self.tags)?;

        let pause = if self.sleep_duration.trim().is_empty() {
            Duration::ZERO
        } else {
            parse_duration(&self.sleep_duration).map_err(|e| {
                AppError::ValidationError(format!("sleep_duration could not be parsed: {}", e))
            })?
        };

        let batch_size = match self.batch_size {
            Some(0) => {
                return Err(AppError::ValidationError(
                    "batch_size must be at least 1".into(),
                ))
            }
            Some(size) => size,
            None => dimensions.default_batch_size(),
        };

        Ok(JobSpec {
            name: name.to_string(),
            databases: self.databases,
            retention_policy: Some(self.rp).filter(|rp| !rp.is_empty()),
            measurement: Ident::new(&self.measurement)?,
            field: Ident::new(&self.field)?,
            filter: Some(self.filter).filter(|f| !f.trim().is_empty()),
            drop_from_all: self.drop_from_all,
            pause,
            history_window: TimeWindow::parse(&self.history_window, "History")?,
            current_window: TimeWindow::parse(&self.current_window, "Current")?,
            batch_size,
            dimensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name = "production"

[[influxdb1]]
url = "http://localhost:8086"
user = "reader"
password = "secret"
timeout = "30s"

  [[influxdb1.oldseries]]
  name = "stale hosts"
  databases = ["telegraf"]
  rp = "autogen"
  measurement = "cpu"
  field = "usage_idle"
  filter = "cpu = 'cpu-total'"
  tags = ["host"]
  sleep_duration = "5s"
  history_window = ["24h", "1h"]
  current_window = ["1h", "0s"]

  [[influxdb1.oldseries]]
  name = "stale interfaces"
  measurement = "net"
  field = "bytes_recv"
  tags = ["host", "interface"]
  drop_from_all = true
  history_window = ["7d", "1d"]
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn single_job(job: &str) -> String {
        format!(
            "[[influxdb1]]\nurl = \"http://localhost:8086\"\n[[influxdb1.oldseries]]\n{}",
            job
        )
    }

    #[test]
    fn test_parse_sample() {
        let config = Config::from_toml_str_with_env(SAMPLE, no_env).unwrap();
        assert_eq!(config.name, "production");
        assert_eq!(config.job_count(), 2);

        let connection = &config.connections[0];
        assert_eq!(connection.user.as_deref(), Some("reader"));
        assert_eq!(connection.timeout, Duration::from_secs(30));

        let hosts = &connection.jobs[0];
        assert_eq!(hosts.databases, vec!["telegraf"]);
        assert_eq!(hosts.retention_policy.as_deref(), Some("autogen"));
        assert_eq!(hosts.pause, Duration::from_secs(5));
        assert_eq!(hosts.batch_size, 60);
        assert_eq!(hosts.history_window.start(), Duration::from_secs(86_400));
        assert!(matches!(hosts.dimensions, TagDimensions::One { .. }));

        let interfaces = &connection.jobs[1];
        assert!(interfaces.databases.is_empty());
        assert!(interfaces.drop_from_all);
        assert_eq!(interfaces.batch_size, 40);
        assert_eq!(interfaces.pause, Duration::ZERO);
        assert!(interfaces.current_window.is_instant());
        assert!(interfaces.filter.is_none());
    }

    #[test]
    fn test_credentials_from_env() {
        let text = "[[influxdb1]]\nurl = \"https://db:8086\"\nuser = \"ignored\"\nenv_user = \"INFLUX_USER\"\nenv_password = \"INFLUX_PASSWORD\"\n";
        let config = Config::from_toml_str_with_env(text, |key| match key {
            "INFLUX_USER" => Some("admin".to_string()),
            "INFLUX_PASSWORD" => Some("hunter2".to_string()),
            _ => None,
        })
        .unwrap();

        let connection = &config.connections[0];
        assert_eq!(connection.user.as_deref(), Some("admin"));
        assert_eq!(connection.password.as_deref(), Some("hunter2"));
        assert_eq!(connection.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_rejects_three_tags() {
        let text = single_job("measurement = \"cpu\"\nfield = \"f\"\ntags = [\"a\", \"b\", \"c\"]");
        let err = Config::from_toml_str_with_env(&text, no_env).unwrap_err();
        assert!(err.to_string().contains("one or two tags"));
    }

    #[test]
    fn test_rejects_single_duration_window() {
        let text = single_job(
            "measurement = \"cpu\"\nfield = \"f\"\ntags = [\"host\"]\nhistory_window = [\"24h\"]",
        );
        let err = Config::from_toml_str_with_env(&text, no_env).unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
        assert!(err.to_string().contains("Job 'cpu'"));
    }

    #[test]
    fn test_rejects_reversed_window() {
        let text = single_job(
            "measurement = \"cpu\"\nfield = \"f\"\ntags = [\"host\"]\ncurrent_window = [\"0s\", \"1h\"]",
        );
        assert!(Config::from_toml_str_with_env(&text, no_env).is_err());
    }

    #[test]
    fn test_rejects_bad_identifier() {
        let text = single_job("measurement = \"cpu; DROP\"\nfield = \"f\"\ntags = [\"host\"]");
        assert!(Config::from_toml_str_with_env(&text, no_env).is_err());
    }

    #[test]
    fn test_rejects_bad_sleep_and_batch() {
        let bad_sleep =
            single_job("measurement = \"cpu\"\nfield = \"f\"\ntags = [\"host\"]\nsleep_duration = \"soon\"");
        assert!(Config::from_toml_str_with_env(&bad_sleep, no_env).is_err());

        let bad_batch =
            single_job("measurement = \"cpu\"\nfield = \"f\"\ntags = [\"host\"]\nbatch_size = 0");
        assert!(Config::from_toml_str_with_env(&bad_batch, no_env).is_err());
    }

    #[test]
    fn test_rejects_bad_url_and_toml() {
        let err = Config::from_toml_str_with_env("[[influxdb1]]\nurl = \"not a url\"", no_env)
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));

        let err = Config::from_toml_str_with_env("name = ", no_env).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/series-reaper.toml").unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }
}
