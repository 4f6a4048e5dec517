//! Worker configuration.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use anon_queue::QueueConfig;
use anon_storage::{S3Config, SwiftConfig};

use crate::cipher::CipherKey;
use crate::error::{WorkerError, WorkerResult};

const DEFAULT_ENV_PATH: &str = "/env";

/// Where configuration values are looked up.
///
/// The process environment wins; otherwise the first line of
/// `<env_path>/<NAME>` is used, which is how mounted secrets arrive.
#[derive(Debug, Clone)]
pub struct EnvSource {
    vars: Option<HashMap<String, String>>,
    env_path: PathBuf,
}

impl EnvSource {
    /// Read from the process environment and `ENV_PATH` (default `/env`).
    pub fn from_process() -> Self {
        let env_path = std::env::var("ENV_PATH").unwrap_or_else(|_| DEFAULT_ENV_PATH.to_string());
        Self {
            vars: None,
            env_path: PathBuf::from(env_path),
        }
    }

    /// Read from a fixed set of variables instead of the process environment.
    pub fn with_vars<I, K, V>(vars: I, env_path: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
            env_path: env_path.into(),
        }
    }

    pub fn env_path(&self) -> &Path {
        &self.env_path
    }

    /// Value of `name`, if set anywhere.
    pub fn get(&self, name: &str) -> Option<String> {
        let from_env = match &self.vars {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        };

        from_env.or_else(|| self.read_file(name))
    }

    /// Value of `name`, or a configuration error naming it.
    pub fn require(&self, name: &str) -> WorkerResult<String> {
        self.get(name)
            .ok_or_else(|| WorkerError::config_error(format!("{} is not set", name)))
    }

    /// Parse `name`, falling back to `default` when unset.
    pub fn parse_or<T>(&self, name: &str, default: T) -> WorkerResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            Some(raw) => raw.trim().parse().map_err(|e| {
                WorkerError::config_error(format!("{} has invalid value {:?}: {}", name, raw, e))
            }),
            None => Ok(default),
        }
    }

    fn read_file(&self, name: &str) -> Option<String> {
        let path = self.env_path.join(name);
        let contents = std::fs::read_to_string(&path).ok()?;
        let first = contents.lines().next()?.trim().to_string();
        debug!(name, path = %path.display(), "Loaded setting from file");
        Some(first)
    }
}

/// Object store selection.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    Swift(SwiftConfig),
    S3(S3Config),
}

impl StorageBackend {
    pub fn name(&self) -> &'static str {
        match self {
            StorageBackend::Swift(_) => "swift",
            StorageBackend::S3(_) => "s3",
        }
    }

    fn from_source(source: &EnvSource) -> WorkerResult<Self> {
        let backend = source
            .get("STORAGE_BACKEND")
            .unwrap_or_else(|| "swift".to_string())
            .to_lowercase();

        match backend.as_str() {
            "swift" => Ok(StorageBackend::Swift(SwiftConfig {
                auth_url: source.require("OS_AUTH_URL")?,
                auth_token: source.require("OS_AUTH_TOKEN")?,
                project_name: source.require("OS_PROJECT_NAME")?,
                project_domain_id: source.require("OS_PROJECT_DOMAIN_ID")?,
            })),
            "s3" => Ok(StorageBackend::S3(S3Config {
                endpoint_url: source.require("S3_ENDPOINT_URL")?,
                access_key_id: source.require("S3_ACCESS_KEY_ID")?,
                secret_access_key: source.require("S3_SECRET_ACCESS_KEY")?,
                region: source.get("S3_REGION").unwrap_or_else(|| "auto".to_string()),
            })),
            other => Err(WorkerError::config_error(format!(
                "STORAGE_BACKEND must be swift or s3, got {:?}",
                other
            ))),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Key for item payloads
    pub encryption_key: CipherKey,
    /// How long a leased item stays invisible to other workers
    pub lease_duration: Duration,
    /// How long one blocking lease attempt waits
    pub poll_timeout: Duration,
    /// Directory for decrypted local artifacts
    pub input_dir: PathBuf,
    /// Root of result directories and bundles
    pub output_dir: PathBuf,
    /// Queue location and name
    pub queue: QueueConfig,
    /// Container receiving result bundles
    pub results_container: String,
    /// Upper bound on concurrently running completion tasks
    pub max_inflight_completions: usize,
    /// Push rejected items to the error queue
    pub report_rejected: bool,
    /// Object store backend
    pub storage: StorageBackend,
    /// Classifier program
    pub classifier_cmd: String,
    /// Upper bound on one FFmpeg decode
    pub decode_timeout: Duration,
    /// Upper bound on one classifier run
    pub classify_timeout: Duration,
    /// Prometheus listen address, if metrics are exported
    pub metrics_addr: Option<SocketAddr>,
}

impl WorkerConfig {
    /// Create config from the process environment.
    pub fn from_env(output_dir: impl Into<PathBuf>) -> WorkerResult<Self> {
        Self::from_source(&EnvSource::from_process(), output_dir)
    }

    /// Create config from an explicit source.
    pub fn from_source(source: &EnvSource, output_dir: impl Into<PathBuf>) -> WorkerResult<Self> {
        let encryption_key = CipherKey::from_base64(&source.require("ENCRYPTION_KEY")?)
            .map_err(|e| WorkerError::config_error(format!("ENCRYPTION_KEY: {}", e)))?;

        let max_inflight_completions = source.parse_or("MAX_INFLIGHT_COMPLETIONS", 4usize)?;
        if max_inflight_completions == 0 {
            return Err(WorkerError::config_error(
                "MAX_INFLIGHT_COMPLETIONS must be at least 1",
            ));
        }

        let results_container = match source.get("RESULTS_CONTAINER") {
            Some(name) => name,
            None => {
                let host = hostname::get()
                    .map_err(|e| WorkerError::config_error(format!("hostname unavailable: {}", e)))?;
                results_container_for_host(&host.to_string_lossy())
            }
        };

        let decode_timeout = source.parse_or("DECODE_TIMEOUT_SECS", 600u64)?;
        let classify_timeout = source.parse_or("CLASSIFY_TIMEOUT_SECS", 300u64)?;
        if decode_timeout == 0 || classify_timeout == 0 {
            return Err(WorkerError::config_error(
                "DECODE_TIMEOUT_SECS and CLASSIFY_TIMEOUT_SECS must be at least 1",
            ));
        }

        let metrics_addr = match source.get("METRICS_ADDR") {
            Some(raw) => Some(raw.trim().parse().map_err(|e| {
                WorkerError::config_error(format!("METRICS_ADDR has invalid value {:?}: {}", raw, e))
            })?),
            None => None,
        };

        Ok(Self {
            encryption_key,
            lease_duration: Duration::from_secs(source.parse_or("ITEM_LEASE_SECS", 15)?),
            poll_timeout: Duration::from_secs(source.parse_or("LEASE_POLL_TIMEOUT_SECS", 2)?),
            input_dir: PathBuf::from(
                source.get("INPUT_FOLDER").unwrap_or_else(|| "/input".to_string()),
            ),
            output_dir: output_dir.into(),
            queue: QueueConfig {
                host: source.get("REDIS_HOST").unwrap_or_else(|| "localhost".to_string()),
                port: source.parse_or("REDIS_PORT", 6379)?,
                name: source.get("REDIS_QUEUE").unwrap_or_else(|| "job".to_string()),
            },
            results_container,
            max_inflight_completions,
            report_rejected: source.parse_or("REPORT_REJECTED_ITEMS", false)?,
            storage: StorageBackend::from_source(source)?,
            classifier_cmd: source
                .get("CLASSIFIER_CMD")
                .unwrap_or_else(|| "if_doppler".to_string()),
            decode_timeout: Duration::from_secs(decode_timeout),
            classify_timeout: Duration::from_secs(classify_timeout),
            metrics_addr,
        })
    }
}

/// `<job-name>-results`, where the job name is the host name minus its
/// trailing `-<suffix>` replica part.
pub fn results_container_for_host(host: &str) -> String {
    let job = match host.rfind('-') {
        Some(index) => &host[..index],
        None => host,
    };
    format!("{}-results", job)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";

    fn swift_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("ENCRYPTION_KEY", KEY),
            ("RESULTS_CONTAINER", "anon-results"),
            ("OS_AUTH_URL", "https://keystone.example/v3"),
            ("OS_AUTH_TOKEN", "token"),
            ("OS_PROJECT_NAME", "research"),
            ("OS_PROJECT_DOMAIN_ID", "default"),
        ]
    }

    #[test]
    fn test_defaults() {
        let source = EnvSource::with_vars(swift_vars(), "/nonexistent");
        let config = WorkerConfig::from_source(&source, "/output").unwrap();

        assert_eq!(config.encryption_key.len(), 32);
        assert_eq!(config.lease_duration, Duration::from_secs(15));
        assert_eq!(config.poll_timeout, Duration::from_secs(2));
        assert_eq!(config.input_dir, PathBuf::from("/input"));
        assert_eq!(config.output_dir, PathBuf::from("/output"));
        assert_eq!(config.queue.host, "localhost");
        assert_eq!(config.queue.port, 6379);
        assert_eq!(config.queue.name, "job");
        assert_eq!(config.results_container, "anon-results");
        assert_eq!(config.max_inflight_completions, 4);
        assert!(!config.report_rejected);
        assert_eq!(config.storage.name(), "swift");
        assert_eq!(config.classifier_cmd, "if_doppler");
        assert_eq!(config.decode_timeout, Duration::from_secs(600));
        assert_eq!(config.classify_timeout, Duration::from_secs(300));
        assert!(config.metrics_addr.is_none());
    }

    #[test]
    fn test_external_process_timeouts() {
        let mut vars = swift_vars();
        vars.push(("DECODE_TIMEOUT_SECS", "90"));
        vars.push(("CLASSIFY_TIMEOUT_SECS", "30"));
        let source = EnvSource::with_vars(vars, "/nonexistent");

        let config = WorkerConfig::from_source(&source, "/output").unwrap();
        assert_eq!(config.decode_timeout, Duration::from_secs(90));
        assert_eq!(config.classify_timeout, Duration::from_secs(30));

        let mut vars = swift_vars();
        vars.push(("CLASSIFY_TIMEOUT_SECS", "0"));
        let source = EnvSource::with_vars(vars, "/nonexistent");
        let err = WorkerConfig::from_source(&source, "/output").unwrap_err();
        assert!(err.to_string().contains("CLASSIFY_TIMEOUT_SECS"));
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let vars: Vec<_> = swift_vars()
            .into_iter()
            .filter(|(k, _)| *k != "ENCRYPTION_KEY")
            .collect();
        let source = EnvSource::with_vars(vars, "/nonexistent");

        let err = WorkerConfig::from_source(&source, "/output").unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("ENCRYPTION_KEY"));
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let mut vars = swift_vars();
        vars.push(("REDIS_PORT", "not-a-port"));
        let source = EnvSource::with_vars(vars, "/nonexistent");

        let err = WorkerConfig::from_source(&source, "/output").unwrap_err();
        assert!(matches!(err, WorkerError::ConfigError(_)));
    }

    #[test]
    fn test_zero_inflight_rejected() {
        let mut vars = swift_vars();
        vars.push(("MAX_INFLIGHT_COMPLETIONS", "0"));
        let source = EnvSource::with_vars(vars, "/nonexistent");
        assert!(WorkerConfig::from_source(&source, "/output").is_err());
    }

    #[test]
    fn test_s3_backend() {
        let vars = vec![
            ("ENCRYPTION_KEY", KEY),
            ("RESULTS_CONTAINER", "anon-results"),
            ("STORAGE_BACKEND", "S3"),
            ("S3_ENDPOINT_URL", "http://minio:9000"),
            ("S3_ACCESS_KEY_ID", "id"),
            ("S3_SECRET_ACCESS_KEY", "secret"),
        ];
        let source = EnvSource::with_vars(vars, "/nonexistent");
        let config = WorkerConfig::from_source(&source, "/output").unwrap();

        match config.storage {
            StorageBackend::S3(s3) => assert_eq!(s3.region, "auto"),
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn test_values_read_from_env_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("REDIS_HOST"), "redis.internal\nignored\n").unwrap();
        std::fs::write(dir.path().join("ITEM_LEASE_SECS"), "30\n").unwrap();

        let source = EnvSource::with_vars(swift_vars(), dir.path());
        let config = WorkerConfig::from_source(&source, "/output").unwrap();

        assert_eq!(config.queue.host, "redis.internal");
        assert_eq!(config.lease_duration, Duration::from_secs(30));
    }

    #[test]
    fn test_environment_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("REDIS_QUEUE"), "from-file").unwrap();

        let mut vars = swift_vars();
        vars.push(("REDIS_QUEUE", "from-env"));
        let source = EnvSource::with_vars(vars, dir.path());

        assert_eq!(source.get("REDIS_QUEUE").as_deref(), Some("from-env"));
    }

    #[test]
    fn test_results_container_for_host() {
        assert_eq!(results_container_for_host("anonymise-7xk2p"), "anonymise-results");
        assert_eq!(results_container_for_host("echo-anon-job-abcde"), "echo-anon-job-results");
        assert_eq!(results_container_for_host("standalone"), "standalone-results");
    }
}
