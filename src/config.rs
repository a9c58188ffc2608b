//! Worker settings read from the environment.

use crate::RunnerConfig;
use std::{collections::HashMap, time::Duration};
use thiserror::Error;

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_CREDENTIAL: &str = "dummy";
const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_MAX_IN_FLIGHT: usize = 10;
const DEFAULT_LEASE_TTL_SECS: u64 = 30;
const DEFAULT_WAIT_SECS: u64 = 5;
// SQS refuses long polls over 20 seconds
const MAX_WAIT_SECS: u64 = 20;
// a day; far beyond any handler timeout and well inside what Redis PX accepts
const MAX_LEASE_TTL_SECS: u64 = 86_400;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{key} must be an integer, got {value:?}")]
    NotInteger { key: &'static str, value: String },

    #[error("{0} must be > 0")]
    NotPositive(&'static str),

    #[error("{0} must not be negative")]
    Negative(&'static str),

    #[error("{key} must be at most {max}")]
    TooLarge { key: &'static str, max: u64 },
}

pub trait EnvReader {
    fn get(&self, key: &str) -> Option<String>;
}

/// The process environment.
pub struct OsEnv;

impl EnvReader for OsEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvReader for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub aws_region: String,
    /// Set for local queue emulators; static credentials are used alongside it.
    pub sqs_endpoint: Option<String>,
    pub queue_url: String,
    pub aws_access_key: String,
    pub aws_secret_key: String,
    pub concurrency: usize,
    pub max_in_flight: usize,
    pub lease_ttl: Duration,
    pub redis_addr: String,
    pub wait_time: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(&OsEnv)
    }

    pub fn load(env: &impl EnvReader) -> Result<Self, ConfigError> {
        let queue_url = required(env, "SQS_QUEUE_URL")?;
        let concurrency = positive(env, "WORKER_CONCURRENCY", DEFAULT_CONCURRENCY as u64)?;
        let max_in_flight = positive(env, "MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT as u64)?;
        let lease_ttl = positive(env, "LEASE_TTL", DEFAULT_LEASE_TTL_SECS)?;
        let redis_addr = required(env, "REDIS_ADDR")?;
        if lease_ttl > MAX_LEASE_TTL_SECS {
            return Err(ConfigError::TooLarge {
                key: "LEASE_TTL",
                max: MAX_LEASE_TTL_SECS,
            });
        }

        let wait_secs = match integer(env, "POLL_WAIT_SECONDS")? {
            None => DEFAULT_WAIT_SECS,
            Some(n) => u64::try_from(n).map_err(|_| ConfigError::Negative("POLL_WAIT_SECONDS"))?,
        };
        if wait_secs > MAX_WAIT_SECS {
            return Err(ConfigError::TooLarge {
                key: "POLL_WAIT_SECONDS",
                max: MAX_WAIT_SECS,
            });
        }

        Ok(Self {
            aws_region: var(env, "AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            sqs_endpoint: var(env, "SQS_ENDPOINT"),
            queue_url,
            aws_access_key: var(env, "AWS_ACCESS_KEY_ID")
                .unwrap_or_else(|| DEFAULT_CREDENTIAL.to_string()),
            aws_secret_key: var(env, "AWS_SECRET_ACCESS_KEY")
                .unwrap_or_else(|| DEFAULT_CREDENTIAL.to_string()),
            concurrency: usize::try_from(concurrency).unwrap_or(usize::MAX),
            max_in_flight: usize::try_from(max_in_flight).unwrap_or(usize::MAX),
            lease_ttl: Duration::from_secs(lease_ttl),
            redis_addr,
            wait_time: Duration::from_secs(wait_secs),
        })
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::new(self.max_in_flight, self.concurrency)
    }
}

// empty counts as unset
fn var(env: &impl EnvReader, key: &str) -> Option<String> {
    env.get(key).filter(|v| !v.is_empty())
}

fn required(env: &impl EnvReader, key: &'static str) -> Result<String, ConfigError> {
    var(env, key).ok_or(ConfigError::Missing(key))
}

fn integer(env: &impl EnvReader, key: &'static str) -> Result<Option<i64>, ConfigError> {
    var(env, key)
        .map(|value| {
            value
                .trim()
                .parse::<i64>()
                .map_err(|_| ConfigError::NotInteger { key, value })
        })
        .transpose()
}

fn positive(env: &impl EnvReader, key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match integer(env, key)? {
        None => Ok(default),
        Some(n) if n <= 0 => Err(ConfigError::NotPositive(key)),
        Some(n) => Ok(n as u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![
            ("SQS_QUEUE_URL", "http://localhost:9324/000000000000/local-sqs-worker"),
            ("REDIS_ADDR", "localhost:6379"),
        ]
    }

    fn with(extra: &[(&'static str, &'static str)]) -> HashMap<String, String> {
        let mut pairs = minimal();
        pairs.extend_from_slice(extra);
        env(&pairs)
    }

    #[test]
    fn test_missing_queue_url_fails() {
        let res = WorkerConfig::load(&env(&[("REDIS_ADDR", "localhost:6379")]));

        assert_eq!(res, Err(ConfigError::Missing("SQS_QUEUE_URL")));
    }

    #[test]
    fn test_missing_redis_addr_fails() {
        let res = WorkerConfig::load(&env(&[("SQS_QUEUE_URL", "http://example.com/queue")]));

        assert_eq!(res, Err(ConfigError::Missing("REDIS_ADDR")));
    }

    #[test]
    fn test_defaults_apply() {
        // when
        let cfg = WorkerConfig::load(&with(&[])).unwrap();

        // then
        assert_eq!(cfg.aws_region, "us-east-1");
        assert_eq!(cfg.sqs_endpoint, None);
        assert_eq!(cfg.concurrency, 4);
        assert_eq!(cfg.max_in_flight, 10);
        assert_eq!(cfg.aws_access_key, "dummy");
        assert_eq!(cfg.aws_secret_key, "dummy");
        assert_eq!(cfg.lease_ttl, Duration::from_secs(30));
        assert_eq!(cfg.wait_time, Duration::from_secs(5));
        assert_eq!(cfg.redis_addr, "localhost:6379");
    }

    #[test]
    fn test_overrides_apply() {
        // given
        let env = with(&[
            ("AWS_REGION", "eu-west-1"),
            ("SQS_ENDPOINT", "http://localhost:9324"),
            ("AWS_ACCESS_KEY_ID", "someAccessKey"),
            ("AWS_SECRET_ACCESS_KEY", "someSecretAccessKey"),
            ("WORKER_CONCURRENCY", "8"),
            ("MAX_IN_FLIGHT", "16"),
            ("LEASE_TTL", "15"),
            ("POLL_WAIT_SECONDS", "20"),
        ]);

        // when
        let cfg = WorkerConfig::load(&env).unwrap();

        // then
        assert_eq!(cfg.aws_region, "eu-west-1");
        assert_eq!(cfg.sqs_endpoint.as_deref(), Some("http://localhost:9324"));
        assert_eq!(cfg.aws_access_key, "someAccessKey");
        assert_eq!(cfg.aws_secret_key, "someSecretAccessKey");
        assert_eq!(cfg.concurrency, 8);
        assert_eq!(cfg.max_in_flight, 16);
        assert_eq!(cfg.lease_ttl, Duration::from_secs(15));
        assert_eq!(cfg.wait_time, Duration::from_secs(20));
        assert_eq!(cfg.runner_config(), RunnerConfig::new(16, 8));
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let cfg =
            WorkerConfig::load(&with(&[("AWS_REGION", ""), ("WORKER_CONCURRENCY", "")])).unwrap();

        assert_eq!(cfg.aws_region, "us-east-1");
        assert_eq!(cfg.concurrency, 4);
    }

    #[test]
    fn test_invalid_concurrency_fails() {
        let res = WorkerConfig::load(&with(&[("WORKER_CONCURRENCY", "0")]));

        assert_eq!(res, Err(ConfigError::NotPositive("WORKER_CONCURRENCY")));
    }

    #[test]
    fn test_non_integer_concurrency_fails() {
        let res = WorkerConfig::load(&with(&[("WORKER_CONCURRENCY", "abc")]));

        assert_eq!(
            res,
            Err(ConfigError::NotInteger {
                key: "WORKER_CONCURRENCY",
                value: "abc".to_string()
            })
        );
    }

    #[test]
    fn test_invalid_max_in_flight_fails() {
        let res = WorkerConfig::load(&with(&[("MAX_IN_FLIGHT", "0")]));

        assert_eq!(res, Err(ConfigError::NotPositive("MAX_IN_FLIGHT")));
    }

    #[test]
    fn test_non_integer_max_in_flight_fails() {
        let res = WorkerConfig::load(&with(&[("MAX_IN_FLIGHT", "lots")]));

        assert!(matches!(res, Err(ConfigError::NotInteger { key: "MAX_IN_FLIGHT", .. })));
    }

    #[test]
    fn test_invalid_lease_ttl_fails() {
        let res = WorkerConfig::load(&with(&[("LEASE_TTL", "-1")]));

        assert_eq!(res, Err(ConfigError::NotPositive("LEASE_TTL")));
    }

    #[test]
    fn test_lease_ttl_over_limit_fails() {
        let res = WorkerConfig::load(&with(&[("LEASE_TTL", "9223372036854775807")]));

        assert_eq!(
            res,
            Err(ConfigError::TooLarge {
                key: "LEASE_TTL",
                max: 86_400
            })
        );
    }

    #[test]
    fn test_lease_ttl_at_limit_is_accepted() {
        let cfg = WorkerConfig::load(&with(&[("LEASE_TTL", "86400")])).unwrap();

        assert_eq!(cfg.lease_ttl, Duration::from_secs(86_400));
    }

    #[test]
    fn test_non_integer_lease_ttl_fails() {
        let res = WorkerConfig::load(&with(&[("LEASE_TTL", "abc")]));

        assert!(matches!(res, Err(ConfigError::NotInteger { key: "LEASE_TTL", .. })));
    }

    #[test]
    fn test_wait_time_over_limit_fails() {
        let res = WorkerConfig::load(&with(&[("POLL_WAIT_SECONDS", "21")]));

        assert_eq!(
            res,
            Err(ConfigError::TooLarge {
                key: "POLL_WAIT_SECONDS",
                max: 20
            })
        );
    }

    #[test]
    fn test_negative_wait_time_fails() {
        let res = WorkerConfig::load(&with(&[("POLL_WAIT_SECONDS", "-3")]));

        assert_eq!(res, Err(ConfigError::Negative("POLL_WAIT_SECONDS")));
    }

    #[test]
    fn test_zero_wait_time_means_short_polling() {
        let cfg = WorkerConfig::load(&with(&[("POLL_WAIT_SECONDS", "0")])).unwrap();

        assert_eq!(cfg.wait_time, Duration::ZERO);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ConfigError::Missing("SQS_QUEUE_URL").to_string(),
            "SQS_QUEUE_URL is required"
        );
        assert_eq!(
            ConfigError::NotInteger {
                key: "LEASE_TTL",
                value: "abc".to_string()
            }
            .to_string(),
            "LEASE_TTL must be an integer, got \"abc\""
        );
    }
}
