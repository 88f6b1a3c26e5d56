//! Worker configuration.
//!
//! Parsed from a flat dotted-key map (the shape the deployment's config file
//! produces). Recognized keys:
//!
//! | Key                         | Description                            | Default     |
//! |-----------------------------|----------------------------------------|-------------|
//! | `mongo.host` / `mongo.port` | Document store address                 | `localhost:27017` |
//! | `mongo.readwrite.user`      | Store credentials                      | (none)      |
//! | `mongo.readwrite.password`  | Store credentials                      | (none)      |
//! | `redis.host` / `redis.port` | Lock service address                   | `localhost:6379` |
//! | `memcache.host` / `memcache.port` | Cache address                    | `localhost:11211` |
//! | `rabbit.host` / `rabbit.port` | Broker address                       | `localhost:5672` |
//! | `rabbit.queue`              | Durable queue to consume               | `timesink`  |
//! | `ignore-databases.database` | Comma-separated databases never loaded | (empty)     |
//!
//! Unknown keys are ignored; malformed numbers are configuration errors.

use crate::error::{Result, WorkerError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use timesink_backend::{LockOptions, QueueOptions};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MongoConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 27017,
            user: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemcacheConfig {
    pub host: String,
    pub port: u16,
}

impl Default for MemcacheConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11211,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RabbitConfig {
    pub host: String,
    pub port: u16,
    pub queue: String,
}

impl Default for RabbitConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            queue: "timesink".to_string(),
        }
    }
}

/// Full worker configuration. Connection settings come from the config map;
/// the tuning knobs carry the worker's operational defaults.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub mongo: MongoConfig,
    pub redis: RedisConfig,
    pub memcache: MemcacheConfig,
    pub rabbit: RabbitConfig,

    /// Databases the registry must never load.
    pub ignore_databases: BTreeSet<String>,

    /// Lock TTL per acquisition attempt.
    pub lock_timeout: Duration,
    /// Acquisition attempts before a batch fails transient.
    pub lock_retries: u32,
    /// Sleep between acquisition attempts.
    pub lock_retry_delay: Duration,

    /// Broker fetch timeout per loop iteration.
    pub queue_fetch_timeout: Duration,
    pub queue_prefetch_count: u16,
    /// Sleep between reconnection attempts after a transport failure.
    pub reconnect_timeout: Duration,

    /// TTL for bucket and metadata cache entries.
    pub data_cache_expiration: Duration,
    /// Floor TTL for measurement cache entries.
    pub measurement_cache_expiration: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            mongo: MongoConfig::default(),
            redis: RedisConfig::default(),
            memcache: MemcacheConfig::default(),
            rabbit: RabbitConfig::default(),
            ignore_databases: BTreeSet::new(),
            lock_timeout: Duration::from_secs(10),
            lock_retries: 10,
            lock_retry_delay: Duration::from_millis(500),
            queue_fetch_timeout: Duration::from_secs(10),
            queue_prefetch_count: 20,
            reconnect_timeout: Duration::from_secs(5),
            data_cache_expiration: Duration::from_secs(3600),
            measurement_cache_expiration: Duration::from_secs(3600),
        }
    }
}

fn parse_port(config: &HashMap<String, String>, key: &str, default: u16) -> Result<u16> {
    match config.get(key) {
        Some(raw) => raw
            .trim()
            .parse::<u16>()
            .map_err(|e| WorkerError::Config(format!("invalid {}: {}", key, e))),
        None => Ok(default),
    }
}

impl WorkerConfig {
    /// Parse a configuration from a flat key-value map.
    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let mongo = MongoConfig {
            host: config
                .get("mongo.host")
                .cloned()
                .unwrap_or_else(|| defaults.mongo.host.clone()),
            port: parse_port(config, "mongo.port", defaults.mongo.port)?,
            user: config.get("mongo.readwrite.user").cloned(),
            password: config.get("mongo.readwrite.password").cloned(),
        };

        let redis = RedisConfig {
            host: config
                .get("redis.host")
                .cloned()
                .unwrap_or_else(|| defaults.redis.host.clone()),
            port: parse_port(config, "redis.port", defaults.redis.port)?,
        };

        let memcache = MemcacheConfig {
            host: config
                .get("memcache.host")
                .cloned()
                .unwrap_or_else(|| defaults.memcache.host.clone()),
            port: parse_port(config, "memcache.port", defaults.memcache.port)?,
        };

        let rabbit = RabbitConfig {
            host: config
                .get("rabbit.host")
                .cloned()
                .unwrap_or_else(|| defaults.rabbit.host.clone()),
            port: parse_port(config, "rabbit.port", defaults.rabbit.port)?,
            queue: {
                let queue = config
                    .get("rabbit.queue")
                    .cloned()
                    .unwrap_or_else(|| defaults.rabbit.queue.clone());
                if queue.trim().is_empty() {
                    return Err(WorkerError::Config(
                        "'rabbit.queue' must not be empty".to_string(),
                    ));
                }
                queue
            },
        };

        let ignore_databases = config
            .get("ignore-databases.database")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            mongo,
            redis,
            memcache,
            rabbit,
            ignore_databases,
            ..defaults
        })
    }

    /// Retry budget handed to the lock service.
    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            ttl: self.lock_timeout,
            retries: self.lock_retries,
            retry_delay: self.lock_retry_delay,
        }
    }

    /// Consumer options applied on every queue (re)connect.
    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            queue: self.rabbit.queue.clone(),
            prefetch_count: self.queue_prefetch_count,
            auto_delete: false,
            no_ack: false,
        }
    }

    /// Measurement cache TTL: long-interval measurements must not be
    /// forgotten between updates, so the default expiration is a floor, not a
    /// cap.
    pub fn measurement_cache_ttl(&self, interval: i64) -> Duration {
        self.measurement_cache_expiration
            .max(Duration::from_secs((interval.max(0) as u64) * 2))
    }
}
