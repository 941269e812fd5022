use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use compute_reconcile::{
    BatchSize, DEFAULT_BATCH_SIZE, DEFAULT_INQUEUE_GRACE, DEFAULT_INVENTORY_INTERVAL,
    DEFAULT_TICK_INTERVAL,
};

use crate::coordinator::{CoordinatorSettings, Product};
use crate::scheduler::SchedulerPolicy;
use crate::tracker::BatchSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub tick_interval: Duration,
    pub inventory_interval: Duration,
    pub batch_size: BatchSize,
    pub inqueue_grace: Duration,
    pub system_reserved_cpu_millis: i64,
    pub policy: SchedulerPolicy,
    pub inventory_file: Option<PathBuf>,
    pub job_api_url: Option<String>,
    pub products_file: Option<PathBuf>,
    pub dump_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let listen_addr: SocketAddr = parse_or(
            &lookup,
            "COMPUTE_LISTEN_ADDR",
            SocketAddr::from(([127, 0, 0, 1], 8080)),
        )?;

        let log_level = lookup("COMPUTE_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let tick_interval = Duration::from_millis(parse_or(
            &lookup,
            "COMPUTE_TICK_INTERVAL_MS",
            DEFAULT_TICK_INTERVAL.as_millis() as u64,
        )?);

        let inventory_interval = Duration::from_secs(parse_or(
            &lookup,
            "COMPUTE_INVENTORY_INTERVAL_SECS",
            DEFAULT_INVENTORY_INTERVAL.as_secs(),
        )?);

        let batch_size = BatchSize::new(parse_or(&lookup, "COMPUTE_BATCH_SIZE", DEFAULT_BATCH_SIZE)?)
            .context("COMPUTE_BATCH_SIZE")?;

        let inqueue_grace = Duration::from_secs(parse_or(
            &lookup,
            "COMPUTE_INQUEUE_GRACE_SECS",
            DEFAULT_INQUEUE_GRACE.as_secs(),
        )?);

        let system_reserved_cpu_millis =
            parse_or(&lookup, "COMPUTE_SYSTEM_RESERVED_CPU_MILLIS", 500_i64)?;

        let defaults = SchedulerPolicy::default();
        let policy = SchedulerPolicy {
            backfill: !flag(&lookup, "COMPUTE_DISABLE_BACKFILL"),
            favor_large_jobs: flag(&lookup, "COMPUTE_FAVOR_LARGE_JOBS"),
            job_compaction: !flag(&lookup, "COMPUTE_DISABLE_JOB_COMPACTION"),
            weight_age: parse_or(&lookup, "COMPUTE_WEIGHT_AGE", defaults.weight_age)?,
            weight_job_size: parse_or(&lookup, "COMPUTE_WEIGHT_JOB_SIZE", defaults.weight_job_size)?,
            weight_fair_share: parse_or(
                &lookup,
                "COMPUTE_WEIGHT_FAIR_SHARE",
                defaults.weight_fair_share,
            )?,
        };

        let dump_dir = lookup("COMPUTE_DUMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/tmp"));

        Ok(Self {
            listen_addr,
            log_level,
            tick_interval,
            inventory_interval,
            batch_size,
            inqueue_grace,
            system_reserved_cpu_millis,
            policy,
            inventory_file: lookup("COMPUTE_INVENTORY_FILE").map(PathBuf::from),
            job_api_url: lookup("COMPUTE_JOB_API_URL"),
            products_file: lookup("COMPUTE_PRODUCTS_FILE").map(PathBuf::from),
            dump_dir,
        })
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            batch: BatchSettings {
                batch_size: self.batch_size,
                inqueue_grace: ChronoDuration::from_std(self.inqueue_grace)
                    .unwrap_or_else(|_| ChronoDuration::minutes(5)),
            },
            system_reserved_cpu_millis: self.system_reserved_cpu_millis,
        }
    }

    /// Load the product catalog, if one is configured.
    pub fn load_products(&self) -> Result<Vec<Product>> {
        let Some(path) = &self.products_file else {
            return Ok(Vec::new());
        };

        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading products file {}", path.display()))?;
        let products = serde_json::from_str(&json)
            .with_context(|| format!("parsing products file {}", path.display()))?;
        Ok(products)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {value:?}")),
        None => Ok(default),
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> bool {
    lookup(key)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}
