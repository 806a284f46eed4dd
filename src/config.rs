use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub hot_bucket: String,
    pub replica_buckets: Vec<String>,
    pub replica_count: usize,
    pub lease_secs: i64,
    pub public_url: String,
    pub url_secret: String,
    pub url_ttl_secs: i64,
    pub reconcile_batch: i64,
}

/// What the binary does after start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    Migrate,
    Reconcile,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Replicated file-data store")]
pub struct Args {
    /// Host to bind to (overrides FILEDATA_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILEDATA_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding one sub-directory per bucket (overrides FILEDATA_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FILEDATA_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket receiving new uploads (overrides FILEDATA_HOT_BUCKET)
    #[arg(long)]
    pub hot_bucket: Option<String>,

    /// Comma separated replica buckets (overrides FILEDATA_REPLICA_BUCKETS)
    #[arg(long)]
    pub replica_buckets: Option<String>,

    /// Confirmed copies each record should reach (overrides FILEDATA_REPLICA_COUNT)
    #[arg(long)]
    pub replica_count: Option<usize>,

    /// Reconciliation lease length in seconds (overrides FILEDATA_LEASE_SECS)
    #[arg(long)]
    pub lease_secs: Option<i64>,

    /// Base URL used in signed object URLs (overrides FILEDATA_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Signed URL lifetime in seconds (overrides FILEDATA_URL_TTL_SECS)
    #[arg(long)]
    pub url_ttl_secs: Option<i64>,

    /// Records claimed by one reconciliation pass (overrides FILEDATA_RECONCILE_BATCH)
    #[arg(long)]
    pub reconcile_batch: Option<i64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Run one reconciliation pass and exit
    #[arg(long, conflicts_with = "migrate")]
    pub reconcile: bool,
}

/// Read `name`, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn split_buckets(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        let args = Args::parse();
        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.reconcile {
            RunMode::Reconcile
        } else {
            RunMode::Serve
        };
        Ok((Self::merge(args)?, mode))
    }

    fn merge(args: Args) -> Result<Self> {
        let hot_bucket = args
            .hot_bucket
            .unwrap_or(env_or("FILEDATA_HOT_BUCKET", "b2-eu-cen".to_string())?);
        let raw_buckets = args
            .replica_buckets
            .unwrap_or(env_or("FILEDATA_REPLICA_BUCKETS", hot_bucket.clone())?);
        let mut replica_buckets = split_buckets(&raw_buckets);
        if !replica_buckets.contains(&hot_bucket) {
            replica_buckets.insert(0, hot_bucket.clone());
        }

        let cfg = Self {
            host: args.host.unwrap_or(env_or("FILEDATA_HOST", "0.0.0.0".to_string())?),
            port: args.port.unwrap_or(env_or("FILEDATA_PORT", 3000)?),
            storage_dir: args
                .storage_dir
                .unwrap_or(env_or("FILEDATA_STORAGE_DIR", "./data/buckets".to_string())?),
            database_url: args.database_url.unwrap_or(env_or(
                "FILEDATA_DATABASE_URL",
                "sqlite://./data/meta/file_data.db".to_string(),
            )?),
            hot_bucket,
            replica_count: args
                .replica_count
                .unwrap_or(env_or("FILEDATA_REPLICA_COUNT", replica_buckets.len())?),
            replica_buckets,
            lease_secs: args.lease_secs.unwrap_or(env_or("FILEDATA_LEASE_SECS", 300)?),
            public_url: args
                .public_url
                .unwrap_or(env_or("FILEDATA_PUBLIC_URL", "http://localhost:3000".to_string())?),
            // Secrets are never taken from the command line.
            url_secret: env_or("FILEDATA_URL_SECRET", String::new())?,
            url_ttl_secs: args.url_ttl_secs.unwrap_or(env_or("FILEDATA_URL_TTL_SECS", 900)?),
            reconcile_batch: args
                .reconcile_batch
                .unwrap_or(env_or("FILEDATA_RECONCILE_BATCH", 500)?),
        };
        cfg.check()?;
        Ok(cfg)
    }

    fn check(&self) -> Result<()> {
        if self.replica_count == 0 || self.replica_count > self.replica_buckets.len() {
            bail!(
                "replica count {} must be between 1 and the {} configured buckets",
                self.replica_count,
                self.replica_buckets.len()
            );
        }
        if self.lease_secs <= 0 || self.url_ttl_secs <= 0 {
            bail!("lease and url lifetimes must be positive");
        }
        if self.reconcile_batch <= 0 {
            bail!("reconcile batch must be positive");
        }
        if self.url_secret.len() < 16 {
            bail!("FILEDATA_URL_SECRET must be set to at least 16 bytes");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
