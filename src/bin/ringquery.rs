//! ringquery one-shot query tool
//!
//! Loads a ring descriptor, fans one query out to the ingesters it names and
//! prints the merged result as JSON.

use ringquery::client::IngesterClientPool;
use ringquery::clock::SystemClock;
use ringquery::config::{parse_duration, DistributorConfig, ShardingStrategy, TenantLimits};
use ringquery::distributor::Distributor;
use ringquery::model::{parse_selector, Matcher};
use ringquery::ring::HashRing;
use ringquery::telemetry::{LogFormat, Telemetry};
use ringquery::Error;

use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Samples per series
    Query,
    /// Exemplars for one or more selectors
    Exemplars,
    /// Streamed chunks and samples
    Stream,
}

/// Query the ingesters of a replicated time-series store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Ring descriptor (JSON)
    #[arg(long, env = "RINGQUERY_RING_FILE")]
    ring: PathBuf,

    /// Per-tenant limits (JSON with "defaults" and "overrides")
    #[arg(long, env = "RINGQUERY_LIMITS_FILE")]
    limits: Option<PathBuf>,

    /// Tenant to query as
    #[arg(long, env = "RINGQUERY_TENANT")]
    tenant: String,

    /// Series selector, e.g. 'up{job="api"}'. Repeat for exemplar queries.
    #[arg(long = "selector", short = 's', required = true)]
    selectors: Vec<String>,

    #[arg(long, value_enum, default_value = "query")]
    mode: Mode,

    /// Range start: RFC 3339 or milliseconds since the epoch
    #[arg(long)]
    start: Option<String>,

    /// Range end: RFC 3339 or milliseconds since the epoch
    #[arg(long)]
    end: Option<String>,

    /// Range length ending at --end when --start is not given
    #[arg(long, default_value = "1h")]
    since: String,

    /// Overrides RINGQUERY_SHARDING_STRATEGY
    #[arg(long)]
    sharding_strategy: Option<String>,

    /// Log filter
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or text)
    #[arg(long, default_value = "json")]
    log_format: String,
}

#[derive(Serialize)]
struct Output<T: Serialize> {
    tenant: String,
    start_ms: i64,
    end_ms: i64,
    stats: ringquery::stats::QueryStatsSnapshot,
    result: T,
}

fn parse_timestamp(raw: &str) -> Result<i64, Error> {
    if let Ok(ms) = raw.trim().parse::<i64>() {
        return Ok(ms);
    }
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc).timestamp_millis())
        .map_err(|e| Error::InvalidRequest(format!("invalid timestamp '{raw}': {e}")))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let _telemetry = Telemetry::init(
        "ringquery",
        &args.log_level,
        LogFormat::parse(&args.log_format)?,
    )?;

    let mut cfg = DistributorConfig::from_env()?;
    if let Some(strategy) = &args.sharding_strategy {
        cfg.sharding_strategy = ShardingStrategy::parse(strategy)?;
    }

    let limits = match &args.limits {
        Some(path) => TenantLimits::from_json_file(path)?,
        None => TenantLimits::default(),
    };

    let ring = HashRing::from_json_file(&args.ring, Arc::new(SystemClock::new()))?;
    info!(
        ring = %args.ring.display(),
        instances = ring.instances().len(),
        replication_factor = ring.config().replication_factor,
        "Loaded ring"
    );

    let end_ms = match &args.end {
        Some(raw) => parse_timestamp(raw)?,
        None => Utc::now().timestamp_millis(),
    };
    let start_ms = match &args.start {
        Some(raw) => parse_timestamp(raw)?,
        None => end_ms - parse_duration(&args.since)?.as_millis() as i64,
    };

    let matcher_sets = args
        .selectors
        .iter()
        .map(|s| parse_selector(s))
        .collect::<Result<Vec<Vec<Matcher>>, Error>>()?;

    let pool = IngesterClientPool::grpc(cfg.client.clone());
    let distributor = Distributor::new(cfg, Arc::new(limits), Arc::new(ring), Arc::new(pool));
    let ctx = distributor.query_context(&args.tenant);

    let cancel = ctx.cancellation().clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, canceling query");
            cancel.cancel();
        }
    });

    let first = matcher_sets.first().cloned().unwrap_or_default();
    let output = |result| Output {
        tenant: args.tenant.clone(),
        start_ms,
        end_ms,
        stats: ctx.stats().snapshot(),
        result,
    };

    match args.mode {
        Mode::Query => {
            let matrix = distributor.query(&ctx, start_ms, end_ms, &first).await?;
            print_json(&output(serde_json::to_value(matrix)?))?;
        }
        Mode::Exemplars => {
            let resp = distributor
                .query_exemplars(&ctx, start_ms, end_ms, &matcher_sets)
                .await?;
            print_json(&output(serde_json::to_value(resp)?))?;
        }
        Mode::Stream => {
            let resp = distributor.query_stream(&ctx, start_ms, end_ms, &first).await?;
            print_json(&output(serde_json::to_value(resp)?))?;
        }
    }

    Ok(())
}
