//! ioc-batch：分批抽取文本中的威胁指标并输出合并后的 JSON
//!
//! Usage:
//!   ioc-batch <file> [--lines <n>] [--concurrency <n>] [--limits <path>]

use anyhow::{bail, Context};
use ioc_pipeline::batch::{
    merge_ioc_results, BatchConfig, BatchProcessingEngine, BatchProgress, IocResults,
};
use ioc_pipeline::resilience::{ProviderLimits, RateLimitConfig, RateLimiter};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const LOCAL_PROVIDER: &str = "local";

static PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    let table: &[(&str, &str)] = &[
        ("ipv4", r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b"),
        ("ipv6", r"\b(?:[0-9a-fA-F]{1,4}:){7}[0-9a-fA-F]{1,4}\b"),
        ("urls", r#"\bhttps?://[^\s"'<>]+"#),
        ("emails", r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
        ("domains", r"\b(?:[A-Za-z0-9-]+\.)+(?:com|net|org|io|ru|cn|info|biz|xyz|top)\b"),
        ("sha256", r"\b[a-fA-F0-9]{64}\b"),
        ("sha1", r"\b[a-fA-F0-9]{40}\b"),
        ("md5", r"\b[a-fA-F0-9]{32}\b"),
        ("cves", r"\bCVE-\d{4}-\d{4,7}\b"),
    ];
    table
        .iter()
        .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| (*name, re)))
        .collect()
});

struct Options {
    file: PathBuf,
    lines: usize,
    concurrency: usize,
    limits: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("help" | "--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some("version" | "--version" | "-V") => {
            println!("ioc-batch {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    let opts = parse_args(&args)?;
    let text = std::fs::read_to_string(&opts.file)
        .with_context(|| format!("reading {}", opts.file.display()))?;

    let limits = match &opts.limits {
        Some(path) => ProviderLimits::load(path)?,
        None => ProviderLimits::from_env()?,
    };
    let limiter = RateLimiter::with_limits(limits);
    if limiter.provider_config(LOCAL_PROVIDER).is_none() {
        limiter.set_provider_config(
            LOCAL_PROVIDER,
            RateLimitConfig::new()
                .with_max_requests(1_000)
                .with_window(Duration::from_secs(1))
                .with_max_concurrent(opts.concurrency),
        )?;
    }

    let config = BatchConfig::from_env()
        .with_batch_size(opts.lines)
        .with_max_concurrency(opts.concurrency);
    config.validate()?;

    let engine = BatchProcessingEngine::with_config(config);
    let result = engine
        .process_iocs_in_batches(
            &text,
            |chunk: String| {
                let limiter = limiter.clone();
                async move {
                    limiter
                        .execute_request(
                            LOCAL_PROVIDER,
                            move || {
                                let chunk = chunk.clone();
                                async move { Ok::<_, String>(extract(&chunk)) }
                            },
                            0,
                        )
                        .await
                }
            },
            None,
            Some(&|p: &BatchProgress| {
                info!(
                    batch = p.current_batch,
                    total = p.total_batches,
                    percentage = p.percentage,
                    "chunk extracted"
                )
            }),
        )
        .await;

    let merged: BTreeMap<String, Vec<String>> =
        merge_ioc_results(&result.results).into_iter().collect();
    println!("{}", serde_json::to_string_pretty(&merged)?);
    info!(
        chunks = result.total_processed,
        elapsed_ms = result.total_time.as_millis() as u64,
        "done"
    );
    Ok(())
}

fn extract(text: &str) -> IocResults {
    PATTERNS
        .iter()
        .map(|(category, re)| {
            let mut found: Vec<String> = re.find_iter(text).map(|m| m.as_str().to_string()).collect();
            found.sort();
            found.dedup();
            (category.to_string(), found)
        })
        .collect()
}

fn parse_args(args: &[String]) -> anyhow::Result<Options> {
    let mut file = None;
    let mut lines = 50;
    let mut concurrency = 3;
    let mut limits = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--lines" => lines = parse_number(iter.next(), "--lines")?,
            "--concurrency" => concurrency = parse_number(iter.next(), "--concurrency")?,
            "--limits" => {
                let path = iter.next().context("--limits needs a path")?;
                limits = Some(PathBuf::from(path));
            }
            flag if flag.starts_with("--") => bail!("unknown option: {flag}"),
            path if file.is_none() => file = Some(PathBuf::from(path)),
            extra => bail!("unexpected argument: {extra}"),
        }
    }

    Ok(Options {
        file: file.context("missing input file")?,
        lines,
        concurrency,
        limits,
    })
}

fn parse_number(value: Option<&String>, flag: &str) -> anyhow::Result<usize> {
    let value = value.with_context(|| format!("{flag} needs a value"))?;
    let n: usize = value
        .parse()
        .with_context(|| format!("{flag}: '{value}' is not a number"))?;
    if n == 0 {
        bail!("{flag} must be greater than zero");
    }
    Ok(n)
}

fn print_usage() {
    println!(
        r#"ioc-batch — 威胁指标批量抽取工具

USAGE:
    ioc-batch <FILE> [OPTIONS]

OPTIONS:
    --lines <n>           Lines per chunk (default 50)
    --concurrency <n>     Chunks extracted at once (default 3)
    --limits <path>       Provider limits YAML file
    -h, --help            Show this help message
    -V, --version         Show version information

ENVIRONMENT:
    IOC_RATE_LIMITS_FILE  Provider limits YAML file, when --limits is absent
    IOC_BATCH_*           Batch defaults (see BatchConfig::from_env)
    RUST_LOG              Log filter (default: warn)"#
    );
}
