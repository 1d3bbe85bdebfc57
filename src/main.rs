// src/main.rs
use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use log::{info, warn};
use panel_poller::{
    config::load_config,
    data::{DataFetchManager, FetchMode, SubscriptionId},
    utils::setup_logging,
};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Polls JSON endpoints and prints every delivery as one JSON line.
#[derive(Debug, Parser)]
#[command(name = "panel-poller", version, about)]
struct Cli {
    /// Scheduling mode, overrides POLLER_MODE
    #[arg(long)]
    mode: Option<FetchMode>,

    /// Refresh interval in seconds, overrides POLLER_DEFAULT_FREQUENCY_SECS
    #[arg(long)]
    frequency: Option<f64>,

    /// Treat all URLs as one coordinated multi-source subscription
    #[arg(long)]
    multi: bool,

    /// Log the manager state every N seconds
    #[arg(long, value_name = "SECS")]
    debug_every: Option<f64>,

    #[arg(required = true)]
    urls: Vec<Url>,
}

#[derive(Serialize)]
struct Delivery<'a> {
    at: String,
    urls: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

fn emit(delivery: &Delivery<'_>) {
    match serde_json::to_string(delivery) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Failed to encode delivery for {:?}: {}", delivery.urls, e),
    }
}

fn subscribe_single(manager: &DataFetchManager, url: &str, frequency: f64) -> SubscriptionId {
    let urls = vec![url.to_string()];
    manager.subscribe(url, frequency, move |data, error| {
        emit(&Delivery {
            at: Utc::now().to_rfc3339(),
            urls: &urls,
            data: data.cloned(),
            error: error.map(|e| Value::String(e.to_string())),
        });
    })
}

fn subscribe_multi(manager: &DataFetchManager, urls: &[String], frequency: f64) -> SubscriptionId {
    let label = urls.to_vec();
    manager.subscribe_multiple(urls.to_vec(), frequency, move |data, errors| {
        emit(&Delivery {
            at: Utc::now().to_rfc3339(),
            urls: &label,
            data: serde_json::to_value(data).ok(),
            error: errors.and_then(|e| serde_json::to_value(e).ok()),
        });
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config().context("loading configuration")?;
    setup_logging(config.log_level).context("initializing logging")?;
    config.validate_and_log();
    info!("Panel poller starting...");

    let mut config = (*config).clone();
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    let frequency = cli.frequency.unwrap_or(config.default_frequency_secs);
    if !(frequency.is_finite() && frequency > 0.0) {
        anyhow::bail!("--frequency must be a positive number of seconds, got {}", frequency);
    }

    let manager = DataFetchManager::from_config(&config).context("building fetch manager")?;
    let urls: Vec<String> = cli.urls.iter().map(|u| u.as_str().to_string()).collect();

    let ids: Vec<SubscriptionId> = if cli.multi {
        vec![subscribe_multi(&manager, &urls, frequency)]
    } else {
        urls.iter()
            .map(|url| subscribe_single(&manager, url, frequency))
            .collect()
    };
    info!(
        "Polling {} URL(s) every {}s in {} mode ({} subscription(s))",
        urls.len(),
        frequency,
        manager.get_mode(),
        ids.len()
    );

    let debug_task = cli.debug_every.map(|secs| {
        let manager = manager.clone();
        let period = Duration::try_from_secs_f64(secs)
            .unwrap_or(Duration::from_secs(1))
            .max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match serde_json::to_string(&manager.get_debug_info()) {
                    Ok(info) => info!("Debug info: {}", info),
                    Err(e) => warn!("Failed to encode debug info: {}", e),
                }
            }
        })
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Shutting down...");

    if let Some(task) = debug_task {
        task.abort();
    }
    for id in ids {
        manager.unsubscribe(id);
    }
    manager.destroy();
    Ok(())
}
