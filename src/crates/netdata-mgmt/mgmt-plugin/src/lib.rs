//! mgmt-plugin library - can be called from multi-call binaries or standalone
//!
//! Collects charts from management endpoints reached through Jolokia agents
//! and prints them with the Netdata external plugin protocol.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use tokio::io::AsyncWriteExt;

mod budget;
pub mod collector;
pub mod config;
pub mod jolokia;
pub mod name_filter;
pub mod output;
mod tracing_setup;

pub use crate::collector::ChartCollector;
use crate::config::{ModuleConfig, NetdataEnv, PluginArgs};
use crate::jolokia::JolokiaEndpoint;
pub use crate::output::ChartPrinter;

/// Entry point for mgmt-plugin
///
/// # Arguments
/// * `args` - Command-line arguments (should include argv[0] as "mgmt-plugin")
///
/// # Returns
/// Exit code (0 for success, non-zero for errors)
pub fn run(args: Vec<String>) -> i32 {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start tokio runtime: {e}");
            return 1;
        }
    };
    runtime.block_on(async_run(args))
}

async fn async_run(args: Vec<String>) -> i32 {
    tracing_setup::init_tracing("info");

    let args = match PluginArgs::try_parse_from(args) {
        Ok(args) => args,
        Err(e) => {
            tracing::error!("{}", e);
            return 1;
        }
    };

    match run_internal(args).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{:#}", e);
            1
        }
    }
}

/// Every collector of the module and the protocol state.
pub struct Plugin {
    collectors: Vec<ChartCollector>,
    printer: ChartPrinter,
}

impl Plugin {
    pub fn new(collectors: Vec<ChartCollector>) -> Self {
        Self {
            collectors,
            printer: ChartPrinter::new(),
        }
    }

    /// Connect to every configured server and create its charts. Servers
    /// that cannot be reached are skipped.
    ///
    /// Must not be called from an async context.
    pub fn from_config(config: &ModuleConfig) -> Self {
        let update_every = Duration::from_secs(config.update_every);
        let mut collectors = Vec::with_capacity(config.servers.len());

        for server in &config.servers {
            let endpoint = match JolokiaEndpoint::new(server) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    tracing::error!("{}: {}", server.name, e);
                    continue;
                }
            };
            let mut collector = ChartCollector::new(server.name.as_str(), Arc::new(endpoint))
                .with_update_every(config.update_every)
                .with_cycle_budget(update_every);

            match collector.runtime_name() {
                Ok(runtime) => tracing::info!("{}: connected to {}", server.name, runtime),
                Err(e) if e.is_retryable() => {
                    tracing::error!("{}: skipping unreachable server: {:#}", server.name, e);
                    continue;
                }
                Err(e) => tracing::warn!("{}: unknown runtime: {:#}", server.name, e),
            }

            if collector.initialize(config.charts_of(server)).is_empty() {
                tracing::warn!("{}: no chart can be collected, skipping server", server.name);
                continue;
            }
            collectors.push(collector);
        }

        Self::new(collectors)
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Collect all charts once and return the protocol text to print.
    pub fn cycle(&mut self, now: SystemTime) -> Bytes {
        for collector in &mut self.collectors {
            for chart in collector.collect_values() {
                self.printer.print_values(&chart.read(), now);
            }
        }
        self.printer.take()
    }
}

async fn run_internal(args: PluginArgs) -> Result<()> {
    // 1. Load configuration
    let netdata_env = NetdataEnv::from_environment();
    let config = ModuleConfig::load(&args, &netdata_env).context("failed to load plugin configuration")?;
    tracing::info!(
        "collecting {} servers every {}s",
        config.servers.len(),
        config.update_every
    );

    // 2. Connect and create the charts; the HTTP client blocks
    let update_every = Duration::from_secs(config.update_every);
    let mut plugin = tokio::task::spawn_blocking(move || Plugin::from_config(&config))
        .await
        .context("plugin initialization panicked")?;

    let mut stdout = tokio::io::stdout();
    if plugin.is_empty() {
        stdout
            .write_all(b"DISABLE\n")
            .await
            .context("failed to write DISABLE")?;
        stdout.flush().await.context("failed to flush stdout")?;
        anyhow::bail!("no server can be collected");
    }

    // 3. Collection loop
    let mut interval = tokio::time::interval(update_every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let result: Result<()> = loop {
        interval.tick().await;

        let (next, output) = tokio::task::spawn_blocking(move || {
            let output = plugin.cycle(SystemTime::now());
            (plugin, output)
        })
        .await
        .context("collection cycle panicked")?;
        plugin = next;

        if output.is_empty() {
            continue;
        }
        if let Err(e) = stdout.write_all(&output).await {
            break Err(e).context("failed to write chart data");
        }
        if let Err(e) = stdout.flush().await {
            break Err(e).context("failed to flush stdout");
        }
    };

    // the HTTP clients must be dropped outside of the runtime
    tokio::task::spawn_blocking(move || drop(plugin))
        .await
        .context("plugin shutdown panicked")?;
    result
}
