//! Command-line host for the mbmd meter adapter.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use meterproxy_devices::{MappingTable, MbmdAdapter, MbmdConfig, RuntimeHandle};
use serde::Serialize;
use tracing::info;

/// meterproxy - Bridge mbmd energy meter topics into canonical meter values.
#[derive(Parser, Debug)]
#[command(name = "meterproxy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the broker and print the meter values periodically.
    Run {
        #[command(flatten)]
        config: ConfigOpts,
        /// Seconds between snapshot prints.
        #[arg(short, long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,
    },
    /// Print the topic mapping table without connecting.
    ShowMap {
        #[command(flatten)]
        config: ConfigOpts,
    },
}

/// Adapter configuration: a TOML file, then flag overrides.
#[derive(clap::Args, Debug)]
struct ConfigOpts {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// MQTT broker host.
    #[arg(long)]
    host: Option<String>,
    /// MQTT broker port.
    #[arg(long)]
    port: Option<u16>,
    /// Keepalive interval in seconds.
    #[arg(long)]
    keepalive: Option<u64>,
    /// Base topic of mbmd.
    #[arg(long)]
    topic: Option<String>,
    /// Sensor name within mbmd.
    #[arg(long)]
    sensorname: Option<String>,
    /// Offset in kWh added to the energy counters.
    #[arg(long, allow_hyphen_values = true)]
    energy_offset: Option<f64>,
}

impl ConfigOpts {
    fn load(self) -> Result<MbmdConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                toml::from_str::<MbmdConfig>(&text)
                    .with_context(|| format!("Invalid config file {}", path.display()))?
            }
            None => MbmdConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(keepalive) = self.keepalive {
            config.keepalive = keepalive;
        }
        if let Some(topic) = self.topic {
            config.base_topic = topic;
        }
        if let Some(sensorname) = self.sensorname {
            config.sensor_name = sensorname;
        }
        if let Some(energy_offset) = self.energy_offset {
            config.energy_offset = energy_offset;
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Serialize)]
struct MappingRow<'a> {
    topic: &'a str,
    attribute: &'a str,
    scale: f64,
    energy_offset: bool,
}

#[derive(Serialize)]
struct MappingDump<'a> {
    status_topic: &'a str,
    subscriptions: [String; 2],
    mappings: Vec<MappingRow<'a>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Run { config, interval } => run(config.load()?, interval).await,
        Command::ShowMap { config } => show_map(&config.load()?),
    }
}

fn init_logging(verbose: bool) {
    // JSON format for container deployments
    let json_logging = std::env::var("METERPROXY_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("meterproxy={}", default_level))
            .add_directive(tracing::Level::WARN.into())
    });

    // stdout carries the snapshots
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run(config: MbmdConfig, interval: u64) -> Result<()> {
    info!(
        "Starting mbmd adapter for {}/{}/{}",
        config.broker_addr(),
        config.base_topic,
        config.sensor_name
    );

    let adapter = MbmdAdapter::new(config);
    let handle = tokio::select! {
        handle = adapter.start() => handle,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted before the broker was reached");
            return Ok(());
        }
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(interval));
    loop {
        tokio::select! {
            _ = ticker.tick() => print_snapshot(&handle)?,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Shutting down");
    handle.shutdown().await?;
    Ok(())
}

fn print_snapshot(handle: &RuntimeHandle) -> Result<()> {
    let values: BTreeMap<String, f64> = handle.snapshot().into_iter().collect();
    println!("{}", serde_json::to_string(&values)?);
    Ok(())
}

fn show_map(config: &MbmdConfig) -> Result<()> {
    let table = MappingTable::build(&config.base_topic, &config.sensor_name);
    let topics = table.topics();

    let mut mappings = Vec::new();
    for topic in &topics {
        for entry in table.entries(topic).unwrap_or_default() {
            mappings.push(MappingRow {
                topic,
                attribute: entry.attribute,
                scale: entry.scale,
                energy_offset: entry.applies_energy_offset,
            });
        }
    }

    let dump = MappingDump {
        status_topic: table.status_topic(),
        subscriptions: table.subscriptions(),
        mappings,
    };
    println!("{}", serde_json::to_string_pretty(&dump)?);
    Ok(())
}
