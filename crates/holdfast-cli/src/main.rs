//! Holdfast CLI: run ownership sessions in-process and inspect settings.

mod cli;
mod simulate;
mod table;
mod ui;

use crate::cli::{Cli, Commands};
use crate::simulate::{Simulation, SimulationOptions};
use crate::table::{Align, Table};
use clap::Parser;
use holdfast_ownership::config::{default_config_path, load_config};
use holdfast_types::config::ProtocolConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn init_tracing_stderr(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr(cli.log_json);

    match cli.command {
        Commands::Simulate {
            peers,
            ticks,
            lossy,
        } => cmd_simulate(cli.config, SimulationOptions { peers, ticks, lossy }),
        Commands::Config => cmd_config(cli.config),
    }
}

fn cmd_simulate(config_path: Option<PathBuf>, options: SimulationOptions) {
    let config = load_config(config_path.as_deref());
    let mut sim = match Simulation::new(&config, options) {
        Ok(sim) => sim,
        Err(e) => {
            ui::error(&e.to_string());
            std::process::exit(1);
        }
    };
    sim.run();
    let stats = sim.stats().clone();

    for participant in sim.participants() {
        let session = &participant.session;
        ui::blank();
        ui::section(&format!(
            "{} (tick {})",
            session.peers().name_of(session.local()),
            session.current_tick()
        ));
        let mut table = Table::new(&["Resource", "Owner", "State", "Subscribers", "Pending"]);
        for row in simulate::resource_rows(session) {
            table.add_row(row);
        }
        if table.is_empty() {
            ui::hint("no resources known yet");
        } else {
            table.print();
        }
    }

    ui::blank();
    ui::section("Summary");
    let mut counters = Table::new(&["Counter", "Value"]).align(1, Align::Right);
    counters.add_row(["ticks".to_string(), stats.ticks.to_string()]);
    counters.add_row(["packets in".to_string(), stats.packets_in.to_string()]);
    counters.add_row(["packets out".to_string(), stats.packets_out.to_string()]);
    counters.add_row(["packets dropped".to_string(), stats.packets_dropped.to_string()]);
    counters.add_row(["events".to_string(), stats.events_processed.to_string()]);
    counters.add_row(["retries".to_string(), stats.retries.to_string()]);
    counters.print();

    match stats.handoff {
        Some(handoff) => {
            let to = handoff
                .to
                .map(|peer| format!("peer-{}", peer.0))
                .unwrap_or_else(|| "nobody (returned to the lobby)".to_string());
            ui::kv_ok("Hand-off", &format!("peer-{} -> {to}", handoff.from.0));
        }
        None => ui::kv_warn("Hand-off", "did not complete"),
    }
    if stats.defects > 0 {
        ui::kv_warn("Defects", &stats.defects.to_string());
        ui::hint("rerun with RUST_LOG=debug to trace the failing handlers");
        std::process::exit(1);
    }
    if !sim.is_done() {
        ui::hint("raise --ticks if the links are lossy");
        std::process::exit(1);
    }
    ui::success("Session converged");
}

fn cmd_config(config_path: Option<PathBuf>) {
    let path = config_path.clone().unwrap_or_else(default_config_path);
    let config: ProtocolConfig = load_config(config_path.as_deref());

    ui::section("Protocol configuration");
    ui::kv("File", &path.display().to_string());
    ui::kv("Local name", &config.local_name);
    ui::kv("Recent acks", &config.recent_ack_capacity.to_string());
    match config.request_timeout_ticks {
        Some(ticks) => ui::kv("Timeout", &format!("{ticks} ticks")),
        None => ui::kv_warn("Timeout", "never"),
    }
    ui::kv("Delivery", &format!("{:?}", config.event_delivery));
    ui::kv("Transfer", &format!("{:?}", config.transfer_policy));
    ui::kv("Loopback max", &config.max_loopback_rounds.to_string());
}
