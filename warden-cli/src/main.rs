//! Warden CLI - Command-line tools for instance configurations

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use warden_core::prelude::*;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Instanced area admission control CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration and summarise it
    Check {
        /// Configuration file (defaults to warden.toml / WARDEN_* layering)
        config: Option<PathBuf>,
    },
    /// List configured templates
    Templates {
        /// Configuration file
        config: Option<PathBuf>,
    },
    /// Run admissions against an in-memory warden
    Simulate {
        /// Configuration file
        config: Option<PathBuf>,
        /// Template to admit into
        #[arg(short, long)]
        template: String,
        /// Number of requests
        #[arg(short = 'n', long, default_value_t = 1)]
        requests: u32,
        /// Send every request from this party; the first requester leads it
        #[arg(long)]
        party: Option<PartyId>,
        /// Advance past the template lifetime and sweep afterwards
        #[arg(long)]
        expire: bool,
        /// Print lifecycle events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Show what a gate decides for a state
    Gate {
        /// Configuration file
        config: Option<PathBuf>,
        /// Gate name
        #[arg(short, long)]
        gate: String,
        /// State label (defaults to the gate's current scheduled state)
        #[arg(short, long)]
        state: Option<String>,
    },
    /// Version information
    Version,
}

fn load_config(path: Option<PathBuf>) -> Result<WardenConfig> {
    let config = match path {
        Some(path) => WardenConfig::from_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => WardenConfig::load().context("loading configuration")?,
    };
    tracing::debug!(
        templates = config.templates.len(),
        gates = config.gates.len(),
        "Loaded configuration"
    );
    Ok(config)
}

fn describe_kind(kind: &TemplateKind) -> String {
    match kind {
        TemplateKind::PartyExclusive {
            max_occupants: Some(max),
        } => format!("party-exclusive, up to {} occupants", max),
        TemplateKind::PartyExclusive { max_occupants: None } => "party-exclusive".to_string(),
        TemplateKind::Pooled {
            capacity: 0,
            occupants_per_slot,
        } => format!("pooled, unbounded slots x {}", occupants_per_slot),
        TemplateKind::Pooled {
            capacity,
            occupants_per_slot,
        } => format!("pooled, {} slots x {}", capacity, occupants_per_slot),
    }
}

fn print_templates(config: &WardenConfig) {
    for template in &config.templates {
        println!(
            "{:<24} -> {} ({})  lifetime {:?}  release {:?}{}",
            template.id,
            template.destination,
            describe_kind(&template.kind),
            template.lifetime,
            template.release,
            template
                .return_area
                .map(|a| format!("  return {}", a))
                .unwrap_or_default(),
        );
    }
}

async fn simulate(
    config: WardenConfig,
    template: String,
    requests: u32,
    party: Option<PartyId>,
    expire: bool,
    json: bool,
) -> Result<()> {
    let lifetime = config
        .template(&template)
        .map(|t| t.lifetime)
        .with_context(|| format!("unknown template {}", template))?;

    let clock = ManualClock::default();
    let warden = InstanceWarden::builder()
        .config(config)
        .clock(Arc::new(clock.clone()))
        .log_events(true)
        .build()?;
    let mut events = warden.subscribe();

    for i in 0..requests {
        let player = PlayerId::from(i) + 1;
        let mut request = AdmissionRequest::new(player, 0, template.as_str());
        if let Some(party) = party {
            request = request.with_party(party, i == 0);
        }

        match warden.admit(&request).await {
            Ok(admitted) => {
                let key = admitted
                    .handle()
                    .map(|h| h.key.to_string())
                    .unwrap_or_default();
                println!(
                    "player {:>4}: admitted to {} {} ({})",
                    player,
                    admitted.destination,
                    key,
                    if admitted.created { "new" } else { "joined" }
                );
            }
            Err(e) => println!(
                "player {:>4}: {} [{} / {:?}]",
                player,
                e,
                e.kind(),
                e.caller_outcome()
            ),
        }
    }

    if expire {
        clock.advance(lifetime);
        let report = warden.sweep().await;
        println!(
            "expired {} instances, evicted {} occupants",
            report.released.len(),
            report.evicted
        );
    }

    if json {
        while let Ok(event) = events.try_recv() {
            println!("{}", serde_json::to_string(&event)?);
        }
    }

    Ok(())
}

async fn gate(config: WardenConfig, name: String, state: Option<String>) -> Result<()> {
    let Some(gate) = config.gates.iter().find(|g| g.name == name) else {
        bail!("unknown gate {}", name);
    };
    let policy = gate.policy()?;

    let state = match state {
        Some(state) => Some(state),
        None => {
            let schedule = GateSchedule::new(Arc::new(SystemClock))
                .with_gate(gate.name.clone(), gate.cycle.clone());
            schedule.current_state(&gate.name).await
        }
    };

    let decision = policy.decide(state.as_deref());
    println!(
        "{}: state {} -> {:?}",
        name,
        state.as_deref().unwrap_or("<none>"),
        decision
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("warden {}", env!("CARGO_PKG_VERSION"));
            println!("warden-core {}", warden_core::VERSION);
        }
        Commands::Check { config } => {
            let config = load_config(config)?;
            println!(
                "ok: {} templates, {} gates, expiry tick {:?}",
                config.templates.len(),
                config.gates.len(),
                config.expiry.tick
            );
        }
        Commands::Templates { config } => {
            print_templates(&load_config(config)?);
        }
        Commands::Simulate {
            config,
            template,
            requests,
            party,
            expire,
            json,
        } => {
            simulate(load_config(config)?, template, requests, party, expire, json).await?;
        }
        Commands::Gate {
            config,
            gate: name,
            state,
        } => {
            gate(load_config(config)?, name, state).await?;
        }
    }

    Ok(())
}
