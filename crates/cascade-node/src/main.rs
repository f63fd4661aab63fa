//! Cascade node binary — drives one pipeline rank.
//!
//! Rank assignment comes from the external registry collaborator; this
//! binary receives it pre-resolved as flags. The master address is fixed,
//! pre-agreed configuration shared by every rank.
//!
//! ```bash
//! # Terminal 1 — entry rank, returns the generated text
//! RUST_LOG=info cargo run --bin cascade-node -- run \
//!     --rank 0 --world-size 2 --prompt "hello"
//!
//! # Terminal 2 — final rank, generates and ships the text back
//! RUST_LOG=info cargo run --bin cascade-node -- run \
//!     --rank 1 --world-size 2
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cascade_pipeline::{EchoShard, PipelineCoordinator, PipelineError};
use cascade_types::config::{GenerationConfig, NetConfig, PipelineConfig};
use cascade_types::error::ConfigError;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "cascade-node",
    version = env!("CARGO_PKG_VERSION"),
    about   = "Cascade — pipeline-parallel inference over a chain of ranks"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one rank of a pipeline request.
    Run {
        /// This node's position in the chain (from the registry).
        #[arg(long)]
        rank: u32,

        /// Total number of participating ranks.
        #[arg(long)]
        world_size: u32,

        /// Fixed rendezvous address where rank 0 listens.
        #[arg(long, default_value = "127.0.0.1:29500")]
        master: SocketAddr,

        /// Bind address for this rank's data listener (port 0 = OS-assigned).
        #[arg(long, default_value = "127.0.0.1:0")]
        listen: SocketAddr,

        /// Input prompt. Required at rank 0, ignored elsewhere.
        #[arg(long)]
        prompt: Option<String>,

        /// Which model shard to load.
        #[arg(long, default_value = "echo")]
        model: String,

        /// Transformer layer count of the selected model.
        #[arg(long, default_value_t = 12)]
        total_layers: u32,

        /// Generation budget at the final rank.
        #[arg(long, default_value_t = 300)]
        max_new_tokens: u32,

        /// Disable sampling (greedy decode).
        #[arg(long)]
        greedy: bool,

        /// Top-k sampling cutoff.
        #[arg(long, default_value_t = 50)]
        top_k: u32,

        /// Sampling temperature.
        #[arg(long, default_value_t = 1.0)]
        temperature: f32,

        /// Abort a blocked receive after this many seconds. Off by default:
        /// the base protocol blocks until the peer sends.
        #[arg(long)]
        recv_timeout_secs: Option<u64>,
    },
}

// ── Shard factory ─────────────────────────────────────────────────────────────

const KNOWN_MODELS: &str = "echo";

fn create_shard(name: &str, total_layers: u32) -> Result<EchoShard, ConfigError> {
    match name {
        "echo" => Ok(EchoShard::new(total_layers)),
        other => Err(ConfigError::UnknownModel {
            name: other.to_string(),
            known: KNOWN_MODELS.to_string(),
        }),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // Default log level: INFO. Override with RUST_LOG=cascade_net=debug etc.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            rank,
            world_size,
            master,
            listen,
            prompt,
            model,
            total_layers,
            max_new_tokens,
            greedy,
            top_k,
            temperature,
            recv_timeout_secs,
        } => {
            let config = PipelineConfig::new(rank, world_size)?;
            let shard = create_shard(&model, total_layers)?;
            let gen = GenerationConfig {
                max_new_tokens,
                do_sample: !greedy,
                top_k,
                temperature,
            };
            let net = NetConfig {
                master_addr: master,
                listen_addr: listen,
                recv_timeout: recv_timeout_secs.map(Duration::from_secs),
                ..NetConfig::default()
            };

            run_rank(config, net, gen, shard, prompt).await
        }
    }
}

async fn run_rank(
    config: PipelineConfig,
    net: NetConfig,
    gen: GenerationConfig,
    shard: EchoShard,
    prompt: Option<String>,
) -> Result<()> {
    let rank = config.rank;
    let coordinator = PipelineCoordinator::new(config, gen, shard)?;

    // On interrupt the run future drops mid-await; the process group's Drop
    // backstop closes the links before exit.
    let result = tokio::select! {
        result = coordinator.run(&net, prompt.as_deref()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!(rank, "interrupt received — tearing down");
            Err(PipelineError::Interrupted)
        }
    };

    match result? {
        Some(text) => {
            info!(rank, "pipeline result ready");
            println!("{text}");
        }
        None => info!(rank, "rank completed (result returned at rank 0)"),
    }
    Ok(())
}
