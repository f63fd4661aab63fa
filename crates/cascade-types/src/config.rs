// Shared configuration structs.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ── Pipeline membership ───────────────────────────────────────────────────────

/// This rank's position in the pipeline. Immutable once a run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Zero-based position of this node in the chain.
    pub rank: u32,
    /// Total number of ranks participating in the run.
    pub world_size: u32,
}

impl PipelineConfig {
    pub fn new(rank: u32, world_size: u32) -> Result<Self, ConfigError> {
        let config = Self { rank, world_size };
        config.validate()?;
        Ok(config)
    }

    /// Enforce `rank < world_size` and `world_size >= 1`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.world_size == 0 {
            return Err(ConfigError::WorldSizeZero);
        }
        if self.rank >= self.world_size {
            return Err(ConfigError::RankOutOfRange {
                rank: self.rank,
                world_size: self.world_size,
            });
        }
        Ok(())
    }

    /// True for the entry rank (receives the prompt, returns the text).
    pub fn is_first(&self) -> bool {
        self.rank == 0
    }

    /// True for the generating rank.
    pub fn is_last(&self) -> bool {
        self.rank == self.world_size - 1
    }

    /// The rank that performs autoregressive generation.
    pub fn last_rank(&self) -> u32 {
        self.world_size - 1
    }

    /// Pipeline predecessor, if any.
    pub fn predecessor(&self) -> Option<u32> {
        (self.rank > 0).then(|| self.rank - 1)
    }

    /// Pipeline successor, if any.
    pub fn successor(&self) -> Option<u32> {
        (self.rank + 1 < self.world_size).then(|| self.rank + 1)
    }
}

// ── Transport rendezvous ──────────────────────────────────────────────────────

/// Process-group transport settings. The master address is fixed, pre-agreed
/// configuration, never negotiated at runtime.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Where rank 0 listens to collect the address book. All ranks must agree
    /// on this value before any rank starts.
    pub master_addr: SocketAddr,

    /// Bind address for this rank's data listener. Port 0 = OS-assigned.
    pub listen_addr: SocketAddr,

    /// How many times to retry a connection before giving up. Ranks start in
    /// arbitrary order, so early connect attempts routinely fail.
    pub connect_attempts: u32,

    /// Pause between connection attempts.
    pub retry_interval: Duration,

    /// Optional deadline for a blocked receive. `None` keeps the protocol's
    /// blocking semantics: a rank whose peer never sends waits forever.
    pub recv_timeout: Option<Duration>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            master_addr: "127.0.0.1:29500".parse().expect("static addr"),
            listen_addr: "127.0.0.1:0".parse().expect("static addr"),
            connect_attempts: 30,
            retry_interval: Duration::from_millis(500),
            recv_timeout: None,
        }
    }
}

// ── Generation ────────────────────────────────────────────────────────────────

/// Sampling parameters passed through verbatim to the model shard's
/// `generate` call at the final rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_new_tokens: u32,
    pub do_sample: bool,
    pub top_k: u32,
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 300,
            do_sample: true,
            top_k: 50,
            temperature: 1.0,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_config() {
        let c = PipelineConfig::new(1, 3).unwrap();
        assert!(!c.is_first());
        assert!(!c.is_last());
        assert_eq!(c.predecessor(), Some(0));
        assert_eq!(c.successor(), Some(2));
        assert_eq!(c.last_rank(), 2);
    }

    #[test]
    fn rank_out_of_range_rejected() {
        assert!(matches!(
            PipelineConfig::new(3, 3),
            Err(ConfigError::RankOutOfRange { rank: 3, world_size: 3 })
        ));
    }

    #[test]
    fn zero_world_size_rejected() {
        assert!(matches!(
            PipelineConfig::new(0, 0),
            Err(ConfigError::WorldSizeZero)
        ));
    }

    #[test]
    fn single_rank_topology() {
        let c = PipelineConfig::new(0, 1).unwrap();
        assert!(c.is_first());
        assert!(c.is_last());
        assert_eq!(c.predecessor(), None);
        assert_eq!(c.successor(), None);
    }

    #[test]
    fn endpoint_ranks() {
        let first = PipelineConfig::new(0, 4).unwrap();
        assert!(first.is_first());
        assert_eq!(first.predecessor(), None);

        let last = PipelineConfig::new(3, 4).unwrap();
        assert!(last.is_last());
        assert_eq!(last.successor(), None);
    }

    #[test]
    fn net_config_defaults() {
        let net = NetConfig::default();
        assert_eq!(net.master_addr.port(), 29500);
        assert_eq!(net.listen_addr.port(), 0);
        assert!(net.recv_timeout.is_none());
    }

    #[test]
    fn generation_config_serde() {
        let g = GenerationConfig::default();
        let json = serde_json::to_string(&g).unwrap();
        let round: GenerationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(round.max_new_tokens, 300);
        assert!(round.do_sample);
        assert_eq!(round.top_k, 50);
    }
}
