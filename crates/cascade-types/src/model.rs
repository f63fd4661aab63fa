// Layer ownership for pipeline stages.
//
// Consumed by `cascade-pipeline` (partitioner, stage) and the model-shard
// collaborator behind it.

use serde::{Deserialize, Serialize};

// ── Layer Range ───────────────────────────────────────────────────────────────

/// Exclusive range of transformer layer indices owned by one rank.
///
/// `LayerRange { start: 0, end: 4 }` covers layers 0, 1, 2, 3. A rank holds
/// exactly one range for the duration of a run; layers outside it are the
/// model shard's concern (parked on a default device, never executed here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerRange {
    pub start: u32,
    pub end: u32,
}

impl LayerRange {
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// True if `layer` falls inside this range.
    pub fn contains(&self, layer: u32) -> bool {
        layer >= self.start && layer < self.end
    }
}

impl std::fmt::Display for LayerRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
