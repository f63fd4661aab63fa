//! Contiguous layer assignment across pipeline ranks.
//!
//! `layers_per_node = total_layers / world_size` (floor division); every
//! rank owns `layers_per_node` layers starting at `rank * layers_per_node`,
//! except the last rank, whose range extends to `total_layers` and so
//! absorbs the remainder.

use cascade_types::error::ConfigError;
use cascade_types::model::LayerRange;

/// Compute the exclusive layer range owned by `rank`.
///
/// Fails when `world_size == 0`, `rank` is out of range, or some rank would
/// own zero layers (`total_layers < world_size`). Callers validate before
/// any transport activity starts.
pub fn partition(total_layers: u32, world_size: u32, rank: u32) -> Result<LayerRange, ConfigError> {
    if world_size == 0 {
        return Err(ConfigError::WorldSizeZero);
    }
    if rank >= world_size {
        return Err(ConfigError::RankOutOfRange { rank, world_size });
    }
    if total_layers < world_size {
        return Err(ConfigError::NotEnoughLayers {
            total_layers,
            world_size,
        });
    }

    let layers_per_node = total_layers / world_size;
    let start = rank * layers_per_node;
    let end = if rank == world_size - 1 {
        total_layers
    } else {
        start + layers_per_node
    };

    Ok(LayerRange { start, end })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_split() {
        // 12 layers over 3 ranks → [0,4) [4,8) [8,12)
        assert_eq!(partition(12, 3, 0).unwrap(), LayerRange { start: 0, end: 4 });
        assert_eq!(partition(12, 3, 1).unwrap(), LayerRange { start: 4, end: 8 });
        assert_eq!(partition(12, 3, 2).unwrap(), LayerRange { start: 8, end: 12 });
    }

    #[test]
    fn last_rank_absorbs_remainder() {
        // 10 layers over 3 ranks → [0,3) [3,6) [6,10)
        assert_eq!(partition(10, 3, 0).unwrap(), LayerRange { start: 0, end: 3 });
        assert_eq!(partition(10, 3, 1).unwrap(), LayerRange { start: 3, end: 6 });
        assert_eq!(partition(10, 3, 2).unwrap(), LayerRange { start: 6, end: 10 });
    }

    #[test]
    fn single_rank_owns_everything() {
        assert_eq!(partition(7, 1, 0).unwrap(), LayerRange { start: 0, end: 7 });
    }

    #[test]
    fn ranges_tile_the_model_exactly() {
        // Contiguous, non-overlapping, covering [0, total) with no empty range.
        for total_layers in 1..=40u32 {
            for world_size in 1..=total_layers {
                let mut cursor = 0;
                for rank in 0..world_size {
                    let range = partition(total_layers, world_size, rank).unwrap();
                    assert_eq!(range.start, cursor, "gap or overlap at rank {rank}");
                    assert!(!range.is_empty(), "empty range at rank {rank}");
                    cursor = range.end;
                }
                assert_eq!(cursor, total_layers);
            }
        }
    }

    #[test]
    fn zero_world_size_rejected() {
        assert!(matches!(
            partition(12, 0, 0),
            Err(ConfigError::WorldSizeZero)
        ));
    }

    #[test]
    fn rank_out_of_range_rejected() {
        assert!(matches!(
            partition(12, 3, 3),
            Err(ConfigError::RankOutOfRange { rank: 3, world_size: 3 })
        ));
    }

    #[test]
    fn more_ranks_than_layers_rejected() {
        assert!(matches!(
            partition(2, 3, 0),
            Err(ConfigError::NotEnoughLayers { total_layers: 2, world_size: 3 })
        ));
    }
}
