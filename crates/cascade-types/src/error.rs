// Configuration errors. Always raised before any transport activity.

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("world size must be at least 1")]
    WorldSizeZero,

    #[error("rank {rank} out of range for world size {world_size}")]
    RankOutOfRange { rank: u32, world_size: u32 },

    #[error(
        "cannot split {total_layers} layers across {world_size} ranks: \
         every rank needs at least one layer"
    )]
    NotEnoughLayers { total_layers: u32, world_size: u32 },

    #[error("rank 0 requires an input prompt")]
    MissingPrompt,

    #[error("unknown model shard '{name}' (known: {known})")]
    UnknownModel { name: String, known: String },
}
