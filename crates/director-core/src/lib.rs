//! director-core — shared types, configuration, and name normalization.

pub mod config;
pub mod normalize;
pub mod types;

pub use config::DirectorConfig;
pub use normalize::Normalizer;
pub use types::*;
