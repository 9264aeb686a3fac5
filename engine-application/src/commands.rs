// Batch job commands

pub mod build_features;
pub mod score;
pub mod train_model;

pub use build_features::*;
pub use score::*;
pub use train_model::*;
