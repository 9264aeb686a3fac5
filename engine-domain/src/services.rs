// Domain services

pub mod calendar;
pub mod classifier;
pub mod feature_builder;
pub mod isolation;
pub mod scorer;
pub mod welford;

pub use calendar::*;
pub use classifier::*;
pub use feature_builder::*;
pub use isolation::IsolationForest;
pub use scorer::*;
pub use welford::*;
