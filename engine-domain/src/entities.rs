// Domain entities

pub mod alert;
pub mod bucket;
pub mod checkpoint;
pub mod config;
pub mod feature_row;
pub mod model;
pub mod score;
pub mod terminal;

pub use alert::*;
pub use bucket::*;
pub use checkpoint::*;
pub use config::*;
pub use feature_row::*;
pub use model::*;
pub use score::*;
pub use terminal::*;
