// Domain value objects
pub mod day_of_week;
pub mod severity;

pub use day_of_week::*;
pub use severity::*;
