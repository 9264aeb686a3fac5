// Engine Application Layer

pub mod commands;
pub mod dtos;
pub mod error;
pub mod jobs;
pub mod state;

pub use dtos::JobSummary;
pub use error::AppError;
pub use state::AppState;
