// Engine Bootstrap Layer

pub mod context;

pub use context::AppContext;
