pub mod artifact_files;
pub mod clickhouse_repo;

pub use artifact_files::*;
pub use clickhouse_repo::*;
