//! Core anomaly processing modules

pub mod cache;
pub mod engine;
pub mod pipeline;
pub mod schema;
pub mod validate;

// Re-export main types
pub use cache::{CacheStats, TileResult, TileResultCache};
pub use engine::{AnomalyEngine, TileBuffer};
pub use pipeline::{tile_rectangles, AnomalyOperator};
pub use schema::build_output_schema;
pub use validate::validate_input;
