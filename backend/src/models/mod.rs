// Core models
pub mod abuse;
pub mod challenge;
pub mod club;
pub mod match_model;
pub mod player;

// Re-export commonly used types
pub use abuse::*;
pub use challenge::*;
pub use club::*;
pub use match_model::*;
pub use player::*;
