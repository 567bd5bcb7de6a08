pub mod cache;
pub mod depot;
