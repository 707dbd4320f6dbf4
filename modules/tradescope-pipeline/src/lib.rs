pub mod acquire;
pub mod analyzer;
pub mod attributes;
pub mod cache;
pub mod collaborators;
pub mod consolidate;
pub mod enrich;
pub mod extract;
pub mod heuristics;
pub mod pool;
pub mod retry;
pub mod validate;
