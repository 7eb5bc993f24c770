//! Utility functions and helpers.

pub mod id_generator;
pub mod query_safety;

// Re-export commonly used types
pub use id_generator::IdGenerator;
pub use query_safety::QuerySafety;
