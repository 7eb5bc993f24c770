//! Shared building blocks for the database workbench services.
//!
//! - `models`: connection configs, query payloads and result envelopes
//! - `errors`: the `AppError` taxonomy and its HTTP rendering
//! - `config`: environment driven service configuration
//! - `response`: the uniform API response wrapper
//! - `utils`: id generation and query safety classification
//! - `middleware`: request id propagation
//! - `telemetry`: tracing subscriber setup

pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod response;
pub mod telemetry;
pub mod utils;
