//! Connection lifecycle and query dispatch service.
//!
//! Keeps a persisted set of MySQL, MongoDB and Elasticsearch connection
//! configs, opens live sessions on demand (optionally through an SSH tunnel)
//! and routes introspection and query calls to the right backend adapter.

pub mod adapters;
pub mod dispatcher;
pub mod handlers;
pub mod registry;
pub mod routes;
pub mod service;
pub mod state;
pub mod store;
pub mod tunnel;

pub const SERVICE_NAME: &str = "connection-service";
