//! Shared data models.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{
    BackendKind, ConnectStatus, ConnectionConfig, ConnectionItem, ConnectionRequest,
    ConnectionTestResult, SshConfig,
};
pub use query::{
    BrowsePage, Classification, ClassifyRequest, ColumnDescriptor, ConfirmationRequest,
    DocumentMethod, ExecuteOutcome, ExecuteRequest, PageRequest, ResultEnvelope, Row,
    SearchMethod, TableSchema,
};
