//! Unique ID generator.

use uuid::Uuid;

/// Length of generated connection ids.
pub const CONNECTION_ID_LEN: usize = 12;

/// Generates unique identifiers for various entities.
pub struct IdGenerator;

impl IdGenerator {
    /// Generates a connection id: 12 lowercase hex characters.
    pub fn connection_id() -> String {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(CONNECTION_ID_LEN);
        id
    }

    /// Generates a unique request ID.
    pub fn request_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// First 8 characters of a fresh UUID.
    pub fn short_id() -> String {
        Uuid::new_v4().to_string()[..8].to_string()
    }
}
