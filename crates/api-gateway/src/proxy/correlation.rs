//! Request ID generation for error correlation.

use uuid::Uuid;

/// Response header carrying the gateway-generated request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generate a new request ID (UUID v4).
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}
