//! Ambient HTTP middleware: request tracking and the token `Claims` shape
//! consumed by the audit trail's subject extraction.

pub mod request_tracking;
pub mod token;

pub use request_tracking::{
    request_id_layer, request_id_propagation_layer, sensitive_headers_layer, RequestTrackingConfig,
    PROPAGATE_HEADERS, SENSITIVE_HEADERS,
};
pub use token::{Claims, TokenValidator};
