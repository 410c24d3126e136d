//! Utility functions shared across modules.
//!
//! - **URL validation**: syntactic checks for subscriptions, plus an SSRF
//!   guard for links the server follows on its own.

mod url_validator;

pub use url_validator::{validate_feed_url, validate_public_url, UrlValidationError};
