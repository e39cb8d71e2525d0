//! REST client for the hosted backend.
//!
//! `HttpBackend` talks to the auth server (`/auth/v1`) and the record
//! server (`/rest/v1`) and implements both `AuthBackend` and
//! `ProfileStore`. Every request carries the public API key; requests made
//! on behalf of a signed-in user also carry its bearer token.

pub mod client;
pub mod error;

pub use client::HttpBackend;
pub use error::BackendError;
