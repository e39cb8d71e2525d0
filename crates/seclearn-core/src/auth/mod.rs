//! Authentication plumbing shared by the backend client and the session sync.
//!
//! This module provides:
//! - `AuthEvent`, `AuthChange`: session transition notifications
//! - `AuthEvents`, `AuthSubscription`: the listener registry and the scoped
//!   handle a subscriber holds
//! - `SessionStore`: on-disk persistence of the current session
//! - `AuthError`: action failures as the UI sees them

pub mod error;
pub mod events;
pub mod store;

pub use error::AuthError;
pub use events::{AuthChange, AuthEvent, AuthEvents, AuthSubscription};
pub use store::SessionStore;
