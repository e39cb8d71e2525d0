//! Core library for seclearn.
//!
//! Mirrors the hosted backend's auth session locally and keeps the signed-in
//! user's profile record loaded alongside it.
//!
//! - `sync`: `SessionSync`, the local state mirror and auth action surface
//! - `backend`: the `AuthBackend` / `ProfileStore` collaborator traits
//! - `api`: `HttpBackend`, the REST client implementing both traits
//! - `auth`: change notifications, subscriptions, and session persistence
//! - `models`: `Session`, `User`, `Profile`
//! - `config`: environment and file configuration

pub mod api;
pub mod auth;
pub mod backend;
pub mod config;
pub mod models;
pub mod sync;

pub use api::{BackendError, HttpBackend};
pub use auth::{AuthChange, AuthError, AuthEvent, AuthSubscription};
pub use backend::{AuthBackend, AuthResponse, OAuthRedirect, ProfileStore};
pub use config::Config;
pub use models::{Profile, Session, User};
pub use sync::{SessionSync, SyncState};
