//! Local mirror of the remote auth session.
//!
//! `SessionSync` subscribes to the auth backend's change notifications,
//! keeps `SyncState` up to date, and loads the signed-in user's profile in
//! the background. UI code observes the state through a `watch` channel and
//! requests auth changes through the action methods; only notifications
//! ever write the session.

pub mod session_sync;
pub mod state;

pub use session_sync::SessionSync;
pub use state::SyncState;
