//! Data models shared between the backend client and the session sync.
//!
//! - `Session`, `User`: the auth server's session payload
//! - `Profile`: the per-user record from the `profiles` table

pub mod profile;
pub mod session;

pub use profile::Profile;
pub use session::{Session, User};
