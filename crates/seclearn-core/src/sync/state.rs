use serde::Serialize;

use crate::models::{Profile, Session};

/// Session and profile as currently known locally.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncState {
    pub session: Option<Session>,
    pub profile: Option<Profile>,
    /// True until the first notification has been processed, and while an
    /// auth action is in flight.
    pub session_loading: bool,
    /// True while a profile fetch is outstanding.
    pub profile_loading: bool,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            session: None,
            profile: None,
            session_loading: true,
            profile_loading: false,
        }
    }
}

impl SyncState {
    pub fn user_id(&self) -> Option<&str> {
        self.session.as_ref().and_then(Session::user_id)
    }

    pub fn is_signed_in(&self) -> bool {
        self.user_id().is_some()
    }

    /// Neither the session nor the profile is still loading.
    pub fn is_settled(&self) -> bool {
        !self.session_loading && !self.profile_loading
    }
}
