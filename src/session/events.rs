use taskdeck_common::User;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    /// The refresh credential was rejected or the refresh call failed.
    RefreshFailed,
    /// The user logged out.
    Logout,
}

/// Broadcast on every session transition. `SignedOut` is the signal for the UI
/// to navigate to the login view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { user: User },
    Refreshed { user: User },
    SignedOut { reason: SignOutReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No refresh in flight. The access token may or may not be set.
    Idle,
    /// Exactly one refresh call is in flight; failed requests queue behind it.
    Refreshing,
    /// The session ended. Requests that hit an auth failure fail immediately
    /// until the next login.
    SignedOut,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "idle"),
            SessionPhase::Refreshing => write!(f, "refreshing"),
            SessionPhase::SignedOut => write!(f, "signed_out"),
        }
    }
}
