//! Access-token lifecycle.
//!
//! [`SessionManager`] owns the access token and sends every API request. When a
//! response is classified as an authentication failure it coordinates a single
//! token refresh: the first failing request becomes the refresher, every other
//! request that fails meanwhile queues behind it, and all of them replay with the
//! new token once it arrives. A replay that fails authentication again is final.
//!
//! The state lives behind a `std::sync::Mutex` that is never held across an
//! `.await`, so the `Idle -> Refreshing` check-and-set is atomic with respect to
//! every other task.

mod events;

pub use events::{SessionEvent, SessionPhase, SignOutReason};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use taskdeck_common::{AuthPayload, LoginInput, RegisterInput, User};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::errors::{ApiError, ErrorClass};
use crate::storage::{TOKEN_KEY, TokenStore, USERNAME_KEY};
use crate::transport::{ApiRequest, ApiResponse, RequestDispatcher, TokenTransport};

const EVENT_CAPACITY: usize = 16;

/// Who is signed in. The coordinator uses it to author optimistic entities.
pub trait IdentitySource: Send + Sync {
    fn current_user(&self) -> Option<User>;
}

/// Outcome handed to each queued request when the refresh settles.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RefreshFailure(String);

type Waiter = oneshot::Sender<Result<String, RefreshFailure>>;

struct SessionState {
    access_token: Option<String>,
    identity: Option<User>,
    phase: SessionPhase,
    /// Bumped whenever the token changes, so a request that failed with a token
    /// that has since been replaced replays instead of refreshing again.
    generation: u64,
    waiters: VecDeque<Waiter>,
}

/// What a request that just failed authentication should do next.
enum Recovery {
    Replay(String),
    Lead,
    Wait(oneshot::Receiver<Result<String, RefreshFailure>>),
    SignedOut,
}

pub struct SessionManager {
    dispatcher: Arc<dyn RequestDispatcher>,
    transport: Arc<dyn TokenTransport>,
    store: Arc<dyn TokenStore>,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    /// Create the manager, picking up a previously persisted access token.
    pub fn new(
        dispatcher: Arc<dyn RequestDispatcher>,
        transport: Arc<dyn TokenTransport>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        let access_token = match store.get(TOKEN_KEY) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted access token; starting signed out");
                None
            }
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            dispatcher,
            transport,
            store,
            state: Mutex::new(SessionState {
                access_token,
                identity: None,
                phase: SessionPhase::Idle,
                generation: 0,
                waiters: VecDeque::new(),
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock().access_token.clone()
    }

    pub fn identity(&self) -> Option<User> {
        self.lock().identity.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    pub fn is_authenticated(&self) -> bool {
        let state = self.lock();
        state.access_token.is_some() && state.phase != SessionPhase::SignedOut
    }

    /// Send `request` with the current token, recovering once from an expired token.
    ///
    /// Non-authentication failures are returned as classified errors without any
    /// retry. An authentication failure triggers (or joins) the single refresh and
    /// the request is replayed exactly once with the new token.
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let (token, generation) = {
            let state = self.lock();
            (state.access_token.clone(), state.generation)
        };

        let response = self.dispatcher.send(request, token.as_deref()).await?;
        match self.dispatcher.classify(&response) {
            None => return Ok(response),
            Some(ErrorClass::Unauthenticated) => {}
            Some(class) => return Err(ApiError::from_class(class, response.status)),
        }
        debug!(label = %request.label, "Request rejected as unauthenticated");

        let token = match self.begin_recovery(generation) {
            Recovery::Replay(token) => token,
            Recovery::Lead => self.run_refresh().await?,
            Recovery::Wait(rx) => Self::await_refresh(rx).await?,
            Recovery::SignedOut => {
                return Err(ApiError::SessionExpired("Not signed in".to_string()));
            }
        };
        self.replay(request, &token).await
    }

    /// Refresh the access token without a failed request, e.g. at app start.
    ///
    /// Joins a refresh already in flight instead of starting a second one. Allowed
    /// from `SignedOut`, since the refresh credential may still be valid.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        let recovery = {
            let mut state = self.lock();
            if state.phase == SessionPhase::Refreshing {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Recovery::Wait(rx)
            } else {
                state.phase = SessionPhase::Refreshing;
                Recovery::Lead
            }
        };
        match recovery {
            Recovery::Wait(rx) => Self::await_refresh(rx).await.map(drop),
            _ => self.run_refresh().await.map(drop),
        }
    }

    pub async fn login(&self, credentials: &LoginInput) -> Result<User, ApiError> {
        let payload = self.transport.login(credentials).await?;
        Ok(self.sign_in(payload))
    }

    pub async fn register(&self, details: &RegisterInput) -> Result<User, ApiError> {
        let payload = self.transport.register(details).await?;
        Ok(self.sign_in(payload))
    }

    /// Revoke the session server-side when possible, then always forget it locally.
    pub async fn logout(&self) {
        if let Some(token) = self.access_token() {
            if let Err(e) = self.transport.logout(&token).await {
                warn!(error = %e, "Server logout failed; clearing local session anyway");
            }
        }
        self.end_session(SignOutReason::Logout, "Signed out");
        info!("Signed out");
    }

    fn begin_recovery(&self, sent_generation: u64) -> Recovery {
        let mut state = self.lock();
        if state.phase == SessionPhase::Refreshing {
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            return Recovery::Wait(rx);
        }
        if state.generation != sent_generation {
            if let Some(token) = &state.access_token {
                return Recovery::Replay(token.clone());
            }
        }
        match state.phase {
            SessionPhase::SignedOut => Recovery::SignedOut,
            _ => {
                state.phase = SessionPhase::Refreshing;
                Recovery::Lead
            }
        }
    }

    async fn await_refresh(
        rx: oneshot::Receiver<Result<String, RefreshFailure>>,
    ) -> Result<String, ApiError> {
        match rx.await {
            Ok(Ok(token)) => Ok(token),
            Ok(Err(RefreshFailure(reason))) => Err(ApiError::SessionExpired(reason)),
            Err(_) => Err(ApiError::SessionExpired("Token refresh was abandoned".to_string())),
        }
    }

    /// Run the refresh as the single leader. The phase is already `Refreshing`.
    async fn run_refresh(&self) -> Result<String, ApiError> {
        let mut guard = RefreshGuard {
            session: self,
            armed: true,
        };
        info!("Refreshing access token");
        let outcome = self.transport.refresh().await;
        guard.armed = false;

        match outcome {
            Ok(payload) => self.complete_refresh(payload),
            Err(err) => Err(self.fail_refresh(err)),
        }
    }

    fn complete_refresh(&self, payload: AuthPayload) -> Result<String, ApiError> {
        let waiters = {
            let mut state = self.lock();
            if state.phase != SessionPhase::Refreshing {
                // Logged out while the refresh was in flight; the waiters were
                // already failed by `end_session`.
                return Err(ApiError::SessionExpired("Signed out during refresh".to_string()));
            }
            state.access_token = Some(payload.token.clone());
            state.identity = Some(payload.user.clone());
            state.generation += 1;
            state.phase = SessionPhase::Idle;
            std::mem::take(&mut state.waiters)
        };

        self.persist(&payload);
        info!(user = %payload.user.username, waiters = waiters.len(), "Access token refreshed");
        for waiter in waiters {
            let _ = waiter.send(Ok(payload.token.clone()));
        }
        let _ = self.events.send(SessionEvent::Refreshed { user: payload.user });
        Ok(payload.token)
    }

    fn fail_refresh(&self, err: ApiError) -> ApiError {
        let reason = match &err {
            ApiError::SessionExpired(reason) => reason.clone(),
            other => other.to_string(),
        };
        warn!(error = %err, "Token refresh failed; ending session");
        self.end_session(SignOutReason::RefreshFailed, &reason);
        ApiError::SessionExpired(reason)
    }

    /// Clear the token everywhere, fail every queued request and broadcast `SignedOut`.
    fn end_session(&self, reason: SignOutReason, message: &str) {
        let waiters = {
            let mut state = self.lock();
            state.access_token = None;
            state.identity = None;
            state.generation += 1;
            state.phase = SessionPhase::SignedOut;
            std::mem::take(&mut state.waiters)
        };
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear persisted session");
        }
        for waiter in waiters {
            let _ = waiter.send(Err(RefreshFailure(message.to_string())));
        }
        let _ = self.events.send(SessionEvent::SignedOut { reason });
    }

    fn sign_in(&self, payload: AuthPayload) -> User {
        {
            let mut state = self.lock();
            state.access_token = Some(payload.token.clone());
            state.identity = Some(payload.user.clone());
            state.generation += 1;
            // A refresh already in flight keeps its leader; it will settle the phase.
            if state.phase != SessionPhase::Refreshing {
                state.phase = SessionPhase::Idle;
            }
        }
        self.persist(&payload);
        info!(user = %payload.user.username, "Signed in");
        let _ = self.events.send(SessionEvent::SignedIn {
            user: payload.user.clone(),
        });
        payload.user
    }

    fn persist(&self, payload: &AuthPayload) {
        let result = self
            .store
            .set(TOKEN_KEY, &payload.token)
            .and_then(|_| self.store.set(USERNAME_KEY, &payload.user.username));
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist session");
        }
    }

    async fn replay(&self, request: &ApiRequest, token: &str) -> Result<ApiResponse, ApiError> {
        debug!(label = %request.label, "Replaying request with refreshed token");
        let response = self.dispatcher.send(request, Some(token)).await?;
        match self.dispatcher.classify(&response) {
            None => Ok(response),
            Some(ErrorClass::Unauthenticated) => {
                warn!(label = %request.label, "Replayed request rejected again; giving up");
                Err(ApiError::Unauthenticated)
            }
            Some(class) => Err(ApiError::from_class(class, response.status)),
        }
    }
}

impl IdentitySource for SessionManager {
    fn current_user(&self) -> Option<User> {
        self.identity()
    }
}

/// Puts the phase back to `Idle` if the leader's future is dropped mid-refresh,
/// so the next failing request can lead a new one.
struct RefreshGuard<'a> {
    session: &'a SessionManager,
    armed: bool,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let waiters = {
            let mut state = self.session.lock();
            if state.phase == SessionPhase::Refreshing {
                state.phase = SessionPhase::Idle;
            }
            std::mem::take(&mut state.waiters)
        };
        warn!(waiters = waiters.len(), "Token refresh cancelled");
        for waiter in waiters {
            let _ = waiter.send(Err(RefreshFailure("Token refresh was cancelled".to_string())));
        }
    }
}
