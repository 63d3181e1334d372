//! Authenticated portal session: login flow executor and guarded cache.
//!
//! One [`PortalSession`] owns the cookie jar for the whole process. Callers
//! obtain a [`SessionLease`] through [`PortalSession::lease`], which runs the
//! login sequence at most once no matter how many callers find the session
//! stale at the same time. Leases are shared (read) guards, so data calls
//! proceed concurrently while a re-login waits for them to finish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::client::{redact, CookieClient, PortalResponse, RequestStep, Transport};
use crate::cookie::CookieJar;
use crate::credentials::Credentials;
use crate::error::{RelayError, RelayResult, StepRole};
use crate::portal::{check_failure_marker, PortalEndpoints};

/// Default time an authenticated session is reused before re-login (20 minutes).
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(20 * 60);

/// Lifecycle of the cached session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Expired,
}

/// Observable session status. Only written while the login slot is held
/// exclusively, but readable at any time without waiting on the slot.
#[derive(Debug, Clone, Copy)]
struct Status {
    state: SessionState,
    last_authenticated_at: Option<Instant>,
    /// Successful logins so far; identifies the cookie set a lease saw.
    generation: u64,
}

impl Status {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.state == SessionState::Authenticated
            && self
                .last_authenticated_at
                .is_some_and(|at| at.elapsed() < ttl)
    }

    fn effective_state(&self, ttl: Duration) -> SessionState {
        match self.state {
            SessionState::Authenticated if !self.is_fresh(ttl) => SessionState::Expired,
            other => other,
        }
    }

    fn expire(&mut self) {
        if self.state == SessionState::Authenticated {
            self.state = SessionState::Expired;
        }
        self.last_authenticated_at = None;
    }
}

fn lock_status(status: &Mutex<Status>) -> MutexGuard<'_, Status> {
    // Status is plain data, so a poisoned lock still holds a whole value.
    status.lock().unwrap_or_else(|e| e.into_inner())
}

/// Exclusive login slot: held for writing while a login runs.
#[derive(Debug, Default)]
struct LoginSlot {
    /// Outcome of the most recent failed attempt, tagged with its attempt number.
    last_failure: Option<(u64, RelayError)>,
}

/// Resets the status if a login attempt is abandoned midway (error or
/// cancellation), so the next attempt starts from an empty jar.
struct AttemptGuard<'a> {
    slot: &'a mut LoginSlot,
    status: &'a Mutex<Status>,
    jar: &'a CookieJar,
    settled: bool,
}

impl<'a> AttemptGuard<'a> {
    fn begin(slot: &'a mut LoginSlot, status: &'a Mutex<Status>, jar: &'a CookieJar) -> Self {
        {
            let mut status = lock_status(status);
            status.state = SessionState::Authenticating;
            status.last_authenticated_at = None;
        }
        jar.clear();
        Self {
            slot,
            status,
            jar,
            settled: false,
        }
    }

    fn succeed(mut self) -> u64 {
        let mut status = lock_status(self.status);
        status.state = SessionState::Authenticated;
        status.last_authenticated_at = Some(Instant::now());
        status.generation += 1;
        self.slot.last_failure = None;
        self.settled = true;
        status.generation
    }

    fn fail(mut self, attempt: u64, error: RelayError) {
        lock_status(self.status).state = SessionState::Unauthenticated;
        self.slot.last_failure = Some((attempt, error));
        self.jar.clear();
        self.settled = true;
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("Login attempt abandoned; discarding partial session");
            let mut status = lock_status(self.status);
            status.state = SessionState::Unauthenticated;
            status.last_authenticated_at = None;
            self.jar.clear();
        }
    }
}

/// Shared access to an authenticated session.
///
/// While any lease is alive no re-login can start, so its cookies stay valid.
pub struct SessionLease<'a> {
    _slot: RwLockReadGuard<'a, LoginSlot>,
    client: &'a CookieClient,
    generation: u64,
}

impl SessionLease<'_> {
    /// Send a request over the authenticated session.
    pub async fn send(&self, step: &RequestStep) -> RelayResult<PortalResponse> {
        self.client.send(step).await
    }

    pub fn client(&self) -> &CookieClient {
        self.client
    }

    /// Login generation whose cookies this lease carries.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Process-wide portal session with TTL-based reuse.
pub struct PortalSession {
    client: CookieClient,
    credentials: Credentials,
    endpoints: PortalEndpoints,
    ttl: Duration,
    slot: RwLock<LoginSlot>,
    status: Mutex<Status>,
    /// Completed (succeeded or failed) login attempts.
    attempts: AtomicU64,
}

impl PortalSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Credentials,
        endpoints: PortalEndpoints,
        ttl: Duration,
    ) -> Self {
        Self {
            client: CookieClient::new(transport, Arc::new(CookieJar::new())),
            credentials,
            endpoints,
            ttl,
            slot: RwLock::new(LoginSlot::default()),
            status: Mutex::new(Status {
                state: SessionState::Unauthenticated,
                last_authenticated_at: None,
                generation: 0,
            }),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn endpoints(&self) -> &PortalEndpoints {
        &self.endpoints
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The session's cookie jar.
    pub fn jar(&self) -> &Arc<CookieJar> {
        self.client.jar()
    }

    /// Number of login attempts that ran to completion.
    pub fn login_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of successful logins.
    pub fn generation(&self) -> u64 {
        self.status().generation
    }

    /// Current state. Never waits on the login slot.
    pub fn state(&self) -> SessionState {
        self.status().effective_state(self.ttl)
    }

    fn status(&self) -> Status {
        *lock_status(&self.status)
    }

    /// Make sure an authenticated session exists, logging in if needed.
    pub async fn ensure_session(&self) -> RelayResult<()> {
        self.lease().await.map(|_| ())
    }

    /// Obtain shared access to an authenticated session.
    ///
    /// Fast path: a fresh session is leased without any network I/O.
    /// Otherwise one caller runs the login sequence while the rest wait
    /// and then share its outcome.
    pub async fn lease(&self) -> RelayResult<SessionLease<'_>> {
        let seen_attempts = self.attempts.load(Ordering::SeqCst);

        {
            let slot = self.slot.read().await;
            let status = self.status();
            if status.is_fresh(self.ttl) {
                return Ok(self.lease_from(slot, status.generation));
            }
        }

        let mut slot = self.slot.write().await;
        let status = self.status();
        if status.is_fresh(self.ttl) {
            return Ok(self.lease_from(RwLockWriteGuard::downgrade(slot), status.generation));
        }
        if let Some((attempt, error)) = &slot.last_failure {
            if *attempt > seen_attempts {
                // We were queued behind an attempt that already failed.
                return Err(error.clone());
            }
        }
        if status.state == SessionState::Authenticated {
            tracing::info!("Portal session older than {:?}; logging in again", self.ttl);
        }

        let guard = AttemptGuard::begin(&mut slot, &self.status, self.jar());
        let started = Instant::now();
        let outcome = self.run_login().await;
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        match outcome {
            Ok(()) => {
                let generation = guard.succeed();
                tracing::info!(
                    attempt,
                    generation,
                    cookies = self.jar().len(),
                    "Portal login completed in {}ms",
                    started.elapsed().as_millis()
                );
                Ok(self.lease_from(RwLockWriteGuard::downgrade(slot), generation))
            }
            Err(error) => {
                tracing::warn!(attempt, "Portal login failed: {error}");
                guard.fail(attempt, error.clone());
                Err(error)
            }
        }
    }

    fn lease_from<'a>(
        &'a self,
        slot: RwLockReadGuard<'a, LoginSlot>,
        generation: u64,
    ) -> SessionLease<'a> {
        SessionLease {
            _slot: slot,
            client: &self.client,
            generation,
        }
    }

    /// Drop the cached session so the next lease logs in from scratch.
    pub async fn invalidate(&self) {
        let _slot = self.slot.write().await;
        lock_status(&self.status).expire();
        self.jar().clear();
        tracing::info!("Portal session invalidated");
    }

    /// Drop the cached session only if it still belongs to login `generation`.
    ///
    /// Returns `false` when a newer login already replaced it, in which case
    /// its cookies are left alone.
    pub async fn invalidate_generation(&self, generation: u64) -> bool {
        let _slot = self.slot.write().await;
        {
            let mut status = lock_status(&self.status);
            if status.generation != generation {
                tracing::debug!(
                    generation,
                    current = status.generation,
                    "Rejection concerns a replaced session; keeping the current one"
                );
                return false;
            }
            status.expire();
        }
        self.jar().clear();
        tracing::info!(generation, "Portal session invalidated");
        true
    }

    /// The fixed login sequence. Every step depends on the cookies of the
    /// previous one, so they run strictly in order.
    async fn run_login(&self) -> RelayResult<()> {
        if !self.credentials.is_complete() {
            return Err(RelayError::MissingCredentials);
        }
        tracing::info!("Logging in to {}", redact(&self.endpoints.origin));

        self.login_step(&self.endpoints.bootstrap()).await?;
        self.login_step(&self.endpoints.certify(&self.credentials)).await?;
        self.login_step(&self.endpoints.exec(&self.credentials)).await?;

        self.jar()
            .store_set_cookie(&self.endpoints.help_cookie(), &self.endpoints.origin);

        self.login_step(&self.endpoints.warm_up()).await?;
        self.login_step(&self.endpoints.warm_up_post()).await?;
        if let Some(step) = self.endpoints.mobile_warm_up() {
            self.login_step(&step).await?;
        }
        Ok(())
    }

    async fn login_step(&self, step: &RequestStep) -> RelayResult<PortalResponse> {
        let response = self.client.send(step).await?;
        tracing::debug!(
            step = %step.role,
            status = response.status,
            redirects = response.redirects,
            "Login step finished"
        );
        check_failure_marker(step.role, &response.body)?;
        Ok(response)
    }
}

/// Failure raised when an already-leased session turns out to be dead.
pub(crate) fn stale_session(reason: &str) -> RelayError {
    RelayError::LoginFailed {
        step: StepRole::DataFetch,
        reason: reason.to_string(),
    }
}
