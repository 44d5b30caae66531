// ── Cancellable RPC execution ──
//
// Every RPC a client issues runs inside the current session scope: it
// fails fast when no session is open, is bounded by its deadline class,
// and resolves with `Cancelled` as soon as the session is closed.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use p4rt_api::{P4RuntimeStub, RpcFuture, Status};
use strum::Display;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::trace;

// ── ConnectionState ──────────────────────────────────────────────────

/// Stream session state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Closed,
    Open,
}

// ── SessionScope ─────────────────────────────────────────────────────

/// The cancellation scope of one stream session.
///
/// A scope is begun before the stream RPC is issued, activated once the
/// stream is up, and ended either locally (`close`) or by a transport
/// failure (`fail_if_current`). Ending it cancels the token every in-flight call
/// selects on.
pub(crate) struct SessionScope {
    token: ArcSwapOption<CancellationToken>,
    transitions: Mutex<()>,
    state: watch::Sender<ConnectionState>,
    failed: AtomicBool,
}

impl SessionScope {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            token: ArcSwapOption::empty(),
            transitions: Mutex::new(()),
            state,
            failed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new scope. `None` if one is already in place. The flag tells
    /// whether the previous scope ended with a transport failure.
    pub(crate) fn begin(&self) -> Option<(Arc<CancellationToken>, bool)> {
        let _guard = self.lock();
        if self.token.load().is_some() {
            return None;
        }
        let token = Arc::new(CancellationToken::new());
        self.token.store(Some(Arc::clone(&token)));
        let after_failure = self.failed.swap(false, Ordering::AcqRel);
        Some((token, after_failure))
    }

    /// Publish `Open` if `token` is still the current scope. `install` runs
    /// under the transition lock, before the state flips.
    pub(crate) fn activate(
        &self,
        token: &Arc<CancellationToken>,
        install: impl FnOnce(),
    ) -> bool {
        let _guard = self.lock();
        if !self.is_current(token) {
            return false;
        }
        install();
        self.state.send_replace(ConnectionState::Open);
        true
    }

    /// End the scope locally. Returns whether a session was open.
    /// `teardown` runs under the transition lock even if no scope is active.
    pub(crate) fn close(&self, teardown: impl FnOnce()) -> bool {
        let _guard = self.lock();
        let was_open = match self.token.swap(None) {
            Some(token) => {
                token.cancel();
                self.state.send_replace(ConnectionState::Closed) == ConnectionState::Open
            }
            None => false,
        };
        teardown();
        was_open
    }

    /// End the scope of `token` after a transport failure, running
    /// `teardown` under the transition lock. No-op if that scope has
    /// already ended.
    pub(crate) fn fail_if_current(
        &self,
        token: &Arc<CancellationToken>,
        teardown: impl FnOnce(),
    ) -> bool {
        let _guard = self.lock();
        if !self.is_current(token) {
            return false;
        }
        self.token.store(None);
        token.cancel();
        self.failed.store(true, Ordering::Release);
        self.state.send_replace(ConnectionState::Closed);
        teardown();
        true
    }

    fn is_current(&self, token: &Arc<CancellationToken>) -> bool {
        self.token
            .load()
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, token))
    }

    /// The token of the active scope. `None` while closed, including while
    /// a begun scope is still waiting for its stream.
    pub(crate) fn open_token(&self) -> Option<Arc<CancellationToken>> {
        let _guard = self.lock();
        if *self.state.borrow() != ConnectionState::Open {
            return None;
        }
        self.token.load_full()
    }

    pub(crate) fn is_open(&self) -> bool {
        *self.state.borrow() == ConnectionState::Open
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

// ── RpcExecutor ──────────────────────────────────────────────────────

/// Why a call did not produce a response. Classified by the caller.
#[derive(Debug)]
pub(crate) enum RpcFailure {
    /// The server (or channel) answered with a non-OK status. `scope` is
    /// the session scope the call ran in.
    Status {
        status: Status,
        scope: Arc<CancellationToken>,
    },
    Timeout(Duration),
    Cancelled,
    SessionNotOpen,
}

/// Runs stub calls inside the session scope. Cheap to clone; every
/// RPC-issuing component holds one.
#[derive(Clone)]
pub(crate) struct RpcExecutor {
    stub: Arc<dyn P4RuntimeStub>,
    scope: Arc<SessionScope>,
}

impl RpcExecutor {
    pub(crate) fn new(stub: Arc<dyn P4RuntimeStub>, scope: Arc<SessionScope>) -> Self {
        Self { stub, scope }
    }

    /// The open scope's token, for work that outlives `execute` (read
    /// streams).
    pub(crate) fn cancellation(&self) -> Result<Arc<CancellationToken>, RpcFailure> {
        self.scope.open_token().ok_or(RpcFailure::SessionNotOpen)
    }

    /// Run `work` against the stub in the open session. `None` for
    /// `timeout` means no deadline.
    pub(crate) async fn execute<T, F>(
        &self,
        operation: &'static str,
        timeout: Option<Duration>,
        work: F,
    ) -> Result<T, RpcFailure>
    where
        F: for<'s> FnOnce(&'s dyn P4RuntimeStub) -> RpcFuture<'s, T>,
    {
        let token = self.cancellation()?;
        self.execute_in(&token, operation, timeout, work).await
    }

    /// Run `work` in the scope of `token`, open or not. Only the stream
    /// setup calls this directly.
    pub(crate) async fn execute_in<T, F>(
        &self,
        token: &Arc<CancellationToken>,
        operation: &'static str,
        timeout: Option<Duration>,
        work: F,
    ) -> Result<T, RpcFailure>
    where
        F: for<'s> FnOnce(&'s dyn P4RuntimeStub) -> RpcFuture<'s, T>,
    {
        match timeout {
            Some(limit) => trace!(operation, ?limit, "executing rpc"),
            None => trace!(operation, "executing rpc without deadline"),
        }

        let call = bounded(work(self.stub.as_ref()), timeout, token);
        tokio::select! {
            biased;
            () = token.cancelled() => Err(RpcFailure::Cancelled),
            result = call => result,
        }
    }
}

async fn bounded<T>(
    call: impl Future<Output = Result<T, Status>>,
    timeout: Option<Duration>,
    token: &Arc<CancellationToken>,
) -> Result<T, RpcFailure> {
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => return Err(RpcFailure::Timeout(limit)),
        },
        None => call.await,
    };
    result.map_err(|status| RpcFailure::Status {
        status,
        scope: Arc::clone(token),
    })
}
