//! # Transition: one attempt to move the router somewhere else
//!
//! A `Transition` is a cheap-clone handle over the attempt's shared state:
//! the target, the caller's contexts, everything the validation pipeline
//! resolves, and a single-settlement outcome cell. Awaiting the transition
//! (it implements `IntoFuture`, and `outcome()` does the same without
//! consuming the handle) yields the committed transition or the error it
//! died with.
//!
//! `abort` is level-triggered: it flips a monotone flag that the pipeline
//! re-checks between every asynchronous step. A hook already in flight is
//! not cancelled; its result is simply discarded at the next check.

use std::collections::HashMap;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use tokio::sync::watch;

use crate::error::RouterError;
use crate::model::{Params, QueryUpdate, RouteContext, SharedModel};
use crate::router::RouterInner;

/// How a committed transition touches the host's URL bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlMethod {
    /// Push a new history entry (the default).
    Update,
    /// Replace the current history entry.
    Replace,
    /// Leave the URL alone; `handle_url` transitions use this, since the
    /// URL is already where it should be.
    None,
}

/// Single-settlement result cell with any number of awaiters.
pub(crate) struct Deferred {
    tx: watch::Sender<Option<Result<(), RouterError>>>,
}

impl Deferred {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// First settlement wins; later calls are ignored.
    pub(crate) fn settle(&self, result: Result<(), RouterError>) {
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(result);
                true
            } else {
                false
            }
        });
    }

    pub(crate) async fn wait(&self) -> Result<(), RouterError> {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(result) = rx.borrow_and_update().clone() {
                return result;
            }
            if rx.changed().await.is_err() {
                // The sender lives inside the transition we are part of,
                // so this arm is unreachable in practice.
                return Err(RouterError::TransitionAborted);
            }
        }
    }
}

pub(crate) struct TransitionInner {
    pub(crate) router: Weak<RouterInner>,
    pub(crate) sequence: u64,
    pub(crate) target_name: String,
    pub(crate) url_method: Mutex<UrlMethod>,
    pub(crate) aborted: AtomicBool,
    /// The caller's ordered context objects, kept verbatim for `retry`
    /// and for transition deduplication.
    pub(crate) provided_models_array: Vec<RouteContext>,
    pub(crate) provided_models: Mutex<HashMap<String, RouteContext>>,
    pub(crate) resolved_models: Mutex<HashMap<String, SharedModel>>,
    pub(crate) params: Mutex<Params>,
    pub(crate) query_params: QueryUpdate,
    pub(crate) data: Mutex<HashMap<String, SharedModel>>,
    pub(crate) outcome: Deferred,
}

/// A cancellable, awaitable attempt to move from the current chain to a
/// target chain.
#[derive(Clone)]
pub struct Transition {
    pub(crate) inner: Arc<TransitionInner>,
}

/// Serializable view of a transition, for structured logs and debugging.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionSnapshot {
    pub sequence: u64,
    pub target_name: String,
    pub url_method: UrlMethod,
    pub aborted: bool,
    pub params: Params,
    pub query_params: QueryUpdate,
}

impl Transition {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        router: &Arc<RouterInner>,
        sequence: u64,
        target_name: String,
        provided_models_array: Vec<RouteContext>,
        provided_models: HashMap<String, RouteContext>,
        params: Params,
        query_params: QueryUpdate,
        data: HashMap<String, SharedModel>,
        url_method: UrlMethod,
    ) -> Self {
        Self {
            inner: Arc::new(TransitionInner {
                router: Arc::downgrade(router),
                sequence,
                target_name,
                url_method: Mutex::new(url_method),
                aborted: AtomicBool::new(false),
                provided_models_array,
                provided_models: Mutex::new(provided_models),
                resolved_models: Mutex::new(HashMap::new()),
                params: Mutex::new(params),
                query_params,
                data: Mutex::new(data),
                outcome: Deferred::new(),
            }),
        }
    }

    /// A transition that failed before it could start (unrecognized URL,
    /// unknown route name, too many contexts).
    pub(crate) fn failed(router: &Arc<RouterInner>, target: &str, error: RouterError) -> Self {
        let transition = Self::new(
            router,
            router.next_sequence(),
            target.to_string(),
            Vec::new(),
            HashMap::new(),
            Params::new(),
            QueryUpdate::new(),
            HashMap::new(),
            UrlMethod::None,
        );
        transition.inner.outcome.settle(Err(error));
        transition
    }

    /// A failed transition with no owning router (only `retry` after the
    /// router was dropped produces one).
    pub(crate) fn orphan_failed(target: &str, error: RouterError) -> Self {
        let transition = Self {
            inner: Arc::new(TransitionInner {
                router: Weak::new(),
                sequence: 0,
                target_name: target.to_string(),
                url_method: Mutex::new(UrlMethod::None),
                aborted: AtomicBool::new(false),
                provided_models_array: Vec::new(),
                provided_models: Mutex::new(HashMap::new()),
                resolved_models: Mutex::new(HashMap::new()),
                params: Mutex::new(Params::new()),
                query_params: QueryUpdate::new(),
                data: Mutex::new(HashMap::new()),
                outcome: Deferred::new(),
            }),
        };
        transition.inner.outcome.settle(Err(error));
        transition
    }

    /// The leaf handler's symbolic name.
    pub fn target_name(&self) -> &str {
        &self.inner.target_name
    }

    /// Monotonically increasing per-router identifier.
    pub fn sequence(&self) -> u64 {
        self.inner.sequence
    }

    /// Whether this transition has been aborted or superseded.
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// The flat dynamic-segment params of the attempt.
    pub fn params(&self) -> Params {
        self.inner.params.lock().expect("params lock").clone()
    }

    /// The requested query-param changes of the attempt.
    pub fn query_params(&self) -> &QueryUpdate {
        &self.inner.query_params
    }

    /// The model the pipeline resolved for a handler, if it got that far.
    pub fn resolved_model(&self, handler_name: &str) -> Option<SharedModel> {
        self.inner
            .resolved_models
            .lock()
            .expect("resolved_models lock")
            .get(handler_name)
            .cloned()
    }

    /// Stash an opaque value on the transition. The bag is copied onto
    /// the transition `retry` produces.
    pub fn set_data(&self, key: impl Into<String>, value: SharedModel) -> &Self {
        self.inner
            .data
            .lock()
            .expect("data lock")
            .insert(key.into(), value);
        self
    }

    /// Read back a stashed value.
    pub fn data(&self, key: &str) -> Option<SharedModel> {
        self.inner.data.lock().expect("data lock").get(key).cloned()
    }

    /// Choose how the URL is touched on commit.
    pub fn method(&self, method: UrlMethod) -> &Self {
        *self.inner.url_method.lock().expect("url_method lock") = method;
        self
    }

    pub(crate) fn url_method(&self) -> UrlMethod {
        *self.inner.url_method.lock().expect("url_method lock")
    }

    /// Abort the transition. Idempotent; clears the router's active slot
    /// if this transition still owns it. The outcome settles with
    /// [`RouterError::TransitionAborted`].
    pub fn abort(&self) -> &Self {
        if self.inner.aborted.swap(true, Ordering::SeqCst) {
            return self;
        }
        tracing::debug!(
            sequence = self.inner.sequence,
            target = %self.inner.target_name,
            "transition aborted"
        );
        if let Some(router) = self.inner.router.upgrade() {
            let mut state = router.state.lock().expect("router state lock");
            let owns_slot = state
                .active_transition
                .as_ref()
                .map_or(false, |active| active.sequence() == self.sequence());
            if owns_slot {
                state.active_transition = None;
            }
        }
        self
    }

    /// Abort this transition and start an identical new one from the
    /// stored target, contexts, params, query params, and data bag.
    pub fn retry(&self) -> Transition {
        self.abort();
        let Some(router) = self.inner.router.upgrade() else {
            return Transition::orphan_failed(&self.inner.target_name, RouterError::RouterGone);
        };
        crate::router::retry_transition(&router, self)
    }

    /// Await settlement without consuming the handle.
    pub async fn outcome(&self) -> Result<Transition, RouterError> {
        self.inner.outcome.wait().await?;
        Ok(self.clone())
    }

    /// Serializable view for logs and debugging.
    pub fn snapshot(&self) -> TransitionSnapshot {
        TransitionSnapshot {
            sequence: self.inner.sequence,
            target_name: self.inner.target_name.clone(),
            url_method: self.url_method(),
            aborted: self.is_aborted(),
            params: self.params(),
            query_params: self.inner.query_params.clone(),
        }
    }

    pub(crate) fn settle(&self, result: Result<(), RouterError>) {
        self.inner.outcome.settle(result);
    }

    pub(crate) fn data_bag(&self) -> HashMap<String, SharedModel> {
        self.inner.data.lock().expect("data lock").clone()
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("sequence", &self.inner.sequence)
            .field("target_name", &self.inner.target_name)
            .field("aborted", &self.is_aborted())
            .finish_non_exhaustive()
    }
}

impl IntoFuture for Transition {
    type Output = Result<Transition, RouterError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.outcome().await })
    }
}

/// Reject with the canonical abort cause if the transition was aborted.
/// The pipeline calls this between every asynchronous step.
pub(crate) fn check_abort(transition: &Transition) -> Result<(), RouterError> {
    if transition.is_aborted() {
        Err(RouterError::TransitionAborted)
    } else {
        Ok(())
    }
}
