//! Error surface of the transition engine.
//!
//! Two of these are part of the wire contract with handlers:
//! [`RouterError::TransitionAborted`] is the canonical cause every pipeline
//! step rejects with once a transition has been superseded, and
//! [`RouterError::UnrecognizedUrl`] is what a URL transition is born with
//! when the recognizer returns nothing. Everything else is either a
//! programmer error surfaced early or a host hook failure carried through.

use std::sync::Arc;

use thiserror::Error;

/// All the ways a transition (or a synchronous facade call) can fail.
///
/// The enum is `Clone` so a settled transition can hand the same outcome to
/// any number of awaiters; foreign hook errors are wrapped in an `Arc` for
/// that reason.
#[derive(Debug, Error, Clone)]
pub enum RouterError {
    /// The recognizer had no match for the URL.
    #[error("no route matched the URL `{0}`")]
    UnrecognizedUrl(String),

    /// The transition was superseded by a newer one or aborted by the
    /// caller. Clean shutdown of a pipeline, never bubbled as an `error`
    /// event.
    #[error("transition aborted")]
    TransitionAborted,

    /// No route is registered under this name.
    #[error("no route named `{0}`")]
    UnknownRoute(String),

    /// More context objects were supplied than the target chain has
    /// dynamic segments. Carries the leaf handler name.
    #[error("more context objects were supplied than there are dynamic segments for `{0}`")]
    TooManyContexts(String),

    /// A query parameter was supplied that neither the handler nor any of
    /// its ancestors declares.
    #[error("query parameter `{key}` is not valid for route `{route}` or its ancestors")]
    InvalidQueryParam { key: String, route: String },

    /// URL generation was missing a value for a dynamic segment.
    #[error("missing value for dynamic segment `{name}` while generating `{route}`")]
    MissingParam { name: String, route: String },

    /// A query-params-only transition was requested before any route was
    /// active.
    #[error("cannot transition to query params with no active route")]
    NoCurrentRoute,

    /// `trigger` found no handler for the event and was not told to
    /// ignore that.
    #[error("nothing handled the event `{0}`")]
    UnhandledEvent(String),

    /// `retry` was called after the owning router was dropped.
    #[error("the router owning this transition is gone")]
    RouterGone,

    /// A handler hook failed with a host-defined error.
    #[error(transparent)]
    Hook(#[from] Arc<anyhow::Error>),
}

impl RouterError {
    /// Whether this is the clean-abort cause.
    pub fn is_aborted(&self) -> bool {
        matches!(self, RouterError::TransitionAborted)
    }

    /// Classify a hook failure: a hook that returns (or downcasts to)
    /// `TransitionAborted` performed a clean abort; anything else is a
    /// genuine failure to be routed through the error event chain.
    pub(crate) fn from_hook(err: anyhow::Error) -> RouterError {
        match err.downcast_ref::<RouterError>() {
            Some(RouterError::TransitionAborted) => RouterError::TransitionAborted,
            _ => RouterError::Hook(Arc::new(err)),
        }
    }
}
