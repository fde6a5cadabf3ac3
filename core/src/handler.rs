//! # Handler: the host-side lifecycle contract
//!
//! A handler is one level of a nested route. The engine calls its hooks in
//! a fixed order during a transition; every hook has a default
//! implementation, so a handler implements exactly the subset it cares
//! about and the engine assumes nothing else.
//!
//! Hook order for a handler being validated and entered:
//! `before_model` → `model` → `after_model` → (commit) `enter` →
//! context/query-param writes → `setup`. `exit` runs when the handler
//! leaves the active chain, deepest first.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RouterError;
use crate::model::{Params, QueryParams, SharedModel};
use crate::transition::Transition;

/// Positional payload of a bubbled event.
pub type EventArgs = Vec<Arc<dyn Any + Send + Sync>>;

/// What a handler's event callback decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The event was handled and should keep bubbling toward the root
    /// (the original contract's literal `true` return).
    Propagate,
    /// The event was handled and propagation stops here.
    Handled,
}

/// What an async model-ish hook produced.
pub enum HookValue {
    /// Nothing; the pipeline proceeds without a model from this hook.
    None,
    /// A resolved model.
    Model(SharedModel),
    /// The hook started another transition (a redirect). The pipeline
    /// treats this as a null model and lets the redirect win the
    /// active-transition slot.
    Transition(Transition),
}

impl HookValue {
    /// Convenience for returning a plain value as a resolved model.
    pub fn model<T: Any + Send + Sync>(value: T) -> Self {
        HookValue::Model(SharedModel::new(value))
    }
}

/// Result type for the async lifecycle hooks. Hosts fail with whatever
/// error type suits them; `anyhow` carries it to the engine's error
/// routing.
pub type HookResult = anyhow::Result<HookValue>;

/// One level of a nested route, supplied by the host via
/// [`RouterHost::get_handler`](crate::host::RouterHost::get_handler).
///
/// All methods have defaults; the engine tolerates any subset being
/// implemented, mirroring the optional-hook contract of the original
/// engine.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Runs before model resolution. May redirect by returning
    /// [`HookValue::Transition`].
    async fn before_model(
        &self,
        _transition: &Transition,
        _query_params: &QueryParams,
    ) -> HookResult {
        Ok(HookValue::None)
    }

    /// Resolve this handler's model from its params. Only called when the
    /// caller did not provide a model for this level.
    async fn model(
        &self,
        _params: &Params,
        _transition: &Transition,
        _query_params: &QueryParams,
    ) -> HookResult {
        Ok(HookValue::None)
    }

    /// Runs after model resolution with the resolved context. The return
    /// value is discarded by design: the pipeline keeps the model it
    /// captured before this hook ran. Errors still propagate.
    async fn after_model(
        &self,
        _context: Option<&SharedModel>,
        _transition: &Transition,
        _query_params: &QueryParams,
    ) -> HookResult {
        Ok(HookValue::None)
    }

    /// The handler is entering the active chain.
    fn enter(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }

    /// The handler's context and query params are committed; do the work
    /// of becoming active.
    fn setup(
        &self,
        _context: Option<&SharedModel>,
        _query_params: &QueryParams,
    ) -> Result<(), anyhow::Error> {
        Ok(())
    }

    /// The handler is leaving the active chain.
    fn exit(&self) {}

    /// Produce URL params for a model. `None` delegates to the default
    /// serializer (param-like value, or the model's captured id for a
    /// single `*_id` segment name).
    fn serialize(&self, _model: &SharedModel, _names: &[String]) -> Option<Params> {
        None
    }

    /// A hook in this handler (or below it) failed. Called after the
    /// `error` event has bubbled, before the transition rejects.
    fn error(&self, _reason: &RouterError, _transition: &Transition) {}

    /// The committed context for this handler changed.
    fn context_did_change(&self) {}

    /// The committed query params for this handler changed.
    fn query_params_did_change(&self) {}

    /// Named-event callback. `None` means this handler does not handle
    /// the event and bubbling continues without marking it handled.
    fn on_event(&self, _name: &str, _args: &EventArgs) -> Option<EventOutcome> {
        None
    }
}
