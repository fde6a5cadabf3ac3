//! HandlerInfo: the engine's canonical per-level record, and the assembler
//! that materializes a chain of them from recognizer output.

use std::sync::Arc;

use crate::handler::Handler;
use crate::host::RouterHost;
use crate::model::{QueryParams, QueryUpdate, SharedModel};
use crate::recognizer::RecognizedHandler;

/// One handler's participation in a transition or in the active chain.
#[derive(Clone)]
pub struct HandlerInfo {
    pub name: String,
    pub handler: Arc<dyn Handler>,
    pub is_dynamic: bool,
    /// Dynamic-segment names contributed by this level.
    pub names: Vec<String>,
    /// Resolved model, populated by the validation pipeline (or reused
    /// from the previous chain below the match point).
    pub context: Option<SharedModel>,
    /// Query params derived for this level. `None` when the handler's
    /// allow-list is empty.
    pub query_params: Option<QueryParams>,
}

impl std::fmt::Debug for HandlerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerInfo")
            .field("name", &self.name)
            .field("is_dynamic", &self.is_dynamic)
            .field("names", &self.names)
            .field("has_context", &self.context.is_some())
            .field("query_params", &self.query_params)
            .finish()
    }
}

impl HandlerInfo {
    /// Whether two infos carry the identical context (both empty, or the
    /// same model by pointer identity).
    pub fn same_context(&self, other: &HandlerInfo) -> bool {
        match (&self.context, &other.context) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same(b),
            _ => false,
        }
    }
}

/// Derive the query params for one handler from its allow-list.
///
/// Keys are filled from the router's committed query params first, then
/// overridden from the request. A `None` in the request is the
/// explicit-clear sentinel and removes the key.
pub(crate) fn derive_query_params(
    allow_list: &[String],
    current: &QueryParams,
    request: &QueryUpdate,
) -> Option<QueryParams> {
    if allow_list.is_empty() {
        return None;
    }
    let mut derived = QueryParams::new();
    for key in allow_list {
        if let Some(value) = current.get(key) {
            derived.insert(key.clone(), value.clone());
        }
        match request.get(key) {
            Some(Some(value)) => {
                derived.insert(key.clone(), value.clone());
            }
            Some(None) => {
                derived.remove(key);
            }
            None => {}
        }
    }
    Some(derived)
}

/// Materialize the target chain: one [`HandlerInfo`] per recognized level,
/// handlers resolved through the host, query params derived per level.
pub(crate) fn collect_handler_infos(
    host: &dyn RouterHost,
    current_query_params: &QueryParams,
    recognized: &[RecognizedHandler],
    request: &QueryUpdate,
) -> Vec<HandlerInfo> {
    recognized
        .iter()
        .map(|rec| HandlerInfo {
            name: rec.name.clone(),
            handler: host.get_handler(&rec.name),
            is_dynamic: rec.is_dynamic,
            names: rec.names.clone(),
            context: None,
            query_params: derive_query_params(&rec.query_params, current_query_params, request),
        })
        .collect()
}

/// Query-param equality as the partitioner and match-point resolver see
/// it: `None` and `Some(empty)` are distinct, matching the original's
/// absent-versus-empty-object distinction.
pub(crate) fn query_params_equal(a: Option<&QueryParams>, b: Option<&QueryParams>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
