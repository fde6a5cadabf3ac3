//! # Router: the facade over the transition engine
//!
//! A `Router` is a cheap-clone handle. It owns the committed chain, the
//! single active transition, and the per-handler context slots; everything
//! else (path recognition, history, handler objects) comes from the
//! host through the [`Recognizer`] and [`RouterHost`] seams.
//!
//! Transitions are driven by a background task per attempt. A new request
//! that matches the in-flight attempt (same target, same contexts by
//! identity, same query params) is deduplicated onto it; anything else
//! supersedes it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::error::RouterError;
use crate::events::trigger;
use crate::handler::EventArgs;
use crate::info::{collect_handler_infos, HandlerInfo};
use crate::match_point::{
    get_match_point, ActiveModels, MatchContext, MatchPointResult, TransitionKind,
};
use crate::model::{Params, QueryParams, QueryUpdate, RouteContext, SharedModel};
use crate::params::{params_for_handler, query_params_for_handler};
use crate::pipeline::validate_entry;
use crate::recognizer::{RecognizedHandler, Recognizer};
use crate::setup::finalize_transition;
use crate::host::RouterHost;
use crate::transition::{check_abort, Transition, UrlMethod};

/// Where a transition request wants to go.
///
/// Strings convert directly: anything starting with `/` is a URL, the
/// rest are route names; the facade has always dispatched on that rule.
/// Named requests grow contexts and query params through the builder
/// methods.
#[derive(Clone, Debug)]
pub enum TransitionRequest {
    /// Recognize a URL and transition to its chain.
    Url(String),
    /// Transition to a named route.
    Named {
        name: String,
        contexts: Vec<RouteContext>,
        query_params: QueryUpdate,
    },
    /// Keep the current route, change only query params.
    QueryOnly(QueryUpdate),
}

impl TransitionRequest {
    /// A URL (leading `/`) or route-name request.
    pub fn to(target: &str) -> Self {
        if target.starts_with('/') {
            TransitionRequest::Url(target.to_string())
        } else {
            TransitionRequest::Named {
                name: target.to_string(),
                contexts: Vec::new(),
                query_params: QueryUpdate::new(),
            }
        }
    }

    /// A query-params-only request against the current route.
    pub fn query_only(query_params: QueryUpdate) -> Self {
        TransitionRequest::QueryOnly(query_params)
    }

    /// Append a context object for the next unfilled dynamic segment,
    /// leaf inward.
    pub fn context(mut self, context: impl Into<RouteContext>) -> Self {
        match &mut self {
            TransitionRequest::Named { contexts, .. } => contexts.push(context.into()),
            _ => {
                tracing::warn!("context objects are only meaningful for named transitions");
            }
        }
        self
    }

    /// Set a query param.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_entry(key, Some(value.into()))
    }

    /// Explicitly clear a query param.
    pub fn clear_query(mut self, key: impl Into<String>) -> Self {
        self.query_entry(key, None)
    }

    fn query_entry(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        match &mut self {
            TransitionRequest::Named { query_params, .. }
            | TransitionRequest::QueryOnly(query_params) => {
                query_params.insert(key.into(), value);
            }
            TransitionRequest::Url(_) => {
                tracing::warn!("query params on URL transitions come from the URL itself");
            }
        }
        self
    }
}

impl From<&str> for TransitionRequest {
    fn from(target: &str) -> Self {
        TransitionRequest::to(target)
    }
}

pub(crate) struct RouterState {
    pub current_handler_infos: Option<Vec<HandlerInfo>>,
    pub target_handler_infos: Option<Vec<HandlerInfo>>,
    pub current_params: Params,
    pub current_query_params: QueryParams,
    pub active_transition: Option<Transition>,
    /// The committed "handler.context" slots, keyed by handler name.
    pub handler_contexts: HashMap<String, SharedModel>,
}

pub(crate) struct RouterInner {
    pub id: Uuid,
    pub recognizer: Arc<dyn Recognizer>,
    pub host: Arc<dyn RouterHost>,
    sequence: AtomicU64,
    pub state: Mutex<RouterState>,
}

impl RouterInner {
    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn context_slot(&self, name: &str) -> Option<SharedModel> {
        self.state
            .lock()
            .expect("router state lock")
            .handler_contexts
            .get(name)
            .cloned()
    }

    pub(crate) fn set_context_slot(&self, name: &str, context: Option<SharedModel>) {
        let mut state = self.state.lock().expect("router state lock");
        match context {
            Some(context) => {
                state.handler_contexts.insert(name.to_string(), context);
            }
            None => {
                state.handler_contexts.remove(name);
            }
        }
    }

    pub(crate) fn remove_context_slot(&self, name: &str) {
        self.state
            .lock()
            .expect("router state lock")
            .handler_contexts
            .remove(name);
    }
}

/// The transition engine's public entry point.
#[derive(Clone)]
pub struct Router {
    pub(crate) inner: Arc<RouterInner>,
}

impl Router {
    pub fn new(recognizer: Arc<dyn Recognizer>, host: Arc<dyn RouterHost>) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                id: Uuid::new_v4(),
                recognizer,
                host,
                sequence: AtomicU64::new(0),
                state: Mutex::new(RouterState {
                    current_handler_infos: None,
                    target_handler_infos: None,
                    current_params: Params::new(),
                    current_query_params: QueryParams::new(),
                    active_transition: None,
                    handler_contexts: HashMap::new(),
                }),
            }),
        }
    }

    /// This router instance's identifier, as it appears in log lines.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Transition to the chain a URL recognizes to, leaving the host's
    /// URL untouched (it is already there).
    pub fn handle_url(&self, url: &str) -> Transition {
        tracing::info!(router = %self.inner.id, url = %url, "handling URL");
        self.do_transition(TransitionRequest::Url(url.to_string()), UrlMethod::None)
    }

    /// Transition to a URL or named target, pushing the new URL.
    pub fn transition_to(&self, request: impl Into<TransitionRequest>) -> Transition {
        self.do_transition(request.into(), UrlMethod::Update)
    }

    /// Like [`transition_to`](Self::transition_to) but replacing the
    /// current history entry.
    pub fn replace_with(&self, request: impl Into<TransitionRequest>) -> Transition {
        self.do_transition(request.into(), UrlMethod::Replace)
    }

    /// Whether the recognizer knows a route by this name.
    pub fn has_route(&self, name: &str) -> bool {
        self.inner.recognizer.has_route(name)
    }

    /// The in-flight transition, if any.
    pub fn active_transition(&self) -> Option<Transition> {
        self.inner
            .state
            .lock()
            .expect("router state lock")
            .active_transition
            .clone()
    }

    /// The committed dynamic-segment params.
    pub fn current_params(&self) -> Params {
        self.inner
            .state
            .lock()
            .expect("router state lock")
            .current_params
            .clone()
    }

    /// The committed query params.
    pub fn current_query_params(&self) -> QueryParams {
        self.inner
            .state
            .lock()
            .expect("router state lock")
            .current_query_params
            .clone()
    }

    /// The committed chain, root to leaf.
    pub fn current_handler_infos(&self) -> Vec<HandlerInfo> {
        self.inner
            .state
            .lock()
            .expect("router state lock")
            .current_handler_infos
            .clone()
            .unwrap_or_default()
    }

    /// Generate a URL for a named route. Query params are validated
    /// against the route's ancestry allow-list synchronously.
    pub fn generate(
        &self,
        name: &str,
        contexts: &[RouteContext],
        query_params: &QueryUpdate,
    ) -> Result<String, RouterError> {
        let valid = query_params_for_handler(self.inner.recognizer.as_ref(), name)?;
        for key in query_params.keys() {
            if !valid.iter().any(|v| v == key) {
                return Err(RouterError::InvalidQueryParam {
                    key: key.clone(),
                    route: name.to_string(),
                });
            }
        }

        let (contexts_map, current_query_params) = {
            let state = self.inner.state.lock().expect("router state lock");
            (
                state.handler_contexts.clone(),
                state.current_query_params.clone(),
            )
        };
        let generated = params_for_handler(
            self.inner.recognizer.as_ref(),
            self.inner.host.as_ref(),
            &contexts_map,
            &current_query_params,
            name,
            contexts.iter().cloned().map(Some).collect(),
            query_params,
        )?;
        self.inner
            .recognizer
            .generate(name, &generated.params, &generated.query_params)
    }

    /// Whether the target chain passes through `name` with these contexts
    /// and query params.
    ///
    /// Contexts are consumed leaf inward from the first occurrence of
    /// `name`: params must equal the committed param under the handler's
    /// first segment name, models must be identical to the handler's
    /// committed context. Supplied query params must equal the union of
    /// the derived query params of `name` and its ancestors.
    pub fn is_active(
        &self,
        name: &str,
        contexts: &[RouteContext],
        query_params: Option<&QueryParams>,
    ) -> bool {
        let (target_infos, current_params) = {
            let state = self.inner.state.lock().expect("router state lock");
            let Some(infos) = state.target_handler_infos.clone() else {
                return false;
            };
            (infos, state.current_params.clone())
        };
        let Some(leaf) = target_infos.last() else {
            return false;
        };
        let Some(recognized) = self.inner.recognizer.handlers_for(&leaf.name) else {
            return false;
        };

        let mut remaining: Vec<RouteContext> = contexts.to_vec();
        let mut found = false;
        let mut found_index = 0;

        for i in (0..target_infos.len()).rev() {
            let info = &target_infos[i];
            if info.name == name {
                found = true;
                found_index = i;
            }
            if !found {
                continue;
            }
            if remaining.is_empty() {
                break;
            }
            if info.is_dynamic {
                match remaining.pop() {
                    Some(RouteContext::Param(value)) => {
                        let param_name = recognized
                            .get(i)
                            .and_then(|rec| rec.names.first())
                            .cloned();
                        let matches = param_name
                            .map_or(false, |n| current_params.get(&n) == Some(&value));
                        if !matches {
                            return false;
                        }
                    }
                    Some(RouteContext::Model(model)) => {
                        let same = info
                            .context
                            .as_ref()
                            .map_or(false, |context| context.same(&model));
                        if !same {
                            return false;
                        }
                    }
                    Some(RouteContext::Factory(_)) | None => return false,
                }
            }
        }

        if !found || !remaining.is_empty() {
            return false;
        }

        if let Some(expected) = query_params {
            let mut union = QueryParams::new();
            for info in &target_infos[..=found_index] {
                if let Some(qp) = &info.query_params {
                    union.extend(qp.clone());
                }
            }
            return union == *expected;
        }
        true
    }

    /// Bubble a named event up the committed chain. Erring when nothing
    /// handles it is the point: silent event typos hide bugs.
    pub fn trigger(&self, name: &str, args: EventArgs) -> Result<(), RouterError> {
        let chain = self.current_handler_infos();
        trigger(&chain, false, name, &args)
    }

    /// Exit every committed handler, leaf first, and forget both chains.
    pub fn reset(&self) {
        let infos = {
            let mut state = self.inner.state.lock().expect("router state lock");
            state.target_handler_infos = None;
            state.current_handler_infos.take().unwrap_or_default()
        };
        for info in infos.iter().rev() {
            info.handler.exit();
        }
    }

    fn do_transition(&self, request: TransitionRequest, url_method: UrlMethod) -> Transition {
        match request {
            TransitionRequest::Url(url) => self.create_url_transition(&url, url_method),
            TransitionRequest::Named {
                name,
                contexts,
                query_params,
            } => self.create_named_transition(&name, contexts, query_params, url_method),
            TransitionRequest::QueryOnly(query_params) => {
                self.create_query_param_transition(query_params, url_method)
            }
        }
    }

    fn create_url_transition(&self, url: &str, url_method: UrlMethod) -> Transition {
        let Some(recognition) = self.inner.recognizer.recognize(url) else {
            tracing::warn!(router = %self.inner.id, url = %url, "URL was not recognized");
            return Transition::failed(
                &self.inner,
                url,
                RouterError::UnrecognizedUrl(url.to_string()),
            );
        };

        let mut input_params = Params::new();
        for rec in &recognition.handlers {
            input_params.extend(rec.params.clone());
        }

        self.perform_transition(
            recognition.handlers,
            Vec::new(),
            input_params,
            recognition.query_params,
            HashMap::new(),
            url_method,
            TransitionKind::Url,
        )
    }

    fn create_named_transition(
        &self,
        name: &str,
        contexts: Vec<RouteContext>,
        query_params: QueryUpdate,
        url_method: UrlMethod,
    ) -> Transition {
        let Some(recognized) = self.inner.recognizer.handlers_for(name) else {
            return Transition::failed(
                &self.inner,
                name,
                RouterError::UnknownRoute(name.to_string()),
            );
        };

        self.perform_transition(
            recognized,
            contexts,
            Params::new(),
            query_params,
            HashMap::new(),
            url_method,
            TransitionKind::Named,
        )
    }

    fn create_query_param_transition(
        &self,
        query_params: QueryUpdate,
        url_method: UrlMethod,
    ) -> Transition {
        let leaf_name = {
            let state = self.inner.state.lock().expect("router state lock");
            state
                .current_handler_infos
                .as_ref()
                .and_then(|infos| infos.last())
                .map(|info| info.name.clone())
        };
        let Some(leaf_name) = leaf_name else {
            return Transition::failed(&self.inner, "", RouterError::NoCurrentRoute);
        };
        self.create_named_transition(&leaf_name, Vec::new(), query_params, url_method)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn perform_transition(
        &self,
        recognized: Vec<RecognizedHandler>,
        provided_models_array: Vec<RouteContext>,
        input_params: Params,
        query_params: QueryUpdate,
        data: HashMap<String, SharedModel>,
        url_method: UrlMethod,
        kind: TransitionKind,
    ) -> Transition {
        let Some(leaf_name) = recognized.last().map(|rec| rec.name.clone()) else {
            return Transition::failed(&self.inner, "", RouterError::UnknownRoute(String::new()));
        };

        // Snapshot the state the match sweep compares against.
        let (current_query_params, old_infos, old_params, active, current_chain) = {
            let state = self.inner.state.lock().expect("router state lock");
            (
                state.current_query_params.clone(),
                state.current_handler_infos.clone().unwrap_or_default(),
                state.current_params.clone(),
                state.active_transition.clone(),
                state.current_handler_infos.clone().unwrap_or_default(),
            )
        };

        // Deduplicate onto an identical in-flight attempt.
        if let Some(active) = &active {
            let same_contexts = active.inner.provided_models_array.len()
                == provided_models_array.len()
                && active
                    .inner
                    .provided_models_array
                    .iter()
                    .zip(&provided_models_array)
                    .all(|(a, b)| a.identity_eq(b));
            if active.target_name() == leaf_name
                && same_contexts
                && active.query_params() == &query_params
            {
                tracing::debug!(
                    sequence = active.sequence(),
                    target = %leaf_name,
                    "deduplicating onto the in-flight transition"
                );
                return active.clone();
            }
        }

        let infos = collect_handler_infos(
            self.inner.host.as_ref(),
            &current_query_params,
            &recognized,
            &query_params,
        );

        let active_models = active.as_ref().map(|active| ActiveModels {
            resolved: active
                .inner
                .resolved_models
                .lock()
                .expect("resolved_models lock")
                .clone(),
            provided: active
                .inner
                .provided_models
                .lock()
                .expect("provided_models lock")
                .clone(),
        });
        let match_context = MatchContext {
            old_infos: &old_infos,
            old_params: &old_params,
            active_models,
        };
        let MatchPointResult {
            match_point,
            provided_models,
            params,
            handler_params,
        } = match get_match_point(
            &recognized,
            &infos,
            &provided_models_array,
            &input_params,
            kind,
            &match_context,
        ) {
            Ok(result) => result,
            Err(err) => return Transition::failed(&self.inner, &leaf_name, err),
        };

        let had_active = active.is_some();
        if let Some(active) = active {
            active.abort();
        }

        let sequence = self.inner.next_sequence();
        tracing::info!(
            router = %self.inner.id,
            sequence,
            target = %leaf_name,
            match_point,
            "attempting transition"
        );
        let transition = Transition::new(
            &self.inner,
            sequence,
            leaf_name,
            provided_models_array,
            provided_models,
            params,
            query_params,
            data,
            url_method,
        );
        self.inner
            .state
            .lock()
            .expect("router state lock")
            .active_transition = Some(transition.clone());

        // willTransition fires only when no transition was already
        // underway.
        if !had_active {
            let args: EventArgs = vec![Arc::new(transition.clone())];
            let _ = trigger(&current_chain, true, "willTransition", &args);
        }

        let router = self.inner.clone();
        let task_transition = transition.clone();
        tokio::spawn(async move {
            let outcome = run_pipeline(
                &router,
                &task_transition,
                infos,
                match_point,
                handler_params,
            )
            .await;

            let mut state = router.state.lock().expect("router state lock");
            let owns_slot = state
                .active_transition
                .as_ref()
                .map_or(false, |active| active.sequence() == task_transition.sequence());
            if owns_slot {
                state.active_transition = None;
            }
            drop(state);

            if let Err(err) = &outcome {
                tracing::debug!(
                    sequence = task_transition.sequence(),
                    error = %err,
                    "transition did not complete"
                );
            }
            task_transition.settle(outcome);
        });

        transition
    }
}

async fn run_pipeline(
    router: &Arc<RouterInner>,
    transition: &Transition,
    mut infos: Vec<HandlerInfo>,
    match_point: usize,
    handler_params: HashMap<String, Params>,
) -> Result<(), RouterError> {
    validate_entry(router, transition, &mut infos, match_point, &handler_params).await?;
    check_abort(transition)?;

    // A fully-unchanged chain (match point at the far end of an identical
    // chain) commits nothing.
    let needs_commit = {
        let state = router.state.lock().expect("router state lock");
        state.current_handler_infos.as_ref().map_or(true, |current| {
            current.len() != match_point || infos.len() != match_point
        })
    };
    if needs_commit {
        finalize_transition(router, transition, infos)?;
    }
    Ok(())
}

/// Re-run an aborted transition from its stored target, contexts, params,
/// query params, and data.
pub(crate) fn retry_transition(router: &Arc<RouterInner>, old: &Transition) -> Transition {
    let facade = Router {
        inner: router.clone(),
    };
    let Some(recognized) = router.recognizer.handlers_for(old.target_name()) else {
        return Transition::failed(
            router,
            old.target_name(),
            RouterError::UnknownRoute(old.target_name().to_string()),
        );
    };
    facade.perform_transition(
        recognized,
        old.inner.provided_models_array.clone(),
        old.params(),
        old.query_params().clone(),
        old.data_bag(),
        old.url_method(),
        TransitionKind::Named,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{EventOutcome, HookValue};
    use crate::testing::{
        HookLog, RouteLevel, TestHandler, TestHost, TestRecognizer, UrlWrite,
    };
    use tokio::sync::Semaphore;

    struct Fixture {
        router: Router,
        host: Arc<TestHost>,
        log: HookLog,
    }

    /// index → posts → {showPost(:id) | newPost}, index → about(:about_id),
    /// index → faq.
    fn blog_fixture() -> Fixture {
        let mut recognizer = TestRecognizer::new();
        // The static sibling is registered first so `/posts/new` does not
        // recognize as showPost with id "new".
        recognizer.add_chain(vec![
            RouteLevel::new("index", ""),
            RouteLevel::new("posts", "posts").with_query_params(&["sort"]),
            RouteLevel::new("newPost", "new"),
        ]);
        recognizer.add_chain(vec![
            RouteLevel::new("index", ""),
            RouteLevel::new("posts", "posts").with_query_params(&["sort"]),
            RouteLevel::new("showPost", ":id"),
        ]);
        recognizer.add_chain(vec![
            RouteLevel::new("index", ""),
            RouteLevel::new("about", "about/:about_id"),
        ]);
        recognizer.add_chain(vec![
            RouteLevel::new("index", ""),
            RouteLevel::new("faq", "faq"),
        ]);

        let host = Arc::new(TestHost::new());
        let log = HookLog::new();
        host.add_handler("index", Arc::new(TestHandler::new("index", &log)));
        host.add_handler("posts", Arc::new(TestHandler::new("posts", &log)));
        host.add_handler("newPost", Arc::new(TestHandler::new("newPost", &log)));
        host.add_handler("faq", Arc::new(TestHandler::new("faq", &log)));
        host.add_handler(
            "showPost",
            Arc::new(TestHandler::new("showPost", &log).with_model(|params| {
                Box::pin(async move {
                    let id = params.get("id").cloned().unwrap_or_default();
                    Ok(HookValue::Model(SharedModel::identified(
                        format!("post-{id}"),
                        id,
                    )))
                })
            })),
        );
        host.add_handler(
            "about",
            Arc::new(
                TestHandler::new("about", &log).with_serializer(|model, names| {
                    let id = model.downcast_ref::<u32>()?;
                    let mut params = Params::new();
                    params.insert(names[0].clone(), id.to_string());
                    Some(params)
                }),
            ),
        );

        let router = Router::new(Arc::new(recognizer), host.clone());
        Fixture { router, host, log }
    }

    fn strings(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|e| e.to_string()).collect()
    }

    fn update(query: &[(&str, Option<&str>)]) -> QueryUpdate {
        query
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(|v| v.to_string())))
            .collect()
    }

    #[tokio::test]
    async fn url_transition_runs_hooks_in_order() {
        let f = blog_fixture();
        f.router.handle_url("/posts/1").await.unwrap();

        assert_eq!(
            f.log.entries(),
            strings(&[
                "index.before_model",
                "index.model",
                "index.after_model",
                "posts.before_model",
                "posts.model",
                "posts.after_model",
                "showPost.before_model",
                "showPost.model",
                "showPost.after_model",
                "index.enter",
                "index.setup",
                "posts.enter",
                "posts.setup",
                "showPost.enter",
                "showPost.setup",
            ])
        );
        assert_eq!(f.router.current_handler_infos().len(), 3);
        assert_eq!(
            f.router.current_params().get("id").map(String::as_str),
            Some("1")
        );
        // handle_url never touches the URL.
        assert!(f.host.url_writes().is_empty());
        assert!(f.router.active_transition().is_none());
    }

    #[tokio::test]
    async fn sibling_transition_exits_only_the_leaf() {
        let f = blog_fixture();
        f.router.handle_url("/posts/1").await.unwrap();
        f.log.clear();

        f.router.transition_to("newPost").await.unwrap();

        assert_eq!(
            f.log.entries(),
            strings(&[
                "newPost.before_model",
                "newPost.model",
                "newPost.after_model",
                "showPost.exit",
                "newPost.enter",
                "newPost.setup",
            ])
        );
        assert_eq!(
            f.host.url_writes().last(),
            Some(&UrlWrite::Update("/posts/new".to_string()))
        );
    }

    #[tokio::test]
    async fn custom_serializer_drives_url_generation() {
        let f = blog_fixture();
        f.router.handle_url("/posts/1").await.unwrap();
        f.router.transition_to("newPost").await.unwrap();
        f.log.clear();

        f.router
            .transition_to(TransitionRequest::to("about").context(RouteContext::model(7u32)))
            .await
            .unwrap();

        assert_eq!(
            f.log.entries(),
            strings(&[
                "about.before_model",
                "about.after_model",
                "newPost.exit",
                "posts.exit",
                "about.enter",
                "about.setup",
            ])
        );
        let about_writes = f
            .host
            .url_writes()
            .iter()
            .filter(|w| matches!(w, UrlWrite::Update(url) if url.starts_with("/about")))
            .count();
        assert_eq!(about_writes, 1);
        assert_eq!(
            f.host.url_writes().last(),
            Some(&UrlWrite::Update("/about/7".to_string()))
        );
    }

    #[tokio::test]
    async fn identical_overlapping_transitions_deduplicate() {
        let f = blog_fixture();
        let gate = Arc::new(Semaphore::new(0));
        let model_gate = gate.clone();
        f.host.add_handler(
            "slow",
            Arc::new(TestHandler::new("slow", &f.log).with_model(move |params| {
                let gate = model_gate.clone();
                Box::pin(async move {
                    let _permit = gate.acquire().await.unwrap();
                    let id = params.get("id").cloned().unwrap_or_default();
                    Ok(HookValue::Model(SharedModel::identified((), id)))
                })
            })),
        );
        // The fixture recognizer is behind an Arc already; register the
        // slow chain in a fresh recognizer for this test instead.
        let mut recognizer = TestRecognizer::new();
        recognizer.add_chain(vec![RouteLevel::new("slow", "slow/:id")]);
        let router = Router::new(Arc::new(recognizer), f.host.clone());

        let first = router.transition_to(TransitionRequest::to("slow").context(3));
        let second = router.transition_to(TransitionRequest::to("slow").context(3));
        assert_eq!(first.sequence(), second.sequence());

        gate.add_permits(4);
        first.outcome().await.unwrap();
        second.outcome().await.unwrap();
    }

    #[tokio::test]
    async fn abort_before_model_resolves_rejects_cleanly() {
        let f = blog_fixture();
        let gate = Arc::new(Semaphore::new(0));
        let model_gate = gate.clone();
        f.host.add_handler(
            "slow",
            Arc::new(TestHandler::new("slow", &f.log).with_model(move |_| {
                let gate = model_gate.clone();
                Box::pin(async move {
                    let _permit = gate.acquire().await.unwrap();
                    Ok(HookValue::None)
                })
            })),
        );
        let mut recognizer = TestRecognizer::new();
        recognizer.add_chain(vec![RouteLevel::new("slow", "slow")]);
        let router = Router::new(Arc::new(recognizer), f.host.clone());

        let transition = router.transition_to("slow");
        transition.abort();
        gate.add_permits(4);

        let err = transition.outcome().await.unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(f.log.count("slow.enter"), 0);
        assert_eq!(f.log.count("slow.setup"), 0);
        assert!(router.current_handler_infos().is_empty());
        assert!(router.active_transition().is_none());
    }

    #[tokio::test]
    async fn generate_validates_query_params_synchronously() {
        let f = blog_fixture();

        let err = f
            .router
            .generate(
                "showPost",
                &[RouteContext::from(5)],
                &update(&[("unknown", Some("x"))]),
            )
            .unwrap_err();
        assert!(
            matches!(err, RouterError::InvalidQueryParam { key, route }
                if key == "unknown" && route == "showPost")
        );

        let url = f
            .router
            .generate("showPost", &[RouteContext::from(5)], &QueryUpdate::new())
            .unwrap();
        assert_eq!(url, "/posts/5");
    }

    #[tokio::test]
    async fn is_active_matches_the_committed_state() {
        let f = blog_fixture();
        f.router.handle_url("/posts/1").await.unwrap();

        assert!(f.router.is_active("showPost", &["1".into()], None));
        assert!(f.router.is_active("posts", &[], None));
        assert!(!f.router.is_active("showPost", &["2".into()], None));
        assert!(!f.router.is_active("newPost", &[], None));

        let about_model = SharedModel::new(7u32);
        f.router
            .transition_to(
                TransitionRequest::to("about")
                    .context(RouteContext::Model(about_model.clone())),
            )
            .await
            .unwrap();
        assert!(f
            .router
            .is_active("about", &[RouteContext::Model(about_model)], None));
        assert!(!f
            .router
            .is_active("about", &[RouteContext::model(7u32)], None));
    }

    #[tokio::test]
    async fn retry_copies_target_data_and_contexts() {
        let f = blog_fixture();
        let gate = Arc::new(Semaphore::new(0));
        let model_gate = gate.clone();
        f.host.add_handler(
            "slow",
            Arc::new(TestHandler::new("slow", &f.log).with_model(move |params| {
                let gate = model_gate.clone();
                Box::pin(async move {
                    let _permit = gate.acquire().await.unwrap();
                    let id = params.get("id").cloned().unwrap_or_default();
                    Ok(HookValue::Model(SharedModel::identified((), id)))
                })
            })),
        );
        let mut recognizer = TestRecognizer::new();
        recognizer.add_chain(vec![RouteLevel::new("slow", "slow/:id")]);
        let router = Router::new(Arc::new(recognizer), f.host.clone());

        let first = router.transition_to(TransitionRequest::to("slow").context(3));
        let marker = SharedModel::new("note".to_string());
        first.set_data("marker", marker.clone());

        let second = first.retry();
        assert!(first.is_aborted());
        assert_eq!(second.target_name(), first.target_name());
        let copied = second.data("marker").unwrap();
        assert!(copied.same(&marker));

        gate.add_permits(8);
        second.outcome().await.unwrap();
        assert_eq!(
            router.current_params().get("id").map(String::as_str),
            Some("3")
        );
    }

    #[tokio::test]
    async fn enter_and_exit_balance_out_after_reset() {
        let f = blog_fixture();
        f.router.handle_url("/posts/1").await.unwrap();
        f.router.transition_to("newPost").await.unwrap();
        f.router
            .transition_to(TransitionRequest::to("about").context(RouteContext::model(7u32)))
            .await
            .unwrap();
        f.router.reset();

        for name in ["index", "posts", "showPost", "newPost", "about"] {
            assert_eq!(
                f.log.count(&format!("{name}.enter")),
                f.log.count(&format!("{name}.exit")),
                "enter/exit imbalance for {name}"
            );
        }
        assert!(f.router.current_handler_infos().is_empty());
    }

    #[tokio::test]
    async fn will_transition_fires_only_when_nothing_is_underway() {
        let log = HookLog::new();
        let host = Arc::new(TestHost::new());
        let will_log = log.clone();
        host.add_handler(
            "home",
            Arc::new(TestHandler::new("home", &log).on("willTransition", move |_| {
                will_log.record("home.willTransition");
                EventOutcome::Handled
            })),
        );
        let gate = Arc::new(Semaphore::new(0));
        let model_gate = gate.clone();
        host.add_handler(
            "slow",
            Arc::new(TestHandler::new("slow", &log).with_model(move |_| {
                let gate = model_gate.clone();
                Box::pin(async move {
                    let _permit = gate.acquire().await.unwrap();
                    Ok(HookValue::None)
                })
            })),
        );
        let mut recognizer = TestRecognizer::new();
        recognizer.add_chain(vec![RouteLevel::new("home", "")]);
        recognizer.add_chain(vec![RouteLevel::new("slow", "slow")]);
        let router = Router::new(Arc::new(recognizer), host);

        router.transition_to("home").await.unwrap();
        assert_eq!(log.count("home.willTransition"), 0);

        let pending = router.transition_to("slow");
        assert_eq!(log.count("home.willTransition"), 1);

        // A superseding transition does not re-fire willTransition.
        let replacing = router.transition_to("home");
        assert_eq!(log.count("home.willTransition"), 1);

        gate.add_permits(4);
        assert!(pending.outcome().await.unwrap_err().is_aborted());
        replacing.outcome().await.unwrap();
    }

    #[tokio::test]
    async fn self_redirect_from_model_hook_yields_null_context() {
        let log = HookLog::new();
        let host = Arc::new(TestHost::new());
        let router_cell: Arc<Mutex<Option<Router>>> = Arc::new(Mutex::new(None));
        let seen_null: Arc<Mutex<Option<bool>>> = Arc::new(Mutex::new(None));

        let cell = router_cell.clone();
        let seen = seen_null.clone();
        host.add_handler(
            "faq",
            Arc::new(
                TestHandler::new("faq", &log)
                    .with_model(move |_| {
                        let cell = cell.clone();
                        Box::pin(async move {
                            let router = cell.lock().unwrap().clone().unwrap();
                            let redirect = router.transition_to("faq");
                            Ok(HookValue::Transition(redirect))
                        })
                    })
                    .with_after_model(move |context| {
                        *seen.lock().unwrap() = Some(context.is_none());
                        Box::pin(async { Ok(HookValue::None) })
                    }),
            ),
        );
        let mut recognizer = TestRecognizer::new();
        recognizer.add_chain(vec![RouteLevel::new("faq", "faq")]);
        let router = Router::new(Arc::new(recognizer), host);
        *router_cell.lock().unwrap() = Some(router.clone());

        // The redirect deduplicates onto the in-flight transition, so the
        // pipeline keeps going with a null model.
        router.transition_to("faq").await.unwrap();
        assert_eq!(*seen_null.lock().unwrap(), Some(true));
    }

    #[tokio::test]
    async fn redirect_to_another_route_supersedes_the_pipeline() {
        let log = HookLog::new();
        let host = Arc::new(TestHost::new());
        let router_cell: Arc<Mutex<Option<Router>>> = Arc::new(Mutex::new(None));
        let redirect_cell: Arc<Mutex<Option<Transition>>> = Arc::new(Mutex::new(None));

        let cell = router_cell.clone();
        let stash = redirect_cell.clone();
        host.add_handler(
            "faq",
            Arc::new(TestHandler::new("faq", &log).with_model(move |_| {
                let cell = cell.clone();
                let stash = stash.clone();
                Box::pin(async move {
                    let router = cell.lock().unwrap().clone().unwrap();
                    let redirect = router.transition_to("home");
                    *stash.lock().unwrap() = Some(redirect.clone());
                    Ok(HookValue::Transition(redirect))
                })
            })),
        );
        host.add_handler("home", Arc::new(TestHandler::new("home", &log)));
        let mut recognizer = TestRecognizer::new();
        recognizer.add_chain(vec![RouteLevel::new("faq", "faq")]);
        recognizer.add_chain(vec![RouteLevel::new("home", "")]);
        let router = Router::new(Arc::new(recognizer), host);
        *router_cell.lock().unwrap() = Some(router.clone());

        let err = router.transition_to("faq").await.unwrap_err();
        assert!(err.is_aborted());

        let redirect = redirect_cell.lock().unwrap().clone().unwrap();
        redirect.outcome().await.unwrap();
        assert!(router.is_active("home", &[], None));
        assert_eq!(log.count("faq.enter"), 0);
    }

    #[tokio::test]
    async fn hook_failure_bubbles_an_error_event_and_rejects() {
        let log = HookLog::new();
        let host = Arc::new(TestHost::new());
        let error_log = log.clone();
        host.add_handler(
            "parent",
            Arc::new(TestHandler::new("parent", &log).on("error", move |_| {
                error_log.record("parent.saw_error");
                EventOutcome::Handled
            })),
        );
        host.add_handler(
            "child",
            Arc::new(TestHandler::new("child", &log).with_model(|_| {
                Box::pin(async { Err(anyhow::anyhow!("boom")) })
            })),
        );
        let mut recognizer = TestRecognizer::new();
        recognizer.add_chain(vec![
            RouteLevel::new("parent", "p"),
            RouteLevel::new("child", "c"),
        ]);
        let router = Router::new(Arc::new(recognizer), host);

        let err = router.transition_to("child").await.unwrap_err();
        assert!(matches!(err, RouterError::Hook(_)));
        assert_eq!(err.to_string(), "boom");

        let entries = f_entries(&log);
        assert!(entries.contains(&"parent.saw_error".to_string()));
        assert!(entries.contains(&"child.error".to_string()));
        assert_eq!(log.count("child.enter"), 0);
        assert!(router.active_transition().is_none());
    }

    fn f_entries(log: &HookLog) -> Vec<String> {
        log.entries()
    }

    #[tokio::test]
    async fn setup_failure_bubbles_and_leaves_a_partial_chain() {
        let log = HookLog::new();
        let host = Arc::new(TestHost::new());
        let error_log = log.clone();
        host.add_handler(
            "parent",
            Arc::new(TestHandler::new("parent", &log).on("error", move |_| {
                error_log.record("parent.saw_error");
                EventOutcome::Handled
            })),
        );
        host.add_handler(
            "child",
            Arc::new(
                TestHandler::new("child", &log)
                    .with_failing_setup(|| anyhow::anyhow!("setup failed")),
            ),
        );
        let mut recognizer = TestRecognizer::new();
        recognizer.add_chain(vec![
            RouteLevel::new("parent", "p"),
            RouteLevel::new("child", "c"),
        ]);
        let router = Router::new(Arc::new(recognizer), host);

        let err = router.transition_to("child").await.unwrap_err();
        assert_eq!(err.to_string(), "setup failed");
        assert!(log.entries().contains(&"parent.saw_error".to_string()));
        // The handlers that completed setup stay committed.
        assert_eq!(router.current_handler_infos().len(), 1);
    }

    #[tokio::test]
    async fn query_params_round_trip_with_sentinel_clearing() {
        let f = blog_fixture();
        f.router.handle_url("/posts/1").await.unwrap();

        f.router
            .transition_to(TransitionRequest::to("posts").query("sort", "desc"))
            .await
            .unwrap();
        assert_eq!(
            f.router.current_query_params().get("sort").map(String::as_str),
            Some("desc")
        );
        assert_eq!(
            f.host.url_writes().last(),
            Some(&UrlWrite::Update("/posts?sort=desc".to_string()))
        );

        // Query-only transition keeps the route and swaps the value.
        f.log.clear();
        f.router
            .transition_to(TransitionRequest::query_only(update(&[(
                "sort",
                Some("asc"),
            )])))
            .await
            .unwrap();
        assert_eq!(
            f.router.current_query_params().get("sort").map(String::as_str),
            Some("asc")
        );
        assert_eq!(f.log.count("posts.setup"), 1);
        assert_eq!(f.log.count("posts.enter"), 0);
        assert_eq!(f.log.count("posts.exit"), 0);

        // The sentinel clears the param entirely.
        f.router
            .transition_to(TransitionRequest::query_only(update(&[("sort", None)])))
            .await
            .unwrap();
        assert!(f.router.current_query_params().is_empty());
        assert_eq!(
            f.host.url_writes().last(),
            Some(&UrlWrite::Update("/posts".to_string()))
        );
    }

    #[tokio::test]
    async fn identical_repeat_transition_commits_nothing() {
        let f = blog_fixture();
        f.router.handle_url("/posts/1").await.unwrap();
        let committed = f.host.committed();
        f.log.clear();

        f.router.handle_url("/posts/1").await.unwrap();
        assert!(f.log.entries().is_empty());
        assert_eq!(f.host.committed(), committed);
    }

    #[tokio::test]
    async fn url_strings_dispatch_through_transition_to() {
        let f = blog_fixture();
        f.router.transition_to("/posts/new").await.unwrap();
        assert!(f.router.is_active("newPost", &[], None));
        assert_eq!(
            f.host.url_writes().last(),
            Some(&UrlWrite::Update("/posts/new".to_string()))
        );

        f.router
            .replace_with(TransitionRequest::to("about").context(RouteContext::model(9u32)))
            .await
            .unwrap();
        assert_eq!(
            f.host.url_writes().last(),
            Some(&UrlWrite::Replace("/about/9".to_string()))
        );
    }

    #[tokio::test]
    async fn trigger_errs_when_nothing_handles_the_event() {
        let log = HookLog::new();
        let host = Arc::new(TestHost::new());
        let ping_log = log.clone();
        host.add_handler(
            "home",
            Arc::new(TestHandler::new("home", &log).on("ping", move |_| {
                ping_log.record("home.ping");
                EventOutcome::Handled
            })),
        );
        let mut recognizer = TestRecognizer::new();
        recognizer.add_chain(vec![RouteLevel::new("home", "")]);
        let router = Router::new(Arc::new(recognizer), host);
        router.transition_to("home").await.unwrap();

        router.trigger("ping", Vec::new()).unwrap();
        assert_eq!(log.count("home.ping"), 1);

        let err = router.trigger("pong", Vec::new()).unwrap_err();
        assert!(matches!(err, RouterError::UnhandledEvent(name) if name == "pong"));
    }

    #[tokio::test]
    async fn query_only_transition_without_a_route_is_rejected() {
        let f = blog_fixture();
        let err = f
            .router
            .transition_to(TransitionRequest::query_only(update(&[(
                "sort",
                Some("asc"),
            )])))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::NoCurrentRoute));
    }

    #[tokio::test]
    async fn unrecognized_urls_reject_immediately() {
        let f = blog_fixture();
        let err = f.router.handle_url("/definitely/not/here").await.unwrap_err();
        assert!(matches!(err, RouterError::UnrecognizedUrl(url) if url == "/definitely/not/here"));

        let err = f.router.transition_to("nowhere").await.unwrap_err();
        assert!(matches!(err, RouterError::UnknownRoute(name) if name == "nowhere"));
    }

    #[tokio::test]
    async fn too_many_contexts_reject_naming_the_leaf() {
        let f = blog_fixture();
        let err = f
            .router
            .transition_to(
                TransitionRequest::to("newPost")
                    .context(1)
                    .context(2),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::TooManyContexts(name) if name == "newPost"));
    }

    #[tokio::test]
    async fn snapshots_serialize_for_logging() {
        let f = blog_fixture();
        let transition = f.router.handle_url("/posts/1");
        let snapshot = transition.snapshot();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["target_name"], "showPost");
        assert_eq!(json["url_method"], "none");
        transition.outcome().await.unwrap();
    }
}
