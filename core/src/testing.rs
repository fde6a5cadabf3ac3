//! Test support: an in-memory recognizer, a hook-recording handler, and a
//! URL-recording host.
//!
//! These ship as a public module so embedders can drive the engine in
//! their own tests without standing up a real recognizer or history
//! layer. Route chains are registered explicitly, one [`RouteLevel`] per
//! nesting level, with `:name` marking dynamic segments.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use crate::error::RouterError;
use crate::handler::{EventArgs, EventOutcome, Handler, HookResult, HookValue};
use crate::host::RouterHost;
use crate::info::HandlerInfo;
use crate::model::{Params, QueryParams, QueryUpdate, SharedModel};
use crate::recognizer::{Recognition, RecognizedHandler, Recognizer};
use crate::transition::Transition;

/// Boxed future for pluggable async hooks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type ModelFn = Arc<dyn Fn(Params) -> BoxFuture<'static, HookResult> + Send + Sync>;
type GateFn = Arc<dyn Fn() -> BoxFuture<'static, HookResult> + Send + Sync>;
type AfterModelFn =
    Arc<dyn Fn(Option<SharedModel>) -> BoxFuture<'static, HookResult> + Send + Sync>;
type SerializeFn = Arc<dyn Fn(&SharedModel, &[String]) -> Option<Params> + Send + Sync>;
type EventFn = Arc<dyn Fn(&EventArgs) -> EventOutcome + Send + Sync>;

// ============================================================
// HookLog
// ============================================================

/// Shared, ordered record of every hook invocation across a test.
#[derive(Clone, Default)]
pub struct HookLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl HookLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().expect("hook log lock").push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().expect("hook log lock").clone()
    }

    pub fn clear(&self) {
        self.entries.lock().expect("hook log lock").clear();
    }

    /// Count of entries matching a `handler.hook` label.
    pub fn count(&self, label: &str) -> usize {
        self.entries().iter().filter(|e| *e == label).count()
    }
}

// ============================================================
// TestRecognizer
// ============================================================

#[derive(Clone, Debug)]
enum Segment {
    Literal(String),
    Dynamic(String),
}

/// One nesting level of a registered chain.
#[derive(Clone, Debug)]
pub struct RouteLevel {
    name: String,
    segments: Vec<Segment>,
    query_params: Vec<String>,
}

impl RouteLevel {
    /// `pattern` is this level's path contribution: empty for pure
    /// grouping levels, `"posts"` for a literal, `":id"` for a dynamic
    /// segment, `"posts/:id"` for both.
    pub fn new(name: &str, pattern: &str) -> Self {
        let segments = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Dynamic(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();
        Self {
            name: name.to_string(),
            segments,
            query_params: Vec::new(),
        }
    }

    /// Declare this level's query-param allow-list.
    pub fn with_query_params(mut self, keys: &[&str]) -> Self {
        self.query_params = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    fn names(&self) -> Vec<String> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Dynamic(name) => Some(name.clone()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    fn recognized(&self, params: Params) -> RecognizedHandler {
        RecognizedHandler {
            name: self.name.clone(),
            names: self.names(),
            is_dynamic: !self.names().is_empty(),
            params,
            query_params: self.query_params.clone(),
        }
    }
}

/// An in-memory recognizer over explicitly registered chains.
#[derive(Default)]
pub struct TestRecognizer {
    chains: Vec<Vec<RouteLevel>>,
}

impl TestRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a root-to-leaf chain.
    pub fn add_chain(&mut self, levels: Vec<RouteLevel>) -> &mut Self {
        self.chains.push(levels);
        self
    }

    /// The chain prefix ending at the level called `name`.
    fn chain_for(&self, name: &str) -> Option<&[RouteLevel]> {
        for chain in &self.chains {
            if let Some(idx) = chain.iter().position(|level| level.name == name) {
                return Some(&chain[..=idx]);
            }
        }
        None
    }
}

impl Recognizer for TestRecognizer {
    fn recognize(&self, url: &str) -> Option<Recognition> {
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (url, None),
        };
        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        'chains: for chain in &self.chains {
            let mut cursor = 0usize;
            let mut per_level: Vec<Params> = Vec::with_capacity(chain.len());
            for level in chain {
                let mut params = Params::new();
                for segment in &level.segments {
                    let Some(actual) = path_segments.get(cursor) else {
                        continue 'chains;
                    };
                    match segment {
                        Segment::Literal(expected) if expected == actual => {}
                        Segment::Literal(_) => continue 'chains,
                        Segment::Dynamic(name) => {
                            params.insert(name.clone(), (*actual).to_string());
                        }
                    }
                    cursor += 1;
                }
                per_level.push(params);
            }
            if cursor != path_segments.len() {
                continue;
            }

            let handlers = chain
                .iter()
                .zip(per_level)
                .map(|(level, params)| level.recognized(params))
                .collect();
            let mut query_params = QueryUpdate::new();
            if let Some(query) = query {
                for pair in query.split('&').filter(|p| !p.is_empty()) {
                    match pair.split_once('=') {
                        Some((k, v)) => {
                            query_params.insert(k.to_string(), Some(v.to_string()));
                        }
                        None => {
                            query_params.insert(pair.to_string(), Some(String::new()));
                        }
                    }
                }
            }
            return Some(Recognition {
                handlers,
                query_params,
            });
        }
        None
    }

    fn handlers_for(&self, name: &str) -> Option<Vec<RecognizedHandler>> {
        let chain = self.chain_for(name)?;
        Some(
            chain
                .iter()
                .map(|level| level.recognized(Params::new()))
                .collect(),
        )
    }

    fn generate(
        &self,
        name: &str,
        params: &Params,
        query_params: &QueryParams,
    ) -> Result<String, RouterError> {
        let chain = self
            .chain_for(name)
            .ok_or_else(|| RouterError::UnknownRoute(name.to_string()))?;

        let mut url = String::new();
        for level in chain {
            for segment in &level.segments {
                url.push('/');
                match segment {
                    Segment::Literal(text) => url.push_str(text),
                    Segment::Dynamic(segment_name) => {
                        let value = params.get(segment_name).ok_or_else(|| {
                            RouterError::MissingParam {
                                name: segment_name.clone(),
                                route: name.to_string(),
                            }
                        })?;
                        url.push_str(value);
                    }
                }
            }
        }
        if url.is_empty() {
            url.push('/');
        }

        if !query_params.is_empty() {
            let mut pairs: Vec<(&String, &String)> = query_params.iter().collect();
            pairs.sort();
            url.push('?');
            for (i, (k, v)) in pairs.iter().enumerate() {
                if i > 0 {
                    url.push('&');
                }
                url.push_str(k);
                url.push('=');
                url.push_str(v);
            }
        }
        Ok(url)
    }

    fn has_route(&self, name: &str) -> bool {
        self.chain_for(name).is_some()
    }
}

// ============================================================
// TestHandler
// ============================================================

/// A handler that records every hook call into a [`HookLog`] and lets
/// tests plug in the interesting behaviors.
#[derive(Clone)]
pub struct TestHandler {
    name: String,
    log: HookLog,
    model_fn: Option<ModelFn>,
    before_model_fn: Option<GateFn>,
    after_model_fn: Option<AfterModelFn>,
    setup_error: Option<Arc<dyn Fn() -> anyhow::Error + Send + Sync>>,
    serializer: Option<SerializeFn>,
    events: HashMap<String, EventFn>,
}

impl TestHandler {
    pub fn new(name: &str, log: &HookLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            model_fn: None,
            before_model_fn: None,
            after_model_fn: None,
            setup_error: None,
            serializer: None,
            events: HashMap::new(),
        }
    }

    /// Plug in the async `model` hook.
    pub fn with_model(
        mut self,
        f: impl Fn(Params) -> BoxFuture<'static, HookResult> + Send + Sync + 'static,
    ) -> Self {
        self.model_fn = Some(Arc::new(f));
        self
    }

    /// `model` resolves to the same value every time.
    pub fn with_model_value(self, model: SharedModel) -> Self {
        self.with_model(move |_| {
            let model = model.clone();
            Box::pin(async move { Ok(HookValue::Model(model)) })
        })
    }

    /// Plug in the async `before_model` hook.
    pub fn with_before_model(
        mut self,
        f: impl Fn() -> BoxFuture<'static, HookResult> + Send + Sync + 'static,
    ) -> Self {
        self.before_model_fn = Some(Arc::new(f));
        self
    }

    /// Plug in the async `after_model` hook; it receives the context the
    /// pipeline resolved.
    pub fn with_after_model(
        mut self,
        f: impl Fn(Option<SharedModel>) -> BoxFuture<'static, HookResult> + Send + Sync + 'static,
    ) -> Self {
        self.after_model_fn = Some(Arc::new(f));
        self
    }

    /// Make `setup` fail.
    pub fn with_failing_setup(
        mut self,
        f: impl Fn() -> anyhow::Error + Send + Sync + 'static,
    ) -> Self {
        self.setup_error = Some(Arc::new(f));
        self
    }

    /// Plug in a custom `serialize`.
    pub fn with_serializer(
        mut self,
        f: impl Fn(&SharedModel, &[String]) -> Option<Params> + Send + Sync + 'static,
    ) -> Self {
        self.serializer = Some(Arc::new(f));
        self
    }

    /// Handle a named event.
    pub fn on(
        mut self,
        event: &str,
        f: impl Fn(&EventArgs) -> EventOutcome + Send + Sync + 'static,
    ) -> Self {
        self.events.insert(event.to_string(), Arc::new(f));
        self
    }

    fn mark(&self, hook: &str) {
        self.log.record(format!("{}.{}", self.name, hook));
    }
}

#[async_trait::async_trait]
impl Handler for TestHandler {
    async fn before_model(
        &self,
        _transition: &Transition,
        _query_params: &QueryParams,
    ) -> HookResult {
        self.mark("before_model");
        match &self.before_model_fn {
            Some(f) => f().await,
            None => Ok(HookValue::None),
        }
    }

    async fn model(
        &self,
        params: &Params,
        _transition: &Transition,
        _query_params: &QueryParams,
    ) -> HookResult {
        self.mark("model");
        match &self.model_fn {
            Some(f) => f(params.clone()).await,
            None => Ok(HookValue::None),
        }
    }

    async fn after_model(
        &self,
        context: Option<&SharedModel>,
        _transition: &Transition,
        _query_params: &QueryParams,
    ) -> HookResult {
        self.mark("after_model");
        match &self.after_model_fn {
            Some(f) => f(context.cloned()).await,
            None => Ok(HookValue::None),
        }
    }

    fn enter(&self) -> Result<(), anyhow::Error> {
        self.mark("enter");
        Ok(())
    }

    fn setup(
        &self,
        _context: Option<&SharedModel>,
        _query_params: &QueryParams,
    ) -> Result<(), anyhow::Error> {
        self.mark("setup");
        match &self.setup_error {
            Some(f) => Err(f()),
            None => Ok(()),
        }
    }

    fn exit(&self) {
        self.mark("exit");
    }

    fn serialize(&self, model: &SharedModel, names: &[String]) -> Option<Params> {
        self.serializer.as_ref().and_then(|f| f(model, names))
    }

    fn error(&self, _reason: &RouterError, _transition: &Transition) {
        self.mark("error");
    }

    fn on_event(&self, name: &str, args: &EventArgs) -> Option<EventOutcome> {
        self.events.get(name).map(|f| f(args))
    }
}

// ============================================================
// TestHost
// ============================================================

/// What a recorded URL write was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlWrite {
    Update(String),
    Replace(String),
}

/// In-memory handler registry plus a record of every URL write.
#[derive(Default)]
pub struct TestHost {
    handlers: Mutex<HashMap<String, Arc<dyn Handler>>>,
    urls: Mutex<Vec<UrlWrite>>,
    transitions: Mutex<usize>,
}

impl TestHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, name: &str, handler: Arc<dyn Handler>) -> &Self {
        self.handlers
            .lock()
            .expect("handlers lock")
            .insert(name.to_string(), handler);
        self
    }

    /// Every URL write so far, in order.
    pub fn url_writes(&self) -> Vec<UrlWrite> {
        self.urls.lock().expect("urls lock").clone()
    }

    /// How many transitions committed.
    pub fn committed(&self) -> usize {
        *self.transitions.lock().expect("transitions lock")
    }
}

impl RouterHost for TestHost {
    fn get_handler(&self, name: &str) -> Arc<dyn Handler> {
        self.handlers
            .lock()
            .expect("handlers lock")
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("no handler registered for `{name}`"))
    }

    fn update_url(&self, url: &str) {
        self.urls
            .lock()
            .expect("urls lock")
            .push(UrlWrite::Update(url.to_string()));
    }

    fn replace_url(&self, url: &str) {
        self.urls
            .lock()
            .expect("urls lock")
            .push(UrlWrite::Replace(url.to_string()));
    }

    fn did_transition(&self, _handler_infos: &[HandlerInfo]) {
        *self.transitions.lock().expect("transitions lock") += 1;
    }
}
