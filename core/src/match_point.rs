//! # Match point: how much of the old chain survives
//!
//! Walking the candidate chain leaf to root, the resolver consumes the
//! caller's context objects, reuses prior params where nothing new was
//! supplied, and records the smallest index at which anything changed.
//! Handlers below that index keep their context verbatim and skip their
//! model hooks entirely.
//!
//! The "something changed" conditions are explicit here rather than folded
//! into control flow: a handler changed if its name differs from the old
//! chain at that depth, if any of its params differ, if its derived query
//! params differ, or if the caller supplied a fresh object for it.

use std::collections::HashMap;

use crate::error::RouterError;
use crate::info::{query_params_equal, HandlerInfo};
use crate::model::{Params, RouteContext, SharedModel};
use crate::recognizer::RecognizedHandler;

/// Whether the transition came from a URL or a symbolic name. Named
/// transitions force every level at or below a pending context object to
/// re-resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransitionKind {
    Url,
    Named,
}

/// The previous chain and params the sweep compares against, plus a
/// snapshot of the in-flight transition's models for the retry fallback.
pub(crate) struct MatchContext<'a> {
    pub old_infos: &'a [HandlerInfo],
    pub old_params: &'a Params,
    pub active_models: Option<ActiveModels>,
}

/// Models salvaged from an in-flight transition before it is superseded:
/// a retried transition reuses these instead of losing them.
pub(crate) struct ActiveModels {
    pub resolved: HashMap<String, SharedModel>,
    pub provided: HashMap<String, RouteContext>,
}

impl ActiveModels {
    fn lookup(&self, name: &str) -> Option<RouteContext> {
        if let Some(model) = self.resolved.get(name) {
            return Some(RouteContext::Model(model.clone()));
        }
        self.provided.get(name).cloned()
    }
}

#[derive(Debug)]
pub(crate) struct MatchPointResult {
    /// Smallest index at which something changed; `handlers.len()` when
    /// the chains are identical.
    pub match_point: usize,
    /// Caller-supplied (or salvaged) models by handler name.
    pub provided_models: HashMap<String, RouteContext>,
    /// Flat param map accumulated across the chain.
    pub params: Params,
    /// Per-handler param subsets, fed to each handler's `model` hook.
    pub handler_params: HashMap<String, Params>,
}

/// Sweep the candidate chain leaf to root.
///
/// `supplied` is consumed right to left: the last object binds to the
/// deepest dynamic handler. `input_params` carries recognizer-parsed
/// values for URL transitions and is empty otherwise. Leftover objects
/// after the sweep are a caller error naming the leaf handler.
pub(crate) fn get_match_point(
    recognized: &[RecognizedHandler],
    infos: &[HandlerInfo],
    supplied: &[RouteContext],
    input_params: &Params,
    kind: TransitionKind,
    ctx: &MatchContext<'_>,
) -> Result<MatchPointResult, RouterError> {
    let mut objects: Vec<RouteContext> = supplied.to_vec();
    let mut match_point = recognized.len();
    let mut provided_models: HashMap<String, RouteContext> = HashMap::new();
    let mut params = input_params.clone();
    let mut handler_params: HashMap<String, Params> = HashMap::new();

    for i in (0..recognized.len()).rev() {
        let rec = &recognized[i];
        let info = &infos[i];
        let old = ctx.old_infos.get(i);

        // (a) no old handler at this depth, or a different one
        let mut changed = old.map_or(true, |o| o.name != rec.name);

        if !rec.names.is_empty() {
            if kind == TransitionKind::Named && !objects.is_empty() {
                // A pending object further up the argument list means this
                // level cannot be trusted to be unchanged.
                changed = true;
            }

            if let Some(object) = objects.pop() {
                // (d) a fresh object was supplied for this level
                changed = true;
                match object {
                    RouteContext::Param(value) => {
                        let name = &rec.names[0];
                        let mut own = Params::new();
                        own.insert(name.clone(), value.clone());
                        params.insert(name.clone(), value);
                        handler_params.insert(rec.name.clone(), own);
                    }
                    model => {
                        provided_models.insert(rec.name.clone(), model);
                    }
                }
            } else if let Some(model) = ctx
                .active_models
                .as_ref()
                .and_then(|active| active.lookup(&rec.name))
            {
                // Mid-retry: salvage the model the superseded transition
                // already had, and re-validate this level.
                changed = true;
                provided_models.insert(rec.name.clone(), model);
            } else {
                // Reuse prior params segment by segment.
                let mut own = Params::new();
                for name in &rec.names {
                    let value = params
                        .get(name)
                        .cloned()
                        .or_else(|| ctx.old_params.get(name).cloned());
                    if let Some(value) = value {
                        // (b) a param differs from the old chain's value
                        if ctx.old_params.get(name) != Some(&value) {
                            changed = true;
                        }
                        params.insert(name.clone(), value.clone());
                        own.insert(name.clone(), value);
                    }
                }
                handler_params.insert(rec.name.clone(), own);
            }
        }

        // (c) derived query params differ from the old chain's
        if let Some(old) = old {
            if !query_params_equal(old.query_params.as_ref(), info.query_params.as_ref()) {
                changed = true;
            }
        }

        if changed {
            match_point = i;
        }
    }

    if !objects.is_empty() {
        let leaf = recognized
            .last()
            .map(|rec| rec.name.clone())
            .unwrap_or_default();
        return Err(RouterError::TooManyContexts(leaf));
    }

    Ok(MatchPointResult {
        match_point,
        provided_models,
        params,
        handler_params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RouterHost;
    use crate::info::collect_handler_infos;
    use crate::model::{QueryParams, QueryUpdate};
    use std::sync::Arc;

    struct NullHost;

    impl RouterHost for NullHost {
        fn get_handler(&self, _name: &str) -> Arc<dyn crate::handler::Handler> {
            struct Inert;
            impl crate::handler::Handler for Inert {}
            Arc::new(Inert)
        }
    }

    fn rec(name: &str, names: &[&str]) -> RecognizedHandler {
        RecognizedHandler {
            name: name.to_string(),
            names: names.iter().map(|n| n.to_string()).collect(),
            is_dynamic: !names.is_empty(),
            params: Params::new(),
            query_params: Vec::new(),
        }
    }

    fn chain(recognized: &[RecognizedHandler]) -> Vec<HandlerInfo> {
        collect_handler_infos(&NullHost, &QueryParams::new(), recognized, &QueryUpdate::new())
    }

    fn empty_ctx<'a>(old_params: &'a Params) -> MatchContext<'a> {
        MatchContext {
            old_infos: &[],
            old_params,
            active_models: None,
        }
    }

    #[test]
    fn fresh_chain_matches_at_zero() {
        let recognized = vec![rec("posts", &[]), rec("showPost", &["id"])];
        let infos = chain(&recognized);
        let old_params = Params::new();
        let result = get_match_point(
            &recognized,
            &infos,
            &[RouteContext::from("1")],
            &Params::new(),
            TransitionKind::Named,
            &empty_ctx(&old_params),
        )
        .unwrap();

        assert_eq!(result.match_point, 0);
        assert_eq!(
            result.params.get("id").map(String::as_str),
            Some("1")
        );
        assert_eq!(
            result.handler_params["showPost"].get("id").map(String::as_str),
            Some("1")
        );
    }

    #[test]
    fn identical_chain_matches_at_length() {
        let recognized = vec![rec("posts", &[]), rec("showPost", &["id"])];
        let mut old_infos = chain(&recognized);
        old_infos[1].context = Some(SharedModel::new(1u8));
        let mut old_params = Params::new();
        old_params.insert("id".into(), "1".into());

        let mut input = Params::new();
        input.insert("id".into(), "1".into());
        let ctx = MatchContext {
            old_infos: &old_infos,
            old_params: &old_params,
            active_models: None,
        };
        let infos = chain(&recognized);
        let result = get_match_point(
            &recognized,
            &infos,
            &[],
            &input,
            TransitionKind::Url,
            &ctx,
        )
        .unwrap();

        assert_eq!(result.match_point, 2);
    }

    #[test]
    fn changed_param_moves_the_match_point() {
        let recognized = vec![rec("posts", &[]), rec("showPost", &["id"])];
        let old_infos = chain(&recognized);
        let mut old_params = Params::new();
        old_params.insert("id".into(), "1".into());

        let mut input = Params::new();
        input.insert("id".into(), "2".into());
        let ctx = MatchContext {
            old_infos: &old_infos,
            old_params: &old_params,
            active_models: None,
        };
        let infos = chain(&recognized);
        let result = get_match_point(
            &recognized,
            &infos,
            &[],
            &input,
            TransitionKind::Url,
            &ctx,
        )
        .unwrap();

        assert_eq!(result.match_point, 1);
    }

    #[test]
    fn models_land_in_provided_models() {
        let recognized = vec![rec("showPost", &["id"])];
        let infos = chain(&recognized);
        let old_params = Params::new();
        let result = get_match_point(
            &recognized,
            &infos,
            &[RouteContext::model(42u8)],
            &Params::new(),
            TransitionKind::Named,
            &empty_ctx(&old_params),
        )
        .unwrap();

        assert!(result.provided_models.contains_key("showPost"));
        assert!(result.handler_params.get("showPost").is_none());
    }

    #[test]
    fn excess_objects_name_the_leaf() {
        let recognized = vec![rec("about", &[])];
        let infos = chain(&recognized);
        let old_params = Params::new();
        let err = get_match_point(
            &recognized,
            &infos,
            &[RouteContext::from(1), RouteContext::from(2)],
            &Params::new(),
            TransitionKind::Named,
            &empty_ctx(&old_params),
        )
        .unwrap_err();

        assert!(matches!(err, RouterError::TooManyContexts(name) if name == "about"));
    }

    #[test]
    fn retry_salvages_resolved_models() {
        let recognized = vec![rec("showPost", &["id"])];
        let infos = chain(&recognized);
        let old_params = Params::new();
        let mut resolved = HashMap::new();
        resolved.insert("showPost".to_string(), SharedModel::new(9u8));
        let ctx = MatchContext {
            old_infos: &[],
            old_params: &old_params,
            active_models: Some(ActiveModels {
                resolved,
                provided: HashMap::new(),
            }),
        };
        let result = get_match_point(
            &recognized,
            &infos,
            &[],
            &Params::new(),
            TransitionKind::Named,
            &ctx,
        )
        .unwrap();

        assert_eq!(result.match_point, 0);
        assert!(result.provided_models.contains_key("showPost"));
    }
}
