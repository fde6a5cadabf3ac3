//! # Commit: turning a validated chain into the active chain
//!
//! Once validation succeeds, the engine generates the URL, swaps the
//! router's committed state, and drives the exit/enter/setup hooks in
//! their contractual order: exited handlers deepest first, then the
//! updated-context handlers, then the entered handlers root to leaf.

use std::sync::Arc;

use crate::error::RouterError;
use crate::events::trigger;
use crate::handler::EventArgs;
use crate::info::HandlerInfo;
use crate::model::{QueryParams, RouteContext};
use crate::params::params_for_handler;
use crate::partition::partition_handlers;
use crate::router::RouterInner;
use crate::transition::{check_abort, Transition, UrlMethod};

/// Commit a validated transition: params, URL, then the hook cascade.
pub(crate) fn finalize_transition(
    router: &Arc<RouterInner>,
    transition: &Transition,
    infos: Vec<HandlerInfo>,
) -> Result<(), RouterError> {
    check_abort(transition)?;

    let leaf_name = infos
        .last()
        .map(|info| info.name.clone())
        .unwrap_or_default();

    // One object per dynamic handler, shallowest first: the provided
    // model if the caller gave one, else whatever the pipeline resolved.
    let provided = transition
        .inner
        .provided_models
        .lock()
        .expect("provided_models lock")
        .clone();
    let mut objects: Vec<Option<RouteContext>> = Vec::new();
    for info in infos.iter().rev() {
        if !info.is_dynamic {
            continue;
        }
        let object = match provided.get(&info.name) {
            Some(RouteContext::Param(value)) => Some(RouteContext::Param(value.clone())),
            Some(RouteContext::Model(model)) => Some(RouteContext::Model(model.clone())),
            // A factory was already invoked during validation; the
            // resolved context is the model it produced.
            Some(RouteContext::Factory(_)) | None => {
                info.context.clone().map(RouteContext::Model)
            }
        };
        objects.insert(0, object);
    }

    let (contexts, current_query_params) = {
        let state = router.state.lock().expect("router state lock");
        (
            state.handler_contexts.clone(),
            state.current_query_params.clone(),
        )
    };

    let generated = params_for_handler(
        router.recognizer.as_ref(),
        router.host.as_ref(),
        &contexts,
        &current_query_params,
        &leaf_name,
        objects,
        transition.query_params(),
    )?;

    // Committed query params are the union of every level's derived map.
    let mut new_query_params = QueryParams::new();
    for info in &infos {
        if let Some(qp) = &info.query_params {
            new_query_params.extend(qp.clone());
        }
    }

    {
        let mut state = router.state.lock().expect("router state lock");
        state.current_params = generated.params.clone();
        state.current_query_params = new_query_params;
    }

    match transition.url_method() {
        UrlMethod::Update | UrlMethod::Replace => {
            let url =
                router
                    .recognizer
                    .generate(&leaf_name, &generated.params, &generated.query_params)?;
            tracing::info!(
                sequence = transition.sequence(),
                url = %url,
                replace = transition.url_method() == UrlMethod::Replace,
                "committing URL"
            );
            if transition.url_method() == UrlMethod::Replace {
                router.host.replace_url(&url);
            } else {
                router.host.update_url(&url);
            }
        }
        UrlMethod::None => {}
    }

    setup_contexts(router, transition, infos)?;

    let committed = router
        .state
        .lock()
        .expect("router state lock")
        .current_handler_infos
        .clone()
        .unwrap_or_default();
    router.host.did_transition(&committed);
    Ok(())
}

/// Drive the hook cascade over the partitioned chains.
pub(crate) fn setup_contexts(
    router: &Arc<RouterInner>,
    transition: &Transition,
    new_infos: Vec<HandlerInfo>,
) -> Result<(), RouterError> {
    check_abort(transition)?;

    let old_infos = {
        let mut state = router.state.lock().expect("router state lock");
        state.target_handler_infos = Some(new_infos.clone());
        state.current_handler_infos.clone().unwrap_or_default()
    };
    let partition = partition_handlers(&old_infos, &new_infos);

    for info in &partition.exited {
        router.remove_context_slot(&info.name);
        info.handler.exit();
    }

    let mut current = partition.unchanged.clone();
    write_current(router, &current);

    for info in partition.updated_context {
        handler_entered_or_updated(router, transition, &mut current, info, false)?;
    }
    for info in partition.entered {
        handler_entered_or_updated(router, transition, &mut current, info, true)?;
    }
    Ok(())
}

fn handler_entered_or_updated(
    router: &Arc<RouterInner>,
    transition: &Transition,
    current: &mut Vec<HandlerInfo>,
    info: HandlerInfo,
    enter: bool,
) -> Result<(), RouterError> {
    check_abort(transition)?;

    if enter {
        tracing::debug!(handler = %info.name, "entering");
        if let Err(err) = info.handler.enter() {
            return Err(setup_failure(transition, current, &info, err));
        }
    }
    check_abort(transition)?;

    let context = info.context.clone();
    let query_params = info.query_params.clone().unwrap_or_default();

    router.set_context_slot(&info.name, context.clone());
    info.handler.context_did_change();
    info.handler.query_params_did_change();

    if let Err(err) = info.handler.setup(context.as_ref(), &query_params) {
        return Err(setup_failure(transition, current, &info, err));
    }
    check_abort(transition)?;

    current.push(info);
    write_current(router, current);
    Ok(())
}

/// A commit-phase hook failed: bubble an `error` event over the handlers
/// appended so far plus the failing one, then surface the cause.
fn setup_failure(
    transition: &Transition,
    current: &[HandlerInfo],
    info: &HandlerInfo,
    err: anyhow::Error,
) -> RouterError {
    let routed = RouterError::from_hook(err);
    if routed.is_aborted() {
        return routed;
    }
    tracing::error!(
        sequence = transition.sequence(),
        handler = %info.name,
        error = %routed,
        "transition failed during setup"
    );
    let mut chain = current.to_vec();
    chain.push(info.clone());
    let args: EventArgs = vec![
        Arc::new(routed.clone()) as Arc<dyn std::any::Any + Send + Sync>,
        Arc::new(transition.clone()),
    ];
    let _ = trigger(&chain, true, "error", &args);
    routed
}

fn write_current(router: &Arc<RouterInner>, current: &[HandlerInfo]) {
    router
        .state
        .lock()
        .expect("router state lock")
        .current_handler_infos = Some(current.to_vec());
}
