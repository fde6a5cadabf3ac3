//! # Validation pipeline
//!
//! Runs each handler of the target chain through `before_model` → model
//! resolution → `after_model`, with an abort check between every step.
//! Handlers below the match point reuse their existing context and skip
//! their hooks entirely.
//!
//! Any hook may suspend; an abort that lands while a hook is in flight is
//! observed at the next check and converts the pipeline's outcome into
//! the canonical aborted rejection without running further hooks.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RouterError;
use crate::events::trigger;
use crate::handler::{EventArgs, HookValue};
use crate::info::HandlerInfo;
use crate::model::{Params, QueryParams, SharedModel};
use crate::router::RouterInner;
use crate::transition::{check_abort, Transition};

/// Drive the whole chain. On success every `HandlerInfo` carries its
/// resolved context and the transition's `resolved_models` is complete.
pub(crate) async fn validate_entry(
    router: &Arc<RouterInner>,
    transition: &Transition,
    infos: &mut [HandlerInfo],
    match_point: usize,
    handler_params: &HashMap<String, Params>,
) -> Result<(), RouterError> {
    for index in 0..infos.len() {
        if index < match_point {
            reuse_entry(router, transition, &mut infos[index]);
            continue;
        }
        validate_one(transition, infos, index, handler_params).await?;
    }
    Ok(())
}

/// Below the match point nothing changed: carry over the provided model
/// if one exists, else the handler's committed context slot. No hooks.
fn reuse_entry(router: &Arc<RouterInner>, transition: &Transition, info: &mut HandlerInfo) {
    let provided = transition
        .inner
        .provided_models
        .lock()
        .expect("provided_models lock")
        .get(&info.name)
        .and_then(|ctx| ctx.resolve());
    let context = provided.or_else(|| router.context_slot(&info.name));

    if let Some(model) = &context {
        transition
            .inner
            .resolved_models
            .lock()
            .expect("resolved_models lock")
            .insert(info.name.clone(), model.clone());
    }
    info.context = context;
}

async fn validate_one(
    transition: &Transition,
    infos: &mut [HandlerInfo],
    index: usize,
    handler_params: &HashMap<String, Params>,
) -> Result<(), RouterError> {
    let info = infos[index].clone();
    let handler = info.handler.clone();
    let query_params = info.query_params.clone().unwrap_or_default();

    check_abort(transition)?;

    tracing::debug!(
        sequence = transition.sequence(),
        handler = %info.name,
        "calling before_model hook"
    );
    match handler.before_model(transition, &query_params).await {
        Ok(value) => discard_redirect(&info.name, value),
        Err(err) => return Err(handle_error(transition, infos, index, err)),
    }
    check_abort(transition)?;

    tracing::debug!(
        sequence = transition.sequence(),
        handler = %info.name,
        "resolving model"
    );
    let model = match get_model(transition, &info, handler_params, &query_params).await {
        Ok(model) => model,
        Err(err) => return Err(handle_error(transition, infos, index, err)),
    };
    check_abort(transition)?;

    tracing::debug!(
        sequence = transition.sequence(),
        handler = %info.name,
        "calling after_model hook"
    );
    // The return value of after_model is intentionally discarded; the
    // pipeline keeps the model captured above.
    match handler
        .after_model(model.as_ref(), transition, &query_params)
        .await
    {
        Ok(value) => discard_redirect(&info.name, value),
        Err(err) => return Err(handle_error(transition, infos, index, err)),
    }
    check_abort(transition)?;

    if let Some(model) = &model {
        transition
            .inner
            .resolved_models
            .lock()
            .expect("resolved_models lock")
            .insert(info.name.clone(), model.clone());
    }
    infos[index].context = model;
    Ok(())
}

/// Pick the model source for one handler: a caller-provided model
/// (factories invoked here), or the handler's own `model` hook. Handlers
/// below the match point never get here; they reuse their committed
/// context in `reuse_entry`.
async fn get_model(
    transition: &Transition,
    info: &HandlerInfo,
    handler_params: &HashMap<String, Params>,
    query_params: &QueryParams,
) -> anyhow::Result<Option<SharedModel>> {
    let provided = transition
        .inner
        .provided_models
        .lock()
        .expect("provided_models lock")
        .get(&info.name)
        .cloned();
    if let Some(context) = provided {
        return Ok(context.resolve());
    }

    let params = handler_params.get(&info.name).cloned().unwrap_or_default();
    let value = info.handler.model(&params, transition, query_params).await?;
    Ok(match value {
        HookValue::Model(model) => Some(model),
        HookValue::None => None,
        HookValue::Transition(redirect) => {
            // A hook that redirects hands back the new transition; the
            // legacy contract substitutes a null model here and lets the
            // redirect win the active slot.
            tracing::debug!(
                sequence = transition.sequence(),
                redirect = redirect.sequence(),
                handler = %info.name,
                "model hook redirected"
            );
            None
        }
    })
}

fn discard_redirect(handler_name: &str, value: HookValue) {
    if let HookValue::Transition(redirect) = value {
        tracing::debug!(
            redirect = redirect.sequence(),
            handler = %handler_name,
            "hook redirected; continuing until the next abort check"
        );
    }
}

/// Route a hook failure: clean aborts pass through untouched; anything
/// else aborts the transition, bubbles an `error` event from the failing
/// handler rootward, gives the handler's own `error` hook a look, and
/// rejects with the original cause.
pub(crate) fn handle_error(
    transition: &Transition,
    infos: &[HandlerInfo],
    index: usize,
    err: anyhow::Error,
) -> RouterError {
    let routed = RouterError::from_hook(err);
    if routed.is_aborted() {
        return routed;
    }

    transition.abort();
    tracing::error!(
        sequence = transition.sequence(),
        handler = %infos[index].name,
        error = %routed,
        "transition failed in a handler hook"
    );

    let args: EventArgs = vec![
        Arc::new(routed.clone()) as Arc<dyn std::any::Any + Send + Sync>,
        Arc::new(transition.clone()),
    ];
    let _ = trigger(&infos[..=index], true, "error", &args);

    infos[index].handler.error(&routed, transition);
    routed
}
