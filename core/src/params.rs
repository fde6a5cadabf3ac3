//! Param serialization for URL generation.
//!
//! Given a handler name and an ordered list of context objects, produce
//! the flat param map `Recognizer::generate` needs. Objects bind to the
//! deepest dynamic handlers; every dynamic level above them serializes its
//! committed context instead.

use std::collections::HashMap;

use crate::error::RouterError;
use crate::handler::Handler;
use crate::host::RouterHost;
use crate::info::derive_query_params;
use crate::model::{Params, QueryParams, QueryUpdate, RouteContext, SharedModel};
use crate::recognizer::Recognizer;

/// The output of [`params_for_handler`]: dynamic-segment params plus the
/// derived query params (empty when no handler contributed any).
pub(crate) struct GeneratedParams {
    pub params: Params,
    pub query_params: QueryParams,
}

/// Serialize one model into URL params.
///
/// Order of preference: a raw param value binds to the first segment
/// name; a handler's custom `serialize` wins for models; otherwise the
/// default emits the model's captured id for a single segment name
/// (`post_id`-style names are the common case). Several names with no
/// custom serializer produce nothing.
pub(crate) fn serialize_with(
    handler: &dyn Handler,
    object: Option<&RouteContext>,
    names: &[String],
) -> Params {
    let mut params = Params::new();
    let Some(object) = object else {
        return params;
    };

    let model = match object {
        RouteContext::Param(value) => {
            if let Some(name) = names.first() {
                params.insert(name.clone(), value.clone());
            }
            return params;
        }
        RouteContext::Model(model) => model.clone(),
        RouteContext::Factory(factory) => factory(),
    };

    if let Some(params) = handler.serialize(&model, names) {
        return params;
    }

    if names.len() == 1 {
        if let Some(id) = model.id() {
            params.insert(names[0].clone(), id.to_string());
        }
    }
    params
}

/// Build the flat params for generating a URL to `handler_name`.
///
/// `objects` holds one entry per dynamic handler the caller supplied a
/// context for, shallowest first; `None` entries are placeholders for
/// levels whose model never resolved. Handlers above the supplied objects
/// fall back to `contexts`, the committed per-handler context slots.
pub(crate) fn params_for_handler(
    recognizer: &dyn Recognizer,
    host: &dyn RouterHost,
    contexts: &HashMap<String, SharedModel>,
    current_query_params: &QueryParams,
    handler_name: &str,
    objects: Vec<Option<RouteContext>>,
    query_update: &QueryUpdate,
) -> Result<GeneratedParams, RouterError> {
    let recognized = recognizer
        .handlers_for(handler_name)
        .ok_or_else(|| RouterError::UnknownRoute(handler_name.to_string()))?;

    let dynamic_indices: Vec<usize> = recognized
        .iter()
        .enumerate()
        .filter(|(_, rec)| !rec.names.is_empty())
        .map(|(i, _)| i)
        .collect();
    if objects.len() > dynamic_indices.len() {
        return Err(RouterError::TooManyContexts(handler_name.to_string()));
    }

    // Supplied objects bind to the deepest dynamic handlers; everything
    // shallower reuses its committed context.
    let match_point = if objects.is_empty() {
        recognized.len()
    } else {
        dynamic_indices[dynamic_indices.len() - objects.len()]
    };

    let mut params = Params::new();
    let mut query_params = QueryParams::new();
    let mut remaining = objects.into_iter();

    for (i, rec) in recognized.iter().enumerate() {
        let handler = host.get_handler(&rec.name);

        if !rec.names.is_empty() {
            let object = if i >= match_point {
                remaining.next().flatten()
            } else {
                contexts
                    .get(&rec.name)
                    .cloned()
                    .map(RouteContext::Model)
            };
            let serialized = serialize_with(handler.as_ref(), object.as_ref(), &rec.names);
            params.extend(serialized);
        }

        if let Some(derived) =
            derive_query_params(&rec.query_params, current_query_params, query_update)
        {
            query_params.extend(derived);
        }
    }

    Ok(GeneratedParams {
        params,
        query_params,
    })
}

/// Every query param valid for `handler_name`: the concatenation of the
/// allow-lists along its ancestor chain, root first.
pub(crate) fn query_params_for_handler(
    recognizer: &dyn Recognizer,
    handler_name: &str,
) -> Result<Vec<String>, RouterError> {
    let recognized = recognizer
        .handlers_for(handler_name)
        .ok_or_else(|| RouterError::UnknownRoute(handler_name.to_string()))?;
    Ok(recognized
        .into_iter()
        .flat_map(|rec| rec.query_params)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SharedModel;
    use std::sync::Arc;

    struct Inert;
    impl Handler for Inert {}

    struct CustomSerializer;
    impl Handler for CustomSerializer {
        fn serialize(&self, model: &SharedModel, names: &[String]) -> Option<Params> {
            let value = model.downcast_ref::<u32>()?;
            let mut params = Params::new();
            params.insert(names[0].clone(), format!("n{value}"));
            Some(params)
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn param_values_bind_to_the_first_name() {
        let params = serialize_with(
            &Inert,
            Some(&RouteContext::from("7")),
            &names(&["post_id"]),
        );
        assert_eq!(params.get("post_id").map(String::as_str), Some("7"));
    }

    #[test]
    fn default_serializer_uses_the_captured_id() {
        let model = RouteContext::Model(SharedModel::identified("post", 12));
        let params = serialize_with(&Inert, Some(&model), &names(&["post_id"]));
        assert_eq!(params.get("post_id").map(String::as_str), Some("12"));
    }

    #[test]
    fn custom_serializer_wins() {
        let model = RouteContext::Model(SharedModel::identified(9u32, 9));
        let params = serialize_with(&CustomSerializer, Some(&model), &names(&["post_id"]));
        assert_eq!(params.get("post_id").map(String::as_str), Some("n9"));
    }

    #[test]
    fn several_names_without_custom_serializer_produce_nothing() {
        let model = RouteContext::Model(SharedModel::identified((), 3));
        let params = serialize_with(&Inert, Some(&model), &names(&["a", "b"]));
        assert!(params.is_empty());
    }

    #[test]
    fn missing_object_produces_nothing() {
        assert!(serialize_with(&Inert, None, &names(&["id"])).is_empty());
    }
}
