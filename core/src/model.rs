//! Opaque model handles and caller-supplied route contexts.
//!
//! The engine never looks inside a model; it moves them between handlers,
//! compares them by identity, and occasionally needs a string form for URL
//! generation. [`SharedModel`] is the type-erased handle for the first two,
//! and [`RouteContext`] is what callers pass to `transition_to` /
//! `generate`: either a raw param value, a ready model, or a lazy factory.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Flat mapping of dynamic-segment name to its string value.
pub type Params = HashMap<String, String>;

/// Committed query params for a handler or for the whole router.
pub type QueryParams = HashMap<String, String>;

/// A requested query-param change. `None` is the explicit-clear sentinel:
/// it removes the key from the derived mapping instead of setting it.
pub type QueryUpdate = HashMap<String, Option<String>>;

/// Zero-argument model factory, invoked at resolution time.
pub type ModelFactory = Arc<dyn Fn() -> SharedModel + Send + Sync>;

/// A type-erased, cheaply cloneable model handle.
///
/// Identity is `Arc` pointer identity: two handles are the "same model"
/// iff they share the allocation. An optional id string, captured at
/// construction, feeds the default serializer when a route's dynamic
/// segment is named `*_id`.
#[derive(Clone)]
pub struct SharedModel {
    value: Arc<dyn Any + Send + Sync>,
    id: Option<String>,
}

impl SharedModel {
    /// Wrap a value with no identifier.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            id: None,
        }
    }

    /// Wrap a value together with the identifier the default serializer
    /// should emit for `*_id` segments.
    pub fn identified<T: Any + Send + Sync>(value: T, id: impl ToString) -> Self {
        Self {
            value: Arc::new(value),
            id: Some(id.to_string()),
        }
    }

    /// Borrow the payload as a concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// The identifier captured at construction, if any.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Pointer identity, the engine's notion of "the same context".
    pub fn same(&self, other: &SharedModel) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for SharedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedModel")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// A caller-supplied context object for one dynamic segment of a target
/// route.
///
/// The original engine sniffed "param-like" values (strings and numbers)
/// out of an untyped argument list at runtime; here the distinction is in
/// the type. `From` impls cover the param-like cases, so call sites read
/// `3.into()` or `"slug".into()`.
#[derive(Clone)]
pub enum RouteContext {
    /// A raw param value, bound to the handler's first dynamic segment
    /// name without running its `model` hook.
    Param(String),
    /// A fully materialized model.
    Model(SharedModel),
    /// A lazy model, invoked when (and only when) the pipeline resolves
    /// this handler.
    Factory(ModelFactory),
}

impl RouteContext {
    /// Convenience for wrapping a plain value as a model context.
    pub fn model<T: Any + Send + Sync>(value: T) -> Self {
        RouteContext::Model(SharedModel::new(value))
    }

    /// Lazy model context.
    pub fn factory(f: impl Fn() -> SharedModel + Send + Sync + 'static) -> Self {
        RouteContext::Factory(Arc::new(f))
    }

    /// Whether this is a raw param value.
    pub fn is_param(&self) -> bool {
        matches!(self, RouteContext::Param(_))
    }

    /// Identity comparison used by transition deduplication: params by
    /// value, models and factories by pointer.
    pub fn identity_eq(&self, other: &RouteContext) -> bool {
        match (self, other) {
            (RouteContext::Param(a), RouteContext::Param(b)) => a == b,
            (RouteContext::Model(a), RouteContext::Model(b)) => a.same(b),
            (RouteContext::Factory(a), RouteContext::Factory(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Materialize this context into a model, invoking a factory if that
    /// is what was supplied. `Param` has no model form.
    pub(crate) fn resolve(&self) -> Option<SharedModel> {
        match self {
            RouteContext::Param(_) => None,
            RouteContext::Model(m) => Some(m.clone()),
            RouteContext::Factory(f) => Some(f()),
        }
    }
}

impl fmt::Debug for RouteContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteContext::Param(p) => f.debug_tuple("Param").field(p).finish(),
            RouteContext::Model(m) => f.debug_tuple("Model").field(m).finish(),
            RouteContext::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

impl From<&str> for RouteContext {
    fn from(value: &str) -> Self {
        RouteContext::Param(value.to_string())
    }
}

impl From<String> for RouteContext {
    fn from(value: String) -> Self {
        RouteContext::Param(value)
    }
}

macro_rules! param_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for RouteContext {
            fn from(value: $ty) -> Self {
                RouteContext::Param(value.to_string())
            }
        })*
    };
}

param_from_int!(i32, i64, u32, u64, usize);

impl From<SharedModel> for RouteContext {
    fn from(value: SharedModel) -> Self {
        RouteContext::Model(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_and_strings_become_params() {
        assert!(matches!(RouteContext::from(3), RouteContext::Param(p) if p == "3"));
        assert!(matches!(RouteContext::from("x"), RouteContext::Param(p) if p == "x"));
    }

    #[test]
    fn model_identity_is_pointer_identity() {
        let a = SharedModel::new(7usize);
        let b = a.clone();
        let c = SharedModel::new(7usize);
        assert!(a.same(&b));
        assert!(!a.same(&c));
    }

    #[test]
    fn factories_resolve_lazily() {
        let ctx = RouteContext::factory(|| SharedModel::identified((), 42));
        let model = ctx.resolve().unwrap();
        assert_eq!(model.id(), Some("42"));
    }

    #[test]
    fn identity_eq_distinguishes_variants() {
        let model = SharedModel::new(1u8);
        let a = RouteContext::Model(model.clone());
        let b = RouteContext::Model(model);
        assert!(a.identity_eq(&b));
        assert!(!a.identity_eq(&RouteContext::Param("1".into())));
        assert!(RouteContext::from("1").identity_eq(&RouteContext::from("1")));
    }
}
