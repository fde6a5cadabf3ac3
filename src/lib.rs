// Re-export the core engine at the crate root.
pub use junction_core::{
    error, handler, host, info, model, recognizer, router, testing, transition,
};

pub use junction_core::{
    EventArgs, EventOutcome, Handler, HandlerInfo, HookResult, HookValue, ModelFactory, Params,
    QueryParams, QueryUpdate, Recognition, RecognizedHandler, Recognizer, RouteContext, Router,
    RouterError, RouterHost, SharedModel, Transition, TransitionRequest, TransitionSnapshot,
    UrlMethod,
};

pub mod prelude {
    pub use junction_core::prelude::*;
}
