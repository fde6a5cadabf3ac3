//! # junction-core: hierarchical route transition engine
//!
//! Given a URL or a symbolic route target, resolve a chain of nested
//! route handlers, asynchronously fetch their models, determine which
//! handlers enter, exit, or update, and commit the new active route, or
//! abort when a newer transition supersedes the attempt.
//!
//! ## What lives where
//!
//! * The host supplies path recognition ([`Recognizer`]), history and
//!   handler lookup ([`RouterHost`]), and the handlers themselves
//!   ([`Handler`]).
//! * The engine owns the transition lifecycle: match-point resolution,
//!   the validation pipeline, chain partitioning, the commit cascade, and
//!   event bubbling.
//!
//! ## Design Philosophy
//!
//! * **One active transition**: a newer attempt supersedes the in-flight
//!   one; identical attempts deduplicate onto it.
//! * **Level-triggered cancellation**: hooks are never killed mid-flight;
//!   the abort flag is re-checked between every asynchronous step.
//! * **Hosts own handlers**: every hook is optional and the engine
//!   assumes nothing beyond the trait's defaults.

pub mod error;
pub mod handler;
pub mod host;
pub mod info;
pub mod model;
pub mod recognizer;
pub mod router;
pub mod testing;
pub mod transition;

mod events;
mod match_point;
mod params;
mod partition;
mod pipeline;
mod setup;

pub use error::RouterError;
pub use handler::{EventArgs, EventOutcome, Handler, HookResult, HookValue};
pub use host::RouterHost;
pub use info::HandlerInfo;
pub use model::{
    ModelFactory, Params, QueryParams, QueryUpdate, RouteContext, SharedModel,
};
pub use recognizer::{Recognition, RecognizedHandler, Recognizer};
pub use router::{Router, TransitionRequest};
pub use transition::{Transition, TransitionSnapshot, UrlMethod};

pub mod prelude {
    pub use crate::error::RouterError;
    pub use crate::handler::{EventArgs, EventOutcome, Handler, HookResult, HookValue};
    pub use crate::host::RouterHost;
    pub use crate::model::{Params, QueryParams, QueryUpdate, RouteContext, SharedModel};
    pub use crate::recognizer::{Recognition, RecognizedHandler, Recognizer};
    pub use crate::router::{Router, TransitionRequest};
    pub use crate::transition::{Transition, UrlMethod};
}
