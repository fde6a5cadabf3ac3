//! The recognizer seam.
//!
//! Path recognition and URL generation are external: the engine consumes
//! exactly the four operations below and never inspects route definitions.

use serde::{Deserialize, Serialize};

use crate::error::RouterError;
use crate::model::{Params, QueryParams, QueryUpdate};

/// One level of a recognized chain, as reported by the recognizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizedHandler {
    /// Symbolic handler name.
    pub name: String,
    /// Ordered dynamic-segment names this handler contributes.
    pub names: Vec<String>,
    /// Whether this level captures at least one dynamic segment.
    pub is_dynamic: bool,
    /// Segment values parsed from a URL. Empty for `handlers_for` output.
    #[serde(default)]
    pub params: Params,
    /// Query-param allow-list for this handler.
    #[serde(default)]
    pub query_params: Vec<String>,
}

/// The result of recognizing a URL: the handler chain plus the query
/// params parsed out of the URL's query string.
#[derive(Debug, Clone, Default)]
pub struct Recognition {
    pub handlers: Vec<RecognizedHandler>,
    pub query_params: QueryUpdate,
}

/// External path-recognition component.
pub trait Recognizer: Send + Sync {
    /// Match a URL against the route map. `None` when nothing matches.
    fn recognize(&self, url: &str) -> Option<Recognition>;

    /// The root-to-leaf chain for a named route. `None` for unknown
    /// names.
    fn handlers_for(&self, name: &str) -> Option<Vec<RecognizedHandler>>;

    /// Generate a URL for a named route from flat params and committed
    /// query params.
    fn generate(
        &self,
        name: &str,
        params: &Params,
        query_params: &QueryParams,
    ) -> Result<String, RouterError>;

    /// Whether a route with this name exists.
    fn has_route(&self, name: &str) -> bool;
}
