//! The host seam: everything the engine asks its embedder for.

use std::sync::Arc;

use crate::handler::Handler;
use crate::info::HandlerInfo;

/// Capabilities the embedding application supplies to a router.
///
/// `get_handler` is the only required method; URL emission defaults to a
/// no-op pair (a headless host), and `replace_url` defaults to
/// `update_url` so hosts with a single history primitive implement one
/// method.
pub trait RouterHost: Send + Sync {
    /// Resolve a handler object by name. Called once per chain level per
    /// transition; hosts are free to cache or construct on demand.
    fn get_handler(&self, name: &str) -> Arc<dyn Handler>;

    /// Push the URL of a committed transition into the host's history.
    fn update_url(&self, _url: &str) {}

    /// Replace the current history entry instead of pushing.
    fn replace_url(&self, url: &str) {
        self.update_url(url);
    }

    /// A transition committed; the argument is the new active chain.
    fn did_transition(&self, _handler_infos: &[HandlerInfo]) {}
}
