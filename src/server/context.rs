use crate::{
    handler::{RequestHandler, StaticHandler},
    limits::ConnLimits,
    router::RouteTree,
    server::access_log::AccessLog,
};
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Route table as seen by connections: the tree plus the handler used when
/// routing fails.
#[derive(Clone)]
pub(crate) struct Routes {
    pub(crate) tree: RouteTree,
    pub(crate) not_found: Arc<dyn RequestHandler>,
}

impl Routes {
    pub(crate) fn new() -> Self {
        Self {
            tree: RouteTree::new(),
            not_found: default_not_found(),
        }
    }

    /// Resolves `path`, falling back to the not-found handler.
    pub(crate) fn resolve(&self, path: &str) -> (Arc<dyn RequestHandler>, Vec<String>) {
        self.tree
            .route(path)
            .unwrap_or_else(|| (self.not_found.clone(), Vec::new()))
    }
}

pub(crate) fn default_not_found() -> Arc<dyn RequestHandler> {
    Arc::new(StaticHandler::not_found())
}

/// State shared by every worker of one running server.
pub(crate) struct ServerContext {
    /// Published copy-on-write; bindings made while running are picked up by
    /// the next request that finishes its headers.
    pub(crate) routes: Arc<ArcSwap<Routes>>,
    pub(crate) access_log: Option<Arc<AccessLog>>,
    pub(crate) limits: ConnLimits,
}
