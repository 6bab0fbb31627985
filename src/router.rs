//! Path routing tree with single-segment wildcards.

use crate::{errors::ServerError, handler::RequestHandler, http::encoding::normalize_path};
use std::{fmt, sync::Arc};

const ROOT: usize = 0;

#[derive(Clone)]
struct RouteNode {
    segment: String,
    children: Vec<usize>,
    fallback: Option<usize>,
    handler: Option<Arc<dyn RequestHandler>>,
}

impl RouteNode {
    fn new(segment: &str) -> Self {
        Self {
            segment: segment.to_string(),
            children: Vec::new(),
            fallback: None,
            handler: None,
        }
    }
}

/// Maps normalized paths to handlers, one segment per node.
///
/// Nodes live in one arena and refer to each other by index. A `*` segment
/// in a bound path is the node's fallback child: it matches any single
/// segment that has no exact child, and the matched text is captured.
#[derive(Clone)]
pub(crate) struct RouteTree {
    nodes: Vec<RouteNode>,
}

impl RouteTree {
    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![RouteNode::new("")],
        }
    }

    /// Binds `handler` to `path`, replacing any handler already bound there.
    pub(crate) fn bind(
        &mut self,
        path: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), ServerError> {
        if !path.starts_with('/') {
            return Err(ServerError::InvalidRoute(path.to_string()));
        }

        let path = normalize_path(path);
        let mut node = ROOT;

        for segment in segments(&path) {
            node = match segment {
                "*" => self.fallback_or_insert(node),
                _ => self.child_or_insert(node, segment),
            };
        }

        self.nodes[node].handler = Some(handler);
        Ok(())
    }

    /// Resolves an already normalized path without its query string.
    ///
    /// Returns `None` when a segment matches nothing or the final node has no
    /// handler.
    pub(crate) fn route(&self, path: &str) -> Option<(Arc<dyn RequestHandler>, Vec<String>)> {
        let mut wildcards = Vec::new();
        let mut node = ROOT;

        for segment in segments(path) {
            node = match self.child(node, segment) {
                Some(child) => child,
                None => {
                    let fallback = self.nodes[node].fallback?;
                    wildcards.push(segment.to_string());
                    fallback
                }
            };
        }

        let handler = self.nodes[node].handler.clone()?;
        Some((handler, wildcards))
    }

    fn child(&self, node: usize, segment: &str) -> Option<usize> {
        self.nodes[node]
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes[child].segment == segment)
    }

    fn child_or_insert(&mut self, node: usize, segment: &str) -> usize {
        if let Some(child) = self.child(node, segment) {
            return child;
        }

        let child = self.push(RouteNode::new(segment));
        self.nodes[node].children.push(child);
        child
    }

    fn fallback_or_insert(&mut self, node: usize) -> usize {
        if let Some(fallback) = self.nodes[node].fallback {
            return fallback;
        }

        let fallback = self.push(RouteNode::new("*"));
        self.nodes[node].fallback = Some(fallback);
        fallback
    }

    fn push(&mut self, node: RouteNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }
}

impl fmt::Debug for RouteTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTree")
            .field("nodes", &self.nodes.len())
            .field(
                "bound",
                &self.nodes.iter().filter(|n| n.handler.is_some()).count(),
            )
            .finish()
    }
}

#[inline]
fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}
