//! Priority routing tree.
//!
//! Each node carries a [`Filter`], an optional handler and an ordered list
//! of children. Traversal is depth-first and pre-order: a node whose filter
//! rejects the update is skipped with its whole subtree, children are tried
//! in registration order, and the first subtree that produces a handler
//! wins. A node falls back to its own handler only when no child matched.
//!
//! The tree is assembled with [`RouterBuilder`] and frozen in [`Router`];
//! nothing can be added once traversal is possible.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::handler::Handler;
use crate::types::Update;

pub mod filter;

pub use filter::{Filter, Predicate};

/// Tag of the root node.
pub const ROOT_ROUTE: &str = "root";

/// One node of the frozen tree.
struct RouteNode {
    name: String,
    filter: Filter,
    handler: Option<Arc<dyn Handler>>,
    children: Vec<RouteNode>,
}

impl RouteNode {
    fn walk(&self, update: &Update) -> Option<&RouteNode> {
        if !self.filter.accepts(update) {
            return None;
        }
        for child in &self.children {
            if let Some(hit) = child.walk(update) {
                return Some(hit);
            }
        }
        self.handler.as_ref().map(|_| self)
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        out.push(&self.name);
        for child in &self.children {
            child.collect_names(out);
        }
    }
}

/// The node selected for an update.
pub struct Route<'a> {
    name: &'a str,
    handler: &'a Arc<dyn Handler>,
}

impl<'a> Route<'a> {
    /// Tag of the matched node.
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Handler that will run.
    pub fn handler(&self) -> &'a Arc<dyn Handler> {
        self.handler
    }
}

/// Immutable routing tree. Implements [`Handler`], so it can be handed
/// straight to the poller.
pub struct Router {
    root: RouteNode,
}

impl Router {
    /// Start building a tree whose root accepts every update.
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    /// Pure traversal: find the handler for `update` without running it.
    pub fn resolve(&self, update: &Update) -> Option<Route<'_>> {
        let node = self.root.walk(update)?;
        let handler = node.handler.as_ref()?;
        Some(Route {
            name: &node.name,
            handler,
        })
    }

    /// Node tags in traversal (pre-)order, root first.
    pub fn route_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.root.collect_names(&mut names);
        names
    }
}

#[async_trait]
impl Handler for Router {
    async fn handle_update(&self, cancel: CancellationToken, update: &Update) {
        let Some(route) = self.resolve(update) else {
            debug!(update_id = update.id, "no route matched update");
            return;
        };
        debug!(update_id = update.id, route = route.name(), "routing update");
        route.handler().handle_update(cancel, update).await;
    }
}

/// Builder for one level of the tree. Children keep registration order,
/// which is their priority.
#[derive(Default)]
pub struct RouterBuilder {
    handler: Option<Arc<dyn Handler>>,
    children: Vec<RouteNode>,
}

impl RouterBuilder {
    /// Handler used when no child at this level matches.
    pub fn fallback(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Append a leaf.
    pub fn route(
        mut self,
        name: impl Into<String>,
        filter: Filter,
        handler: Arc<dyn Handler>,
    ) -> Self {
        self.children.push(RouteNode {
            name: name.into(),
            filter,
            handler: Some(handler),
            children: Vec::new(),
        });
        self
    }

    /// Append an interior node whose subtree is built by `build`.
    ///
    /// The nested builder may set its own `fallback`, which runs when the
    /// branch filter accepts but none of its children do.
    pub fn branch<F>(mut self, name: impl Into<String>, filter: Filter, build: F) -> Self
    where
        F: FnOnce(RouterBuilder) -> RouterBuilder,
    {
        let nested = build(RouterBuilder::default());
        self.children.push(nested.into_node(name.into(), filter));
        self
    }

    /// Freeze the tree.
    pub fn build(self) -> Router {
        Router {
            root: self.into_node(ROOT_ROUTE.to_owned(), Filter::Any),
        }
    }

    fn into_node(self, name: String, filter: Filter) -> RouteNode {
        RouteNode {
            name,
            filter,
            handler: self.handler,
            children: self.children,
        }
    }
}
