//! In-process transport.
//!
//! Routes calls directly to the target node's handler without touching the
//! network. Used by single-process multi-node clusters (integration tests,
//! simulation) and as the degenerate transport of a one-node deployment,
//! where every dispatch resolves locally and `call` is never reached.

use crate::error::{Result, RpcError};
use crate::wire::{Request, Response};
use crate::{Rpc, RpcHandler};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry mapping node ids to their request handlers.
#[derive(Default)]
pub struct InProcessRouter {
    handlers: RwLock<HashMap<u32, Arc<dyn RpcHandler>>>,
}

impl InProcessRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `node_id`.
    pub fn register(&self, node_id: u32, handler: Arc<dyn RpcHandler>) {
        self.handlers.write().insert(node_id, handler);
    }

    fn route(&self, node_id: u32) -> Option<Arc<dyn RpcHandler>> {
        self.handlers.read().get(&node_id).cloned()
    }
}

/// One node's view of an [`InProcessRouter`].
pub struct InProcessRpc {
    node_id: u32,
    num_nodes: u32,
    router: Arc<InProcessRouter>,
}

impl InProcessRpc {
    /// Create the endpoint for `node_id` in a cluster of `num_nodes`.
    #[must_use]
    pub fn new(node_id: u32, num_nodes: u32, router: Arc<InProcessRouter>) -> Self {
        Self {
            node_id,
            num_nodes,
            router,
        }
    }
}

impl Rpc for InProcessRpc {
    fn node_id(&self) -> u32 {
        self.node_id
    }

    fn num_nodes(&self) -> u32 {
        self.num_nodes
    }

    fn call(&self, target_node: u32, request: Request) -> Result<Response> {
        let handler = self
            .router
            .route(target_node)
            .ok_or(RpcError::UnknownNode(target_node))?;
        Ok(handler.handle(request))
    }
}
