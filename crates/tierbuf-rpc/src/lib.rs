//! Tierbuf RPC - node-to-node calls for the metadata plane.
//!
//! Every metadata operation first computes a target node; if the target is
//! not the local node, the operation ships its arguments to the target's
//! `Local*` entry point as a [`Request`] and blocks on the [`Response`].
//! This crate defines that wire protocol, the [`Rpc`] caller trait and
//! [`RpcHandler`] server trait, a blocking TCP transport, and an in-process
//! router for single-process clusters and tests.

pub mod error;
pub mod mem;
pub mod ring;
pub mod tcp;
pub mod wire;

pub use error::{Result, RpcError};
pub use mem::{InProcessRouter, InProcessRpc};
pub use ring::{next_node, previous_node, relative_node_id};
pub use tcp::{RpcServer, TcpTransport};
pub use wire::{Request, Response};

use std::sync::Arc;

/// Server side of the metadata RPC surface: one entry point per `Local*`
/// operation, keyed by [`Request`] variant.
pub trait RpcHandler: Send + Sync {
    /// Execute `request` against this node's metadata manager.
    fn handle(&self, request: Request) -> Response;
}

/// Client side: issue a request to a target node and wait for its response.
pub trait Rpc: Send + Sync {
    /// This node's id, in [1..N].
    fn node_id(&self) -> u32;

    /// Number of nodes in the cluster.
    fn num_nodes(&self) -> u32;

    /// Call `Local*` on `target_node` and wait for the result.
    fn call(&self, target_node: u32, request: Request) -> Result<Response>;
}

impl<T: Rpc + ?Sized> Rpc for Arc<T> {
    fn node_id(&self) -> u32 {
        (**self).node_id()
    }

    fn num_nodes(&self) -> u32 {
        (**self).num_nodes()
    }

    fn call(&self, target_node: u32, request: Request) -> Result<Response> {
        (**self).call(target_node, request)
    }
}
