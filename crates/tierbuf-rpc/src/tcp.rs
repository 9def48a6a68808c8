//! Blocking TCP transport.
//!
//! Frames from [`crate::wire`] over plain TCP: the caller keeps one cached
//! connection per peer and holds it for the duration of a call (requests on
//! one connection are strictly request/response); the server runs one thread
//! per accepted connection. Peer addresses are indexed by node id, so the
//! peer list must be identical on every node.

use crate::error::{Result, RpcError};
use crate::wire::{read_frame, write_frame, Request, Response};
use crate::{Rpc, RpcHandler};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Caller-side transport: cached connections to every peer.
pub struct TcpTransport {
    node_id: u32,
    peers: Vec<String>,
    connections: Mutex<HashMap<u32, TcpStream>>,
}

impl TcpTransport {
    /// Create a transport for `node_id` with `peers[i]` the listen address
    /// of node `i + 1`.
    #[must_use]
    pub fn new(node_id: u32, peers: Vec<String>) -> Self {
        Self {
            node_id,
            peers,
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn checkout(&self, target_node: u32) -> Result<TcpStream> {
        if target_node == 0 {
            return Err(RpcError::UnknownNode(target_node));
        }
        if let Some(stream) = self.connections.lock().remove(&target_node) {
            return Ok(stream);
        }
        let addr = self
            .peers
            .get(target_node as usize - 1)
            .ok_or(RpcError::UnknownNode(target_node))?;
        debug!(target_node, %addr, "connecting");
        TcpStream::connect(addr).map_err(|source| RpcError::Connect {
            node: target_node,
            addr: addr.clone(),
            source,
        })
    }

    fn checkin(&self, target_node: u32, stream: TcpStream) {
        self.connections.lock().insert(target_node, stream);
    }
}

fn tag_node(err: RpcError, node: u32) -> RpcError {
    match err {
        RpcError::Io { source, .. } => RpcError::Io { node, source },
        other => other,
    }
}

impl Rpc for TcpTransport {
    fn node_id(&self) -> u32 {
        self.node_id
    }

    fn num_nodes(&self) -> u32 {
        (self.peers.len() as u32).max(1)
    }

    fn call(&self, target_node: u32, request: Request) -> Result<Response> {
        let mut stream = self.checkout(target_node)?;

        let result = write_frame(&mut stream, &request).and_then(|()| {
            read_frame::<Response>(&mut stream)?.ok_or_else(|| RpcError::Io {
                node: target_node,
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-call",
                ),
            })
        });

        match result {
            Ok(response) => {
                self.checkin(target_node, stream);
                Ok(response)
            }
            // The stream may hold a partial frame; drop it and reconnect on
            // the next call.
            Err(err) => Err(tag_node(err, target_node)),
        }
    }
}

/// Server side: accept connections and feed requests to a handler.
pub struct RpcServer {
    listener: TcpListener,
}

impl RpcServer {
    /// Bind the listen socket.
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|source| RpcError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self { listener })
    }

    /// The bound address (useful with a port of 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|source| RpcError::Io { node: 0, source })
    }

    /// Accept connections forever, one thread per connection.
    pub fn spawn(self, handler: Arc<dyn RpcHandler>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            if let Ok(addr) = self.listener.local_addr() {
                info!(%addr, "metadata rpc server listening");
            }
            for stream in self.listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let handler = Arc::clone(&handler);
                        thread::spawn(move || serve_connection(stream, &*handler));
                    }
                    Err(err) => warn!(%err, "accept failed"),
                }
            }
        })
    }
}

fn serve_connection(stream: TcpStream, handler: &dyn RpcHandler) {
    let peer = stream.peer_addr().ok();
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            warn!(?peer, %err, "failed to clone connection");
            return;
        }
    };
    let mut reader = BufReader::new(stream);

    loop {
        match read_frame::<Request>(&mut reader) {
            Ok(Some(request)) => {
                let response = handler.handle(request);
                if let Err(err) = write_frame(&mut writer, &response) {
                    debug!(?peer, %err, "failed to write response");
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                debug!(?peer, %err, "failed to read request");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierbuf_common::MapType;

    struct Echo;

    impl RpcHandler for Echo {
        fn handle(&self, request: Request) -> Response {
            match request {
                Request::Get { key, .. } => Response::Name(key),
                _ => Response::Unit,
            }
        }
    }

    #[test]
    fn test_call_round_trip_over_tcp() {
        let server = RpcServer::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let _server_thread = server.spawn(Arc::new(Echo));

        let transport = TcpTransport::new(1, vec!["127.0.0.1:1".to_string(), addr]);
        for _ in 0..3 {
            let response = transport
                .call(
                    2,
                    Request::Get {
                        key: "ping".into(),
                        map: MapType::Blob,
                    },
                )
                .unwrap();
            assert_eq!(response.into_name().unwrap(), "ping");
        }
    }

    #[test]
    fn test_unknown_node() {
        let transport = TcpTransport::new(1, vec!["127.0.0.1:1".to_string()]);
        assert!(matches!(
            transport.call(5, Request::GetNodeTargets),
            Err(RpcError::UnknownNode(5))
        ));
    }
}
