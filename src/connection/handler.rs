// src/connection/handler.rs

//! Per-connection request handling: decode a frame, acquire a handler
//! permit, dispatch through the front end, answer.

use crate::core::frontend::FrontEnd;
use crate::core::protocol::{Request, Response, RpcCodec};
use crate::core::state::ServerState;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Semaphore, broadcast};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

pub struct ConnectionHandler {
    framed: Framed<TcpStream, RpcCodec<Request, Response>>,
    peer: SocketAddr,
    frontend: FrontEnd,
    permits: Arc<Semaphore>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ConnectionHandler {
    pub fn new(
        socket: TcpStream,
        peer: SocketAddr,
        state: Arc<ServerState>,
        permits: Arc<Semaphore>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            framed: Framed::new(socket, RpcCodec::new()),
            peer,
            frontend: FrontEnd::new(state),
            permits,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    break;
                }
                frame = self.framed.next() => {
                    match frame {
                        None => break,
                        Some(Err(e)) => {
                            warn!("Dropping connection from {}: {}", self.peer, e);
                            break;
                        }
                        Some(Ok(request)) => {
                            if !self.handle(request).await {
                                break;
                            }
                        }
                    }
                }
            }
        }
        debug!("Connection from {} closed", self.peer);
    }

    async fn handle(&mut self, request: Request) -> bool {
        let response = {
            let _permit = match self.permits.acquire().await {
                Ok(permit) => permit,
                Err(_) => return false,
            };
            self.frontend.dispatch(request).await
        };
        if let Err(e) = self.framed.send(response).await {
            warn!("Could not answer {}: {}", self.peer, e);
            return false;
        }
        true
    }
}
