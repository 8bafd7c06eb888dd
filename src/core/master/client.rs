// src/core/master/client.rs

//! The outgoing RPC client for the master dialog.

use super::messages::{
    Instruction, MasterRequest, MasterResponse, OutboundMessage, ServerIdentity, ServerLoad,
};
use crate::core::RegionServerError;
use crate::core::protocol::RpcCodec;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

/// The two calls this server makes against the master. Abstracted behind a
/// trait so the control loop can be driven by an in-process master in tests.
#[async_trait]
pub trait MasterClient: Send + Sync {
    /// Reports for duty. The response carries configuration overrides,
    /// including the root directory path.
    async fn startup(
        &self,
        identity: &ServerIdentity,
    ) -> Result<HashMap<String, String>, RegionServerError>;

    /// Delivers buffered outbound messages and the current load; returns the
    /// master's instructions.
    async fn report(
        &self,
        identity: &ServerIdentity,
        load: ServerLoad,
        messages: Vec<OutboundMessage>,
    ) -> Result<Vec<Instruction>, RegionServerError>;
}

/// The production client: one short-lived framed TCP exchange per call.
pub struct TcpMasterClient {
    address: SocketAddr,
    timeout: Duration,
}

impl TcpMasterClient {
    pub fn new(address: SocketAddr, timeout: Duration) -> Self {
        Self { address, timeout }
    }

    async fn call(&self, request: MasterRequest) -> Result<MasterResponse, RegionServerError> {
        let exchange = async {
            let stream = TcpStream::connect(self.address).await?;
            let mut framed = Framed::new(
                stream,
                RpcCodec::<MasterResponse, MasterRequest>::new(),
            );
            framed.send(request).await?;
            match framed.next().await {
                Some(response) => response,
                None => Err(RegionServerError::IoString(
                    "master closed the connection without responding".to_string(),
                )),
            }
        };
        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                RegionServerError::IoString(format!(
                    "master call to {} timed out after {:?}",
                    self.address, self.timeout
                ))
            })??;
        match response {
            MasterResponse::Error { kind, message } => {
                Err(RegionServerError::from_wire(&kind, message))
            }
            other => Ok(other),
        }
    }
}

#[async_trait]
impl MasterClient for TcpMasterClient {
    async fn startup(
        &self,
        identity: &ServerIdentity,
    ) -> Result<HashMap<String, String>, RegionServerError> {
        debug!("Reporting for duty to master at {}", self.address);
        match self
            .call(MasterRequest::Startup {
                identity: identity.clone(),
            })
            .await?
        {
            MasterResponse::Startup { config } => Ok(config),
            other => Err(RegionServerError::Protocol(format!(
                "unexpected master response to startup: {other:?}"
            ))),
        }
    }

    async fn report(
        &self,
        identity: &ServerIdentity,
        load: ServerLoad,
        messages: Vec<OutboundMessage>,
    ) -> Result<Vec<Instruction>, RegionServerError> {
        match self
            .call(MasterRequest::Report {
                identity: identity.clone(),
                load,
                messages,
            })
            .await?
        {
            MasterResponse::Report { instructions } => Ok(instructions),
            other => Err(RegionServerError::Protocol(format!(
                "unexpected master response to report: {other:?}"
            ))),
        }
    }
}
