//! Upstream exchange boundary: marshal a query, ship it to a nameserver
//! address, unmarshal the response. The resolver core only sees this trait,
//! so tests drive the engine with scripted exchangers.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::trace;

use crate::dns::{decode_message, encode_message, Message};
use crate::errors::{ResolveError, Result};

pub const DNS_PORT: u16 = 53;

#[async_trait]
pub trait Exchanger: Send + Sync {
    /// Send `msg` to `addr` and return the parsed response. Truncated
    /// responses are returned as-is with the TC bit intact.
    async fn exchange(&self, msg: &Message, addr: SocketAddr) -> Result<Message>;
}

/// Plain UDP exchange with a per-query deadline.
#[derive(Debug)]
pub struct UdpExchanger {
    timeout: Duration,
}

impl UdpExchanger {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn exchange_inner(&self, msg: &Message, addr: SocketAddr) -> Result<Message> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(|e| ResolveError::Network(e.to_string()))?;
        socket
            .connect(addr)
            .await
            .map_err(|e| ResolveError::Network(e.to_string()))?;

        let query = encode_message(msg);
        socket
            .send(&query)
            .await
            .map_err(|e| ResolveError::Network(e.to_string()))?;

        let mut buf = vec![0u8; 4096];
        loop {
            let n = socket
                .recv(&mut buf)
                .await
                .map_err(|e| ResolveError::Network(e.to_string()))?;
            let response =
                decode_message(&buf[..n]).map_err(|e| ResolveError::Decode(e.to_string()))?;
            if response.id != msg.id {
                trace!(got = response.id, want = msg.id, "mismatched response id, ignoring");
                continue;
            }
            return Ok(response);
        }
    }
}

#[async_trait]
impl Exchanger for UdpExchanger {
    async fn exchange(&self, msg: &Message, addr: SocketAddr) -> Result<Message> {
        trace!(%addr, id = msg.id, "udp exchange");
        timeout(self.timeout, self.exchange_inner(msg, addr))
            .await
            .map_err(|_| ResolveError::Timeout)?
    }
}
