// Copyright 2025 Mnemo Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! MCP transport layer.
//!
//! Newline-delimited JSON over stdio for production, an in-memory channel
//! transport for tests.

use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::trace;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Channel closed")]
    ChannelClosed,
}

/// Transport abstraction: one request in, one response out.
///
/// `recv` returns `Ok(None)` on a clean end of stream.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn recv(&self) -> Result<Option<JsonRpcRequest>, TransportError>;
    async fn send(&self, response: JsonRpcResponse) -> Result<(), TransportError>;
}

/// Newline-delimited JSON over stdin/stdout
pub struct StdioTransport {
    stdin: Mutex<BufReader<Stdin>>,
    stdout: Mutex<Stdout>,
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            stdin: Mutex::new(BufReader::new(tokio::io::stdin())),
            stdout: Mutex::new(tokio::io::stdout()),
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn recv(&self) -> Result<Option<JsonRpcRequest>, TransportError> {
        let mut stdin = self.stdin.lock().await;
        loop {
            let mut line = String::new();
            let n = stdin.read_line(&mut line).await?;
            if n == 0 {
                return Ok(None);
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            trace!(len = line.len(), "received request line");
            return Ok(Some(serde_json::from_str(line)?));
        }
    }

    async fn send(&self, response: JsonRpcResponse) -> Result<(), TransportError> {
        let mut payload = serde_json::to_vec(&response)?;
        payload.push(b'\n');
        let mut stdout = self.stdout.lock().await;
        stdout.write_all(&payload).await?;
        stdout.flush().await?;
        Ok(())
    }
}

/// In-memory transport for tests: requests come from a channel, responses
/// go into one
pub struct BufferTransport {
    incoming: Mutex<mpsc::UnboundedReceiver<JsonRpcRequest>>,
    outgoing: mpsc::UnboundedSender<JsonRpcResponse>,
}

impl BufferTransport {
    /// Returns the transport plus the client-side handles: a sender for
    /// requests and a receiver for responses.
    pub fn new() -> (
        Self,
        mpsc::UnboundedSender<JsonRpcRequest>,
        mpsc::UnboundedReceiver<JsonRpcResponse>,
    ) {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        (
            Self {
                incoming: Mutex::new(req_rx),
                outgoing: resp_tx,
            },
            req_tx,
            resp_rx,
        )
    }
}

#[async_trait]
impl McpTransport for BufferTransport {
    async fn recv(&self) -> Result<Option<JsonRpcRequest>, TransportError> {
        Ok(self.incoming.lock().await.recv().await)
    }

    async fn send(&self, response: JsonRpcResponse) -> Result<(), TransportError> {
        self.outgoing
            .send(response)
            .map_err(|_| TransportError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{JsonRpcId, JSONRPC_VERSION};

    #[tokio::test]
    async fn test_buffer_transport_round_trip() {
        let (transport, req_tx, mut resp_rx) = BufferTransport::new();

        req_tx
            .send(JsonRpcRequest {
                jsonrpc: JSONRPC_VERSION.to_string(),
                method: "ping".to_string(),
                params: None,
                id: JsonRpcId::Number(1),
            })
            .unwrap();

        let received = transport.recv().await.unwrap().unwrap();
        assert_eq!(received.method, "ping");

        transport
            .send(JsonRpcResponse::success(
                JsonRpcId::Number(1),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        let response = resp_rx.recv().await.unwrap();
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_buffer_transport_eof() {
        let (transport, req_tx, _resp_rx) = BufferTransport::new();
        drop(req_tx);
        assert!(transport.recv().await.unwrap().is_none());
    }
}
