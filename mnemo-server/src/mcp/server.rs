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

//! MCP server loop.

use crate::mcp::handlers::McpHandler;
use crate::mcp::protocol::{JsonRpcError, JsonRpcId, JsonRpcResponse};
use crate::mcp::transport::{McpTransport, TransportError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Serves MCP requests from a transport until end of stream or shutdown.
pub struct McpServer {
    handler: McpHandler,
    transport: Arc<dyn McpTransport>,
    shutdown: CancellationToken,
}

impl McpServer {
    pub fn new(
        handler: McpHandler,
        transport: Arc<dyn McpTransport>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            handler,
            transport,
            shutdown,
        }
    }

    /// Request loop. Requests are handled one at a time; malformed JSON
    /// gets a parse-error response and the loop continues.
    pub async fn serve(&self) -> Result<(), TransportError> {
        info!("MCP server started");
        loop {
            let request = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested");
                    return Ok(());
                }
                request = self.transport.recv() => request,
            };

            let request = match request {
                Ok(Some(request)) => request,
                Ok(None) => {
                    info!("end of stream");
                    return Ok(());
                }
                Err(TransportError::Json(e)) => {
                    let response = JsonRpcResponse::error(
                        JsonRpcId::Null,
                        JsonRpcError::parse_error(e.to_string()),
                    );
                    self.transport.send(response).await?;
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "transport receive failed");
                    return Err(e);
                }
            };

            if let Some(response) = self.handler.handle(request).await {
                self.transport.send(response).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{JsonRpcRequest, JSONRPC_VERSION};
    use crate::mcp::registry::ToolRegistry;
    use crate::mcp::transport::BufferTransport;

    #[tokio::test]
    async fn test_serve_until_eof() {
        let (transport, req_tx, mut resp_rx) = BufferTransport::new();
        let handler = McpHandler::new("test", Arc::new(ToolRegistry::new()));
        let server = McpServer::new(handler, Arc::new(transport), CancellationToken::new());

        req_tx
            .send(JsonRpcRequest {
                jsonrpc: JSONRPC_VERSION.to_string(),
                method: "ping".to_string(),
                params: None,
                id: JsonRpcId::Number(1),
            })
            .unwrap();
        drop(req_tx);

        server.serve().await.unwrap();
        let response = resp_rx.recv().await.unwrap();
        assert!(response.error.is_none());
        assert_eq!(response.id, JsonRpcId::Number(1));
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let (transport, _req_tx, _resp_rx) = BufferTransport::new();
        let handler = McpHandler::new("test", Arc::new(ToolRegistry::new()));
        let shutdown = CancellationToken::new();
        let server = McpServer::new(handler, Arc::new(transport), shutdown.clone());

        shutdown.cancel();
        server.serve().await.unwrap();
    }
}
