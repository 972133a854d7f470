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

//! MCP request dispatch.
//!
//! Maps JSON-RPC methods onto the tool registry. Tool-level domain
//! failures come back as `isError` tool results; only protocol-level
//! problems (unknown method, bad params, unknown tool) become JSON-RPC
//! errors.

use crate::mcp::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, LoggingCapability, ServerCapabilities,
    ServerInfo, Tool, ToolContent, ToolsCapability, JSONRPC_VERSION, MCP_PROTOCOL_VERSION,
};
use crate::mcp::registry::{ToolContext, ToolError, ToolRegistry};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct McpHandler {
    server_name: String,
    registry: Arc<ToolRegistry>,
}

impl McpHandler {
    pub fn new(server_name: impl Into<String>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            server_name: server_name.into(),
            registry,
        }
    }

    /// Dispatch one request. Returns `None` for notifications, which get
    /// no response.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::parse_error(format!(
                    "Unsupported JSON-RPC version: {}",
                    request.jsonrpc
                )),
            ));
        }

        debug!(method = %request.method, "handling request");
        match request.method.as_str() {
            "ping" => Some(JsonRpcResponse::success(request.id, json!({}))),
            "initialize" => Some(self.handle_initialize(request)),
            "initialized" | "notifications/initialized" => {
                info!("client initialized");
                None
            }
            "notifications/cancelled" => None,
            "tools/list" => Some(self.handle_tools_list(request)),
            "tools/call" => Some(self.handle_tools_call(request).await),
            method => Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::method_not_found(method),
            )),
        }
    }

    fn handle_initialize(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params: InitializeParams = match request
            .params
            .ok_or_else(|| "missing params".to_string())
            .and_then(|p| serde_json::from_value(p).map_err(|e| e.to_string()))
        {
            Ok(params) => params,
            Err(e) => {
                return JsonRpcResponse::error(request.id, JsonRpcError::invalid_params(e));
            }
        };

        info!(
            client = %params.client_info.name,
            version = %params.client_info.version,
            protocol = %params.protocol_version,
            "initialize"
        );
        if params.protocol_version != MCP_PROTOCOL_VERSION {
            warn!(
                requested = %params.protocol_version,
                supported = MCP_PROTOCOL_VERSION,
                "protocol version mismatch, proceeding with supported version"
            );
        }

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
                logging: Some(LoggingCapability {}),
            },
            server_info: ServerInfo {
                name: self.server_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => JsonRpcResponse::error(request.id, JsonRpcError::internal_error(e.to_string())),
        }
    }

    fn handle_tools_list(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let tools: Vec<Tool> = self
            .registry
            .list()
            .into_iter()
            .map(|entry| Tool {
                name: entry.name,
                description: Some(entry.description),
                input_schema: entry.input_schema,
            })
            .collect();
        let result = ListToolsResult {
            tools,
            next_cursor: None,
        };
        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => JsonRpcResponse::error(request.id, JsonRpcError::internal_error(e.to_string())),
        }
    }

    async fn handle_tools_call(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params: CallToolParams = match request
            .params
            .clone()
            .ok_or_else(|| "missing params".to_string())
            .and_then(|p| serde_json::from_value(p).map_err(|e| e.to_string()))
        {
            Ok(params) => params,
            Err(e) => {
                return JsonRpcResponse::error(request.id, JsonRpcError::invalid_params(e));
            }
        };

        let context = ToolContext {
            request_id: serde_json::to_value(&request.id).ok(),
        };
        let arguments = serde_json::to_value(&params.arguments).unwrap_or(json!({}));

        match self
            .registry
            .execute(&params.name, arguments, &context)
            .await
        {
            Ok(result) => {
                let text = result.content.to_string();
                let call_result = CallToolResult {
                    content: vec![ToolContent::Text { text }],
                    is_error: result.is_error.then_some(true),
                };
                match serde_json::to_value(call_result) {
                    Ok(value) => JsonRpcResponse::success(request.id, value),
                    Err(e) => JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::internal_error(e.to_string()),
                    ),
                }
            }
            Err(ToolError::NotFound(name)) => JsonRpcResponse::error(
                request.id,
                JsonRpcError::invalid_params(format!("Unknown tool: {}", name)),
            ),
            Err(ToolError::InvalidParams(message)) => {
                JsonRpcResponse::error(request.id, JsonRpcError::invalid_params(message))
            }
            Err(ToolError::Execution(message)) => {
                JsonRpcResponse::error(request.id, JsonRpcError::internal_error(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::JsonRpcId;
    use crate::mcp::registry::{McpTool, ToolResult};
    use async_trait::async_trait;
    use serde_json::Value;

    struct FailTool {
        schema: Value,
    }

    #[async_trait]
    impl McpTool for FailTool {
        fn name(&self) -> &str {
            "always_fails"
        }
        fn description(&self) -> &str {
            "Always returns a domain error"
        }
        fn input_schema(&self) -> &Value {
            &self.schema
        }
        async fn execute(
            &self,
            _params: Value,
            _context: &ToolContext,
        ) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::err("Something failed: nope"))
        }
    }

    fn handler_with_fail_tool() -> McpHandler {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(Arc::new(FailTool {
                schema: json!({"type": "object"}),
            }))
            .unwrap();
        McpHandler::new("test-server", registry)
    }

    fn request(method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: JsonRpcId::Number(1),
        }
    }

    #[tokio::test]
    async fn test_ping() {
        let handler = handler_with_fail_tool();
        let response = handler.handle(request("ping", None)).await.unwrap();
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_initialized_notification_has_no_response() {
        let handler = handler_with_fail_tool();
        assert!(handler
            .handle(request("notifications/initialized", None))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let handler = handler_with_fail_tool();
        let response = handler.handle(request("bogus", None)).await.unwrap();
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_tools_list() {
        let handler = handler_with_fail_tool();
        let response = handler.handle(request("tools/list", None)).await.unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["tools"].as_array().unwrap().len(), 1);
        assert_eq!(result["tools"][0]["name"], "always_fails");
    }

    #[tokio::test]
    async fn test_domain_failure_is_tool_output_not_rpc_error() {
        let handler = handler_with_fail_tool();
        let response = handler
            .handle(request(
                "tools/call",
                Some(json!({"name": "always_fails", "arguments": {}})),
            ))
            .await
            .unwrap();
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("Something failed"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_rpc_error() {
        let handler = handler_with_fail_tool();
        let response = handler
            .handle(request(
                "tools/call",
                Some(json!({"name": "missing", "arguments": {}})),
            ))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn test_initialize() {
        let handler = handler_with_fail_tool();
        let response = handler
            .handle(request(
                "initialize",
                Some(json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "test-client", "version": "0.1.0"}
                })),
            ))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "test-server");
    }
}
