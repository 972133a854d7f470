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

//! MCP (Model Context Protocol) server layer.
//!
//! JSON-RPC 2.0 over newline-delimited stdio, exposing the consolidation
//! engine as nine tools with schema-validated inputs.

pub mod handlers;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod tools;
pub mod transport;

pub use handlers::McpHandler;
pub use registry::{McpTool, RegistrationError, ToolContext, ToolError, ToolRegistry, ToolResult};
pub use server::McpServer;
pub use transport::{BufferTransport, McpTransport, StdioTransport, TransportError};
