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

//! Mnemo Server
//!
//! The memory consolidation engine and its MCP tool surface:
//! - `consolidation` — duplicate detection, clustering, knowledge-graph
//!   extraction, and the orchestrator tying them together
//! - `mcp` — JSON-RPC 2.0 protocol types, tool registry, request handler,
//!   and the stdio transport
//! - `store` — in-memory repository implementation
//! - `config` — server configuration (TOML file + env overrides)

pub mod config;
pub mod consolidation;
pub mod mcp;
pub mod store;

pub use config::ServerConfig;
pub use store::InMemoryRepository;
