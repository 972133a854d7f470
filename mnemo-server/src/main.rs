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

//! Mnemo MCP server binary.
//!
//! Serves the memory consolidation tools over newline-delimited JSON-RPC
//! on stdio. Logs go to stderr so stdout stays clean for the protocol.

use anyhow::Context;
use clap::Parser;
use mnemo_server::consolidation::ConsolidationEngine;
use mnemo_server::mcp::tools::register_consolidation_tools;
use mnemo_server::mcp::{McpHandler, McpServer, StdioTransport, ToolRegistry};
use mnemo_server::{InMemoryRepository, ServerConfig};
use mnemo_core::{Memory, MemoryRepository};
use mnemo_index::HashEmbeddingProvider;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mnemo-server", about = "Memory consolidation MCP server", version)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, env = "MNEMO_CONFIG")]
    config: Option<PathBuf>,

    /// Path to a JSON file of memories to load at startup
    #[arg(long)]
    seed: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct SeedMemory {
    #[serde(default)]
    id: Option<String>,
    content: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    author: Option<String>,
}

async fn load_seed(repository: &InMemoryRepository, path: &PathBuf) -> anyhow::Result<usize> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading seed file {}", path.display()))?;
    let seeds: Vec<SeedMemory> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

    let count = seeds.len();
    for seed in seeds {
        let mut memory = Memory::new(seed.content);
        if let Some(id) = seed.id {
            memory = memory.with_id(id);
        }
        if !seed.tags.is_empty() {
            memory = memory.with_tags(seed.tags);
        }
        if let Some(author) = seed.author {
            memory = memory.with_author(author);
        }
        repository.create(memory).await?;
    }
    Ok(count)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = ServerConfig::load(args.config.as_deref()).context("loading configuration")?;
    info!(
        server_name = %config.server_name,
        embedding_dimension = config.embedding_dimension,
        "starting"
    );

    let repository = Arc::new(InMemoryRepository::new());
    if let Some(seed) = &args.seed {
        let count = load_seed(&repository, seed).await?;
        info!(count, path = %seed.display(), "seeded memories");
    }

    let provider = Arc::new(HashEmbeddingProvider::new(config.embedding_dimension));
    let engine = Arc::new(
        ConsolidationEngine::new(
            repository.clone(),
            provider,
            config.lenient_algorithm_fallback,
        )
        .with_embed_concurrency(config.embed_concurrency),
    );

    let shutdown = CancellationToken::new();
    let registry = Arc::new(ToolRegistry::new());
    register_consolidation_tools(&registry, engine, shutdown.clone())
        .context("registering tools")?;

    let handler = McpHandler::new(config.server_name.clone(), registry);
    let server = McpServer::new(handler, Arc::new(StdioTransport::new()), shutdown.clone());

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_shutdown.cancel();
        }
    });

    server.serve().await?;
    info!("stopped");
    Ok(())
}
