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

//! Server configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Server configuration, loaded from an optional TOML file with
/// `MNEMO_`-prefixed environment variable overrides
/// (e.g. `MNEMO_EMBEDDING_DIMENSION=512`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name reported during MCP initialization
    pub server_name: String,

    /// Dimension of the hashing embedding provider
    pub embedding_dimension: usize,

    /// Concurrent embedding requests during consolidation
    pub embed_concurrency: usize,

    /// Fall back to DBSCAN on an unrecognized clustering algorithm instead
    /// of rejecting the request
    pub lenient_algorithm_fallback: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "mnemo".to_string(),
            embedding_dimension: 256,
            embed_concurrency: 8,
            lenient_algorithm_fallback: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(config::Environment::with_prefix("MNEMO"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.server_name, "mnemo");
        assert_eq!(cfg.embedding_dimension, 256);
        assert!(!cfg.lenient_algorithm_fallback);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "server_name = \"mnemo-test\"\nembedding_dimension = 64"
        )
        .unwrap();

        let cfg = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.server_name, "mnemo-test");
        assert_eq!(cfg.embedding_dimension, 64);
        // Unspecified fields keep their defaults
        assert_eq!(cfg.embed_concurrency, 8);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let cfg = ServerConfig::load(None).unwrap();
        assert_eq!(cfg.embedding_dimension, 256);
    }
}
