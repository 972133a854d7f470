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

//! Index layer errors

use thiserror::Error;

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors from embedding or similarity search
#[derive(Debug, Error)]
pub enum IndexError {
    /// Embedding provider failure
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector dimension does not match the index
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Index construction or search failure
    #[error("Index error: {0}")]
    Index(String),
}

impl From<IndexError> for mnemo_core::MemoryError {
    fn from(e: IndexError) -> Self {
        mnemo_core::MemoryError::Computation(e.to_string())
    }
}
