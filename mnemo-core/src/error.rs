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

//! Shared error types for the memory system

use thiserror::Error;

/// Result type for memory operations
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Errors that can occur across the memory system.
///
/// Validation errors are surfaced verbatim to callers and never retried;
/// computation errors carry the failing operation in their message so the
/// origin stays visible after crossing the tool boundary.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Malformed or out-of-range input
    #[error("{0}")]
    Validation(String),

    /// A referenced memory id does not exist
    #[error("Memory not found: {0}")]
    NotFound(String),

    /// Embedding, indexing, or clustering failure
    #[error("{0}")]
    Computation(String),

    /// Repository failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MemoryError {
    /// Validation error for a similarity threshold outside `[0, 1]`.
    pub fn invalid_threshold(field: &str) -> Self {
        MemoryError::Validation(format!("{} must be between 0.0 and 1.0", field))
    }

    /// Wrap an error with the name of the failing operation.
    pub fn in_operation(operation: &str, err: impl std::fmt::Display) -> Self {
        MemoryError::Computation(format!("{} failed: {}", operation, err))
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        MemoryError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_threshold_message() {
        let err = MemoryError::invalid_threshold("similarity_threshold");
        assert_eq!(
            err.to_string(),
            "similarity_threshold must be between 0.0 and 1.0"
        );
    }

    #[test]
    fn test_operation_wrapping() {
        let inner = MemoryError::Storage("disk full".to_string());
        let wrapped = MemoryError::in_operation("clustering", inner);
        assert!(wrapped.to_string().starts_with("clustering failed:"));
    }
}
