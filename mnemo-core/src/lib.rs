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

//! Mnemo Core
//!
//! Domain model for the Mnemo memory knowledge base:
//! - **Memory**: short text artifacts (notes, facts, conversation summaries)
//!   with tags, author, timestamps, and a lazily computed embedding
//! - **MemoryRepository**: the storage contract the consolidation engine
//!   reads from and writes merges back to
//! - **MemoryError**: the shared error taxonomy (validation, not-found,
//!   computation, storage)
//!
//! This crate is deliberately free of I/O; concrete repositories and the
//! embedding/similarity layer live in `mnemo-server` and `mnemo-index`.

pub mod error;
pub mod memory;
pub mod repository;

pub use error::{MemoryError, MemoryResult};
pub use memory::{Memory, MemoryId};
pub use repository::{MemoryFilter, MemoryRepository};
