//! # agentflow-checkpoint - State Persistence for Workflow Runs
//!
//! Trait-based checkpoint abstractions and implementations for persisting
//! and restoring workflow execution state. Checkpoints are snapshots of a
//! run captured at superstep boundaries; they enable pause/resume,
//! deterministic replay, rollback to an earlier point, and recovery after
//! a crash.
//!
//! ## Core concepts
//!
//! - [`Checkpoint`] — an immutable snapshot: run ID, step number, timestamp,
//!   and an opaque JSON state blob exported by the engine.
//! - [`CheckpointInfo`] — the lightweight handle callers keep; identifies a
//!   checkpoint without carrying its state.
//! - [`CheckpointStore`] — the persistence trait. Ships with
//!   [`MemoryCheckpointStore`] (default, ephemeral) and
//!   [`FileCheckpointStore`] (one JSON file per checkpoint).
//! - [`CheckpointManager`] — per-run lifecycle: derives content-based IDs,
//!   persists snapshots, restores them verbatim, prunes history.
//! - [`SerializerProtocol`] — pluggable byte-level serialization
//!   ([`JsonSerializer`], [`BincodeSerializer`]) for custom backends.
//!
//! ## Flow
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  agentflow-core (superstep scheduler)         │
//! │  exports RunSnapshot as JSON after each step  │
//! └────────────────────┬──────────────────────────┘
//!                      │ create_checkpoint(step, state)
//!                      ▼
//! ┌───────────────────────────────────────────────┐
//! │  CheckpointManager (this crate)               │
//! │  content-hash ID · parent chain · restore     │
//! └────────────────────┬──────────────────────────┘
//!                      │ CheckpointStore trait
//!          ┌───────────┴───────────┐
//!          ▼                       ▼
//!   MemoryCheckpointStore   FileCheckpointStore
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use agentflow_checkpoint::{CheckpointManager, MemoryCheckpointStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = CheckpointManager::new(Arc::new(MemoryCheckpointStore::new()));
//!
//!     let info = manager
//!         .create_checkpoint(0, serde_json::json!({"messages": []}), None)
//!         .await?;
//!
//!     // Restores are repeatable: the stored checkpoint is never mutated.
//!     let state = manager.restore_checkpoint(&info).await?;
//!     assert_eq!(state["messages"], serde_json::json!([]));
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod error;
pub mod manager;
pub mod serializer;
pub mod store;

pub use checkpoint::{Checkpoint, CheckpointId, CheckpointInfo};
pub use error::{CheckpointError, Result};
pub use manager::CheckpointManager;
pub use serializer::{BincodeSerializer, JsonSerializer, SerializerProtocol};
pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
