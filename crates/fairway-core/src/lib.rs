//! # fairway-core: Pure Sync Rules for Fairway POS
//!
//! Data model and decision rules of the offline-first sync layer, with zero
//! I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Fairway Sync Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              POS web frontend (bookings, tabs, ...)             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ track_change / request                 │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │           fairway-sync (SyncEngine, ApiClient, agent)           │   │
//! │  └──────────────┬──────────────────────────────┬───────────────────┘   │
//! │                 │                              │                        │
//! │  ┌──────────────▼──────────────┐  ┌────────────▼────────────────────┐  │
//! │  │ ★ fairway-core (THIS) ★     │  │ fairway-store                   │  │
//! │  │ types • pending • backoff   │  │ LocalStore (key → string)       │  │
//! │  │ conflict • error taxonomy   │  │                                 │  │
//! │  └─────────────────────────────┘  └─────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - `PendingChange`, `FailedChange`, `QueuedRequest`, `Collection`
//! - [`pending`] - One-change-per-entity supersession, dead-letter bound
//! - [`backoff`] - Exponential backoff with jitter
//! - [`conflict`] - server-wins / client-wins / merge / manual
//! - [`document`] - `id` and `updatedAt` accessors on opaque documents
//! - [`error`] - `CoreError`, `ErrorCode`, `ApiError`
//!
//! ## Example Usage
//!
//! ```rust
//! use fairway_core::{supersede, Collection, Operation, PendingChange};
//! use serde_json::json;
//!
//! let bookings = Collection::new("bookings").unwrap();
//! let mut pending = Vec::new();
//!
//! supersede(&mut pending, PendingChange::new(bookings.clone(), Operation::Update, json!({"id": 5}), None, 0));
//! supersede(&mut pending, PendingChange::new(bookings, Operation::Delete, json!({"id": 5}), None, 1));
//!
//! assert_eq!(pending.len(), 1);
//! assert_eq!(pending[0].operation, Operation::Delete);
//! ```

pub mod backoff;
pub mod conflict;
pub mod document;
pub mod error;
pub mod pending;
pub mod types;

pub use backoff::RetryPolicy;
pub use conflict::{merge, resolve, ConflictPolicy, Resolution};
pub use document::{doc_id, set_doc_id, updated_at_millis, Document, ID_FIELD, UPDATED_AT_FIELD};
pub use error::{ApiError, CoreError, CoreResult, ErrorCode};
pub use pending::{push_dead_letter, supersede, Supersession};
pub use types::*;

/// Default number of dead-lettered changes kept for inspection.
pub const DEAD_LETTER_LIMIT: usize = 100;

/// Default bound of the offline request queue.
pub const MAX_QUEUE_SIZE: usize = 100;

/// Queued requests older than this are discarded on load (24 hours).
pub const QUEUE_RETENTION_MS: i64 = 24 * 60 * 60 * 1000;
