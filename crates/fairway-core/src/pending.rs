//! # Pending Change Rules
//!
//! Supersession and dead-letter bookkeeping for a collection's pending list.
//!
//! ## Supersession
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │           At most ONE pending change per entity per collection          │
//! │                                                                         │
//! │  existing \ incoming │  create      update         delete               │
//! │  ────────────────────┼──────────────────────────────────────────────    │
//! │  (none)              │  append      append         append               │
//! │  create              │  replace     fold → create  cancel               │
//! │  update              │  replace     replace        replace              │
//! │  delete              │  KEEP DELETE KEEP DELETE    KEEP DELETE          │
//! │                                                                         │
//! │  fold:   the remote has never seen the entity, so the newer data        │
//! │          travels as a create.                                           │
//! │  cancel: the remote has never seen the entity, so nothing is sent and   │
//! │          the pending create is dropped.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A replacement always carries the incoming change's id, so a delivery that
//! is in flight for the superseded change can never remove the newer intent.

use std::collections::VecDeque;

use crate::types::{FailedChange, Operation, PendingChange};

/// Outcome of adding a change to a pending list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Supersession {
    /// No pending change existed for the entity.
    Added { id: String },
    /// An older change for the entity was dropped.
    Replaced { id: String, superseded: String },
    /// An update was folded into a pending create.
    Folded { id: String, superseded: String },
    /// A delete met a pending create; both were dropped.
    Cancelled { id: String, superseded: String },
    /// A pending delete already exists; the incoming change was discarded.
    KeptDelete { id: String },
}

impl Supersession {
    /// Id of the change now pending for the entity.
    pub fn change_id(&self) -> &str {
        match self {
            Supersession::Added { id }
            | Supersession::Replaced { id, .. }
            | Supersession::Folded { id, .. }
            | Supersession::Cancelled { id, .. }
            | Supersession::KeptDelete { id } => id,
        }
    }
}

/// Adds `incoming` to `list`, enforcing one pending change per entity.
pub fn supersede(list: &mut Vec<PendingChange>, mut incoming: PendingChange) -> Supersession {
    let Some(index) = list.iter().position(|existing| existing.same_entity(&incoming)) else {
        let id = incoming.id.clone();
        list.push(incoming);
        return Supersession::Added { id };
    };

    let existing = &list[index];
    if existing.operation == Operation::Delete {
        return Supersession::KeptDelete {
            id: existing.id.clone(),
        };
    }

    let superseded = existing.id.clone();
    if existing.operation == Operation::Create && incoming.operation == Operation::Delete {
        list.remove(index);
        return Supersession::Cancelled {
            id: incoming.id,
            superseded,
        };
    }

    if incoming.local_id.is_none() {
        incoming.local_id = existing.local_id.clone();
    }

    let folded = existing.operation == Operation::Create && incoming.operation == Operation::Update;
    if folded {
        incoming.operation = Operation::Create;
    }

    let id = incoming.id.clone();
    list[index] = incoming;

    if folded {
        Supersession::Folded { id, superseded }
    } else {
        Supersession::Replaced { id, superseded }
    }
}

/// Appends to a dead-letter list, keeping only the newest `limit` entries.
pub fn push_dead_letter(list: &mut VecDeque<FailedChange>, failed: FailedChange, limit: usize) {
    list.push_back(failed);
    while list.len() > limit {
        list.pop_front();
    }
}
