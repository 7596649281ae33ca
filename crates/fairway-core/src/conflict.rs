//! # Conflict Resolution
//!
//! Reconciles a local document with the remote version of the same entity.
//!
//! ## Policies
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  server-wins (default)  remote replaces local unconditionally           │
//! │  client-wins            local kept, remote discarded                    │
//! │  merge                  later `updatedAt` is the base, the other side   │
//! │                         fills keys missing from the base; ties → remote │
//! │  manual                 local kept, both versions reported              │
//! └─────────────────────────────────────────────────────────────────────────┘
//!
//! merge example:
//!   local  {a:1,       updatedAt:T1}
//!   remote {     b:2,  updatedAt:T2}    T2 > T1
//!   result {a:1, b:2,  updatedAt:T2}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::document::updated_at_millis;
use crate::error::CoreError;

/// How to reconcile a local and remote version of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    #[default]
    ServerWins,
    ClientWins,
    Merge,
    Manual,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictPolicy::ServerWins => write!(f, "server-wins"),
            ConflictPolicy::ClientWins => write!(f, "client-wins"),
            ConflictPolicy::Merge => write!(f, "merge"),
            ConflictPolicy::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "server-wins" | "server" => Ok(ConflictPolicy::ServerWins),
            "client-wins" | "client" => Ok(ConflictPolicy::ClientWins),
            "merge" => Ok(ConflictPolicy::Merge),
            "manual" => Ok(ConflictPolicy::Manual),
            _ => Err(CoreError::UnknownPolicy(s.to_string())),
        }
    }
}

/// What to do with the local copy.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Store this document locally.
    Apply(Value),
    /// Leave the local document untouched.
    KeepLocal,
    /// Leave the local document untouched and report both versions.
    Conflict { local: Value, remote: Value },
}

/// Resolves `remote` against the current `local` copy (if any).
///
/// With no local copy there is nothing to conflict with and the remote
/// document is always applied.
pub fn resolve(policy: ConflictPolicy, local: Option<&Value>, remote: &Value) -> Resolution {
    let Some(local) = local else {
        return Resolution::Apply(remote.clone());
    };
    if local == remote {
        return Resolution::KeepLocal;
    }

    match policy {
        ConflictPolicy::ServerWins => Resolution::Apply(remote.clone()),
        ConflictPolicy::ClientWins => Resolution::KeepLocal,
        ConflictPolicy::Merge => Resolution::Apply(merge(local, remote)),
        ConflictPolicy::Manual => Resolution::Conflict {
            local: local.clone(),
            remote: remote.clone(),
        },
    }
}

/// Field-level merge; the later `updatedAt` side is the base.
///
/// Missing timestamps count as 0, and ties go to the remote copy. Non-object
/// documents cannot be merged field-wise, so the base is returned as is.
pub fn merge(local: &Value, remote: &Value) -> Value {
    let local_ts = updated_at_millis(local).unwrap_or(0);
    let remote_ts = updated_at_millis(remote).unwrap_or(0);
    let (base, overlay) = if local_ts > remote_ts {
        (local, remote)
    } else {
        (remote, local)
    };

    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                if !merged.contains_key(key) {
                    merged.insert(key.clone(), value.clone());
                }
            }
            Value::Object(merged)
        }
        _ => base.clone(),
    }
}
