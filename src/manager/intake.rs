//! Request intake.
//!
//! External producers push [`PrefixUpdateRequest`] records onto an
//! unbounded queue; the manager validates each and applies it on the same
//! serialized path as direct calls. Malformed requests are logged and
//! dropped, never fatal.

use crate::core::error::{TrellisError, TrellisResult};
use crate::core::types::{PrefixEntry, PrefixType};
use serde::{Deserialize, Serialize};

/// Commands accepted on the request queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrefixUpdateCommand {
    /// Insert or replace the given entries.
    AddPrefixes,
    /// Remove the given exact `(prefix, client)` entries.
    WithdrawPrefixes,
    /// Remove every entry of the given client.
    WithdrawPrefixesByType,
    /// Replace the given client's entry set.
    SyncPrefixesByType,
}

/// One queued update from an external producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefixUpdateRequest {
    /// Requested operation.
    pub cmd: PrefixUpdateCommand,

    /// Client scope; required by the by-type commands.
    pub prefix_type: Option<PrefixType>,

    /// Entry payload; required by add and withdraw.
    pub prefixes: Vec<PrefixEntry>,
}

impl PrefixUpdateRequest {
    /// Add request.
    pub fn add(prefixes: Vec<PrefixEntry>) -> Self {
        Self {
            cmd: PrefixUpdateCommand::AddPrefixes,
            prefix_type: None,
            prefixes,
        }
    }

    /// Withdraw request.
    pub fn withdraw(prefixes: Vec<PrefixEntry>) -> Self {
        Self {
            cmd: PrefixUpdateCommand::WithdrawPrefixes,
            prefix_type: None,
            prefixes,
        }
    }

    /// Withdraw-by-type request.
    pub fn withdraw_by_type(prefix_type: PrefixType) -> Self {
        Self {
            cmd: PrefixUpdateCommand::WithdrawPrefixesByType,
            prefix_type: Some(prefix_type),
            prefixes: Vec::new(),
        }
    }

    /// Sync-by-type request. An empty entry list clears the client.
    pub fn sync_by_type(prefix_type: PrefixType, prefixes: Vec<PrefixEntry>) -> Self {
        Self {
            cmd: PrefixUpdateCommand::SyncPrefixesByType,
            prefix_type: Some(prefix_type),
            prefixes,
        }
    }

    /// Check the request carries the fields its command requires.
    pub fn validate(&self) -> TrellisResult<()> {
        match self.cmd {
            PrefixUpdateCommand::AddPrefixes | PrefixUpdateCommand::WithdrawPrefixes => {
                if self.prefixes.is_empty() {
                    return Err(TrellisError::invalid_request(format!(
                        "{:?} requires a non-empty prefix list",
                        self.cmd
                    )));
                }
            }
            PrefixUpdateCommand::WithdrawPrefixesByType
            | PrefixUpdateCommand::SyncPrefixesByType => {
                if self.prefix_type.is_none() {
                    return Err(TrellisError::invalid_request(format!(
                        "{:?} requires a prefix type",
                        self.cmd
                    )));
                }
            }
        }
        Ok(())
    }
}
