//! Watch session state as persisted and broadcast.

use serde::{Deserialize, Serialize};

use crate::condition::Parameters;

/// Lifecycle of a watch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Initializing,
    Evaluating,
    Updating,
    Executed,
    Failed,
}

impl SessionState {
    /// Returns `true` once the session can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Executed | Self::Failed)
    }
}

/// Snapshot of a watch session, stored in the `Sessions` array and sent to
/// clients as a `Session` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionRecord {
    pub id: u64,
    pub command: String,
    pub currency: String,
    pub state: SessionState,
    #[serde(default)]
    pub parameters: Parameters,
    /// Order id returned by the exchange once executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unix time in milliseconds of the last state change.
    #[serde(default)]
    pub updated_at: u64,
}
