use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tenantgate_core::{ActorId, SessionId, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    PageView,
    ApiCall,
    Create,
    Update,
    Delete,
    Export,
    Search,
    Print,
}

impl ActionType {
    pub const ALL: [ActionType; 8] = [
        ActionType::PageView,
        ActionType::ApiCall,
        ActionType::Create,
        ActionType::Update,
        ActionType::Delete,
        ActionType::Export,
        ActionType::Search,
        ActionType::Print,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::PageView => "page_view",
            ActionType::ApiCall => "api_call",
            ActionType::Create => "create",
            ActionType::Update => "update",
            ActionType::Delete => "delete",
            ActionType::Export => "export",
            ActionType::Search => "search",
            ActionType::Print => "print",
        }
    }

    /// Mutating actions (create/update/delete).
    pub fn is_write(&self) -> bool {
        matches!(self, ActionType::Create | ActionType::Update | ActionType::Delete)
    }
}

impl core::fmt::Display for ActionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpersonationAction {
    pub session_id: SessionId,
    pub action_type: ActionType,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// The impersonation window itself: who acts as whom, and since when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpersonationSession {
    pub session_id: SessionId,
    pub operator_actor_id: ActorId,
    pub target_actor_id: ActorId,
    pub tenant_id: Option<TenantId>,
    pub started_at: DateTime<Utc>,
}

/// Counts grouped by action type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionSummary {
    pub session_id: SessionId,
    pub total: usize,
    pub by_type: BTreeMap<ActionType, usize>,
    pub first_at: Option<DateTime<Utc>>,
    pub last_at: Option<DateTime<Utc>>,
}

impl ActionSummary {
    pub fn from_actions(session_id: SessionId, actions: &[ImpersonationAction]) -> Self {
        let mut by_type = BTreeMap::new();
        for action in actions {
            *by_type.entry(action.action_type).or_insert(0) += 1;
        }
        Self {
            session_id,
            total: actions.len(),
            by_type,
            first_at: actions.iter().map(|a| a.timestamp).min(),
            last_at: actions.iter().map(|a| a.timestamp).max(),
        }
    }

    pub fn count(&self, action_type: ActionType) -> usize {
        self.by_type.get(&action_type).copied().unwrap_or(0)
    }

    pub fn writes(&self) -> usize {
        self.by_type
            .iter()
            .filter(|(t, _)| t.is_write())
            .map(|(_, n)| n)
            .sum()
    }
}
