//! Operation record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// A unique identifier for a queued operation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of domain object a mutation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Player,
    Game,
    Team,
    Season,
    Tournament,
    Settings,
}

impl EntityType {
    pub const ALL: [Self; 6] = [
        Self::Player,
        Self::Game,
        Self::Team,
        Self::Season,
        Self::Tournament,
        Self::Settings,
    ];

    /// Stable tag used in storage and remote paths
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Game => "game",
            Self::Team => "team",
            Self::Season => "season",
            Self::Tournament => "tournament",
            Self::Settings => "settings",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|entity_type| entity_type.as_str() == normalized)
            .ok_or_else(|| Error::InvalidInput(format!("unknown entity type '{s}'")))
    }
}

/// Mutation kind carried by an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(Error::InvalidInput(format!("unknown operation kind '{s}'"))),
        }
    }
}

/// Stored status of an operation.
///
/// Completed operations are deleted rather than flagged, so there is no
/// `Completed` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Waiting to be sent (possibly after a backoff delay)
    Pending,
    /// Claimed by the dispatcher; a remote call is in flight
    Syncing,
    /// Terminal failure awaiting an explicit retry or discard
    Failed,
}

impl OperationStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Failed => "failed",
        }
    }

    /// Whether the merge engine may fold new intents into a record in this status
    #[must_use]
    pub const fn is_mergeable(self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "failed" => Ok(Self::Failed),
            _ => Err(Error::InvalidInput(format!("unknown operation status '{s}'"))),
        }
    }
}

/// A durable description of one pending mutation against one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Unique identifier
    pub id: OperationId,
    /// Kind of entity targeted
    pub entity_type: EntityType,
    /// Identifier of the targeted entity instance
    pub entity_id: String,
    /// Mutation kind
    pub kind: OperationKind,
    /// Latest full snapshot to apply; always `None` for deletes
    pub payload: Option<serde_json::Value>,
    /// Current status
    pub status: OperationStatus,
    /// Failed remote attempts so far
    pub retry_count: u32,
    /// Earliest time (Unix ms) the dispatcher may send this record; `None` when terminal
    pub next_attempt_at: Option<i64>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Most recent failure reason, if any
    pub last_error: Option<String>,
}

impl OperationRecord {
    /// Whether the dispatcher may pick this record up at `now_ms`
    #[must_use]
    pub fn is_ready(&self, now_ms: i64) -> bool {
        self.status.is_mergeable() && self.next_attempt_at.is_some_and(|at| at <= now_ms)
    }

    /// Whether this record sits in terminal failure
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.status, OperationStatus::Failed) && self.next_attempt_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_id_unique() {
        let id1 = OperationId::new();
        let id2 = OperationId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_operation_id_parse() {
        let id = OperationId::new();
        let parsed: OperationId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_entity_type_parse_is_case_insensitive() {
        assert_eq!("Player".parse::<EntityType>().unwrap(), EntityType::Player);
        assert_eq!(" game ".parse::<EntityType>().unwrap(), EntityType::Game);
        assert!("referee".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_kind_and_status_serde_are_lowercase() {
        assert_eq!(
            serde_json::to_string(&OperationKind::Delete).unwrap(),
            "\"delete\""
        );
        assert_eq!(
            serde_json::to_string(&OperationStatus::Syncing).unwrap(),
            "\"syncing\""
        );
    }

    #[test]
    fn test_readiness_requires_schedule() {
        let mut record = OperationRecord {
            id: OperationId::new(),
            entity_type: EntityType::Team,
            entity_id: "t1".to_string(),
            kind: OperationKind::Update,
            payload: Some(serde_json::json!({"name": "Hawks"})),
            status: OperationStatus::Pending,
            retry_count: 0,
            next_attempt_at: Some(1_000),
            created_at: 1_000,
            updated_at: 1_000,
            last_error: None,
        };
        assert!(record.is_ready(1_000));
        assert!(!record.is_ready(999));

        record.status = OperationStatus::Failed;
        record.next_attempt_at = None;
        assert!(record.is_terminal());
        assert!(!record.is_ready(i64::MAX));

        record.status = OperationStatus::Syncing;
        record.next_attempt_at = Some(0);
        assert!(!record.is_ready(i64::MAX));
    }
}
