//! Mutation intent model

use serde::{Deserialize, Serialize};

use super::{EntityType, OperationKind};
use crate::error::{Error, Result};

/// A caller's request to mirror one local mutation to the remote store.
///
/// The caller writes the authoritative local copy first; the intent only
/// carries what the remote needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub kind: OperationKind,
    pub payload: Option<serde_json::Value>,
}

impl Intent {
    /// Build and validate an intent
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        kind: OperationKind,
        payload: Option<serde_json::Value>,
    ) -> Result<Self> {
        let entity_id = entity_id.into().trim().to_string();
        if entity_id.is_empty() {
            return Err(Error::InvalidInput("entity id cannot be empty".into()));
        }

        match (kind, &payload) {
            (OperationKind::Delete, Some(_)) => {
                return Err(Error::InvalidInput(
                    "delete operations cannot carry a payload".into(),
                ));
            }
            (
                OperationKind::Create | OperationKind::Update,
                None | Some(serde_json::Value::Null),
            ) => {
                return Err(Error::InvalidInput(format!(
                    "{kind} operations require a non-null payload"
                )));
            }
            _ => {}
        }

        Ok(Self {
            entity_type,
            entity_id,
            kind,
            payload,
        })
    }

    pub fn create(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<Self> {
        Self::new(entity_type, entity_id, OperationKind::Create, Some(payload))
    }

    pub fn update(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<Self> {
        Self::new(entity_type, entity_id, OperationKind::Update, Some(payload))
    }

    pub fn delete(entity_type: EntityType, entity_id: impl Into<String>) -> Result<Self> {
        Self::new(entity_type, entity_id, OperationKind::Delete, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intent_trims_entity_id() {
        let intent = Intent::create(EntityType::Player, "  p1 ", json!({"name": "Alice"})).unwrap();
        assert_eq!(intent.entity_id, "p1");
        assert_eq!(intent.kind, OperationKind::Create);
    }

    #[test]
    fn test_intent_rejects_blank_entity_id() {
        assert!(Intent::delete(EntityType::Player, "   ").is_err());
    }

    #[test]
    fn test_delete_intent_rejects_payload() {
        let result = Intent::new(
            EntityType::Game,
            "g1",
            OperationKind::Delete,
            Some(json!({"score": 3})),
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_null_payload_is_rejected() {
        // SQLite would store JSON null as NULL and the snapshot would read back empty.
        let create = Intent::create(EntityType::Settings, "s1", serde_json::Value::Null);
        assert!(matches!(create, Err(Error::InvalidInput(_))));
        let update = Intent::update(EntityType::Settings, "s1", serde_json::Value::Null);
        assert!(matches!(update, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_update_intent_requires_payload() {
        let result = Intent::new(EntityType::Game, "g1", OperationKind::Update, None);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
