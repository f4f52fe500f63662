//! Match events produced by the generator

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::roster::Side;
use super::state::{DragonType, Lane, StructureTier};

/// Event type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Kill,
    FirstBlood,
    Gank,
    Skirmish,
    Teamfight,
    Dragon,
    DragonSoul,
    Herald,
    Baron,
    ElderDragon,
    Turret,
    Inhibitor,
    NexusTurret,
    NexusDestroyed,
}

/// A participant referenced by an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorRef {
    pub id: Uuid,
    pub name: String,
    pub side: Side,
}

/// Structured event details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Side credited with the event
    pub side: Side,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actors: Vec<ActorRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub victims: Vec<ActorRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane: Option<Lane>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<StructureTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dragon: Option<DragonType>,
}

impl EventPayload {
    pub fn for_side(side: Side) -> Self {
        Self {
            side,
            actors: Vec::new(),
            victims: Vec::new(),
            lane: None,
            tier: None,
            dragon: None,
        }
    }
}

/// One entry of a set's event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Simulated seconds since the start of the set
    pub time: u32,
    pub set_number: u8,
    pub description: String,
    pub payload: EventPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_uses_screaming_wire_names() {
        let json = serde_json::to_string(&EventKind::NexusDestroyed).unwrap();
        assert_eq!(json, "\"NEXUS_DESTROYED\"");
        let json = serde_json::to_string(&EventKind::ElderDragon).unwrap();
        assert_eq!(json, "\"ELDER_DRAGON\"");
    }

    #[test]
    fn empty_payload_fields_are_omitted() {
        let event = MatchEvent {
            kind: EventKind::Herald,
            time: 540,
            set_number: 1,
            description: "Side A secured the Rift Herald".to_string(),
            payload: EventPayload::for_side(Side::A),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "HERALD");
        assert!(value["payload"].get("victims").is_none());
        assert!(value["payload"].get("lane").is_none());
    }
}
