//! The tagged relay-message envelope exchanged over a world's socket.
//!
//! Dynamic `any`-typed messages in the source become a closed tagged
//! variant here (spec.md §9 REDESIGN FLAGS): every message type the
//! relay understands is named in [`ReplyKind`], and the dispatcher in
//! `relay-gateway` is a table of handlers keyed on it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::CorrelationId;

/// The expected reply-message kind a pending request waits for.
///
/// Matches the 27 operation kinds enumerated in spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplyKind {
    /// Entity search.
    Search,
    /// Single entity read.
    Entity,
    /// World structure listing.
    Structure,
    /// Directory/file contents.
    Contents,
    /// Entity creation.
    Create,
    /// Entity update.
    Update,
    /// Entity deletion.
    Delete,
    /// Roll table enumeration.
    Rolls,
    /// Last roll lookup.
    Lastroll,
    /// Dice roll execution.
    Roll,
    /// Actor sheet render.
    ActorSheet,
    /// Macro enumeration.
    Macros,
    /// Macro execution.
    MacroExecute,
    /// Encounter enumeration.
    Encounters,
    /// Start an encounter.
    StartEncounter,
    /// Advance to the next turn.
    NextTurn,
    /// Advance to the next round.
    NextRound,
    /// Roll back to the last turn.
    LastTurn,
    /// Roll back to the last round.
    LastRound,
    /// End the active encounter.
    EndEncounter,
    /// Add a combatant to the encounter.
    AddToEncounter,
    /// Remove a combatant from the encounter.
    RemoveFromEncounter,
    /// Kill an entity.
    Kill,
    /// Increase an attribute.
    Increase,
    /// Decrease an attribute.
    Decrease,
    /// Give an item.
    Give,
    /// Select entities.
    Select,
    /// Read current selection.
    Selected,
    /// File-system listing.
    FileSystem,
    /// Upload a file.
    UploadFile,
    /// Download a file.
    DownloadFile,
    /// Execute ad-hoc JavaScript.
    ExecuteJs,
}

impl ReplyKind {
    /// The advisory correlation-id prefix for this kind.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Entity => "entity",
            Self::Structure => "structure",
            Self::Contents => "contents",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Rolls => "rolls",
            Self::Lastroll => "lastroll",
            Self::Roll => "roll",
            Self::ActorSheet => "actor-sheet",
            Self::Macros => "macros",
            Self::MacroExecute => "macro-execute",
            Self::Encounters => "encounters",
            Self::StartEncounter => "start-encounter",
            Self::NextTurn => "next-turn",
            Self::NextRound => "next-round",
            Self::LastTurn => "last-turn",
            Self::LastRound => "last-round",
            Self::EndEncounter => "end-encounter",
            Self::AddToEncounter => "add-to-encounter",
            Self::RemoveFromEncounter => "remove-from-encounter",
            Self::Kill => "kill",
            Self::Increase => "increase",
            Self::Decrease => "decrease",
            Self::Give => "give",
            Self::Select => "select",
            Self::Selected => "selected",
            Self::FileSystem => "file-system",
            Self::UploadFile => "upload-file",
            Self::DownloadFile => "download-file",
            Self::ExecuteJs => "execute-js",
        }
    }
}

/// A frame exchanged with a world over its socket.
///
/// The `type` discriminator is inspected by the Client Registry's
/// dispatcher (spec.md §4.C); `request_id` carries the correlation id
/// for messages that are replies to a specific pending request rather
/// than unsolicited broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Message type discriminator, e.g. `"ping"`, `"pong"`, or a
    /// [`ReplyKind`] prefix.
    #[serde(rename = "type")]
    pub kind: String,

    /// Correlation id this message answers, if any.
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<CorrelationId>,

    /// Remaining fields, kept opaque — the relay is agnostic to
    /// in-world semantics beyond type dispatch (spec.md §1).
    #[serde(flatten)]
    pub payload: Value,
}

impl RelayMessage {
    /// Build a `{type:"ping"}` keepalive frame.
    #[must_use]
    pub fn ping() -> Self {
        Self {
            kind: "ping".to_string(),
            request_id: None,
            payload: Value::Object(serde_json::Map::new()),
        }
    }

    /// Build a `{type:"pong"}` keepalive reply.
    #[must_use]
    pub fn pong() -> Self {
        Self {
            kind: "pong".to_string(),
            request_id: None,
            payload: Value::Object(serde_json::Map::new()),
        }
    }

    /// Build an outbound operation message carrying a correlation id.
    #[must_use]
    pub fn operation(kind: ReplyKind, request_id: CorrelationId, payload: Value) -> Self {
        Self {
            kind: kind.prefix().to_string(),
            request_id: Some(request_id),
            payload,
        }
    }

    /// `true` if this is the protocol-level keepalive ping.
    #[must_use]
    pub fn is_ping(&self) -> bool {
        self.kind == "ping"
    }

    /// Non-empty `error` field, if the reply represents a failure.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.payload.get("error").and_then(Value::as_str).filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_round_trips_through_json() {
        let ping = RelayMessage::ping();
        assert!(ping.is_ping());
        let json = serde_json::to_string(&ping).unwrap();
        let back: RelayMessage = serde_json::from_str(&json).unwrap();
        assert!(back.is_ping());
    }

    #[test]
    fn operation_message_carries_kind_and_correlation_id() {
        let cid = CorrelationId::generate(ReplyKind::Search.prefix());
        let msg = RelayMessage::operation(ReplyKind::Search, cid.clone(), serde_json::json!({"query": "goblin"}));
        assert_eq!(msg.kind, "search");
        assert_eq!(msg.request_id, Some(cid));
    }

    #[test]
    fn error_message_is_none_when_absent_or_empty() {
        let msg = RelayMessage {
            kind: "search".into(),
            request_id: None,
            payload: serde_json::json!({"error": ""}),
        };
        assert_eq!(msg.error_message(), None);

        let msg = RelayMessage {
            kind: "search".into(),
            request_id: None,
            payload: serde_json::json!({"error": "boom"}),
        };
        assert_eq!(msg.error_message(), Some("boom"));
    }
}
