use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who speaks a line. Unknown labels are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Sender {
    Npc,
    Player,
    Other(String),
}

impl From<String> for Sender {
    fn from(label: String) -> Self {
        match label.as_str() {
            "NPC" => Sender::Npc,
            "PLAYER" => Sender::Player,
            _ => Sender::Other(label),
        }
    }
}

impl From<Sender> for String {
    fn from(sender: Sender) -> Self {
        match sender {
            Sender::Npc => "NPC".into(),
            Sender::Player => "PLAYER".into(),
            Sender::Other(label) => label,
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::Npc => f.write_str("NPC"),
            Sender::Player => f.write_str("PLAYER"),
            Sender::Other(label) => f.write_str(label),
        }
    }
}

/// A player option leading from one node to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub target_node_id: String,
    pub text: String,
    /// Positional index, only present when a producer numbered its replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl Reply {
    pub fn new(target_node_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            target_node_id: target_node_id.into(),
            text: text.into(),
            id: None,
        }
    }
}

/// One exchange point in a dialog graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogNode {
    /// Key of this node in the graph. Not written inside the node body; the
    /// graph restores it from the map key on load.
    #[serde(skip)]
    pub id: String,
    pub sender: Sender,
    pub text: String,
    /// Empty for terminal nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<Reply>,
}

impl DialogNode {
    pub fn new(id: impl Into<String>, sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sender,
            text: text.into(),
            replies: Vec::new(),
        }
    }

    pub fn npc(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, Sender::Npc, text)
    }

    pub fn with_reply(mut self, target_node_id: impl Into<String>, text: impl Into<String>) -> Self {
        self.replies.push(Reply::new(target_node_id, text));
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.replies.is_empty()
    }
}

/// A line in the transcript of a traversed graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sender: Sender,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl HistoryEntry {
    pub fn new(sender: Sender, text: impl Into<String>, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            sender,
            text: text.into(),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sender_labels() {
        let senders: Vec<Sender> =
            serde_json::from_value(json!(["NPC", "PLAYER", "Johnny"])).unwrap();
        assert_eq!(
            senders,
            vec![Sender::Npc, Sender::Player, Sender::Other("Johnny".into())]
        );
        assert_eq!(serde_json::to_value(&senders).unwrap(), json!(["NPC", "PLAYER", "Johnny"]));
    }

    #[test]
    fn test_terminal_node_omits_replies() {
        let node = DialogNode::npc("400", "До скорого!");
        assert!(node.is_terminal());
        assert_eq!(
            serde_json::to_value(&node).unwrap(),
            json!({"sender": "NPC", "text": "До скорого!"})
        );
    }

    #[test]
    fn test_reply_id_is_optional() {
        let reply: Reply = serde_json::from_value(json!({"target_node_id": "200", "text": "Кто ты?"})).unwrap();
        assert_eq!(reply, Reply::new("200", "Кто ты?"));
        let numbered: Reply =
            serde_json::from_value(json!({"target_node_id": "2", "text": "Да", "id": 2})).unwrap();
        assert_eq!(numbered.id, Some(2));
    }
}
