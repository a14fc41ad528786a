use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::dialog::node::{DialogNode, HistoryEntry, Reply, Sender};
use crate::error::GraphError;
use crate::text::sanitize;

/// A reply whose target is not a node of the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedLink {
    pub node: String,
    /// Position of the reply within the node's replies.
    pub index: usize,
    pub target: String,
}

/// The full dialog: a map of node-id -> DialogNode, the node the player is
/// at, and the transcript of the path taken to get there.
///
/// `current_node` always names an existing node, and `history` only ever
/// grows at the end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GraphFile")]
pub struct DialogGraph {
    current_node: String,
    history: Vec<HistoryEntry>,
    nodes: BTreeMap<String, DialogNode>,
}

/// On-disk shape, before the graph invariants are checked.
#[derive(Deserialize)]
struct GraphFile {
    current_node: String,
    #[serde(default)]
    history: Vec<HistoryEntry>,
    nodes: BTreeMap<String, DialogNode>,
}

impl TryFrom<GraphFile> for DialogGraph {
    type Error = GraphError;

    fn try_from(file: GraphFile) -> Result<Self, Self::Error> {
        let nodes = file.nodes.into_iter().map(|(id, mut node)| {
            node.id = id;
            node
        });
        let mut graph = Self::from_nodes(file.current_node, nodes).map_err(|e| match e {
            GraphError::UnknownNode(id) => {
                GraphError::InvalidGraph(format!("current_node '{id}' is not a node of the graph"))
            }
            other => other,
        })?;
        graph.history = file.history;
        Ok(graph)
    }
}

impl DialogGraph {
    /// A one-node graph positioned at `start`. Its text is sanitized.
    pub fn new(start: DialogNode) -> Self {
        let start = cleaned(start);
        let current_node = start.id.clone();
        let mut nodes = BTreeMap::new();
        nodes.insert(start.id.clone(), start);
        Self {
            current_node,
            history: Vec::new(),
            nodes,
        }
    }

    /// Build a graph from a set of nodes, starting at `current_node`.
    /// Replies may point at nodes that are not in the set; see
    /// [`DialogGraph::unresolved_links`].
    pub fn from_nodes(
        current_node: impl Into<String>,
        nodes: impl IntoIterator<Item = DialogNode>,
    ) -> Result<Self, GraphError> {
        let current_node = current_node.into();
        let mut map = BTreeMap::new();
        for node in nodes {
            if map.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode(node.id));
            }
            map.insert(node.id.clone(), node);
        }
        if !map.contains_key(&current_node) {
            return Err(GraphError::UnknownNode(current_node));
        }
        Ok(Self {
            current_node,
            history: Vec::new(),
            nodes: map,
        })
    }

    pub fn current_node_id(&self) -> &str {
        &self.current_node
    }

    pub fn current(&self) -> &DialogNode {
        // current_node is checked on every path that sets it
        &self.nodes[&self.current_node]
    }

    pub fn node(&self, id: &str) -> Option<&DialogNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DialogNode> {
        self.nodes.values()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn is_finished(&self) -> bool {
        self.current().is_terminal()
    }

    /// Insert a new node with sanitized text. Every reply must target an
    /// existing node or the node itself, and a node with replies needs text.
    pub fn add_node(&mut self, node: DialogNode) -> Result<(), GraphError> {
        if node.id.is_empty() {
            return Err(GraphError::InvalidGraph("node id must not be empty".into()));
        }
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        let node = cleaned(node);
        if node.text.is_empty() && !node.is_terminal() {
            return Err(GraphError::EmptyText(node.id));
        }
        for reply in &node.replies {
            if reply.target_node_id != node.id && !self.nodes.contains_key(&reply.target_node_id) {
                return Err(GraphError::BrokenLink {
                    node: node.id.clone(),
                    target: reply.target_node_id.clone(),
                });
            }
        }
        debug!("Adding node {} ({} replies)", node.id, node.replies.len());
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Append a reply to `node_id`. Both ends of the link must exist, and
    /// `node_id` must have text since it stops being terminal.
    pub fn add_reply(&mut self, node_id: &str, mut reply: Reply) -> Result<(), GraphError> {
        if !self.nodes.contains_key(&reply.target_node_id) {
            return Err(GraphError::BrokenLink {
                node: node_id.to_string(),
                target: reply.target_node_id,
            });
        }
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| GraphError::UnknownNode(node_id.to_string()))?;
        if node.text.is_empty() {
            return Err(GraphError::EmptyText(node.id.clone()));
        }
        reply.text = sanitize(&reply.text);
        node.replies.push(reply);
        Ok(())
    }

    /// Take reply `index` of the current node.
    ///
    /// On success the cursor moves to the reply's target and two history
    /// entries are appended: the player's reply, then the target node's text
    /// as an NPC line.
    /// On any error nothing is changed.
    pub fn select_reply(&mut self, index: usize) -> Result<&DialogNode, GraphError> {
        let node = self.current();
        if node.is_terminal() {
            return Err(GraphError::TerminalNode(node.id.clone()));
        }
        let reply = node.replies.get(index).ok_or_else(|| GraphError::NoSuchReply {
            node: node.id.clone(),
            index,
        })?;
        let target = self
            .nodes
            .get(&reply.target_node_id)
            .ok_or_else(|| GraphError::BrokenLink {
                node: node.id.clone(),
                target: reply.target_node_id.clone(),
            })?;

        info!("Transition: {} -> {} ({:?})", node.id, target.id, reply.text);

        let now = Some(Utc::now());
        let player_line = HistoryEntry::new(Sender::Player, reply.text.clone(), now);
        let target_line = HistoryEntry::new(Sender::Npc, target.text.clone(), now);
        let target_id = target.id.clone();

        self.history.push(player_line);
        self.history.push(target_line);
        self.current_node = target_id;
        Ok(self.current())
    }

    pub fn unresolved_links(&self) -> Vec<UnresolvedLink> {
        self.nodes
            .values()
            .flat_map(|node| {
                node.replies
                    .iter()
                    .enumerate()
                    .filter(|(_, reply)| !self.nodes.contains_key(&reply.target_node_id))
                    .map(|(index, reply)| UnresolvedLink {
                        node: node.id.clone(),
                        index,
                        target: reply.target_node_id.clone(),
                    })
            })
            .collect()
    }

    pub fn terminal_nodes(&self) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|node| node.is_terminal())
            .map(|node| node.id.as_str())
            .collect()
    }

    /// Number of replies on the longest path from the current node to a
    /// terminal node, not revisiting nodes.
    pub fn remaining_steps(&self) -> usize {
        let mut visiting = HashSet::new();
        self.longest_path(&self.current_node, &mut visiting)
    }

    fn longest_path<'a>(&'a self, node_id: &'a str, visiting: &mut HashSet<&'a str>) -> usize {
        let node = match self.nodes.get(node_id) {
            Some(n) => n,
            None => return 0,
        };
        if node.is_terminal() || !visiting.insert(node_id) {
            return 0;
        }
        let max_child = node
            .replies
            .iter()
            .filter(|reply| self.nodes.contains_key(&reply.target_node_id))
            .map(|reply| self.longest_path(&reply.target_node_id, visiting))
            .max()
            .unwrap_or(0);
        visiting.remove(node_id);
        1 + max_child
    }
}

fn cleaned(mut node: DialogNode) -> DialogNode {
    node.text = sanitize(&node.text);
    for reply in &mut node.replies {
        reply.text = sanitize(&reply.text);
    }
    node
}
