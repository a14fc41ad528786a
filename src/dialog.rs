//! Branching dialog graphs: nodes with NPC text and player replies, a cursor
//! on the current node and the transcript of what was said so far.

pub mod fixture;
mod graph;
mod node;

pub use graph::{DialogGraph, UnresolvedLink};
pub use node::{DialogNode, HistoryEntry, Reply, Sender};
