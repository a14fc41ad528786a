//! Text cleanup for model output and near-duplicate detection.

mod sanitize;
mod similarity;

pub use sanitize::sanitize;
pub use similarity::{dedup_similar, is_similar, DEFAULT_THRESHOLD};
