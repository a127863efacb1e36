//! Allocation and chunk-sizing decisions

mod scorer;
mod sizing;

pub use scorer::{order_pending, AllocationScorer};
pub use sizing::{ChunkSizingEngine, SizingCandidates, SizingDecision};
