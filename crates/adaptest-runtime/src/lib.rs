//! adaptest-runtime — Adaptive runtime engine.
//!
//! Tracks per-attempt state (played items, per-scale history, breaks,
//! session tokens) and decides, request by request, which item to serve
//! next or why to stop.

pub mod pipeline;
pub mod progress;
pub mod service;
pub mod stages;

pub use pipeline::{
    CandidateItem, ItemSelection, PreselectPipeline, SelectionContext, SelectionOutcome,
    SelectionStage, StageOutcome,
};
pub use progress::{AttemptProgress, ResponseOutcome};
pub use service::{AttemptService, ServeOutcome, ServeRequest, ServeResult};
