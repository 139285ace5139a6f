//! Lead journey processing: stage classification from raw interaction
//! history and per-lead action planning against the playbook.

pub mod planner;
pub mod stages;

pub use planner::{plan, JourneyPlan, PlannerContext};
pub use stages::{classify, derive_interest, derive_sentiment, JourneySignals, StageDecision};
