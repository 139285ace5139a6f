pub mod audit;
pub mod clock;
pub mod config;
pub mod decisions;
pub mod domain;
pub mod errors;
pub mod goals;
pub mod journey;
pub mod pacing;
pub mod queue;
pub mod scoring;

pub use audit::{EngineEvent, EventCategory};
pub use clock::{EngineClock, FixedClock, SystemClock};
pub use config::{AppConfig, ConfigError, EngineConfig, LoadOptions};
pub use decisions::{decide, DecisionInputs};
pub use domain::journey::{JourneyStage, JourneyState, SentimentTrend};
pub use domain::lead::{Lead, LeadStatus};
pub use domain::number::PhoneNumber;
pub use domain::pacing::PacingState;
pub use domain::playbook::{PlaybookRule, RuleActionKind, RuleMetrics};
pub use domain::queue::{ActionQueueEntry, ActionSource, ActionStatus, ActionType};
pub use domain::run::{Decision, EngineResult, RunSummary};
pub use domain::settings::{AutomationSettings, AutonomyLevel};
pub use domain::{ActionId, CampaignId, LeadId, PhoneNumberId, RuleId, UserId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use goals::{assess, DailyCounts, GoalProgress};
pub use journey::{JourneyPlan, JourneySignals, PlannerContext};
pub use pacing::{CallWindowStats, PacingRecommendation};
pub use queue::{ActionQueueEngine, QueueError, QueuePolicy};
pub use scoring::{LeadScorer, LeadSignals, ScoringWeights};

// Re-exported so downstream crates agree on one chrono version.
pub use chrono;
