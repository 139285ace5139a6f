//! Tick orchestrator. One tick walks every enabled user through a fixed
//! pass order: execute approved work, expire stale proposals, rescore leads,
//! analyze pacing, make decisions, advance journeys. A failure in one user's
//! pass is recorded on that user's result and never blocks the rest.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use cadence_core::audit::{EngineEvent, EventCategory};
use cadence_core::chrono::{DateTime, Duration, Utc};
use cadence_core::clock::EngineClock;
use cadence_core::config::EngineConfig;
use cadence_core::domain::journey::{ContactChannel, JourneyStage, JourneyState};
use cadence_core::domain::pacing::PacingState;
use cadence_core::domain::playbook::RuleActionKind;
use cadence_core::domain::queue::{ActionQueueEntry, ActionType};
use cadence_core::domain::run::{Decision, EngineResult, RunSummary};
use cadence_core::domain::settings::AutomationSettings;
use cadence_core::domain::{LeadId, PhoneNumberId, UserId};
use cadence_core::errors::{new_correlation_id, ApplicationError, DomainError};
use cadence_core::goals;
use cadence_core::journey::{self, JourneyPlan, JourneySignals, PlannerContext};
use cadence_core::pacing::{self, PacingRecommendation};
use cadence_core::queue::{finalize_key, reserve_key, ActionQueueEngine, QueuePolicy};
use cadence_core::scoring::{LeadScorer, LeadSignals};
use cadence_core::{decide, DecisionInputs, Lead};
use cadence_db::repositories::{
    ActionQueueRepository, CampaignRepository, EventRepository, InteractionRepository,
    JourneyRepository, LeadRepository, NumberRepository, PacingRepository, PlaybookRepository,
    RepositoryError, SettingsRepository,
};
use cadence_providers::{
    AiSmsRequest, BillingGateway, CallDispatcher, CallRequest, SmsRequest, SmsSender,
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

/// Leads rescored per user per tick.
const RESCORE_LIMIT: u32 = 200;
/// Stale contacts fetched for the follow-up decision.
const STALE_FETCH_LIMIT: u32 = 20;
/// Trailing window the pacing analyzer looks at.
const PACING_WINDOW_MINUTES: i64 = 60;

/// Everything the orchestrator talks to, behind trait objects so tests can
/// swap in the in-memory fakes and a pinned clock.
pub struct EngineDeps {
    pub settings: Arc<dyn SettingsRepository>,
    pub leads: Arc<dyn LeadRepository>,
    pub interactions: Arc<dyn InteractionRepository>,
    pub journeys: Arc<dyn JourneyRepository>,
    pub playbooks: Arc<dyn PlaybookRepository>,
    pub queue: Arc<dyn ActionQueueRepository>,
    pub events: Arc<dyn EventRepository>,
    pub pacing: Arc<dyn PacingRepository>,
    pub numbers: Arc<dyn NumberRepository>,
    pub campaigns: Arc<dyn CampaignRepository>,
    pub sms: Arc<dyn SmsSender>,
    pub calls: Arc<dyn CallDispatcher>,
    pub billing: Arc<dyn BillingGateway>,
    pub clock: Arc<dyn EngineClock>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl EngineError {
    fn into_application(self) -> ApplicationError {
        match self {
            Self::Repository(err) => ApplicationError::Persistence(err.to_string()),
        }
    }
}

pub struct Engine {
    deps: EngineDeps,
    config: EngineConfig,
    queue_engine: ActionQueueEngine,
    scorer: LeadScorer,
}

impl Engine {
    pub fn new(deps: EngineDeps, config: EngineConfig) -> Self {
        let queue_engine = ActionQueueEngine::new(QueuePolicy {
            expiry_hours: i64::from(config.action_expiry_hours),
            execute_batch_size: config.execute_batch_size as usize,
        });
        Self { deps, config, queue_engine, scorer: LeadScorer::new() }
    }

    /// One full engine pass over every enabled user, sequentially.
    pub async fn run_tick(&self) -> Result<RunSummary, EngineError> {
        let started = Instant::now();
        let users = self.deps.settings.list_enabled().await?;

        let mut summary = RunSummary::default();
        for settings in &users {
            let result = match self.run_user(settings).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(
                        event_name = "system.engine.user_failed",
                        user_id = %settings.user_id,
                        error = %err,
                        "user pass failed, continuing with remaining users"
                    );
                    let mut failed = EngineResult::for_user(&settings.user_id);
                    failed.errors.push(err.to_string());
                    failed
                }
            };
            summary.absorb(result);
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            event_name = "system.engine.tick_completed",
            users_processed = summary.users_processed,
            actions_queued = summary.total_actions_queued,
            actions_executed = summary.total_actions_executed,
            duration_ms = summary.duration_ms,
            "engine tick completed"
        );
        Ok(summary)
    }

    async fn run_user(&self, settings: &AutomationSettings) -> Result<EngineResult, EngineError> {
        let user = &settings.user_id;
        let mut result = EngineResult::for_user(user);

        self.execute_approved(settings, &mut result).await?;
        self.expire_pending(user, &mut result).await?;
        let scored = self.rescore_leads(user, &mut result).await?;
        let recommendation = self.analyze_pacing(user, &mut result).await?;

        // Entries created earlier today count against the cap whatever their
        // status, so a flood of failures cannot unlock more proposals.
        let day_start = self.deps.clock.local_day_start();
        let created_today = self.deps.queue.count_created_since(user, day_start).await?;
        let mut remaining = i64::from(settings.max_daily_actions) - i64::from(created_today);
        let mut cap_noted = false;

        self.make_decisions(settings, &scored, &recommendation, &mut remaining, &mut cap_noted, &mut result)
            .await?;
        self.process_journeys(settings, &scored, &mut remaining, &mut cap_noted, &mut result)
            .await?;

        self.deps.settings.record_run(user, self.deps.clock.now()).await?;
        Ok(result)
    }

    /// Drain this run's batch of approved entries. Entries whose idempotency
    /// key already completed are walked through the state machine but their
    /// side effect is skipped, so a crash-retry can never double-send.
    async fn execute_approved(
        &self,
        settings: &AutomationSettings,
        result: &mut EngineResult,
    ) -> Result<(), EngineError> {
        let user = &settings.user_id;
        let batch = self.deps.queue.list_approved(user, self.config.execute_batch_size).await?;

        for entry in batch {
            let now = self.deps.clock.now();
            let duplicate = match &entry.idempotency_key {
                Some(key) => self.deps.queue.find_by_idempotency_key(user, key).await?,
                None => None,
            };

            let executing = match self.queue_engine.begin(entry, now) {
                Ok(executing) => executing,
                Err(err) => {
                    result.errors.push(DomainError::from(err).to_string());
                    continue;
                }
            };
            self.deps.queue.save(executing.clone()).await?;

            let action = executing.action_type;
            let lead_id = executing.lead_id.clone();

            if let Some(prior) = duplicate {
                let reason = format!("already executed as {}", prior.id.0);
                match self.queue_engine.complete_skipped(executing, &reason, now) {
                    Ok(skipped) => {
                        self.deps.queue.save(skipped).await?;
                        result.actions_executed += 1;
                        let event = EngineEvent::new(
                            user.clone(),
                            lead_id,
                            EventCategory::Queue,
                            "queue.action_skipped",
                            reason,
                            now,
                        )
                        .with_metadata("action_type", action.as_str());
                        self.remember(event, result).await;
                    }
                    Err(err) => result.errors.push(DomainError::from(err).to_string()),
                }
                continue;
            }

            match self.dispatch(&executing, now).await {
                Ok(outcome) => match self.queue_engine.complete(executing, outcome.to_string(), now) {
                    Ok(completed) => {
                        self.deps.queue.save(completed.clone()).await?;
                        result.actions_executed += 1;
                        if action == ActionType::AdjustPacing {
                            result.pacing_adjusted = true;
                        }
                        let event = EngineEvent::new(
                            user.clone(),
                            lead_id,
                            EventCategory::Queue,
                            "queue.action_completed",
                            completed.reasoning.clone(),
                            now,
                        )
                        .with_metadata("action_type", action.as_str());
                        self.remember(event, result).await;
                    }
                    Err(err) => result.errors.push(DomainError::from(err).to_string()),
                },
                Err(error) => {
                    result.errors.push(format!("{} failed: {error}", action.as_str()));
                    match self.queue_engine.fail(executing, error.clone(), now) {
                        Ok(failed) => {
                            self.deps.queue.save(failed).await?;
                            let event = EngineEvent::new(
                                user.clone(),
                                lead_id,
                                EventCategory::Queue,
                                "queue.action_failed",
                                error,
                                now,
                            )
                            .with_metadata("action_type", action.as_str());
                            self.remember(event, result).await;
                        }
                        Err(err) => result.errors.push(DomainError::from(err).to_string()),
                    }
                }
            }
        }
        Ok(())
    }

    /// Run one entry's side effect. Errors come back as strings and land in
    /// the entry's `error` column.
    async fn dispatch(
        &self,
        entry: &ActionQueueEntry,
        now: DateTime<Utc>,
    ) -> Result<Value, String> {
        let params: Value = serde_json::from_str(&entry.params_json)
            .map_err(|err| format!("invalid params: {err}"))?;

        match entry.action_type {
            // The completed entry itself is the hand-off: the dialer reads
            // completed queue_leads entries and feeds its own call queue.
            ActionType::QueueLeads => {
                let campaign_id = param_str(&params, "campaign_id")?;
                let ids = params
                    .get("lead_ids")
                    .and_then(Value::as_array)
                    .ok_or_else(|| "missing lead_ids param".to_string())?;
                let mut queued = 0u32;
                for raw in ids {
                    let Some(id) = raw.as_str() else { continue };
                    let lead = self
                        .deps
                        .leads
                        .find(&LeadId(id.to_string()))
                        .await
                        .map_err(|err| err.to_string())?;
                    if lead.is_some() {
                        queued += 1;
                    }
                }
                Ok(json!({ "campaign_id": campaign_id, "queued": queued }))
            }
            ActionType::SendFollowupSms => {
                let to = param_str(&params, "to")?;
                let message = param_str(&params, "message")?;
                let receipt = self
                    .deps
                    .sms
                    .send_sms(SmsRequest {
                        user_id: entry.user_id.clone(),
                        lead_id: entry.lead_id.clone(),
                        to,
                        message,
                    })
                    .await
                    .map_err(|err| err.to_string())?;
                if let Some(lead_id) = &entry.lead_id {
                    self.deps
                        .leads
                        .touch_contacted(lead_id, now)
                        .await
                        .map_err(|err| err.to_string())?;
                }
                Ok(json!({ "provider_id": receipt.provider_id, "response": receipt.raw }))
            }
            ActionType::AdjustPacing => {
                let requested = param_u64(&params, "new_rate")? as u32;
                let new_rate = requested.clamp(pacing::MIN_RATE, pacing::MAX_RATE);
                let mut state = self
                    .deps
                    .pacing
                    .find(&entry.user_id)
                    .await
                    .map_err(|err| err.to_string())?
                    .unwrap_or_else(|| PacingState::default_for(entry.user_id.clone(), now));
                let previous = state.calls_per_minute;
                state.calls_per_minute = new_rate;
                state.updated_at = now;
                self.deps.pacing.save(state).await.map_err(|err| err.to_string())?;
                Ok(json!({ "previous_rate": previous, "new_rate": new_rate }))
            }
            ActionType::QuarantineNumber => {
                let id = param_str(&params, "phone_number_id")?;
                let days = param_u64(&params, "days")? as i64;
                let until = now + Duration::days(days);
                self.deps
                    .numbers
                    .quarantine(&PhoneNumberId(id.clone()), until)
                    .await
                    .map_err(|err| err.to_string())?;
                Ok(json!({ "phone_number_id": id, "quarantined_until": until.to_rfc3339() }))
            }
            ActionType::UpdateLeadStatus => {
                let lead_id = LeadId(param_str(&params, "lead_id")?);
                let raw_stage = param_str(&params, "stage")?;
                let stage = JourneyStage::parse(&raw_stage)
                    .ok_or_else(|| format!("unknown stage {raw_stage}"))?;
                let mut state = self
                    .deps
                    .journeys
                    .find(&lead_id)
                    .await
                    .map_err(|err| err.to_string())?
                    .unwrap_or_else(|| {
                        JourneyState::fresh(lead_id.clone(), entry.user_id.clone(), now)
                    });
                state.enter_stage(stage, now);
                state.updated_at = now;
                self.deps.journeys.save(state).await.map_err(|err| err.to_string())?;
                Ok(json!({ "lead_id": lead_id.0, "stage": stage.as_str() }))
            }
            ActionType::JourneyCall => {
                let lead_id = LeadId(param_str(&params, "lead_id")?);
                let phone_number = param_str(&params, "phone_number")?;
                let source = params
                    .get("source")
                    .and_then(Value::as_str)
                    .unwrap_or("journey_engine")
                    .to_string();

                let balance = self
                    .deps
                    .billing
                    .check_balance(&entry.user_id)
                    .await
                    .map_err(|err| err.to_string())?;
                if !balance.sufficient {
                    return Err("insufficient balance for outbound call".to_string());
                }

                let receipt = self
                    .deps
                    .calls
                    .make_call(CallRequest {
                        user_id: entry.user_id.clone(),
                        lead_id: lead_id.clone(),
                        phone_number,
                        source,
                    })
                    .await
                    .map_err(|err| err.to_string())?;
                let call_id = receipt.provider_id.clone().unwrap_or_else(|| entry.id.0.clone());

                // The dispatch fee settles immediately; per-minute charges are
                // reconciled downstream from call records.
                self.deps
                    .billing
                    .reserve(&entry.user_id, &call_id, &reserve_key(&call_id))
                    .await
                    .map_err(|err| err.to_string())?;
                self.deps
                    .billing
                    .finalize(&entry.user_id, &call_id, &finalize_key(&call_id))
                    .await
                    .map_err(|err| err.to_string())?;

                self.deps
                    .leads
                    .touch_contacted(&lead_id, now)
                    .await
                    .map_err(|err| err.to_string())?;
                Ok(json!({ "call_id": call_id, "response": receipt.raw }))
            }
            ActionType::JourneyAiSms => {
                let lead_id = LeadId(param_str(&params, "lead_id")?);
                let phone_number = param_str(&params, "phone_number")?;
                let prompt = param_str(&params, "prompt")?;
                let context = params.get("context").cloned().unwrap_or_else(|| json!({}));
                let receipt = self
                    .deps
                    .sms
                    .send_ai_sms(AiSmsRequest {
                        user_id: entry.user_id.clone(),
                        lead_id: lead_id.clone(),
                        phone_number,
                        prompt,
                        context,
                    })
                    .await
                    .map_err(|err| err.to_string())?;
                self.deps
                    .leads
                    .touch_contacted(&lead_id, now)
                    .await
                    .map_err(|err| err.to_string())?;
                Ok(json!({ "provider_id": receipt.provider_id, "response": receipt.raw }))
            }
        }
    }

    async fn expire_pending(
        &self,
        user: &UserId,
        result: &mut EngineResult,
    ) -> Result<(), EngineError> {
        let now = self.deps.clock.now();
        for entry in self.deps.queue.list_expired_pending(user, now).await? {
            match self.queue_engine.expire(entry) {
                Ok(expired) => {
                    let detail = format!("entry {} expired unapproved", expired.id.0);
                    let lead_id = expired.lead_id.clone();
                    self.deps.queue.save(expired).await?;
                    result.actions_expired += 1;
                    let event = EngineEvent::new(
                        user.clone(),
                        lead_id,
                        EventCategory::Queue,
                        "queue.action_expired",
                        detail,
                        now,
                    );
                    self.remember(event, result).await;
                }
                Err(err) => result.errors.push(DomainError::from(err).to_string()),
            }
        }
        Ok(())
    }

    /// Recompute priority scores for the user's actionable leads and return
    /// them highest score first, feeding the decision pass.
    async fn rescore_leads(
        &self,
        user: &UserId,
        result: &mut EngineResult,
    ) -> Result<Vec<Lead>, EngineError> {
        let now = self.deps.clock.now();
        let mut leads = self.deps.leads.list_actionable(user, RESCORE_LIMIT).await?;

        for lead in &mut leads {
            let (calls, sms) = tokio::join!(
                self.deps.interactions.call_stats(&lead.id),
                self.deps.interactions.sms_counts(&lead.id)
            );
            let (calls, sms) = match (calls, sms) {
                (Ok(calls), Ok(sms)) => (calls, sms),
                (Err(err), _) | (_, Err(err)) => {
                    result.errors.push(format!("rescore {} failed: {err}", lead.id.0));
                    continue;
                }
            };
            let score = self.scorer.score(&LeadSignals {
                answered_calls: calls.total_answered,
                inbound_sms: sms.received,
                total_calls: calls.total_calls,
                days_since_contact: lead.days_since_contact(now),
                status: lead.status,
            });
            self.deps.leads.update_score(&lead.id, score).await?;
            lead.priority_score = score;
            result.leads_rescored += 1;
        }

        leads.sort_by(|a, b| b.priority_score.total_cmp(&a.priority_score));
        Ok(leads)
    }

    async fn analyze_pacing(
        &self,
        user: &UserId,
        result: &mut EngineResult,
    ) -> Result<PacingRecommendation, EngineError> {
        let now = self.deps.clock.now();
        let since = now - Duration::minutes(PACING_WINDOW_MINUTES);
        let stats = self.deps.interactions.window_stats(user, since).await?;
        let current = self
            .deps
            .pacing
            .find(user)
            .await?
            .map(|state| state.calls_per_minute)
            .unwrap_or(PacingState::DEFAULT_RATE);

        let recommendation = pacing::recommend(&stats, current);
        result.windows_recalculated += 1;

        if recommendation.should_adjust {
            let event = EngineEvent::new(
                user.clone(),
                None,
                EventCategory::Pacing,
                "pacing.adjustment_recommended",
                recommendation.reason.clone(),
                now,
            )
            .with_metadata("current_rate", current.to_string())
            .with_metadata("recommended_rate", recommendation.recommended_rate.to_string());
            self.remember(event, result).await;
        }
        Ok(recommendation)
    }

    async fn make_decisions(
        &self,
        settings: &AutomationSettings,
        scored: &[Lead],
        recommendation: &PacingRecommendation,
        remaining: &mut i64,
        cap_noted: &mut bool,
        result: &mut EngineResult,
    ) -> Result<(), EngineError> {
        let user = &settings.user_id;
        let now = self.deps.clock.now();
        let counts = self.deps.interactions.daily_counts(user, self.deps.clock.local_day_start()).await?;
        let progress = goals::assess(settings, &counts, self.deps.clock.local_hour());
        let stale = self.deps.leads.list_stale_contacts(user, STALE_FETCH_LIMIT).await?;
        let numbers = self.deps.numbers.list_active(user).await?;
        let campaign = self.deps.campaigns.first_active(user).await?;

        let inputs = DecisionInputs {
            settings,
            progress: &progress,
            pacing: Some(recommendation),
            scored_leads: scored,
            stale_contacts: &stale,
            numbers: &numbers,
            first_campaign: campaign.as_ref(),
            now,
            local_hour: self.deps.clock.local_hour(),
            window_start_hour: self.config.calling_window_start_hour,
            window_end_hour: self.config.calling_window_end_hour,
        };

        for decision in decide(&inputs) {
            self.propose(settings, decision, remaining, cap_noted, result).await?;
        }
        Ok(())
    }

    /// Advance every due journey: refresh signals, reclassify the stage, and
    /// act on the planner's verdict. Suggestions-only users get the full
    /// tracking but their plans are recorded instead of queued.
    async fn process_journeys(
        &self,
        settings: &AutomationSettings,
        scored: &[Lead],
        remaining: &mut i64,
        cap_noted: &mut bool,
        result: &mut EngineResult,
    ) -> Result<(), EngineError> {
        let user = &settings.user_id;
        let now = self.deps.clock.now();
        let ctx = PlannerContext {
            now,
            offset: self.deps.clock.offset(),
            window_start_hour: self.config.calling_window_start_hour,
            window_end_hour: self.config.calling_window_end_hour,
        };
        let rules = self.deps.playbooks.list_active(user).await?;
        let budget = settings.max_daily_touches;

        let mut states = self.deps.journeys.list_due(user, now, budget).await?;

        // Journeys are created lazily for actionable leads that have none.
        let known: HashSet<String> = states.iter().map(|s| s.lead_id.0.clone()).collect();
        for lead in scored {
            if known.contains(&lead.id.0) {
                continue;
            }
            if self.deps.journeys.find(&lead.id).await?.is_none() {
                states.push(JourneyState::fresh(lead.id.clone(), user.clone(), now));
            }
        }
        states.truncate(budget as usize);

        for mut state in states {
            let Some(lead) = self.deps.leads.find(&state.lead_id).await? else {
                result.errors.push(format!("journey {} references a missing lead", state.lead_id.0));
                continue;
            };

            let (calls, sms) = tokio::join!(
                self.deps.interactions.call_stats(&lead.id),
                self.deps.interactions.sms_counts(&lead.id)
            );
            let (calls, sms) = match (calls, sms) {
                (Ok(calls), Ok(sms)) => (calls, sms),
                (Err(err), _) | (_, Err(err)) => {
                    result.errors.push(format!("journey {} signals failed: {err}", lead.id.0));
                    continue;
                }
            };

            let signals = JourneySignals {
                call_attempts: calls.recent_attempts,
                calls_answered: calls.recent_answered,
                sms_sent: sms.sent,
                sms_received: sms.received,
                avg_call_duration_secs: calls.avg_duration_secs,
                positive_outcomes: calls.positive_outcomes,
                negative_outcomes: calls.negative_outcomes,
                appointment_set: calls.appointment_set,
                last_contact_at: lead.last_contacted_at,
                next_callback_at: lead.next_callback_at,
                lead_status: lead.status,
            };
            let interest = journey::derive_interest(&signals);

            state.call_attempts = signals.call_attempts;
            state.calls_answered = signals.calls_answered;
            state.sms_sent = signals.sms_sent;
            state.sms_received = signals.sms_received;
            state.interest_level = interest;
            state.sentiment = journey::derive_sentiment(&signals);
            state.best_hour_to_call = calls.best_hour_to_call;
            state.preferred_channel = if signals.sms_received > signals.calls_answered {
                ContactChannel::Sms
            } else {
                ContactChannel::Call
            };
            if let Some(days) = signals.days_since_contact(now) {
                if days > 0 {
                    state.longest_silence_days = state.longest_silence_days.max(days as u32);
                }
            }

            let verdict = journey::classify(&signals, interest, now);
            if verdict.stage != state.stage {
                let event = EngineEvent::new(
                    user.clone(),
                    Some(state.lead_id.clone()),
                    EventCategory::Stage,
                    "journey.stage_changed",
                    verdict.reason.clone(),
                    now,
                )
                .with_metadata("from", state.stage.as_str())
                .with_metadata("to", verdict.stage.as_str());
                self.remember(event, result).await;
                state.enter_stage(verdict.stage, now);
                result.journey_stage_changes += 1;
            }

            match journey::plan(&lead, &state, &rules, &ctx) {
                JourneyPlan::CallbackReminder(decision) => {
                    if settings.autonomy.allows_decisions() {
                        if self.propose(settings, decision, remaining, cap_noted, result).await? {
                            state.callback_reminder_sent_at = Some(now);
                            state.next_action_type = Some(RuleActionKind::Call);
                            state.next_action_at = lead.next_callback_at;
                            state.next_action_reason =
                                Some("reminder queued, call due at the requested time".to_string());
                            result.journey_actions += 1;
                        }
                    } else {
                        result.decisions.push(format!("suggested: {}", decision.reasoning));
                    }
                }
                JourneyPlan::CallbackCall(decision) => {
                    if settings.autonomy.allows_decisions() {
                        if self.propose(settings, decision, remaining, cap_noted, result).await? {
                            state.callback_call_queued_at = Some(now);
                            state.next_action_type = None;
                            state.next_action_at = None;
                            state.next_action_reason = Some("callback call queued".to_string());
                            result.journey_actions += 1;
                        }
                    } else {
                        result.decisions.push(format!("suggested: {}", decision.reasoning));
                    }
                }
                JourneyPlan::RuleAction { decision, rule_id } => {
                    if settings.autonomy.allows_decisions() {
                        if self.propose(settings, decision, remaining, cap_noted, result).await? {
                            state.next_action_type = None;
                            state.next_action_at = None;
                            state.next_action_reason = Some(format!("rule {} fired", rule_id.0));
                            result.journey_actions += 1;
                        }
                    } else {
                        result.decisions.push(format!("suggested: {}", decision.reasoning));
                    }
                }
                JourneyPlan::Schedule { action, at, reason } => {
                    state.next_action_type = action;
                    state.next_action_at = Some(at);
                    state.next_action_reason = Some(reason);
                }
                JourneyPlan::Hold(reason) => {
                    state.next_action_type = None;
                    state.next_action_at = None;
                    state.next_action_reason = Some(reason);
                }
            }

            state.updated_at = now;
            self.deps.journeys.save(state).await?;
            result.journey_processed += 1;
        }
        Ok(())
    }

    /// Persist one decision as a queue entry, honoring the daily cap. Returns
    /// whether the entry was actually created.
    async fn propose(
        &self,
        settings: &AutomationSettings,
        decision: Decision,
        remaining: &mut i64,
        cap_noted: &mut bool,
        result: &mut EngineResult,
    ) -> Result<bool, EngineError> {
        if *remaining <= 0 {
            if !*cap_noted {
                result.decisions.push(format!(
                    "daily action cap {} reached, holding further proposals",
                    settings.max_daily_actions
                ));
                *cap_noted = true;
            }
            return Ok(false);
        }

        let now = self.deps.clock.now();
        let entry = self.queue_engine.propose(&settings.user_id, decision, settings.autonomy, now);
        self.deps.queue.save(entry.clone()).await?;
        *remaining -= 1;
        result.actions_queued += 1;
        result.decisions.push(entry.reasoning.clone());

        let event = EngineEvent::new(
            settings.user_id.clone(),
            entry.lead_id.clone(),
            EventCategory::Decision,
            "queue.action_proposed",
            entry.reasoning.clone(),
            now,
        )
        .with_metadata("action_type", entry.action_type.as_str())
        .with_metadata("status", entry.status.as_str());
        self.remember(event, result).await;
        Ok(true)
    }

    /// Append to the decision trace. Trace failures degrade to result errors
    /// rather than aborting the pass.
    async fn remember(&self, event: EngineEvent, result: &mut EngineResult) {
        match self.deps.events.append(event).await {
            Ok(()) => result.memories_saved += 1,
            Err(err) => result.errors.push(format!("event append failed: {err}")),
        }
    }
}

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new().route("/engine/tick", post(tick)).with_state(engine)
}

async fn tick(State(engine): State<Arc<Engine>>) -> Response {
    match engine.run_tick().await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(err) => {
            let interface = err.into_application().into_interface(new_correlation_id("tick"));
            error!(
                event_name = "system.engine.tick_failed",
                correlation_id = %interface.correlation_id(),
                error = %interface,
                "engine tick failed"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": interface.user_message(),
                    "detail": interface.to_string(),
                    "correlation_id": interface.correlation_id(),
                })),
            )
                .into_response()
        }
    }
}

fn param_str(params: &Value, key: &str) -> Result<String, String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("missing or non-string param {key}"))
}

fn param_u64(params: &Value, key: &str) -> Result<u64, String> {
    params
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| format!("missing or non-numeric param {key}"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cadence_core::chrono::{DateTime, Duration, Utc};
    use cadence_core::clock::FixedClock;
    use cadence_core::config::EngineConfig;
    use cadence_core::domain::journey::JourneyStage;
    use cadence_core::domain::lead::{Lead, LeadStatus};
    use cadence_core::domain::number::PhoneNumber;
    use cadence_core::domain::pacing::PacingState;
    use cadence_core::domain::playbook::{PlaybookRule, RuleActionKind};
    use cadence_core::domain::queue::{ActionSource, ActionStatus, ActionType};
    use cadence_core::domain::run::Decision;
    use cadence_core::domain::settings::{AutomationSettings, AutonomyLevel};
    use cadence_core::domain::{LeadId, PhoneNumberId, RuleId, UserId};
    use cadence_core::pacing::CallWindowStats;
    use cadence_core::queue::ActionQueueEngine;
    use cadence_db::repositories::{
        ActionQueueRepository, EventRepository, InMemoryActionQueueRepository,
        InMemoryCampaignRepository, InMemoryEventRepository, InMemoryInteractionRepository,
        InMemoryJourneyRepository, InMemoryLeadRepository, InMemoryNumberRepository,
        InMemoryPacingRepository, InMemoryPlaybookRepository, InMemorySettingsRepository,
        JourneyRepository, LeadCallStats, LeadRepository, LeadSmsCounts, NumberRepository,
        PacingRepository, PlaybookRepository, SettingsRepository,
    };
    use cadence_providers::RecordingProviders;
    use serde_json::json;

    use super::{Engine, EngineDeps};

    const NOW: &str = "2026-05-11T12:00:00Z";

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    fn user() -> UserId {
        UserId("U-1".to_string())
    }

    fn engine_config() -> EngineConfig {
        EngineConfig {
            tick_interval_secs: 300,
            calling_window_start_hour: 9,
            calling_window_end_hour: 17,
            utc_offset_hours: 0,
            execute_batch_size: 10,
            action_expiry_hours: 24,
        }
    }

    fn enabled_settings() -> AutomationSettings {
        let mut settings = AutomationSettings::defaults_for(user());
        settings.enabled = true;
        settings.autonomy = AutonomyLevel::FullAuto;
        settings
    }

    fn lead(id: &str) -> Lead {
        Lead {
            id: LeadId(id.to_string()),
            user_id: user(),
            first_name: "Dana".to_string(),
            phone: "+15550100".to_string(),
            status: LeadStatus::Contacted,
            do_not_call: false,
            last_contacted_at: None,
            next_callback_at: None,
            priority_score: 0.0,
            created_at: ts(NOW) - Duration::days(10),
        }
    }

    struct Harness {
        settings: Arc<InMemorySettingsRepository>,
        leads: Arc<InMemoryLeadRepository>,
        interactions: Arc<InMemoryInteractionRepository>,
        journeys: Arc<InMemoryJourneyRepository>,
        playbooks: Arc<InMemoryPlaybookRepository>,
        queue: Arc<InMemoryActionQueueRepository>,
        events: Arc<InMemoryEventRepository>,
        pacing: Arc<InMemoryPacingRepository>,
        numbers: Arc<InMemoryNumberRepository>,
        campaigns: Arc<InMemoryCampaignRepository>,
        providers: Arc<RecordingProviders>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                settings: Arc::new(InMemorySettingsRepository::default()),
                leads: Arc::new(InMemoryLeadRepository::default()),
                interactions: Arc::new(InMemoryInteractionRepository::default()),
                journeys: Arc::new(InMemoryJourneyRepository::default()),
                playbooks: Arc::new(InMemoryPlaybookRepository::default()),
                queue: Arc::new(InMemoryActionQueueRepository::default()),
                events: Arc::new(InMemoryEventRepository::default()),
                pacing: Arc::new(InMemoryPacingRepository::default()),
                numbers: Arc::new(InMemoryNumberRepository::default()),
                campaigns: Arc::new(InMemoryCampaignRepository::default()),
                providers: Arc::new(RecordingProviders::default()),
            }
        }

        fn engine_at(&self, now: DateTime<Utc>) -> Engine {
            let deps = EngineDeps {
                settings: self.settings.clone(),
                leads: self.leads.clone(),
                interactions: self.interactions.clone(),
                journeys: self.journeys.clone(),
                playbooks: self.playbooks.clone(),
                queue: self.queue.clone(),
                events: self.events.clone(),
                pacing: self.pacing.clone(),
                numbers: self.numbers.clone(),
                campaigns: self.campaigns.clone(),
                sms: self.providers.clone(),
                calls: self.providers.clone(),
                billing: self.providers.clone(),
                clock: Arc::new(FixedClock::at(now)),
            };
            Engine::new(deps, engine_config())
        }
    }

    #[tokio::test]
    async fn stale_contact_gets_one_followup_then_executes_next_tick() {
        let h = Harness::new();
        h.settings.save(enabled_settings()).await.unwrap();
        let mut stale = lead("L-1");
        stale.last_contacted_at = Some(ts(NOW) - Duration::days(3));
        h.leads.save(stale).await.unwrap();

        let summary = h.engine_at(ts(NOW)).run_tick().await.unwrap();
        assert_eq!(summary.users_processed, 1);
        assert_eq!(summary.total_actions_queued, 1);

        let entries = h.queue.all().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action_type, ActionType::SendFollowupSms);
        assert_eq!(entries[0].status, ActionStatus::Approved, "full-auto skips operator review");
        assert!(h.providers.requests_for("sms").is_empty(), "proposal alone sends nothing");

        let summary = h.engine_at(ts(NOW) + Duration::minutes(5)).run_tick().await.unwrap();
        assert_eq!(summary.total_actions_executed, 1);
        assert_eq!(h.providers.requests_for("sms").len(), 1);

        let entries = h.queue.all().await;
        assert_eq!(entries.len(), 1, "the executed touch must not be re-proposed");
        assert_eq!(entries[0].status, ActionStatus::Completed);

        let refreshed = h.leads.find(&LeadId("L-1".to_string())).await.unwrap().unwrap();
        assert_eq!(refreshed.last_contacted_at, Some(ts(NOW) + Duration::minutes(5)));
    }

    #[tokio::test]
    async fn daily_action_cap_holds_further_proposals() {
        let h = Harness::new();
        let mut settings = enabled_settings();
        settings.max_daily_actions = 1;
        h.settings.save(settings).await.unwrap();

        let mut stale = lead("L-1");
        stale.last_contacted_at = Some(ts(NOW) - Duration::days(3));
        h.leads.save(stale).await.unwrap();
        h.numbers
            .save(PhoneNumber {
                id: PhoneNumberId("N-1".to_string()),
                user_id: user(),
                number: "+15559000".to_string(),
                active: true,
                spam_score: 90,
                quarantined_until: None,
            })
            .await
            .unwrap();

        let summary = h.engine_at(ts(NOW)).run_tick().await.unwrap();
        assert_eq!(h.queue.all().await.len(), 1, "only one entry fits under the cap");
        assert!(summary.results[0]
            .decisions
            .iter()
            .any(|d| d.contains("daily action cap 1 reached")));

        h.engine_at(ts(NOW) + Duration::minutes(5)).run_tick().await.unwrap();
        assert_eq!(h.queue.all().await.len(), 1, "the cap counts entries created today");
    }

    #[tokio::test]
    async fn completed_twin_entry_skips_duplicate_send() {
        let h = Harness::new();
        h.settings.save(enabled_settings()).await.unwrap();
        let mut recent = lead("L-1");
        recent.last_contacted_at = Some(ts(NOW) - Duration::hours(1));
        h.leads.save(recent).await.unwrap();

        let decision = Decision {
            action_type: ActionType::SendFollowupSms,
            lead_id: Some(LeadId("L-1".to_string())),
            params: json!({ "lead_id": "L-1", "to": "+15550100", "message": "ping" }),
            priority: 5,
            reasoning: "manual follow-up".to_string(),
            source: ActionSource::AutonomousEngine,
        };
        let queue_engine = ActionQueueEngine::default();
        let first =
            queue_engine.propose(&user(), decision.clone(), AutonomyLevel::FullAuto, ts(NOW) - Duration::minutes(5));
        let second =
            queue_engine.propose(&user(), decision, AutonomyLevel::FullAuto, ts(NOW) - Duration::minutes(4));
        assert_eq!(first.idempotency_key, second.idempotency_key);
        h.queue.save(first).await.unwrap();
        h.queue.save(second).await.unwrap();

        let summary = h.engine_at(ts(NOW)).run_tick().await.unwrap();
        assert_eq!(summary.total_actions_executed, 2);
        assert_eq!(h.providers.requests_for("sms").len(), 1, "the twin must not send again");

        let entries = h.queue.all().await;
        assert!(entries.iter().all(|e| e.status == ActionStatus::Completed));
        let skipped: Vec<_> = entries
            .iter()
            .filter(|e| e.result_json.as_deref().is_some_and(|r| r.contains("skipped")))
            .collect();
        assert_eq!(skipped.len(), 1);
    }

    #[tokio::test]
    async fn callback_precedence_reminder_then_call() {
        let h = Harness::new();
        h.settings.save(enabled_settings()).await.unwrap();
        let mut callback = lead("L-1");
        callback.status = LeadStatus::Callback;
        callback.last_contacted_at = Some(ts(NOW) - Duration::hours(1));
        callback.next_callback_at = Some(ts(NOW) + Duration::minutes(60));
        h.leads.save(callback).await.unwrap();
        // A matching rule that must never shadow the explicit callback.
        h.playbooks
            .save(PlaybookRule {
                id: RuleId("R-1".to_string()),
                user_id: user(),
                stage: JourneyStage::CallbackSet,
                priority: 1,
                min_touches: 0,
                max_touches: 100,
                min_days_in_stage: 0,
                max_days_in_stage: 365,
                min_interest: 1,
                max_interest: 10,
                requires_no_callback: false,
                action: RuleActionKind::Sms,
                message_template: Some("Hi {first_name}".to_string()),
                move_to_stage: None,
                delay_hours: 0,
                respect_calling_window: false,
                active: true,
            })
            .await
            .unwrap();

        let summary = h.engine_at(ts(NOW)).run_tick().await.unwrap();
        assert_eq!(summary.results[0].journey_actions, 1);
        let entries = h.queue.all().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action_type, ActionType::SendFollowupSms);
        assert_eq!(entries[0].source, ActionSource::JourneyEngine);

        let state = h.journeys.find(&LeadId("L-1".to_string())).await.unwrap().unwrap();
        assert_eq!(state.stage, JourneyStage::CallbackSet);
        assert!(state.callback_reminder_sent_at.is_some());

        // Close to the requested time the call itself is queued.
        h.engine_at(ts(NOW) + Duration::minutes(57)).run_tick().await.unwrap();
        let entries = h.queue.all().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].action_type, ActionType::JourneyCall);
        assert_eq!(h.providers.requests_for("sms").len(), 1, "reminder executed on this tick");

        let state = h.journeys.find(&LeadId("L-1".to_string())).await.unwrap().unwrap();
        assert!(state.callback_call_queued_at.is_some());

        // Next tick dispatches the call with its billing handshake.
        h.engine_at(ts(NOW) + Duration::minutes(58)).run_tick().await.unwrap();
        assert_eq!(h.providers.requests_for("call").len(), 1);
        let billing = h.providers.requests_for("billing");
        assert_eq!(billing.len(), 3);
        assert_eq!(billing[0].payload["action"], "check_balance");
        assert_eq!(billing[1].payload["action"], "reserve");
        assert_eq!(billing[2].payload["action"], "finalize");
        assert_eq!(h.queue.all().await.len(), 2, "no third proposal after the call is queued");
    }

    #[tokio::test]
    async fn pacing_degradation_halves_rate_and_applies() {
        let h = Harness::new();
        h.settings.save(enabled_settings()).await.unwrap();
        h.pacing
            .save(PacingState { user_id: user(), calls_per_minute: 50, updated_at: ts(NOW) })
            .await
            .unwrap();
        h.interactions
            .set_window_stats(&user(), CallWindowStats { total: 15, failed: 5, answered: 10 })
            .await;

        h.engine_at(ts(NOW)).run_tick().await.unwrap();
        let entries = h.queue.all().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action_type, ActionType::AdjustPacing);
        let params: serde_json::Value = serde_json::from_str(&entries[0].params_json).unwrap();
        assert_eq!(params["new_rate"], 25, "a third of calls failing halves 50 to 25");

        let summary = h.engine_at(ts(NOW) + Duration::minutes(5)).run_tick().await.unwrap();
        assert!(summary.results[0].pacing_adjusted);
        let state = h.pacing.find(&user()).await.unwrap().unwrap();
        assert_eq!(state.calls_per_minute, 25);
    }

    #[tokio::test]
    async fn provider_failure_marks_entry_failed() {
        let h = Harness::new();
        h.settings.save(enabled_settings()).await.unwrap();
        let mut stale = lead("L-1");
        stale.last_contacted_at = Some(ts(NOW) - Duration::days(3));
        h.leads.save(stale).await.unwrap();

        h.engine_at(ts(NOW)).run_tick().await.unwrap();
        h.providers.fail_channel("sms");

        let summary = h.engine_at(ts(NOW) + Duration::minutes(5)).run_tick().await.unwrap();
        let failed: Vec<_> = h
            .queue
            .all()
            .await
            .into_iter()
            .filter(|e| e.status == ActionStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].error.as_deref().is_some_and(|e| e.contains("unavailable")));
        assert!(!summary.results[0].errors.is_empty());

        let refreshed = h.leads.find(&LeadId("L-1".to_string())).await.unwrap().unwrap();
        assert_eq!(
            refreshed.last_contacted_at,
            Some(ts(NOW) - Duration::days(3)),
            "a failed send is not a touch"
        );
    }

    #[tokio::test]
    async fn insufficient_balance_fails_call_without_dialing() {
        let h = Harness::new();
        h.settings.save(enabled_settings()).await.unwrap();
        let mut qualified = lead("L-1");
        qualified.status = LeadStatus::Qualified;
        qualified.last_contacted_at = Some(ts(NOW) - Duration::hours(1));
        h.leads.save(qualified).await.unwrap();

        let decision = Decision {
            action_type: ActionType::JourneyCall,
            lead_id: Some(LeadId("L-1".to_string())),
            params: json!({
                "lead_id": "L-1",
                "phone_number": "+15550100",
                "source": "journey_engine",
            }),
            priority: 1,
            reasoning: "callback due".to_string(),
            source: ActionSource::JourneyEngine,
        };
        let entry = ActionQueueEngine::default().propose(
            &user(),
            decision,
            AutonomyLevel::FullAuto,
            ts(NOW) - Duration::minutes(5),
        );
        h.queue.save(entry).await.unwrap();
        h.providers.set_sufficient_balance(false);

        h.engine_at(ts(NOW)).run_tick().await.unwrap();
        let entries = h.queue.all().await;
        assert_eq!(entries[0].status, ActionStatus::Failed);
        assert!(entries[0].error.as_deref().is_some_and(|e| e.contains("insufficient balance")));
        assert!(h.providers.requests_for("call").is_empty(), "no dial without funds");
        assert_eq!(h.providers.requests_for("billing").len(), 1, "only the balance check ran");
    }

    #[tokio::test]
    async fn fresh_lead_with_attempts_moves_to_attempting() {
        let h = Harness::new();
        h.settings.save(enabled_settings()).await.unwrap();
        let mut attempted = lead("L-1");
        attempted.status = LeadStatus::New;
        attempted.last_contacted_at = Some(ts(NOW) - Duration::days(1));
        h.leads.save(attempted).await.unwrap();
        h.interactions
            .set_call_stats(
                &LeadId("L-1".to_string()),
                LeadCallStats { recent_attempts: 2, total_calls: 2, ..LeadCallStats::default() },
            )
            .await;

        let summary = h.engine_at(ts(NOW)).run_tick().await.unwrap();
        assert_eq!(summary.results[0].journey_stage_changes, 1);

        let state = h.journeys.find(&LeadId("L-1".to_string())).await.unwrap().unwrap();
        assert_eq!(state.stage, JourneyStage::Attempting);
        assert_eq!(state.call_attempts, 2);

        let events = h.events.list_recent(&user(), 50).await.unwrap();
        let change = events
            .iter()
            .find(|e| e.event_type == "journey.stage_changed")
            .expect("stage change event recorded");
        assert_eq!(change.metadata.get("to").map(String::as_str), Some("attempting"));
    }

    #[tokio::test]
    async fn rescoring_updates_and_orders_leads() {
        let h = Harness::new();
        h.settings.save(enabled_settings()).await.unwrap();
        let mut engaged = lead("L-1");
        engaged.last_contacted_at = Some(ts(NOW) - Duration::hours(6));
        h.leads.save(engaged).await.unwrap();
        let mut cold = lead("L-2");
        cold.last_contacted_at = Some(ts(NOW) - Duration::days(40));
        h.leads.save(cold).await.unwrap();
        h.interactions
            .set_call_stats(
                &LeadId("L-1".to_string()),
                LeadCallStats {
                    recent_attempts: 3,
                    recent_answered: 2,
                    total_calls: 3,
                    total_answered: 2,
                    ..LeadCallStats::default()
                },
            )
            .await;
        h.interactions
            .set_sms_counts(&LeadId("L-1".to_string()), LeadSmsCounts { sent: 1, received: 2, last_inbound_at: None })
            .await;

        let summary = h.engine_at(ts(NOW)).run_tick().await.unwrap();
        assert_eq!(summary.total_leads_rescored, 2);

        let hot = h.leads.find(&LeadId("L-1".to_string())).await.unwrap().unwrap();
        let cold = h.leads.find(&LeadId("L-2".to_string())).await.unwrap().unwrap();
        assert!(hot.priority_score > cold.priority_score);
        assert!(hot.priority_score > 0.0);
    }

    #[tokio::test]
    async fn suggestions_only_records_plans_without_queueing() {
        let h = Harness::new();
        let mut settings = enabled_settings();
        settings.autonomy = AutonomyLevel::SuggestionsOnly;
        h.settings.save(settings).await.unwrap();
        let mut callback = lead("L-1");
        callback.status = LeadStatus::Callback;
        callback.next_callback_at = Some(ts(NOW) + Duration::minutes(30));
        callback.last_contacted_at = Some(ts(NOW) - Duration::hours(1));
        h.leads.save(callback).await.unwrap();

        let summary = h.engine_at(ts(NOW)).run_tick().await.unwrap();
        assert!(h.queue.all().await.is_empty(), "suggestions-only never queues");
        assert!(summary.results[0].decisions.iter().any(|d| d.starts_with("suggested:")));

        let state = h.journeys.find(&LeadId("L-1".to_string())).await.unwrap().unwrap();
        assert_eq!(state.stage, JourneyStage::CallbackSet, "stage tracking still runs");
        assert!(state.callback_reminder_sent_at.is_none());
    }

    #[tokio::test]
    async fn stale_pending_entries_expire() {
        let h = Harness::new();
        h.settings.save(enabled_settings()).await.unwrap();

        let decision = Decision {
            action_type: ActionType::QueueLeads,
            lead_id: None,
            params: json!({ "campaign_id": "C-1", "lead_ids": [] }),
            priority: 3,
            reasoning: "behind goal".to_string(),
            source: ActionSource::AutonomousEngine,
        };
        let entry = ActionQueueEngine::default().propose(
            &user(),
            decision,
            AutonomyLevel::ApprovalRequired,
            ts(NOW) - Duration::hours(25),
        );
        assert_eq!(entry.status, ActionStatus::Pending);
        h.queue.save(entry).await.unwrap();

        let summary = h.engine_at(ts(NOW)).run_tick().await.unwrap();
        assert_eq!(summary.results[0].actions_expired, 1);
        assert_eq!(h.queue.all().await[0].status, ActionStatus::Expired);
    }

    #[test]
    fn repository_failure_maps_to_correlated_service_unavailable() {
        use cadence_core::errors::{new_correlation_id, InterfaceError};
        use cadence_db::repositories::RepositoryError;

        use super::EngineError;

        let err = EngineError::Repository(RepositoryError::Decode("bad status column".to_string()));
        let interface = err.into_application().into_interface(new_correlation_id("tick"));

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert!(interface.correlation_id().starts_with("tick-"));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }
}
