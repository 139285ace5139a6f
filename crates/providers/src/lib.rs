//! Outbound collaborator seams: SMS, AI-composed SMS, call dispatch, and the
//! billing ledger. The engine only ever sees these traits; production wires
//! [`HttpProviders`], tests wire [`RecordingProviders`].

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use cadence_core::domain::{LeadId, UserId};

mod fake;
mod http;

pub use fake::{RecordedRequest, RecordingProviders};
pub use http::HttpProviders;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("provider rejected the request: {0}")]
    Rejected(String),
}

/// Acknowledgement from a provider. `provider_id` is the remote message or
/// call identifier when the provider returns one.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderReceipt {
    pub provider_id: Option<String>,
    pub raw: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BalanceCheck {
    pub sufficient: bool,
    pub balance_cents: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct SmsRequest {
    pub user_id: UserId,
    pub lead_id: Option<LeadId>,
    pub to: String,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct AiSmsRequest {
    pub user_id: UserId,
    pub lead_id: LeadId,
    pub phone_number: String,
    pub prompt: String,
    /// Journey context handed to the composer: stage, interest, touches.
    pub context: Value,
}

#[derive(Clone, Debug)]
pub struct CallRequest {
    pub user_id: UserId,
    pub lead_id: LeadId,
    pub phone_number: String,
    pub source: String,
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, request: SmsRequest) -> Result<ProviderReceipt, ProviderError>;
    async fn send_ai_sms(&self, request: AiSmsRequest) -> Result<ProviderReceipt, ProviderError>;
}

#[async_trait]
pub trait CallDispatcher: Send + Sync {
    async fn make_call(&self, request: CallRequest) -> Result<ProviderReceipt, ProviderError>;
}

/// Billing ledger. Reserve and finalize are idempotent on the remote side,
/// keyed by `reserve_<call_id>` / `finalize_<call_id>`.
#[async_trait]
pub trait BillingGateway: Send + Sync {
    async fn check_balance(&self, user_id: &UserId) -> Result<BalanceCheck, ProviderError>;
    async fn reserve(
        &self,
        user_id: &UserId,
        call_id: &str,
        idempotency_key: &str,
    ) -> Result<ProviderReceipt, ProviderError>;
    async fn finalize(
        &self,
        user_id: &UserId,
        call_id: &str,
        idempotency_key: &str,
    ) -> Result<ProviderReceipt, ProviderError>;
}
