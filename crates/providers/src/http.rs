//! reqwest-backed provider client. Every call is a JSON POST with an
//! `action` discriminator; non-2xx responses surface as errors with the
//! response body attached for the audit trail.

use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, warn};

use cadence_core::config::ProvidersConfig;
use cadence_core::domain::UserId;

use crate::{
    AiSmsRequest, BalanceCheck, BillingGateway, CallDispatcher, CallRequest, ProviderError,
    ProviderReceipt, SmsRequest, SmsSender,
};

pub struct HttpProviders {
    client: Client,
    sms_url: String,
    ai_sms_url: String,
    call_url: String,
    billing_url: String,
    api_token: Option<SecretString>,
}

impl HttpProviders {
    pub fn new(config: &ProvidersConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ProviderError::Http)?;

        Ok(Self {
            client,
            sms_url: config.sms_url.clone(),
            ai_sms_url: config.ai_sms_url.clone(),
            call_url: config.call_url.clone(),
            billing_url: config.billing_url.clone(),
            api_token: config.api_token.clone(),
        })
    }

    async fn post(&self, url: &str, payload: Value) -> Result<ProviderReceipt, ProviderError> {
        let action = payload.get("action").and_then(Value::as_str).unwrap_or("unknown");
        debug!(url, action, "provider request");

        let mut request = self.client.post(url).json(&payload);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(url, action, status = status.as_u16(), "provider request failed");
            return Err(ProviderError::UnexpectedStatus { status: status.as_u16(), body });
        }

        let raw: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        if raw.get("error").is_some_and(|e| !e.is_null()) {
            let message = raw["error"].as_str().unwrap_or("unspecified").to_string();
            return Err(ProviderError::Rejected(message));
        }

        let provider_id = ["sid", "call_id", "id"]
            .iter()
            .find_map(|key| raw.get(key).and_then(Value::as_str))
            .map(str::to_string);

        Ok(ProviderReceipt { provider_id, raw })
    }
}

#[async_trait::async_trait]
impl SmsSender for HttpProviders {
    async fn send_sms(&self, request: SmsRequest) -> Result<ProviderReceipt, ProviderError> {
        self.post(
            &self.sms_url,
            json!({
                "action": "send",
                "to": request.to,
                "message": request.message,
                "lead_id": request.lead_id.map(|id| id.0),
                "user_id": request.user_id.0,
            }),
        )
        .await
    }

    async fn send_ai_sms(&self, request: AiSmsRequest) -> Result<ProviderReceipt, ProviderError> {
        self.post(
            &self.ai_sms_url,
            json!({
                "action": "generate_and_send",
                "lead_id": request.lead_id.0,
                "phone_number": request.phone_number,
                "prompt": request.prompt,
                "context": request.context,
            }),
        )
        .await
    }
}

#[async_trait::async_trait]
impl CallDispatcher for HttpProviders {
    async fn make_call(&self, request: CallRequest) -> Result<ProviderReceipt, ProviderError> {
        self.post(
            &self.call_url,
            json!({
                "action": "make_call",
                "lead_id": request.lead_id.0,
                "phone_number": request.phone_number,
                "source": request.source,
            }),
        )
        .await
    }
}

#[async_trait::async_trait]
impl BillingGateway for HttpProviders {
    async fn check_balance(&self, user_id: &UserId) -> Result<BalanceCheck, ProviderError> {
        let receipt = self
            .post(&self.billing_url, json!({ "action": "check_balance", "user_id": user_id.0 }))
            .await?;

        Ok(BalanceCheck {
            sufficient: receipt.raw.get("sufficient").and_then(Value::as_bool).unwrap_or(false),
            balance_cents: receipt.raw.get("balance_cents").and_then(Value::as_i64),
        })
    }

    async fn reserve(
        &self,
        user_id: &UserId,
        call_id: &str,
        idempotency_key: &str,
    ) -> Result<ProviderReceipt, ProviderError> {
        self.post(
            &self.billing_url,
            json!({
                "action": "reserve",
                "user_id": user_id.0,
                "call_id": call_id,
                "idempotency_key": idempotency_key,
            }),
        )
        .await
    }

    async fn finalize(
        &self,
        user_id: &UserId,
        call_id: &str,
        idempotency_key: &str,
    ) -> Result<ProviderReceipt, ProviderError> {
        self.post(
            &self.billing_url,
            json!({
                "action": "finalize",
                "user_id": user_id.0,
                "call_id": call_id,
                "idempotency_key": idempotency_key,
            }),
        )
        .await
    }
}
