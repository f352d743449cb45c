use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

use super::{CardChargeRequest, CardChargeResult, CardGateway};

/// Generic hosted card processor speaking a `POST /charges` JSON API.
pub struct HttpCardGateway {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ChargeResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    failure_message: Option<String>,
}

impl HttpCardGateway {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            base_url,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CardGateway for HttpCardGateway {
    async fn charge(&self, request: &CardChargeRequest<'_>) -> anyhow::Result<CardChargeResult> {
        anyhow::ensure!(!self.base_url.is_empty(), "card gateway is not configured");

        let body = serde_json::json!({
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "reference": request.reference,
            "card": {
                "number": request.card_number,
                "exp_month": request.expiry_month,
                "exp_year": request.expiry_year,
                "cvc": request.cvv,
                "name": request.cardholder_name,
            },
        });

        let raw: serde_json::Value = self
            .client
            .post(format!("{}/charges", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to reach card gateway")?
            .json()
            .await
            .context("failed to parse card gateway response")?;

        let parsed: ChargeResponse =
            serde_json::from_value(raw.clone()).context("unexpected card gateway response shape")?;
        let approved = matches!(parsed.status.as_str(), "succeeded" | "approved" | "completed");

        Ok(CardChargeResult {
            approved,
            transaction_id: parsed.id,
            failure_reason: if approved {
                String::new()
            } else {
                parsed
                    .failure_message
                    .unwrap_or_else(|| format!("card declined ({})", parsed.status))
            },
            raw,
        })
    }
}
