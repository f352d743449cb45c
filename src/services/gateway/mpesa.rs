use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;

use super::{MpesaGateway, StkPushAccepted, StkPushRequest};
use crate::config::MpesaConfig;

/// Daraja STK push client.
pub struct DarajaClient {
    config: MpesaConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushResponse {
    #[serde(rename = "MerchantRequestID", default)]
    merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID", default)]
    checkout_request_id: String,
    #[serde(default)]
    response_code: String,
    #[serde(default)]
    response_description: String,
}

impl DarajaClient {
    pub fn new(config: MpesaConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    async fn access_token(&self) -> anyhow::Result<String> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url
        );
        let token: TokenResponse = self
            .client
            .get(&url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .context("failed to reach M-Pesa auth endpoint")?
            .error_for_status()
            .context("M-Pesa auth returned error")?
            .json()
            .await
            .context("failed to parse M-Pesa auth response")?;
        Ok(token.access_token)
    }
}

/// Daraja password: base64(shortcode + passkey + timestamp).
fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!("{shortcode}{passkey}{timestamp}"))
}

/// Daraja wants 2547XXXXXXXX.
pub fn normalize_msisdn(phone: &str) -> String {
    let phone = phone.trim().trim_start_matches('+');
    match phone.strip_prefix('0') {
        Some(rest) => format!("254{rest}"),
        None => phone.to_string(),
    }
}

#[async_trait]
impl MpesaGateway for DarajaClient {
    async fn stk_push(&self, request: &StkPushRequest<'_>) -> anyhow::Result<StkPushAccepted> {
        anyhow::ensure!(
            !self.config.consumer_key.is_empty() && !self.config.shortcode.is_empty(),
            "M-Pesa credentials are not configured"
        );

        let token = self.access_token().await?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let msisdn = normalize_msisdn(request.phone_number);
        // Daraja only takes whole shillings
        let amount = request.amount.ceil().to_string();

        let body = serde_json::json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": stk_password(&self.config.shortcode, &self.config.passkey, &timestamp),
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": amount,
            "PartyA": msisdn,
            "PartyB": self.config.shortcode,
            "PhoneNumber": msisdn,
            "CallBackURL": self.config.callback_url,
            "AccountReference": request.account_reference,
            "TransactionDesc": request.description,
        });

        let raw: serde_json::Value = self
            .client
            .post(format!("{}/mpesa/stkpush/v1/processrequest", self.config.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .context("failed to reach M-Pesa STK endpoint")?
            .json()
            .await
            .context("failed to parse M-Pesa STK response")?;

        let parsed: StkPushResponse =
            serde_json::from_value(raw.clone()).context("unexpected M-Pesa STK response shape")?;
        anyhow::ensure!(
            parsed.response_code == "0",
            "M-Pesa rejected STK push: {}",
            parsed.response_description
        );

        tracing::info!(
            checkout_request_id = %parsed.checkout_request_id,
            "M-Pesa STK push accepted"
        );

        Ok(StkPushAccepted {
            merchant_request_id: parsed.merchant_request_id,
            checkout_request_id: parsed.checkout_request_id,
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_msisdn() {
        assert_eq!(normalize_msisdn("0712345678"), "254712345678");
        assert_eq!(normalize_msisdn("+254712345678"), "254712345678");
        assert_eq!(normalize_msisdn("254112345678"), "254112345678");
    }

    #[test]
    fn test_stk_password() {
        let password = stk_password("174379", "key", "20250101120000");
        let decoded = base64::engine::general_purpose::STANDARD.decode(password).unwrap();
        assert_eq!(decoded, b"174379key20250101120000");
    }
}
