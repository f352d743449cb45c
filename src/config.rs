use std::env;

use chrono::{Duration, NaiveDateTime, Utc};

/// How a candidate slot is tested against existing bookings and blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotConflictRule {
    /// Only a booking or block starting at the same minute removes the slot.
    StartTime,
    /// Any booking or block whose interval intersects the slot removes it.
    Overlap,
}

impl SlotConflictRule {
    pub fn parse(s: &str) -> Self {
        match s {
            "overlap" => SlotConflictRule::Overlap,
            _ => SlotConflictRule::StartTime,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SlotPolicy {
    pub step_minutes: i64,
    pub conflict_rule: SlotConflictRule,
}

impl Default for SlotPolicy {
    fn default() -> Self {
        Self {
            step_minutes: 30,
            conflict_rule: SlotConflictRule::StartTime,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BookingPolicy {
    pub cancellation_cutoff_hours: i64,
}

impl BookingPolicy {
    pub fn cutoff(&self) -> Duration {
        Duration::hours(self.cancellation_cutoff_hours)
    }
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            cancellation_cutoff_hours: 24,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MpesaConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
    pub webhook_secret: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub currency: String,
    pub utc_offset_minutes: i64,
    pub slot_policy: SlotPolicy,
    pub booking_policy: BookingPolicy,
    pub mpesa: MpesaConfig,
    pub card_gateway_url: String,
    pub card_gateway_key: String,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,
    pub owner_phone: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "storefront.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            currency: env::var("CURRENCY").unwrap_or_else(|_| "KES".to_string()),
            // Africa/Nairobi
            utc_offset_minutes: env_parse("UTC_OFFSET_MINUTES", 180),
            slot_policy: SlotPolicy {
                step_minutes: env_parse("SLOT_STEP_MINUTES", 30),
                conflict_rule: SlotConflictRule::parse(
                    &env::var("SLOT_CONFLICT_RULE").unwrap_or_default(),
                ),
            },
            booking_policy: BookingPolicy {
                cancellation_cutoff_hours: env_parse("CANCELLATION_CUTOFF_HOURS", 24),
            },
            mpesa: MpesaConfig {
                base_url: env::var("MPESA_BASE_URL")
                    .unwrap_or_else(|_| "https://sandbox.safaricom.co.ke".to_string()),
                consumer_key: env::var("MPESA_CONSUMER_KEY").unwrap_or_default(),
                consumer_secret: env::var("MPESA_CONSUMER_SECRET").unwrap_or_default(),
                shortcode: env::var("MPESA_SHORTCODE").unwrap_or_default(),
                passkey: env::var("MPESA_PASSKEY").unwrap_or_default(),
                callback_url: env::var("MPESA_CALLBACK_URL").unwrap_or_default(),
                webhook_secret: env::var("MPESA_WEBHOOK_SECRET").unwrap_or_default(),
            },
            card_gateway_url: env::var("CARD_GATEWAY_URL").unwrap_or_default(),
            card_gateway_key: env::var("CARD_GATEWAY_KEY").unwrap_or_default(),
            twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
            twilio_phone_number: env::var("TWILIO_PHONE_NUMBER").unwrap_or_default(),
            owner_phone: env::var("OWNER_PHONE").unwrap_or_default(),
        }
    }

    /// Wall-clock time in the business's timezone.
    pub fn local_now(&self) -> NaiveDateTime {
        Utc::now().naive_utc() + Duration::minutes(self.utc_offset_minutes)
    }
}

fn env_parse(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_rule_parse() {
        assert_eq!(SlotConflictRule::parse("overlap"), SlotConflictRule::Overlap);
        assert_eq!(SlotConflictRule::parse("start_time"), SlotConflictRule::StartTime);
        assert_eq!(SlotConflictRule::parse(""), SlotConflictRule::StartTime);
    }

    #[test]
    fn test_policy_defaults() {
        assert_eq!(SlotPolicy::default().step_minutes, 30);
        assert_eq!(BookingPolicy::default().cutoff(), Duration::hours(24));
    }
}
