use chrono::{NaiveTime, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub duration_minutes: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAddon {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub duration_minutes: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Therapist {
    pub id: i64,
    pub name: String,
    pub bio: String,
    pub is_available: bool,
}

/// One recurring weekly window. `day_of_week` is stored as 0 = Monday.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TherapistAvailability {
    pub id: i64,
    pub therapist_id: i64,
    pub day_of_week: Weekday,
    #[serde(with = "super::hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "super::hhmm")]
    pub end_time: NaiveTime,
    pub is_active: bool,
}
