use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub user_id: String,
    pub service_id: i64,
    pub therapist_id: i64,
    pub booking_date: NaiveDate,
    #[serde(with = "super::hhmm")]
    pub booking_time: NaiveTime,
    #[serde(with = "super::hhmm")]
    pub end_time: NaiveTime,
    pub status: BookingStatus,
    pub total_amount: Decimal,
    pub notes: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Booking {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.booking_date.and_time(self.booking_time)
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.booking_time).num_minutes()
    }

    pub fn is_past(&self, now: NaiveDateTime) -> bool {
        now > self.starts_at()
    }

    /// Cancellable only while `now` is strictly before the appointment minus the cutoff.
    pub fn can_cancel(&self, now: NaiveDateTime, cutoff: Duration) -> bool {
        now < self.starts_at() - cutoff
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "confirmed" => BookingStatus::Confirmed,
            "in_progress" => BookingStatus::InProgress,
            "completed" => BookingStatus::Completed,
            "cancelled" => BookingStatus::Cancelled,
            "no_show" => BookingStatus::NoShow,
            _ => BookingStatus::Pending,
        }
    }

    /// Statuses that hold a therapist's slot.
    pub fn holds_slot(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    /// Administrative transitions. Cancellation goes through its own path.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, InProgress)
                | (InProgress, Completed)
                | (Pending, NoShow)
                | (Confirmed, NoShow)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingAddon {
    pub addon_id: i64,
    pub name: String,
    pub quantity: i64,
    pub price: Decimal,
}

impl BookingAddon {
    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// Manual block/open marker for a therapist on a specific date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: i64,
    pub therapist_id: i64,
    pub date: NaiveDate,
    #[serde(with = "super::hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "super::hhmm")]
    pub end_time: NaiveTime,
    pub is_available: bool,
    pub is_blocked: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    #[default]
    ClientRequest,
    TherapistUnavailable,
    Emergency,
    Illness,
    ScheduleConflict,
    Other,
}

impl CancellationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationReason::ClientRequest => "client_request",
            CancellationReason::TherapistUnavailable => "therapist_unavailable",
            CancellationReason::Emergency => "emergency",
            CancellationReason::Illness => "illness",
            CancellationReason::ScheduleConflict => "schedule_conflict",
            CancellationReason::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "therapist_unavailable" => CancellationReason::TherapistUnavailable,
            "emergency" => CancellationReason::Emergency,
            "illness" => CancellationReason::Illness,
            "schedule_conflict" => CancellationReason::ScheduleConflict,
            "other" => CancellationReason::Other,
            _ => CancellationReason::ClientRequest,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingCancellation {
    pub id: i64,
    pub booking_id: i64,
    pub reason: CancellationReason,
    pub description: String,
    pub cancelled_by: String,
    pub refund_amount: Decimal,
    pub refund_processed: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingReschedule {
    pub id: i64,
    pub booking_id: i64,
    pub new_date: NaiveDate,
    #[serde(with = "super::hhmm")]
    pub new_time: NaiveTime,
    pub new_therapist_id: Option<i64>,
    pub reason: String,
    pub requested_by: String,
    pub is_approved: bool,
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking_at(date: &str, time: &str) -> Booking {
        let now = NaiveDateTime::parse_from_str("2025-06-01 08:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        Booking {
            id: 1,
            user_id: "u1".to_string(),
            service_id: 1,
            therapist_id: 1,
            booking_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            booking_time: NaiveTime::parse_from_str(time, "%H:%M").unwrap(),
            end_time: NaiveTime::parse_from_str(time, "%H:%M").unwrap() + Duration::minutes(90),
            status: BookingStatus::Pending,
            total_amount: Decimal::new(3500, 0),
            notes: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn test_status_roundtrip_strings() {
        for status in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::InProgress,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
            BookingStatus::NoShow,
        ] {
            assert_eq!(BookingStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_can_cancel_boundary() {
        let booking = booking_at("2025-06-20", "10:00");
        let cutoff = Duration::hours(24);
        assert!(booking.can_cancel(ts("2025-06-19 09:59"), cutoff));
        // exactly at the cutoff is already too late
        assert!(!booking.can_cancel(ts("2025-06-19 10:00"), cutoff));
        assert!(!booking.can_cancel(ts("2025-06-20 09:00"), cutoff));
    }

    #[test]
    fn test_duration_and_is_past() {
        let booking = booking_at("2025-06-20", "10:00");
        assert_eq!(booking.duration_minutes(), 90);
        assert!(!booking.is_past(ts("2025-06-20 09:59")));
        assert!(booking.is_past(ts("2025-06-20 10:01")));
    }

    #[test]
    fn test_admin_transitions() {
        assert!(BookingStatus::Pending.can_transition_to(BookingStatus::Confirmed));
        assert!(BookingStatus::Confirmed.can_transition_to(BookingStatus::InProgress));
        assert!(BookingStatus::InProgress.can_transition_to(BookingStatus::Completed));
        assert!(BookingStatus::Confirmed.can_transition_to(BookingStatus::NoShow));
        assert!(!BookingStatus::Pending.can_transition_to(BookingStatus::Completed));
        assert!(!BookingStatus::Completed.can_transition_to(BookingStatus::Confirmed));
        assert!(!BookingStatus::Cancelled.can_transition_to(BookingStatus::Confirmed));
    }

    #[test]
    fn test_holds_slot() {
        assert!(BookingStatus::Pending.holds_slot());
        assert!(BookingStatus::Confirmed.holds_slot());
        assert!(!BookingStatus::Cancelled.holds_slot());
        assert!(!BookingStatus::InProgress.holds_slot());
    }
}
