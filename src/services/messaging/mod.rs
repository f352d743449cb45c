pub mod twilio;

use async_trait::async_trait;

use crate::models::Booking;

#[async_trait]
pub trait MessagingProvider: Send + Sync {
    async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingEvent {
    Created,
    Completed,
}

pub fn booking_event_message(
    event: BookingEvent,
    booking: &Booking,
    service_name: &str,
    therapist_name: &str,
    currency: &str,
) -> String {
    let when = format!(
        "{} at {}",
        booking.booking_date.format("%a %d %b %Y"),
        booking.booking_time.format("%H:%M")
    );
    match event {
        BookingEvent::Created => format!(
            "New booking #{}: {service_name} with {therapist_name} on {when} ({currency} {}).",
            booking.id, booking.total_amount
        ),
        BookingEvent::Completed => format!(
            "Booking #{} completed: {service_name} with {therapist_name} on {when}.",
            booking.id
        ),
    }
}

/// Texts the owner. Delivery failures are logged and never surface to the caller.
pub async fn notify_owner(provider: &dyn MessagingProvider, owner_phone: &str, body: &str) {
    if owner_phone.is_empty() {
        tracing::debug!("OWNER_PHONE not set, skipping owner notification");
        return;
    }
    if let Err(e) = provider.send_message(owner_phone, body).await {
        tracing::warn!(error = %e, "owner notification failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BookingStatus;
    use rust_decimal_macros::dec;

    #[test]
    fn test_created_message_mentions_service_and_time() {
        let ts = chrono::NaiveDateTime::parse_from_str("2025-06-01 08:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let booking = Booking {
            id: 42,
            user_id: "u".into(),
            service_id: 1,
            therapist_id: 1,
            booking_date: chrono::NaiveDate::from_ymd_opt(2025, 6, 16).unwrap(),
            booking_time: chrono::NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            end_time: chrono::NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
            status: BookingStatus::Pending,
            total_amount: dec!(3500),
            notes: String::new(),
            created_at: ts,
            updated_at: ts,
        };
        let msg = booking_event_message(BookingEvent::Created, &booking, "Swedish", "Amina", "KES");
        assert_eq!(
            msg,
            "New booking #42: Swedish with Amina on Mon 16 Jun 2025 at 09:30 (KES 3500)."
        );
    }
}
