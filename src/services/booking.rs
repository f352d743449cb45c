use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Serialize;

use super::availability::{fits_schedule, AvailabilityCalculator};
use crate::config::{BookingPolicy, SlotPolicy};
use crate::db::{self, bookings, orders, therapists};
use crate::errors::AppError;
use crate::models::{
    Booking, BookingAddon, BookingCancellation, BookingReschedule, BookingStatus,
    CancellationReason, OrderStatus, ServiceOrder, WeeklySchedule,
};

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Booking not found")]
    NotFound,

    #[error("Service not found")]
    ServiceNotFound,

    #[error("Therapist not found")]
    TherapistNotFound,

    #[error("Add-on {0} not found")]
    AddonNotFound(i64),

    #[error("This time slot is already booked")]
    SlotTaken,

    #[error("The therapist is not available at that time")]
    OutsideAvailability,

    #[error("Bookings must be made for a future time")]
    InPast,

    #[error("end_time must be after booking_time")]
    InvalidEndTime,

    #[error("Booking cannot be cancelled (less than {0} hours notice)")]
    CancellationWindowClosed(i64),

    #[error("Booking is already cancelled or completed")]
    AlreadyClosed,

    #[error("Cannot reschedule cancelled or completed booking")]
    NotReschedulable,

    #[error("Cannot move booking from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::NotFound
            | BookingError::ServiceNotFound
            | BookingError::TherapistNotFound
            | BookingError::AddonNotFound(_) => AppError::NotFound(err.to_string()),
            BookingError::InvalidEndTime => AppError::invalid("end_time", err.to_string()),
            BookingError::InPast | BookingError::OutsideAvailability => {
                AppError::invalid("booking_time", err.to_string())
            }
            BookingError::Database(e) => AppError::Internal(e),
            _ => AppError::Conflict(err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub service_id: i64,
    pub therapist_id: i64,
    pub booking_date: NaiveDate,
    pub booking_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    pub addon_ids: Vec<i64>,
    pub notes: String,
}

#[derive(Debug, Clone)]
pub struct RescheduleRequest {
    pub new_date: NaiveDate,
    pub new_time: NaiveTime,
    pub new_therapist_id: Option<i64>,
    pub reason: String,
}

/// A booking plus the derived fields and related rows clients display.
#[derive(Debug, Clone, Serialize)]
pub struct BookingDetail {
    #[serde(flatten)]
    pub booking: Booking,
    pub service_name: String,
    pub therapist_name: String,
    pub duration_minutes: i64,
    pub can_cancel: bool,
    pub is_past: bool,
    pub addons: Vec<BookingAddon>,
    pub service_order: Option<ServiceOrder>,
    pub cancellation: Option<BookingCancellation>,
}

pub struct BookingService {
    slots: AvailabilityCalculator,
    policy: BookingPolicy,
}

impl BookingService {
    pub fn new(slot_policy: SlotPolicy, policy: BookingPolicy) -> Self {
        Self {
            slots: AvailabilityCalculator::new(slot_policy),
            policy,
        }
    }

    /// Creates a pending booking with its add-ons and service-order snapshot.
    pub fn create(
        &self,
        conn: &Connection,
        user_id: &str,
        request: &BookingRequest,
        now: NaiveDateTime,
    ) -> Result<BookingDetail, BookingError> {
        let service = therapists::get_service(conn, request.service_id)?
            .filter(|s| s.is_active)
            .ok_or(BookingError::ServiceNotFound)?;
        let therapist = therapists::get_therapist(conn, request.therapist_id)?
            .filter(|t| t.is_available)
            .ok_or(BookingError::TherapistNotFound)?;

        let start = request.booking_time;
        let end = match request.end_time {
            Some(end) => end,
            None => start
                .overflowing_add_signed(Duration::minutes(service.duration_minutes))
                .0,
        };
        let duration = (end - start).num_minutes();
        if duration <= 0 {
            return Err(match request.end_time {
                Some(_) => BookingError::InvalidEndTime,
                // derived end wrapped past midnight
                None => BookingError::OutsideAvailability,
            });
        }

        if request.booking_date.and_time(start) <= now {
            return Err(BookingError::InPast);
        }

        let schedule = WeeklySchedule::new(therapists::list_availability(conn, therapist.id)?);
        if !fits_schedule(&schedule.windows_on(request.booking_date), start, duration) {
            return Err(BookingError::OutsideAvailability);
        }

        let busy = self.slots.busy_intervals(conn, therapist.id, request.booking_date)?;
        if self.slots.is_taken(&busy, start, end) {
            return Err(BookingError::SlotTaken);
        }

        let addons = resolve_addons(conn, &request.addon_ids)?;
        let addons_price: Decimal = addons.iter().map(BookingAddon::line_total).sum();
        let total_amount = service.price + addons_price;

        let tx = conn.unchecked_transaction().map_err(anyhow::Error::from)?;
        let booking_id = bookings::insert_booking(
            &tx,
            &bookings::NewBooking {
                user_id,
                service_id: service.id,
                therapist_id: therapist.id,
                booking_date: request.booking_date,
                booking_time: start,
                end_time: end,
                total_amount,
                notes: &request.notes,
            },
        )
        .map_err(|e| {
            if e.downcast_ref::<rusqlite::Error>()
                .is_some_and(db::is_constraint_violation)
            {
                BookingError::SlotTaken
            } else {
                BookingError::Database(e)
            }
        })?;

        for addon in &addons {
            bookings::insert_booking_addon(&tx, booking_id, addon)?;
        }

        orders::insert_service_order(
            &tx,
            &orders::NewServiceOrder {
                user_id,
                order_number: &db::new_token("SLD", 8),
                booking_id,
                service_id: service.id,
                service_price: service.price,
                addons_price,
                total_amount,
                appointment_date: request.booking_date,
                appointment_time: start,
                duration_minutes: duration,
            },
        )?;
        tx.commit().map_err(anyhow::Error::from)?;

        tracing::info!(
            booking_id = %booking_id,
            therapist_id = %therapist.id,
            date = %request.booking_date,
            time = %start.format("%H:%M"),
            "booking created"
        );

        self.detail(conn, booking_id, None, now)
    }

    /// Loads a booking. With `owner`, bookings of other users read as not found.
    pub fn detail(
        &self,
        conn: &Connection,
        booking_id: i64,
        owner: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<BookingDetail, BookingError> {
        let booking = load_owned(conn, booking_id, owner)?;
        self.build_detail(conn, booking, now)
    }

    pub fn list_for_user(
        &self,
        conn: &Connection,
        user_id: &str,
        now: NaiveDateTime,
    ) -> Result<Vec<BookingDetail>, BookingError> {
        bookings::list_user_bookings(conn, user_id)?
            .into_iter()
            .map(|b| self.build_detail(conn, b, now))
            .collect()
    }

    fn build_detail(
        &self,
        conn: &Connection,
        booking: Booking,
        now: NaiveDateTime,
    ) -> Result<BookingDetail, BookingError> {
        let service_name = therapists::get_service(conn, booking.service_id)?
            .map(|s| s.name)
            .unwrap_or_default();
        let therapist_name = therapists::get_therapist(conn, booking.therapist_id)?
            .map(|t| t.name)
            .unwrap_or_default();

        Ok(BookingDetail {
            service_name,
            therapist_name,
            duration_minutes: booking.duration_minutes(),
            can_cancel: booking.status.holds_slot()
                && booking.can_cancel(now, self.policy.cutoff()),
            is_past: booking.is_past(now),
            addons: bookings::list_booking_addons(conn, booking.id)?,
            service_order: orders::get_service_order_for_booking(conn, booking.id)?,
            cancellation: bookings::get_cancellation(conn, booking.id)?,
            booking,
        })
    }

    /// Cancels with a full refund recorded, only before the cutoff.
    pub fn cancel(
        &self,
        conn: &Connection,
        user_id: &str,
        booking_id: i64,
        reason: CancellationReason,
        description: &str,
        now: NaiveDateTime,
    ) -> Result<BookingCancellation, BookingError> {
        let booking = load_owned(conn, booking_id, Some(user_id))?;

        if !booking.status.holds_slot() {
            return Err(BookingError::AlreadyClosed);
        }
        if !booking.can_cancel(now, self.policy.cutoff()) {
            return Err(BookingError::CancellationWindowClosed(
                self.policy.cancellation_cutoff_hours,
            ));
        }

        let tx = conn.unchecked_transaction().map_err(anyhow::Error::from)?;
        if !bookings::transition_booking(&tx, booking.id, booking.status, BookingStatus::Cancelled)? {
            // status changed under us
            return Err(BookingError::AlreadyClosed);
        }
        let cancellation = bookings::insert_cancellation(
            &tx,
            booking.id,
            reason,
            description,
            user_id,
            booking.total_amount,
        )?;
        if let Some(order) = orders::get_service_order_for_booking(&tx, booking.id)? {
            orders::set_service_order_status(&tx, order.id, OrderStatus::Cancelled)?;
        }
        tx.commit().map_err(anyhow::Error::from)?;

        tracing::info!(booking_id = %booking.id, refund = %cancellation.refund_amount, "booking cancelled");
        Ok(cancellation)
    }

    /// Files a reschedule request. The booking itself is left untouched.
    pub fn request_reschedule(
        &self,
        conn: &Connection,
        user_id: &str,
        booking_id: i64,
        request: &RescheduleRequest,
    ) -> Result<BookingReschedule, BookingError> {
        let booking = load_owned(conn, booking_id, Some(user_id))?;
        if matches!(
            booking.status,
            BookingStatus::Cancelled | BookingStatus::Completed
        ) {
            return Err(BookingError::NotReschedulable);
        }
        if let Some(therapist_id) = request.new_therapist_id {
            therapists::get_therapist(conn, therapist_id)?.ok_or(BookingError::TherapistNotFound)?;
        }

        let reschedule = bookings::insert_reschedule(
            conn,
            booking.id,
            request.new_date,
            request.new_time,
            request.new_therapist_id,
            &request.reason,
            user_id,
        )?;
        tracing::info!(booking_id = %booking.id, "reschedule requested");
        Ok(reschedule)
    }

    /// Administrative move along pending → confirmed → in_progress → completed, or to no_show.
    pub fn set_status(
        &self,
        conn: &Connection,
        booking_id: i64,
        next: BookingStatus,
        now: NaiveDateTime,
    ) -> Result<BookingDetail, BookingError> {
        let booking = load_owned(conn, booking_id, None)?;
        if !booking.status.can_transition_to(next)
            || !bookings::transition_booking(conn, booking.id, booking.status, next)?
        {
            return Err(BookingError::InvalidTransition {
                from: booking.status.as_str(),
                to: next.as_str(),
            });
        }
        tracing::info!(
            booking_id = %booking.id,
            from = booking.status.as_str(),
            to = next.as_str(),
            "booking status changed"
        );
        self.detail(conn, booking.id, None, now)
    }

    /// Active bookings for a therapist between two dates.
    pub fn therapist_schedule(
        &self,
        conn: &Connection,
        therapist_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Booking>, BookingError> {
        therapists::get_therapist(conn, therapist_id)?.ok_or(BookingError::TherapistNotFound)?;
        Ok(bookings::therapist_schedule(conn, therapist_id, start, end)?)
    }
}

fn load_owned(conn: &Connection, booking_id: i64, owner: Option<&str>) -> Result<Booking, BookingError> {
    bookings::get_booking(conn, booking_id)?
        .filter(|b| owner.map_or(true, |user| b.user_id == user))
        .ok_or(BookingError::NotFound)
}

/// Repeated ids count as quantity. Prices are captured now.
fn resolve_addons(conn: &Connection, addon_ids: &[i64]) -> Result<Vec<BookingAddon>, BookingError> {
    let mut quantities: BTreeMap<i64, i64> = BTreeMap::new();
    for id in addon_ids {
        *quantities.entry(*id).or_insert(0) += 1;
    }

    let mut addons = Vec::with_capacity(quantities.len());
    for (id, quantity) in quantities {
        let addon = therapists::get_addon(conn, id)?
            .filter(|a| a.is_active)
            .ok_or(BookingError::AddonNotFound(id))?;
        addons.push(BookingAddon {
            addon_id: addon.id,
            name: addon.name,
            quantity,
            price: addon.price,
        });
    }
    Ok(addons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parse_time;
    use chrono::Weekday;
    use rust_decimal_macros::dec;

    struct Fixture {
        conn: Connection,
        service_id: i64,
        therapist_id: i64,
        addon_id: i64,
    }

    // 2025-06-16 is a Monday
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 16).unwrap()
    }

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn setup() -> Fixture {
        let conn = db::init_db(":memory:").unwrap();
        let service = therapists::insert_service(&conn, "Swedish", "", dec!(3000), 60).unwrap();
        let therapist = therapists::insert_therapist(&conn, "Amina", "").unwrap();
        let addon = therapists::insert_addon(&conn, "Hot stones", "", dec!(500), 15).unwrap();
        therapists::insert_availability(
            &conn,
            therapist.id,
            Weekday::Mon,
            parse_time("09:00").unwrap(),
            parse_time("17:00").unwrap(),
        )
        .unwrap();
        Fixture {
            conn,
            service_id: service.id,
            therapist_id: therapist.id,
            addon_id: addon.id,
        }
    }

    fn request(f: &Fixture, time: &str) -> BookingRequest {
        BookingRequest {
            service_id: f.service_id,
            therapist_id: f.therapist_id,
            booking_date: monday(),
            booking_time: parse_time(time).unwrap(),
            end_time: None,
            addon_ids: vec![],
            notes: String::new(),
        }
    }

    fn service() -> BookingService {
        BookingService::new(SlotPolicy::default(), BookingPolicy::default())
    }

    #[test]
    fn test_create_derives_end_time_and_total() {
        let f = setup();
        let mut req = request(&f, "10:00");
        req.addon_ids = vec![f.addon_id, f.addon_id];

        let detail = service()
            .create(&f.conn, "user-1", &req, ts("2025-06-10 12:00"))
            .unwrap();
        assert_eq!(detail.booking.end_time, parse_time("11:00").unwrap());
        assert_eq!(detail.booking.total_amount, dec!(4000));
        assert_eq!(detail.booking.status, BookingStatus::Pending);
        assert_eq!(detail.addons.len(), 1);
        assert_eq!(detail.addons[0].quantity, 2);

        let order = detail.service_order.unwrap();
        assert!(order.order_number.starts_with("SLD"));
        assert_eq!(order.addons_price, dec!(1000));
        assert_eq!(order.total_amount, dec!(4000));
    }

    #[test]
    fn test_double_booking_rejected() {
        let f = setup();
        let now = ts("2025-06-10 12:00");
        service().create(&f.conn, "user-1", &request(&f, "10:00"), now).unwrap();
        let err = service()
            .create(&f.conn, "user-2", &request(&f, "10:00"), now)
            .unwrap_err();
        assert!(matches!(err, BookingError::SlotTaken));
    }

    #[test]
    fn test_cancelled_slot_can_be_rebooked() {
        let f = setup();
        let now = ts("2025-06-10 12:00");
        let svc = service();
        let first = svc.create(&f.conn, "user-1", &request(&f, "10:00"), now).unwrap();
        svc.cancel(&f.conn, "user-1", first.booking.id, CancellationReason::ClientRequest, "", now)
            .unwrap();
        let second = svc.create(&f.conn, "user-2", &request(&f, "10:00"), now).unwrap();
        assert_ne!(second.booking.id, first.booking.id);
    }

    #[test]
    fn test_outside_availability_and_past() {
        let f = setup();
        let now = ts("2025-06-10 12:00");
        let err = service()
            .create(&f.conn, "user-1", &request(&f, "16:30"), now)
            .unwrap_err();
        assert!(matches!(err, BookingError::OutsideAvailability));

        let err = service()
            .create(&f.conn, "user-1", &request(&f, "10:00"), ts("2025-06-16 10:00"))
            .unwrap_err();
        assert!(matches!(err, BookingError::InPast));
    }

    #[test]
    fn test_explicit_end_time_must_follow_start() {
        let f = setup();
        let mut req = request(&f, "10:00");
        req.end_time = Some(parse_time("09:30").unwrap());
        let err = service()
            .create(&f.conn, "user-1", &req, ts("2025-06-10 12:00"))
            .unwrap_err();
        assert!(matches!(err, BookingError::InvalidEndTime));
    }

    #[test]
    fn test_cancel_respects_cutoff_and_refunds_in_full() {
        let f = setup();
        let svc = service();
        let booked = svc
            .create(&f.conn, "user-1", &request(&f, "10:00"), ts("2025-06-10 12:00"))
            .unwrap();
        let id = booked.booking.id;

        let err = svc
            .cancel(&f.conn, "user-1", id, CancellationReason::ClientRequest, "", ts("2025-06-15 10:30"))
            .unwrap_err();
        assert!(matches!(err, BookingError::CancellationWindowClosed(24)));

        let cancellation = svc
            .cancel(&f.conn, "user-1", id, CancellationReason::Illness, "flu", ts("2025-06-15 09:59"))
            .unwrap();
        assert_eq!(cancellation.refund_amount, dec!(3000));
        assert_eq!(cancellation.reason, CancellationReason::Illness);

        let detail = svc.detail(&f.conn, id, Some("user-1"), ts("2025-06-15 10:00")).unwrap();
        assert_eq!(detail.booking.status, BookingStatus::Cancelled);
        assert!(!detail.can_cancel);
        assert_eq!(detail.service_order.unwrap().status, OrderStatus::Cancelled);

        let err = svc
            .cancel(&f.conn, "user-1", id, CancellationReason::ClientRequest, "", ts("2025-06-11 09:00"))
            .unwrap_err();
        assert!(matches!(err, BookingError::AlreadyClosed));
    }

    #[test]
    fn test_other_users_booking_is_not_found() {
        let f = setup();
        let svc = service();
        let booked = svc
            .create(&f.conn, "user-1", &request(&f, "10:00"), ts("2025-06-10 12:00"))
            .unwrap();
        let err = svc
            .cancel(
                &f.conn,
                "intruder",
                booked.booking.id,
                CancellationReason::ClientRequest,
                "",
                ts("2025-06-10 12:00"),
            )
            .unwrap_err();
        assert!(matches!(err, BookingError::NotFound));
    }

    #[test]
    fn test_reschedule_leaves_booking_untouched() {
        let f = setup();
        let svc = service();
        let booked = svc
            .create(&f.conn, "user-1", &request(&f, "10:00"), ts("2025-06-10 12:00"))
            .unwrap();

        let reschedule = svc
            .request_reschedule(
                &f.conn,
                "user-1",
                booked.booking.id,
                &RescheduleRequest {
                    new_date: NaiveDate::from_ymd_opt(2025, 6, 23).unwrap(),
                    new_time: parse_time("14:00").unwrap(),
                    new_therapist_id: None,
                    reason: "travel".into(),
                },
            )
            .unwrap();
        assert!(!reschedule.is_approved);

        let after = bookings::get_booking(&f.conn, booked.booking.id).unwrap().unwrap();
        assert_eq!(after.booking_date, monday());
        assert_eq!(after.booking_time, parse_time("10:00").unwrap());
        assert_eq!(bookings::count_reschedules(&f.conn, after.id).unwrap(), 1);
    }

    #[test]
    fn test_admin_status_transitions() {
        let f = setup();
        let svc = service();
        let now = ts("2025-06-10 12:00");
        let id = svc
            .create(&f.conn, "user-1", &request(&f, "10:00"), now)
            .unwrap()
            .booking
            .id;

        let err = svc.set_status(&f.conn, id, BookingStatus::Completed, now).unwrap_err();
        assert!(matches!(err, BookingError::InvalidTransition { .. }));

        svc.set_status(&f.conn, id, BookingStatus::Confirmed, now).unwrap();
        svc.set_status(&f.conn, id, BookingStatus::InProgress, now).unwrap();
        let done = svc.set_status(&f.conn, id, BookingStatus::Completed, now).unwrap();
        assert_eq!(done.booking.status, BookingStatus::Completed);

        let err = svc
            .request_reschedule(
                &f.conn,
                "user-1",
                id,
                &RescheduleRequest {
                    new_date: monday(),
                    new_time: parse_time("12:00").unwrap(),
                    new_therapist_id: None,
                    reason: String::new(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, BookingError::NotReschedulable));
    }
}
