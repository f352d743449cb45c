use chrono::{NaiveDate, NaiveTime, Timelike};
use rusqlite::Connection;

use crate::config::{SlotConflictRule, SlotPolicy};
use crate::db::{bookings, therapists};
use crate::errors::AppError;
use crate::models::{Slot, TherapistAvailability, WeeklySchedule};

#[derive(Debug, thiserror::Error)]
pub enum AvailabilityError {
    #[error("Therapist not found")]
    TherapistNotFound,

    #[error("Service not found")]
    ServiceNotFound,

    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::Database(e) => AppError::Internal(e),
            _ => AppError::NotFound(err.to_string()),
        }
    }
}

/// A booked or blocked interval on the therapist's day.
#[derive(Debug, Clone, Copy)]
pub struct Busy {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

fn minutes(t: NaiveTime) -> i64 {
    (t.num_seconds_from_midnight() / 60) as i64
}

fn from_minutes(m: i64) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(u32::try_from(m / 60).ok()?, u32::try_from(m % 60).ok()?, 0)
}

fn conflicts(rule: SlotConflictRule, slot: &Slot, busy: &Busy) -> bool {
    match rule {
        SlotConflictRule::StartTime => slot.start == busy.start,
        SlotConflictRule::Overlap => slot.overlaps(busy.start, busy.end),
    }
}

/// Walks each window in `policy.step_minutes` steps and keeps every start whose
/// service end still fits inside that same window and that no busy interval
/// rules out. Arithmetic is in minutes so nothing wraps past midnight.
pub fn generate_slots(
    windows: &[&TherapistAvailability],
    duration_minutes: i64,
    policy: &SlotPolicy,
    busy: &[Busy],
) -> Vec<Slot> {
    let step = policy.step_minutes.max(1);
    let mut slots = Vec::new();

    for window in windows {
        let window_end = minutes(window.end_time);
        let mut cursor = minutes(window.start_time);

        while cursor < window_end {
            let slot_end = cursor + duration_minutes;
            if slot_end <= window_end {
                if let (Some(start), Some(end)) = (from_minutes(cursor), from_minutes(slot_end)) {
                    let slot = Slot { start, end };
                    if !busy.iter().any(|b| conflicts(policy.conflict_rule, &slot, b)) {
                        slots.push(slot);
                    }
                }
            }
            cursor += step;
        }
    }

    slots
}

/// True when `[start, start + duration)` lies inside one of the windows.
pub fn fits_schedule(
    windows: &[&TherapistAvailability],
    start: NaiveTime,
    duration_minutes: i64,
) -> bool {
    let begin = minutes(start);
    let end = begin + duration_minutes;
    windows
        .iter()
        .any(|w| minutes(w.start_time) <= begin && end <= minutes(w.end_time))
}

pub struct AvailabilityCalculator {
    policy: SlotPolicy,
}

impl AvailabilityCalculator {
    pub fn new(policy: SlotPolicy) -> Self {
        Self { policy }
    }

    /// Open slots for a therapist/service on `date`.
    pub fn available_slots(
        &self,
        conn: &Connection,
        therapist_id: i64,
        service_id: i64,
        date: NaiveDate,
    ) -> Result<Vec<Slot>, AvailabilityError> {
        therapists::get_therapist(conn, therapist_id)?.ok_or(AvailabilityError::TherapistNotFound)?;
        let service = therapists::get_service(conn, service_id)?
            .filter(|s| s.is_active)
            .ok_or(AvailabilityError::ServiceNotFound)?;

        let schedule = WeeklySchedule::new(therapists::list_availability(conn, therapist_id)?);
        let windows = schedule.windows_on(date);
        if windows.is_empty() {
            return Ok(Vec::new());
        }

        let busy = self.busy_intervals(conn, therapist_id, date)?;
        Ok(generate_slots(&windows, service.duration_minutes, &self.policy, &busy))
    }

    /// Active bookings plus manual blocks for the therapist on `date`.
    pub fn busy_intervals(
        &self,
        conn: &Connection,
        therapist_id: i64,
        date: NaiveDate,
    ) -> anyhow::Result<Vec<Busy>> {
        let mut busy: Vec<Busy> = bookings::active_bookings_on(conn, therapist_id, date)?
            .into_iter()
            .map(|b| Busy {
                start: b.booking_time,
                end: b.end_time,
            })
            .collect();
        busy.extend(
            bookings::blocked_slots_on(conn, therapist_id, date)?
                .into_iter()
                .map(|s| Busy {
                    start: s.start_time,
                    end: s.end_time,
                }),
        );
        Ok(busy)
    }

    /// Whether a requested start collides with something under the configured rule.
    pub fn is_taken(&self, busy: &[Busy], start: NaiveTime, end: NaiveTime) -> bool {
        let slot = Slot { start, end };
        busy.iter().any(|b| conflicts(self.policy.conflict_rule, &slot, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::parse_time;
    use chrono::Weekday;
    use rust_decimal_macros::dec;

    fn t(s: &str) -> NaiveTime {
        parse_time(s).unwrap()
    }

    fn window(start: &str, end: &str) -> TherapistAvailability {
        TherapistAvailability {
            id: 1,
            therapist_id: 1,
            day_of_week: Weekday::Mon,
            start_time: t(start),
            end_time: t(end),
            is_active: true,
        }
    }

    fn starts(slots: &[Slot]) -> Vec<String> {
        slots.iter().map(|s| s.start.format("%H:%M").to_string()).collect()
    }

    #[test]
    fn test_scenario_booking_at_0930_removes_only_that_start() {
        let w = window("09:00", "11:00");
        let busy = [Busy {
            start: t("09:30"),
            end: t("10:30"),
        }];
        let slots = generate_slots(&[&w], 60, &SlotPolicy::default(), &busy);
        assert_eq!(starts(&slots), vec!["09:00", "10:00"]);
        assert_eq!(slots[1].end, t("11:00"));
    }

    #[test]
    fn test_overlap_rule_removes_intersecting_starts() {
        let w = window("09:00", "12:00");
        let busy = [Busy {
            start: t("09:30"),
            end: t("10:30"),
        }];
        let policy = SlotPolicy {
            step_minutes: 30,
            conflict_rule: SlotConflictRule::Overlap,
        };
        let slots = generate_slots(&[&w], 60, &policy, &busy);
        assert_eq!(starts(&slots), vec!["10:30", "11:00"]);
    }

    #[test]
    fn test_service_never_spans_windows() {
        let morning = window("09:00", "10:00");
        let midday = window("10:00", "11:00");
        let slots = generate_slots(&[&morning, &midday], 90, &SlotPolicy::default(), &[]);
        assert!(slots.is_empty());

        let slots = generate_slots(&[&morning, &midday], 60, &SlotPolicy::default(), &[]);
        assert_eq!(starts(&slots), vec!["09:00", "10:00"]);
    }

    #[test]
    fn test_late_window_does_not_wrap_midnight() {
        let w = window("22:00", "23:59");
        let slots = generate_slots(&[&w], 120, &SlotPolicy::default(), &[]);
        assert!(slots.is_empty());
    }

    #[test]
    fn test_fits_schedule() {
        let w = window("09:00", "11:00");
        assert!(fits_schedule(&[&w], t("10:00"), 60));
        assert!(!fits_schedule(&[&w], t("10:30"), 60));
        assert!(!fits_schedule(&[&w], t("08:30"), 60));
    }

    #[test]
    fn test_available_slots_from_database() {
        let conn = db::init_db(":memory:").unwrap();
        let service = therapists::insert_service(&conn, "Swedish", "", dec!(3000), 60).unwrap();
        let therapist = therapists::insert_therapist(&conn, "Amina", "").unwrap();
        therapists::insert_availability(&conn, therapist.id, Weekday::Mon, t("09:00"), t("11:00"))
            .unwrap();
        let monday = NaiveDate::from_ymd_opt(2025, 6, 16).unwrap();

        bookings::insert_booking(
            &conn,
            &bookings::NewBooking {
                user_id: "u1",
                service_id: service.id,
                therapist_id: therapist.id,
                booking_date: monday,
                booking_time: t("09:30"),
                end_time: t("10:30"),
                total_amount: dec!(3000),
                notes: "",
            },
        )
        .unwrap();

        let calc = AvailabilityCalculator::new(SlotPolicy::default());
        let slots = calc
            .available_slots(&conn, therapist.id, service.id, monday)
            .unwrap();
        assert_eq!(starts(&slots), vec!["09:00", "10:00"]);

        // blocking 10:00 leaves only 09:00
        bookings::insert_time_slot(&conn, therapist.id, monday, t("10:00"), t("10:30"), true).unwrap();
        let slots = calc
            .available_slots(&conn, therapist.id, service.id, monday)
            .unwrap();
        assert_eq!(starts(&slots), vec!["09:00"]);

        // Tuesday has no windows
        let tuesday = NaiveDate::from_ymd_opt(2025, 6, 17).unwrap();
        assert!(calc
            .available_slots(&conn, therapist.id, service.id, tuesday)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_unknown_therapist_or_service() {
        let conn = db::init_db(":memory:").unwrap();
        let service = therapists::insert_service(&conn, "Swedish", "", dec!(3000), 60).unwrap();
        let therapist = therapists::insert_therapist(&conn, "Amina", "").unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 6, 16).unwrap();
        let calc = AvailabilityCalculator::new(SlotPolicy::default());

        assert!(matches!(
            calc.available_slots(&conn, 999, service.id, date),
            Err(AvailabilityError::TherapistNotFound)
        ));
        assert!(matches!(
            calc.available_slots(&conn, therapist.id, 999, date),
            Err(AvailabilityError::ServiceNotFound)
        ));
    }
}
