use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use super::TherapistAvailability;

/// A bookable start/end pair inside one availability window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    #[serde(rename = "time", with = "super::hhmm")]
    pub start: NaiveTime,
    #[serde(rename = "end_time", with = "super::hhmm")]
    pub end: NaiveTime,
}

impl Slot {
    pub fn overlaps(&self, start: NaiveTime, end: NaiveTime) -> bool {
        self.start < end && self.end > start
    }
}

/// A therapist's recurring weekly windows.
#[derive(Debug, Clone, Default)]
pub struct WeeklySchedule {
    pub windows: Vec<TherapistAvailability>,
}

impl WeeklySchedule {
    pub fn new(windows: Vec<TherapistAvailability>) -> Self {
        Self { windows }
    }

    /// Active windows for the weekday of `date`, earliest first.
    pub fn windows_on(&self, date: NaiveDate) -> Vec<&TherapistAvailability> {
        let weekday = date.weekday();
        let mut found: Vec<&TherapistAvailability> = self
            .windows
            .iter()
            .filter(|w| w.is_active && w.day_of_week == weekday)
            .collect();
        found.sort_by_key(|w| w.start_time);
        found
    }

    pub fn to_human_readable(&self) -> String {
        let mut active: Vec<&TherapistAvailability> =
            self.windows.iter().filter(|w| w.is_active).collect();
        if active.is_empty() {
            return String::new();
        }

        active.sort_by_key(|w| (w.day_of_week.num_days_from_monday(), w.start_time));

        active
            .iter()
            .map(|w| {
                format!(
                    "{}: {}-{}",
                    w.day_of_week,
                    w.start_time.format("%H:%M"),
                    w.end_time.format("%H:%M")
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub fn weekday_from_index(day: i64) -> anyhow::Result<Weekday> {
    match day {
        0 => Ok(Weekday::Mon),
        1 => Ok(Weekday::Tue),
        2 => Ok(Weekday::Wed),
        3 => Ok(Weekday::Thu),
        4 => Ok(Weekday::Fri),
        5 => Ok(Weekday::Sat),
        6 => Ok(Weekday::Sun),
        _ => Err(anyhow::anyhow!("invalid day_of_week: {day}")),
    }
}

pub fn parse_time(s: &str) -> anyhow::Result<NaiveTime> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(anyhow::anyhow!("invalid time format: {s}"));
    }
    let hour: u32 = parts[0]
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid hour in: {s}"))?;
    let minute: u32 = parts[1]
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid minute in: {s}"))?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| anyhow::anyhow!("time out of range: {s}"))
}

pub fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("invalid date (expected YYYY-MM-DD): {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(day: Weekday, start: &str, end: &str) -> TherapistAvailability {
        TherapistAvailability {
            id: 0,
            therapist_id: 1,
            day_of_week: day,
            start_time: parse_time(start).unwrap(),
            end_time: parse_time(end).unwrap(),
            is_active: true,
        }
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("09:30").unwrap(), NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(parse_time("17:00:00").unwrap(), NaiveTime::from_hms_opt(17, 0, 0).unwrap());
        assert!(parse_time("25:00").is_err());
        assert!(parse_time("9").is_err());
        assert!(parse_time("ab:cd").is_err());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2025-06-16").unwrap().weekday(), Weekday::Mon);
        assert!(parse_date("16/06/2025").is_err());
    }

    #[test]
    fn test_weekday_from_index() {
        assert_eq!(weekday_from_index(0).unwrap(), Weekday::Mon);
        assert_eq!(weekday_from_index(6).unwrap(), Weekday::Sun);
        assert!(weekday_from_index(7).is_err());
    }

    #[test]
    fn test_windows_on_filters_weekday_and_inactive() {
        let mut inactive = window(Weekday::Mon, "14:00", "16:00");
        inactive.is_active = false;
        let schedule = WeeklySchedule::new(vec![
            window(Weekday::Mon, "12:00", "13:00"),
            window(Weekday::Tue, "09:00", "17:00"),
            window(Weekday::Mon, "09:00", "11:00"),
            inactive,
        ]);

        // 2025-06-16 is a Monday
        let found = schedule.windows_on(parse_date("2025-06-16").unwrap());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].start_time, parse_time("09:00").unwrap());
        assert_eq!(found[1].start_time, parse_time("12:00").unwrap());
    }

    #[test]
    fn test_slot_overlaps() {
        let slot = Slot {
            start: parse_time("09:00").unwrap(),
            end: parse_time("10:00").unwrap(),
        };
        assert!(slot.overlaps(parse_time("09:30").unwrap(), parse_time("10:30").unwrap()));
        assert!(!slot.overlaps(parse_time("10:00").unwrap(), parse_time("11:00").unwrap()));
    }

    #[test]
    fn test_slot_serializes_as_hhmm() {
        let slot = Slot {
            start: parse_time("09:00").unwrap(),
            end: parse_time("10:30").unwrap(),
        };
        let json = serde_json::to_value(slot).unwrap();
        assert_eq!(json["time"], "09:00");
        assert_eq!(json["end_time"], "10:30");
    }

    #[test]
    fn test_to_human_readable() {
        let schedule = WeeklySchedule::new(vec![
            window(Weekday::Fri, "10:00", "16:00"),
            window(Weekday::Mon, "09:00", "17:00"),
        ]);
        assert_eq!(schedule.to_human_readable(), "Mon: 09:00-17:00, Fri: 10:00-16:00");
    }

    #[test]
    fn test_to_human_readable_empty() {
        assert_eq!(WeeklySchedule::default().to_human_readable(), "");
    }
}
