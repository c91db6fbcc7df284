use time::{Date, Month, OffsetDateTime, UtcOffset};

pub trait Clock: Send + Sync {
    fn now_utc(&self) -> OffsetDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Always returns the same instant.
#[cfg(test)]
pub struct FixedClock(pub OffsetDateTime);

#[cfg(test)]
impl Clock for FixedClock {
    fn now_utc(&self) -> OffsetDateTime {
        self.0
    }
}

/// Offset used for the pharmacy-local calendar. Out-of-range hours fall back to UTC.
pub fn local_offset(hours: i8) -> UtcOffset {
    UtcOffset::from_hms(hours, 0, 0).unwrap_or(UtcOffset::UTC)
}

/// Same day-of-month `months` later, clamped to the last day of a shorter month
/// (Feb 29 + 12 months lands on Feb 28).
pub fn add_months(at: OffsetDateTime, months: u32) -> OffsetDateTime {
    let date = at.date();
    let zero_based = date.month() as i32 - 1 + months as i32;
    let year = date.year() + zero_based.div_euclid(12);
    let month = Month::try_from((zero_based.rem_euclid(12) + 1) as u8).unwrap_or(date.month());
    let day = date.day().min(month.length(year));
    match Date::from_calendar_date(year, month, day) {
        Ok(shifted) => at.replace_date(shifted),
        Err(_) => at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn twelve_months_is_same_calendar_day() {
        let at = datetime!(2026-10-14 09:30 -4);
        assert_eq!(add_months(at, 12), datetime!(2027-10-14 09:30 -4));
    }

    #[test]
    fn leap_day_clamps_to_end_of_february() {
        let at = datetime!(2028-02-29 12:00 UTC);
        assert_eq!(add_months(at, 12), datetime!(2029-02-28 12:00 UTC));
    }

    #[test]
    fn month_overflow_rolls_the_year() {
        let at = datetime!(2026-11-30 00:00 UTC);
        assert_eq!(add_months(at, 3), datetime!(2027-02-28 00:00 UTC));
    }

    #[test]
    fn offset_hours_are_validated() {
        assert_eq!(local_offset(-4).whole_hours(), -4);
        assert_eq!(local_offset(99), UtcOffset::UTC);
    }
}
