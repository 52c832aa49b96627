use chrono::{DateTime, FixedOffset, Offset, Utc};

/// Renders call times as the short strings spoken to the callee.
#[derive(Debug, Clone, Copy)]
pub struct DueTimeFormatter {
    offset: FixedOffset,
}

impl Default for DueTimeFormatter {
    fn default() -> Self {
        Self { offset: Utc.fix() }
    }
}

impl DueTimeFormatter {
    /// Out-of-range offsets (beyond ±24h) fall back to UTC.
    pub fn with_offset_minutes(minutes: i32) -> Self {
        match FixedOffset::east_opt(minutes.saturating_mul(60)) {
            Some(offset) => Self { offset },
            None => Self::default(),
        }
    }

    /// `"9:05 AM"` for calls later today, `"Tue Mar 4, 9:05 AM"` otherwise.
    pub fn label(&self, call_at: i64, now: i64) -> String {
        let (Some(at), Some(reference)) = (self.local(call_at), self.local(now)) else {
            return String::new();
        };
        if at.date_naive() == reference.date_naive() {
            at.format("%-I:%M %p").to_string()
        } else {
            at.format("%a %b %-d, %-I:%M %p").to_string()
        }
    }

    fn local(&self, millis: i64) -> Option<DateTime<FixedOffset>> {
        DateTime::<Utc>::from_timestamp_millis(millis).map(|dt| dt.with_timezone(&self.offset))
    }
}

/// Whole minutes until `call_at`, rounded up. Past times report zero.
pub fn minutes_until(call_at: i64, now: i64) -> i64 {
    let delta = call_at.saturating_sub(now);
    if delta <= 0 {
        0
    } else {
        delta / 60_000 + i64::from(delta % 60_000 != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2025-06-15T14:30:00Z
    const NOW: i64 = 1_749_997_800_000;

    #[test]
    fn same_day_uses_short_form() {
        let fmt = DueTimeFormatter::default();
        assert_eq!(fmt.label(NOW + 35 * 60_000, NOW), "3:05 PM");
    }

    #[test]
    fn other_day_includes_date() {
        let fmt = DueTimeFormatter::default();
        assert_eq!(fmt.label(NOW + 24 * 3_600_000, NOW), "Mon Jun 16, 2:30 PM");
    }

    #[test]
    fn offset_shifts_the_clock() {
        let fmt = DueTimeFormatter::with_offset_minutes(-4 * 60);
        assert_eq!(fmt.label(NOW, NOW), "10:30 AM");
    }

    #[test]
    fn minutes_round_up() {
        assert_eq!(minutes_until(NOW + 1, NOW), 1);
        assert_eq!(minutes_until(NOW + 60_000, NOW), 1);
        assert_eq!(minutes_until(NOW + 60_001, NOW), 2);
        assert_eq!(minutes_until(NOW - 90_000, NOW), 0);
        assert_eq!(minutes_until(i64::MIN, NOW), 0);
        assert_eq!(minutes_until(i64::MAX, NOW), (i64::MAX - NOW) / 60_000 + 1);
    }
}
