//! Duration formatting for timer displays
//!
//! Values grow past the nominal field width instead of wrapping: 100 minutes
//! renders as `100:00`, not `40:00`. Displays built from a fixed number of
//! digit slots (4 for the stopwatch, 6 for the countdown) cannot show such
//! values; use [`Layout::fits`] to detect that case. Nothing here truncates.

/// Display layout of a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `MM:SS`, used by the stopwatch
    MinutesSeconds,
    /// `HH:MM:SS`, used by the countdown
    HoursMinutesSeconds,
}

impl Layout {
    /// Digit slots of the standard display for this layout
    pub fn slot_count(self) -> usize {
        match self {
            Layout::MinutesSeconds => 4,
            Layout::HoursMinutesSeconds => 6,
        }
    }

    /// Largest value the standard display shows without overflowing its slots
    pub fn max_displayable_ms(self) -> u64 {
        match self {
            Layout::MinutesSeconds => 99 * 60_000 + 59_999,
            Layout::HoursMinutesSeconds => 99 * 3_600_000 + 3_599_999,
        }
    }

    pub fn fits(self, ms: u64) -> bool {
        ms <= self.max_displayable_ms()
    }

    pub fn format(self, ms: u64) -> String {
        match self {
            Layout::MinutesSeconds => format_minutes_seconds(ms),
            Layout::HoursMinutesSeconds => format_hours_minutes_seconds(ms),
        }
    }

    pub fn digits(self, ms: u64) -> Vec<u8> {
        time_digits(&self.format(ms))
    }
}

/// Format milliseconds as "MM:SS" (minutes are not capped at 59)
pub fn format_minutes_seconds(ms: u64) -> String {
    let total_secs = ms / 1000;
    format!("{:02}:{:02}", total_secs / 60, total_secs % 60)
}

/// Format milliseconds as "HH:MM:SS"
pub fn format_hours_minutes_seconds(ms: u64) -> String {
    let total_secs = ms / 1000;
    let h = total_secs / 3600;
    let m = (total_secs % 3600) / 60;
    let s = total_secs % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}

/// "MM:SS" under an hour, "HH:MM:SS" from one hour up
pub fn format_compact(ms: u64) -> String {
    if ms / 1000 >= 3600 {
        format_hours_minutes_seconds(ms)
    } else {
        format_minutes_seconds(ms)
    }
}

/// Decimal digits of a formatted time, in display order
pub fn time_digits(formatted: &str) -> Vec<u8> {
    formatted
        .chars()
        .filter_map(|c| c.to_digit(10))
        .map(|d| d as u8)
        .collect()
}

/// Rebuild the zero-padded string from its digits.
///
/// The last two digits are seconds, the two before them minutes (for
/// `HoursMinutesSeconds`), and every remaining leading digit belongs to the
/// leftmost field. Returns `None` for too few digits or a value above 9.
pub fn parse_digits(digits: &[u8], layout: Layout) -> Option<String> {
    if digits.len() < layout.slot_count() || digits.iter().any(|&d| d > 9) {
        return None;
    }
    let text: String = digits.iter().map(|d| char::from(b'0' + d)).collect();
    let (head, seconds) = text.split_at(text.len() - 2);
    match layout {
        Layout::MinutesSeconds => Some(format!("{}:{}", head, seconds)),
        Layout::HoursMinutesSeconds => {
            let (hours, minutes) = head.split_at(head.len() - 2);
            Some(format!("{}:{}:{}", hours, minutes, seconds))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_minutes_seconds() {
        assert_eq!(format_minutes_seconds(0), "00:00");
        assert_eq!(format_minutes_seconds(5_999), "00:05");
        assert_eq!(format_minutes_seconds(1_500_000), "25:00");
        assert_eq!(format_minutes_seconds(6_000_000), "100:00");
    }

    #[test]
    fn test_format_hours_minutes_seconds() {
        assert_eq!(format_hours_minutes_seconds(0), "00:00:00");
        assert_eq!(format_hours_minutes_seconds(3_661_000), "01:01:01");
        assert_eq!(format_hours_minutes_seconds(100 * 3_600_000), "100:00:00");
    }

    #[test]
    fn test_format_compact() {
        assert_eq!(format_compact(59 * 60_000 + 59_000), "59:59");
        assert_eq!(format_compact(3_600_000), "01:00:00");
    }

    #[test]
    fn test_countdown_digits() {
        assert_eq!(
            Layout::HoursMinutesSeconds.digits(3_661_000),
            vec![0, 1, 0, 1, 0, 1]
        );
        assert_eq!(Layout::MinutesSeconds.digits(65_000), vec![0, 1, 0, 5]);
    }

    #[test]
    fn test_overflowing_values_grow_instead_of_truncating() {
        let ms = 100 * 60_000;
        assert!(!Layout::MinutesSeconds.fits(ms));
        assert_eq!(Layout::MinutesSeconds.digits(ms).len(), 5);
        assert!(Layout::MinutesSeconds.fits(Layout::MinutesSeconds.max_displayable_ms()));
    }

    #[test]
    fn test_parse_digits_reconstructs_formatted_string() {
        let max = 99 * 3_600_000 + 3_599_999;
        let mut ms = 0;
        while ms <= max {
            for layout in [Layout::MinutesSeconds, Layout::HoursMinutesSeconds] {
                let formatted = layout.format(ms);
                assert_eq!(
                    parse_digits(&time_digits(&formatted), layout).as_deref(),
                    Some(formatted.as_str()),
                    "ms={}",
                    ms
                );
            }
            ms += 997;
        }
    }

    #[test]
    fn test_parse_digits_rejects_bad_input() {
        assert_eq!(parse_digits(&[1, 2, 3], Layout::MinutesSeconds), None);
        assert_eq!(parse_digits(&[1, 2, 3, 10], Layout::MinutesSeconds), None);
    }
}
