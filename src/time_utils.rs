use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use chrono_tz::Tz;

#[derive(Clone, Copy, Debug, PartialEq)]
enum ParsedTimezone {
    Named(Tz),
    Fixed(FixedOffset),
}

fn parse_fixed_offset(raw: &str) -> Option<FixedOffset> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (sign, rest) = match trimmed.chars().next()? {
        '+' => (1, &trimmed[1..]),
        '-' => (-1, &trimmed[1..]),
        _ => return None,
    };

    let rest = rest.trim();
    if rest.is_empty() {
        return None;
    }

    let (hours, minutes) = if let Some((h, m)) = rest.split_once(':') {
        (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?)
    } else if rest.len() > 2 {
        let (h, m) = rest.split_at(rest.len() - 2);
        (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?)
    } else {
        (rest.parse::<i32>().ok()?, 0)
    };

    if hours > 14 || minutes > 59 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn parse_timezone(raw: &str) -> Option<ParsedTimezone> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.eq_ignore_ascii_case("utc") || trimmed.eq_ignore_ascii_case("gmt") {
        return FixedOffset::east_opt(0).map(ParsedTimezone::Fixed);
    }

    let upper = trimmed.to_uppercase();
    if upper.starts_with("UTC") || upper.starts_with("GMT") {
        return parse_fixed_offset(&trimmed[3..]).map(ParsedTimezone::Fixed);
    }
    if let Some(offset) = parse_fixed_offset(trimmed) {
        return Some(ParsedTimezone::Fixed(offset));
    }

    trimmed.parse::<Tz>().ok().map(ParsedTimezone::Named)
}

/// Wall clock of the school. Decides what "today" means for delay checks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SchoolClock {
    tz: ParsedTimezone,
}

impl SchoolClock {
    pub fn parse(raw: &str) -> Option<Self> {
        parse_timezone(raw).map(|tz| Self { tz })
    }

    pub fn utc() -> Self {
        Self {
            tz: ParsedTimezone::Named(Tz::UTC),
        }
    }

    pub fn local_date(&self, utc_dt: DateTime<Utc>) -> NaiveDate {
        match self.tz {
            ParsedTimezone::Named(tz) => utc_dt.with_timezone(&tz).date_naive(),
            ParsedTimezone::Fixed(offset) => utc_dt.with_timezone(&offset).date_naive(),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.local_date(Utc::now())
    }
}

/// `125` -> `"2h05"`. Negative input is rendered by magnitude.
pub fn format_duration(minutes: i32) -> String {
    let minutes = minutes.unsigned_abs();
    format!("{}h{:02}", minutes / 60, minutes % 60)
}

/// `5` -> `"+0h05"`, `-70` -> `"-1h10"`, `0` -> `"0h00"`.
pub fn format_signed_duration(minutes: i32) -> String {
    match minutes.signum() {
        1 => format!("+{}", format_duration(minutes)),
        -1 => format!("-{}", format_duration(minutes)),
        _ => format_duration(0),
    }
}

pub fn minutes_to_hours(minutes: i64) -> f64 {
    minutes as f64 / 60.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(5), "0h05");
        assert_eq!(format_duration(125), "2h05");
        assert_eq!(format_signed_duration(5), "+0h05");
        assert_eq!(format_signed_duration(-70), "-1h10");
        assert_eq!(format_signed_duration(0), "0h00");
    }

    #[test]
    fn parses_named_and_fixed_zones() {
        assert!(SchoolClock::parse("Africa/Casablanca").is_some());
        assert!(SchoolClock::parse("UTC+01:00").is_some());
        assert!(SchoolClock::parse("+0530").is_some());
        assert!(SchoolClock::parse("Mars/Olympus").is_none());
        assert!(SchoolClock::parse("").is_none());
    }

    #[test]
    fn local_date_crosses_midnight() {
        let clock = SchoolClock::parse("+02:00").unwrap();
        let late = Utc.with_ymd_and_hms(2025, 1, 31, 23, 30, 0).unwrap();
        assert_eq!(clock.local_date(late), NaiveDate::from_ymd_opt(2025, 2, 1).unwrap());
        assert_eq!(
            SchoolClock::utc().local_date(late),
            NaiveDate::from_ymd_opt(2025, 1, 31).unwrap()
        );
    }
}
