use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

#[derive(Clone, Copy, Debug)]
pub enum SiteTimezone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl Default for SiteTimezone {
    fn default() -> Self {
        SiteTimezone::Named(chrono_tz::Asia::Dushanbe)
    }
}

fn parse_fixed_offset(raw: &str) -> Option<FixedOffset> {
    let trimmed = raw.trim();
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

/// Accepts IANA names, `UTC`/`GMT`, and `UTC+05:00`-style offsets.
pub fn parse_timezone(raw: &str) -> Option<SiteTimezone> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let upper = trimmed.to_uppercase();
    if upper == "UTC" || upper == "GMT" {
        return FixedOffset::east_opt(0).map(SiteTimezone::Fixed);
    }
    if upper.starts_with("UTC") || upper.starts_with("GMT") {
        return parse_fixed_offset(&trimmed[3..]).map(SiteTimezone::Fixed);
    }

    trimmed.parse::<Tz>().ok().map(SiteTimezone::Named)
}

impl SiteTimezone {
    pub fn local_date(&self, utc_dt: DateTime<Utc>) -> NaiveDate {
        match self {
            SiteTimezone::Named(tz) => utc_dt.with_timezone(tz).date_naive(),
            SiteTimezone::Fixed(offset) => utc_dt.with_timezone(offset).date_naive(),
        }
    }

    pub fn year(&self, utc_dt: DateTime<Utc>) -> i32 {
        self.local_date(utc_dt).year()
    }

    /// Start of the local day as UTC.
    pub fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        let naive = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        let local = match self {
            SiteTimezone::Named(tz) => tz.from_local_datetime(&naive).earliest().map(|d| d.with_timezone(&Utc)),
            SiteTimezone::Fixed(offset) => offset.from_local_datetime(&naive).earliest().map(|d| d.with_timezone(&Utc)),
        };
        local.unwrap_or_else(|| Utc.from_utc_datetime(&naive))
    }
}

/// Calendar key shared by every device on the same day, e.g. `Thu Jan 01 2026`.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%a %b %d %Y").to_string()
}

pub fn format_local_time(tz: SiteTimezone, epoch_millis: i64) -> String {
    let Some(utc_dt) = DateTime::<Utc>::from_timestamp_millis(epoch_millis) else {
        return String::new();
    };
    match tz {
        SiteTimezone::Named(tz) => utc_dt.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string(),
        SiteTimezone::Fixed(offset) => utc_dt.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests.
#[cfg(test)]
#[derive(Clone)]
pub struct ManualClock(std::sync::Arc<std::sync::Mutex<DateTime<Utc>>>);

#[cfg(test)]
impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self(std::sync::Arc::new(std::sync::Mutex::new(now)))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.0.lock() {
            *guard = now;
        }
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.0.lock().map(|guard| *guard).unwrap_or_else(|_| Utc::now())
    }
}
