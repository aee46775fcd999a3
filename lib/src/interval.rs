use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// How often a job runs.
#[derive(
    PartialEq, Eq, Clone, Copy, Debug, Deserialize, Serialize, Hash, ToSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    #[default]
    Daily,
    Weekly,
    Monthly,
    OneTime,
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Interval::Daily => "daily",
            Interval::Weekly => "weekly",
            Interval::Monthly => "monthly",
            Interval::OneTime => "one_time",
        })
    }
}

impl std::str::FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Interval::Daily),
            "weekly" => Ok(Interval::Weekly),
            "monthly" => Ok(Interval::Monthly),
            "one_time" => Ok(Interval::OneTime),
            _ => Err(format!("Unknown interval {}", s)),
        }
    }
}

impl TryFrom<String> for Interval {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Interval {
    /// Validate the `on` field for this interval, as enforced on job
    /// creation and activation.
    ///
    /// * `daily` accepts only the fixed token `12am`.
    /// * `weekly` accepts an English weekday name.
    /// * `monthly` accepts a day-of-month, with 29 and 30 rejected so the
    ///   job cannot silently skip short months.
    /// * `one_time` accepts an empty string.
    pub fn validate_on(&self, on: &str) -> Result<(), String> {
        match self {
            Interval::Daily => {
                if on.is_empty() || on == "12am" {
                    Ok(())
                } else {
                    Err(format!("invalid 'on' value for daily interval: {on}"))
                }
            }
            Interval::Weekly => {
                parse_weekday(on).map(|_| ()).ok_or_else(|| format!("invalid weekday: {on}"))
            }
            Interval::Monthly => {
                let day: u32 = on
                    .parse()
                    .map_err(|_| format!("invalid day of month: {on}"))?;
                if day == 0 || day > 31 {
                    return Err(format!("invalid day of month: {on}"));
                }
                if day == 29 || day == 30 {
                    return Err(format!("day {day} is skipped in short months, pick 1-28 or 31"));
                }
                Ok(())
            }
            Interval::OneTime => {
                if on.is_empty() {
                    Ok(())
                } else {
                    Err("one_time jobs take no 'on' value".to_string())
                }
            }
        }
    }

    /// Whether a job with this interval and `on` value is due on `today`.
    /// `one_time` jobs are never due: their task is created explicitly.
    ///
    /// The scheduler evaluates this same rule inside one SQL statement
    /// (the `CASE j."interval"` expression in the store's
    /// `enqueue_due_jobs`) so it can select and lock due rows in a single
    /// query; the store's test suite asserts the two stay in agreement.
    pub fn is_due(&self, on: &str, today: NaiveDate) -> bool {
        match self {
            Interval::Daily => true,
            Interval::Weekly => parse_weekday(on) == Some(today.weekday()),
            Interval::Monthly => on.parse::<u32>().ok() == Some(today.day()),
            Interval::OneTime => false,
        }
    }
}

fn parse_weekday(s: &str) -> Option<Weekday> {
    match s.trim().to_lowercase().as_str() {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Whether a job belongs to the recurring or the on-demand family. Part of
/// the `(user, name, sync_type)` uniqueness key, so one account can hold a
/// recurring job and a one-off job for the same source.
#[derive(
    PartialEq, Eq, Clone, Copy, Debug, Deserialize, Serialize, Hash, ToSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    #[default]
    Daily,
    OneTime,
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SyncType::Daily => "daily",
            SyncType::OneTime => "one_time",
        })
    }
}

impl std::str::FromStr for SyncType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(SyncType::Daily),
            "one_time" => Ok(SyncType::OneTime),
            _ => Err(format!("Unknown sync type {}", s)),
        }
    }
}

impl TryFrom<String> for SyncType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monthly_short_days_rejected() {
        assert!(Interval::Monthly.validate_on("29").is_err());
        assert!(Interval::Monthly.validate_on("30").is_err());
        assert!(Interval::Monthly.validate_on("28").is_ok());
        assert!(Interval::Monthly.validate_on("31").is_ok());
        assert!(Interval::Monthly.validate_on("0").is_err());
        assert!(Interval::Monthly.validate_on("32").is_err());
    }

    #[test]
    fn daily_on_token() {
        assert!(Interval::Daily.validate_on("12am").is_ok());
        assert!(Interval::Daily.validate_on("").is_ok());
        assert!(Interval::Daily.validate_on("9am").is_err());
    }

    #[test]
    fn monthly_due_only_on_its_day() {
        let fifteenth = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let sixteenth = NaiveDate::from_ymd_opt(2024, 3, 16).unwrap();
        assert!(Interval::Monthly.is_due("15", fifteenth));
        assert!(!Interval::Monthly.is_due("15", sixteenth));
    }

    #[test]
    fn weekly_due_matches_weekday() {
        // 2024-03-15 is a Friday
        let friday = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert!(Interval::Weekly.is_due("friday", friday));
        assert!(Interval::Weekly.is_due("Friday", friday));
        assert!(!Interval::Weekly.is_due("monday", friday));
    }

    #[test]
    fn one_time_is_never_due() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert!(!Interval::OneTime.is_due("", today));
    }
}
