//! Weekly time-of-day access policy evaluated before desktop session creation.

use chrono::{DateTime, Datelike, Local, Utc};
use serde::{Deserialize, Serialize};

/// One weekday entry of the policy. `week` is Monday-origin (Monday = 0);
/// `times` holds fixed-width `"HH:MM~HH:MM"` ranges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRange {
    pub week: i64,
    #[serde(default)]
    pub times: Vec<String>,
}

/// Combined absolute and weekly access policy.
///
/// `allow == true` treats the ranges as an allow-list, `false` as a
/// deny-list. A policy whose ranges list no times at all permits everything
/// inside the absolute bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessAuth {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ranges: Vec<AccessRange>,
    #[serde(default = "default_allow")]
    pub allow: bool,
}

fn default_allow() -> bool {
    true
}

impl AccessAuth {
    /// Evaluate the policy at `now`. Pure: same instant, same answer.
    pub fn permits(&self, now: DateTime<Local>) -> bool {
        let instant = now.with_timezone(&Utc);
        if let Some(start) = self.start
            && instant < start
        {
            return false;
        }
        if let Some(end) = self.end
            && instant > end
        {
            return false;
        }

        // Shift the Monday-origin input to chrono's Sunday-origin weekday.
        let weekday = i64::from(now.weekday().num_days_from_sunday());
        let hm = now.format("%H:%M").to_string();
        let mut inside = false;
        let mut has = false;
        for range in &self.ranges {
            has = has || !range.times.is_empty();
            if (range.week + 1) % 7 != weekday {
                continue;
            }
            for span in &range.times {
                if let Some((lo, hi)) = span.split_once('~') {
                    // Lexical comparison is correct for fixed-width HH:MM.
                    inside = inside || (hm.as_str() >= lo && hm.as_str() <= hi);
                }
            }
        }

        !has || inside == self.allow
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn workweek(allow: bool) -> AccessAuth {
        AccessAuth {
            start: None,
            end: None,
            // Monday-origin week 0 = Monday, 09:00-17:00.
            ranges: vec![AccessRange {
                week: 0,
                times: vec!["09:00~17:00".into()],
            }],
            allow,
        }
    }

    #[test]
    fn allow_list_denies_outside_listed_day() {
        // 2024-03-10 is a Sunday; the policy only lists Monday.
        assert!(!workweek(true).permits(local(2024, 3, 10, 10, 0)));
    }

    #[test]
    fn allow_list_permits_inside_window() {
        // 2024-03-11 is a Monday.
        assert!(workweek(true).permits(local(2024, 3, 11, 10, 0)));
        assert!(!workweek(true).permits(local(2024, 3, 11, 18, 0)));
    }

    #[test]
    fn deny_list_inverts_the_window() {
        assert!(!workweek(false).permits(local(2024, 3, 11, 10, 0)));
        assert!(workweek(false).permits(local(2024, 3, 11, 18, 0)));
    }

    #[test]
    fn empty_times_permit_everything() {
        let auth = AccessAuth {
            start: None,
            end: None,
            ranges: vec![AccessRange {
                week: 3,
                times: vec![],
            }],
            allow: true,
        };
        assert!(auth.permits(local(2024, 3, 10, 3, 0)));
    }

    #[test]
    fn absolute_bounds_trump_weekly_ranges() {
        let now = local(2024, 3, 11, 10, 0);
        let mut auth = workweek(true);
        auth.end = Some(now.with_timezone(&Utc) - chrono::Duration::days(1));
        assert!(!auth.permits(now));

        let mut auth = workweek(true);
        auth.start = Some(now.with_timezone(&Utc) + chrono::Duration::days(1));
        assert!(!auth.permits(now));
    }

    #[test]
    fn boundary_minutes_are_inclusive() {
        assert!(workweek(true).permits(local(2024, 3, 11, 9, 0)));
        assert!(workweek(true).permits(local(2024, 3, 11, 17, 0)));
        assert!(!workweek(true).permits(local(2024, 3, 11, 8, 59)));
    }
}
