//! Schedule evaluation
//!
//! Every caller that needs "is this stream due now" or "when is its next
//! window" goes through [`evaluate`]: stream creation and edits, manual stop
//! and the reconciliation tick all share it.
//!
//! Daily start times are wall-clock times in the configured zone. A start
//! time that does not exist on a given day (DST gap) resolves to the first
//! valid instant after it; an ambiguous one resolves to the earlier instant.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::errors::{AppError, AppResult};
use crate::models::{DailyTime, ScheduleKind, Window};

/// Longest allowed daily window
pub const MAX_DAILY_DURATION_MINUTES: u32 = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEvaluation {
    pub should_be_active: bool,
    /// The current window when active, otherwise the next one; `None` when
    /// the schedule has no further occurrence
    pub next_window: Option<Window>,
}

impl ScheduleEvaluation {
    fn inactive(next_window: Option<Window>) -> Self {
        Self {
            should_be_active: false,
            next_window,
        }
    }

    fn active(window: Window) -> Self {
        Self {
            should_be_active: true,
            next_window: Some(window),
        }
    }
}

pub fn evaluate(kind: &ScheduleKind, now: DateTime<Utc>, tz: Tz) -> ScheduleEvaluation {
    match kind {
        ScheduleKind::Manual => ScheduleEvaluation::inactive(None),
        ScheduleKind::Once { start, end } => {
            if now >= *end {
                return ScheduleEvaluation::inactive(None);
            }
            let window = Window::new(*start, *end);
            if window.contains(now) {
                ScheduleEvaluation::active(window)
            } else {
                ScheduleEvaluation::inactive(Some(window))
            }
        }
        ScheduleKind::Daily {
            start_time,
            duration_minutes,
        } => evaluate_daily(*start_time, *duration_minutes, now, tz),
    }
}

fn evaluate_daily(
    start_time: DailyTime,
    duration_minutes: u32,
    now: DateTime<Utc>,
    tz: Tz,
) -> ScheduleEvaluation {
    let today = now.with_timezone(&tz).date_naive();

    // A window opened yesterday may still be running past midnight
    for day in [today.pred_opt(), Some(today)].into_iter().flatten() {
        let window = daily_occurrence(day, start_time, duration_minutes, tz);
        if window.contains(now) {
            return ScheduleEvaluation::active(window);
        }
    }

    let todays = daily_occurrence(today, start_time, duration_minutes, tz);
    if todays.start > now {
        return ScheduleEvaluation::inactive(Some(todays));
    }
    let next = today
        .succ_opt()
        .map(|tomorrow| daily_occurrence(tomorrow, start_time, duration_minutes, tz));
    ScheduleEvaluation::inactive(next)
}

/// The window that opens on `day` (a local calendar date in `tz`)
pub fn daily_occurrence(
    day: NaiveDate,
    start_time: DailyTime,
    duration_minutes: u32,
    tz: Tz,
) -> Window {
    let naive = day
        .and_hms_opt(start_time.hour, start_time.minute, 0)
        .unwrap_or_else(|| day.and_time(Default::default()));
    let start = resolve_local(naive, tz);
    Window::new(start, start + Duration::minutes(duration_minutes as i64))
}

fn resolve_local(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    let mut candidate = naive;
    // DST gaps are at most a couple of hours; walk forward a minute at a time
    for _ in 0..=180 {
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => return dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, latest) => {
                return earliest.min(latest).with_timezone(&Utc);
            }
            LocalResult::None => candidate += Duration::minutes(1),
        }
    }
    Utc.from_utc_datetime(&naive)
}

/// Reject malformed schedules before they are stored
pub fn validate_schedule(kind: &ScheduleKind) -> AppResult<()> {
    match kind {
        ScheduleKind::Manual => Ok(()),
        ScheduleKind::Once { start, end } => {
            if end <= start {
                Err(AppError::validation("once schedule must end after it starts"))
            } else {
                Ok(())
            }
        }
        ScheduleKind::Daily { duration_minutes, .. } => {
            if *duration_minutes == 0 || *duration_minutes > MAX_DAILY_DURATION_MINUTES {
                Err(AppError::validation(format!(
                    "daily duration must be between 1 and {} minutes, got {}",
                    MAX_DAILY_DURATION_MINUTES, duration_minutes
                )))
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn daily(hour: u32, minute: u32, duration_minutes: u32) -> ScheduleKind {
        ScheduleKind::Daily {
            start_time: DailyTime::new(hour, minute).unwrap(),
            duration_minutes,
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[rstest]
    #[case::before_window(utc(2024, 3, 10, 8, 59), false, utc(2024, 3, 10, 9, 0))]
    #[case::at_open(utc(2024, 3, 10, 9, 0), true, utc(2024, 3, 10, 9, 0))]
    #[case::inside(utc(2024, 3, 10, 9, 30), true, utc(2024, 3, 10, 9, 0))]
    #[case::at_close(utc(2024, 3, 10, 10, 0), false, utc(2024, 3, 11, 9, 0))]
    #[case::after_window(utc(2024, 3, 10, 10, 1), false, utc(2024, 3, 11, 9, 0))]
    fn test_daily_nine_to_ten(
        #[case] now: DateTime<Utc>,
        #[case] active: bool,
        #[case] expected_start: DateTime<Utc>,
    ) {
        let eval = evaluate(&daily(9, 0, 60), now, chrono_tz::UTC);
        assert_eq!(eval.should_be_active, active);
        let window = eval.next_window.unwrap();
        assert_eq!(window.start, expected_start);
        assert_eq!(window.end, expected_start + Duration::minutes(60));
    }

    #[test]
    fn test_daily_window_crossing_midnight() {
        let kind = daily(23, 30, 90);
        let eval = evaluate(&kind, utc(2024, 3, 11, 0, 15), chrono_tz::UTC);
        assert!(eval.should_be_active);
        assert_eq!(eval.next_window.unwrap().start, utc(2024, 3, 10, 23, 30));

        let eval = evaluate(&kind, utc(2024, 3, 11, 1, 0), chrono_tz::UTC);
        assert!(!eval.should_be_active);
        assert_eq!(eval.next_window.unwrap().start, utc(2024, 3, 11, 23, 30));
    }

    #[test]
    fn test_daily_uses_configured_timezone() {
        // 09:00 in Berlin is 08:00 UTC in winter
        let eval = evaluate(&daily(9, 0, 60), utc(2024, 1, 15, 8, 30), chrono_tz::Europe::Berlin);
        assert!(eval.should_be_active);
        assert_eq!(eval.next_window.unwrap().start, utc(2024, 1, 15, 8, 0));
    }

    #[test]
    fn test_daily_start_in_dst_gap_resolves_forward() {
        // Europe/Berlin skips 02:00-03:00 on 2024-03-31
        let day = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let half_past_two = DailyTime::new(2, 30).unwrap();
        let window = daily_occurrence(day, half_past_two, 30, chrono_tz::Europe::Berlin);
        assert_eq!(window.start, utc(2024, 3, 31, 1, 0));
    }

    #[test]
    fn test_daily_start_in_dst_overlap_takes_earliest() {
        // 02:30 occurs twice in Europe/Berlin on 2024-10-27
        let day = NaiveDate::from_ymd_opt(2024, 10, 27).unwrap();
        let half_past_two = DailyTime::new(2, 30).unwrap();
        let window = daily_occurrence(day, half_past_two, 30, chrono_tz::Europe::Berlin);
        assert_eq!(window.start, utc(2024, 10, 27, 0, 30));
    }

    #[test]
    fn test_once_lifecycle() {
        let start = utc(2024, 6, 1, 18, 0);
        let kind = ScheduleKind::Once {
            start,
            end: start + Duration::minutes(30),
        };

        let before = evaluate(&kind, start - Duration::minutes(1), chrono_tz::UTC);
        assert!(!before.should_be_active);
        assert_eq!(before.next_window.unwrap().start, start);

        assert!(evaluate(&kind, start + Duration::minutes(29), chrono_tz::UTC).should_be_active);

        for minutes in [30, 31, 60 * 24, 60 * 24 * 365] {
            let after = evaluate(&kind, start + Duration::minutes(minutes), chrono_tz::UTC);
            assert_eq!(after, ScheduleEvaluation::inactive(None));
        }
    }

    #[test]
    fn test_manual_is_never_active() {
        let eval = evaluate(&ScheduleKind::Manual, Utc::now(), chrono_tz::UTC);
        assert_eq!(eval, ScheduleEvaluation::inactive(None));
    }

    #[rstest]
    #[case(daily(9, 0, 0), false)]
    #[case(daily(9, 0, 1), true)]
    #[case(daily(9, 0, 1440), true)]
    #[case(daily(9, 0, 1441), false)]
    #[case(ScheduleKind::Manual, true)]
    #[case(
        ScheduleKind::Once { start: utc(2024, 1, 1, 10, 0), end: utc(2024, 1, 1, 10, 0) },
        false
    )]
    #[case(ScheduleKind::Once { start: utc(2024, 1, 1, 10, 0), end: utc(2024, 1, 1, 11, 0) }, true)]
    fn test_validate_schedule(#[case] kind: ScheduleKind, #[case] valid: bool) {
        assert_eq!(validate_schedule(&kind).is_ok(), valid);
    }
}
