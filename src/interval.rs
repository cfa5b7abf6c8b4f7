//! Calendar resolution. A booking flow submits a date, a duration kind, and
//! maybe a start time or end date; this module turns that into a concrete
//! [`TimeRange`] of Unix-ms instants in the shop's operating timezone.
//! Pure functions of (request, config) — no clock, no state.

use chrono::{Duration, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;

use crate::config::ShopConfig;
use crate::engine::EngineError;
use crate::model::{DurationClass, DurationKind, Ms, TimeRange, WindowRequest};

/// Anchor a local wall-clock datetime in `tz`, returning Unix ms.
///
/// DST: an ambiguous local time (clocks fell back) takes the earlier offset;
/// a nonexistent local time (clocks sprang forward) rolls forward one hour.
/// Wall-clock times are preserved; elapsed duration may shift by an hour
/// across a transition.
fn anchor_local(tz: Tz, naive: NaiveDateTime) -> Result<Ms, EngineError> {
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return Ok(dt.timestamp_millis());
    }
    let shifted = naive + Duration::hours(1);
    tz.from_local_datetime(&shifted)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .ok_or(EngineError::Validation(
            "time does not exist in the operating timezone",
        ))
}

/// Resolve a window request to a concrete range plus its priced duration.
///
/// - Hourly: `start_time` required; the end rolls into the next calendar
///   date when start + 2h/4h crosses midnight.
/// - Full-day: rents the configured shop-hours window; any submitted start
///   time is ignored.
/// - Multi-day: `end_date` required; blocks `[date 00:00, end_date + 1 day
///   00:00)` so the fleet stays claimed through the last calendar day.
pub fn resolve_window(
    req: &WindowRequest,
    cfg: &ShopConfig,
) -> Result<(TimeRange, DurationClass), EngineError> {
    let (start_naive, end_naive, class) = match req.kind {
        DurationKind::TwoHour | DurationKind::FourHour => {
            let start_time = req.start_time.ok_or(EngineError::Validation(
                "start time required for hourly rentals",
            ))?;
            let (hours, class) = match req.kind {
                DurationKind::TwoHour => (2, DurationClass::TwoHour),
                _ => (4, DurationClass::FourHour),
            };
            let start = req.date.and_time(start_time);
            (start, start + Duration::hours(hours), class)
        }
        DurationKind::FullDay => (
            req.date.and_time(cfg.open_time),
            req.date.and_time(cfg.close_time),
            DurationClass::FullDay,
        ),
        DurationKind::MultiDay => {
            let end_date = req.end_date.ok_or(EngineError::Validation(
                "end date required for multi-day rentals",
            ))?;
            if end_date < req.date {
                return Err(EngineError::Validation("end date before start date"));
            }
            let day_after = end_date
                .succ_opt()
                .ok_or(EngineError::Validation("end date out of range"))?;
            let days = (end_date - req.date).num_days() + 1;
            (
                req.date.and_time(NaiveTime::MIN),
                day_after.and_time(NaiveTime::MIN),
                DurationClass::MultiDay { days: days as u32 },
            )
        }
    };

    let start = anchor_local(cfg.timezone, start_naive)?;
    let end = anchor_local(cfg.timezone, end_naive)?;
    if end <= start {
        return Err(EngineError::Validation("rental window is empty"));
    }
    if end - start > cfg.max_rental_ms() {
        return Err(EngineError::LimitExceeded("rental window too long"));
    }
    Ok((TimeRange::new(start, end), class))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const H: Ms = 3_600_000;

    fn cfg() -> ShopConfig {
        ShopConfig::default() // Europe/Amsterdam, shop hours 09:00–17:00
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> Ms {
        chrono_tz::Europe::Amsterdam
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .timestamp_millis()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn hourly(kind: DurationKind, y: i32, m: u32, d: u32, time: &str) -> WindowRequest {
        WindowRequest {
            date: date(y, m, d),
            kind,
            start_time: Some(NaiveTime::parse_from_str(time, "%H:%M").unwrap()),
            end_date: None,
        }
    }

    #[test]
    fn four_hours_from_ten_thirty() {
        let (range, class) =
            resolve_window(&hourly(DurationKind::FourHour, 2026, 6, 10, "10:30"), &cfg()).unwrap();
        assert_eq!(range.start, at(2026, 6, 10, 10, 30));
        assert_eq!(range.end, at(2026, 6, 10, 14, 30));
        assert_eq!(range.duration_ms(), 4 * H);
        assert_eq!(class, DurationClass::FourHour);
    }

    #[test]
    fn two_hours_crossing_midnight() {
        let (range, _) =
            resolve_window(&hourly(DurationKind::TwoHour, 2026, 6, 10, "23:00"), &cfg()).unwrap();
        assert_eq!(range.start, at(2026, 6, 10, 23, 0));
        assert_eq!(range.end, at(2026, 6, 11, 1, 0));
    }

    #[test]
    fn full_day_rents_shop_hours_and_ignores_start_time() {
        let req = WindowRequest {
            date: date(2026, 6, 10),
            kind: DurationKind::FullDay,
            start_time: Some(NaiveTime::parse_from_str("13:00", "%H:%M").unwrap()),
            end_date: None,
        };
        let (range, class) = resolve_window(&req, &cfg()).unwrap();
        assert_eq!(range.start, at(2026, 6, 10, 9, 0));
        assert_eq!(range.end, at(2026, 6, 10, 17, 0));
        assert_eq!(class, DurationClass::FullDay);
    }

    #[test]
    fn multi_day_blocks_through_last_day() {
        let req = WindowRequest {
            date: date(2026, 3, 1),
            kind: DurationKind::MultiDay,
            start_time: None,
            end_date: Some(date(2026, 3, 3)),
        };
        let (range, class) = resolve_window(&req, &cfg()).unwrap();
        assert_eq!(range.start, at(2026, 3, 1, 0, 0));
        assert_eq!(range.end, at(2026, 3, 4, 0, 0)); // midnight after the last day
        assert_eq!(class, DurationClass::MultiDay { days: 3 });
    }

    #[test]
    fn single_day_multi_day_is_one_day() {
        let req = WindowRequest {
            date: date(2026, 3, 1),
            kind: DurationKind::MultiDay,
            start_time: None,
            end_date: Some(date(2026, 3, 1)),
        };
        let (range, class) = resolve_window(&req, &cfg()).unwrap();
        assert_eq!(range.end - range.start, 24 * H);
        assert_eq!(class, DurationClass::MultiDay { days: 1 });
    }

    #[test]
    fn hourly_without_start_time_rejected() {
        let req = WindowRequest {
            date: date(2026, 6, 10),
            kind: DurationKind::TwoHour,
            start_time: None,
            end_date: None,
        };
        let err = resolve_window(&req, &cfg()).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn multi_day_without_end_date_rejected() {
        let req = WindowRequest {
            date: date(2026, 6, 10),
            kind: DurationKind::MultiDay,
            start_time: None,
            end_date: None,
        };
        let err = resolve_window(&req, &cfg()).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn end_date_before_start_rejected() {
        let req = WindowRequest {
            date: date(2026, 6, 10),
            kind: DurationKind::MultiDay,
            start_time: None,
            end_date: Some(date(2026, 6, 8)),
        };
        let err = resolve_window(&req, &cfg()).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn beyond_rental_horizon_rejected() {
        let req = WindowRequest {
            date: date(2026, 6, 1),
            kind: DurationKind::MultiDay,
            start_time: None,
            end_date: Some(date(2026, 6, 30)),
        };
        let err = resolve_window(&req, &cfg()).unwrap_err();
        assert!(matches!(err, EngineError::LimitExceeded(_)));
    }

    #[test]
    fn dst_gap_rolls_forward() {
        // Amsterdam springs forward 2026-03-29 02:00 → 03:00; 02:30 does not exist.
        let (range, _) =
            resolve_window(&hourly(DurationKind::TwoHour, 2026, 3, 29, "02:30"), &cfg()).unwrap();
        assert_eq!(range.start, at(2026, 3, 29, 3, 30));
        // Wall-clock end (04:30) is preserved, so only one elapsed hour remains.
        assert_eq!(range.end, at(2026, 3, 29, 4, 30));
        assert_eq!(range.duration_ms(), H);
    }

    #[test]
    fn dst_fold_takes_earlier_offset() {
        // Amsterdam falls back 2026-10-25 03:00 → 02:00; 02:30 happens twice.
        let (range, _) =
            resolve_window(&hourly(DurationKind::TwoHour, 2026, 10, 25, "02:30"), &cfg()).unwrap();
        let naive = date(2026, 10, 25).and_time(NaiveTime::parse_from_str("02:30", "%H:%M").unwrap());
        let earlier = chrono_tz::Europe::Amsterdam
            .from_local_datetime(&naive)
            .earliest()
            .unwrap()
            .timestamp_millis();
        assert_eq!(range.start, earlier);
        // 04:30 is unambiguous; the rental spans the repeated hour.
        assert_eq!(range.duration_ms(), 3 * H);
    }
}
