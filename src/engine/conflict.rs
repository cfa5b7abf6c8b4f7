use std::time::{SystemTime, UNIX_EPOCH};

use ulid::Ulid;

use crate::limits::*;
use crate::model::{Ms, TimeRange, UnitState};

use super::EngineError;

pub fn now_ms() -> Ms {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as Ms
}

/// Bounds-check a window before it touches any schedule. Rejects inverted
/// or empty windows and timestamps outside the supported era (sub-second
/// garbage and far-future dates both point at caller bugs).
pub fn validate_range(range: &TimeRange) -> Result<(), EngineError> {
    if range.start < MIN_VALID_TIMESTAMP_MS || range.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if range.end <= range.start {
        return Err(EngineError::Validation("rental window is empty"));
    }
    Ok(())
}

/// Scan the unit's schedule for a claim overlapping `range`. Boundary
/// instants count as overlap, so a rental starting the moment another
/// ends is rejected. Claims belonging to `exclude` are skipped, which
/// lets an extension re-test a window the reservation already occupies.
///
/// Holds past their expiry still block until the sweeper cancels them;
/// a booking must never race the sweep for the same window.
pub fn check_unit_free(
    us: &UnitState,
    range: &TimeRange,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for claim in us.conflicting(range) {
        if exclude.is_some_and(|id| id == claim.reservation_id) {
            continue;
        }
        return Err(EngineError::UnitConflict(us.unit.id));
    }
    Ok(())
}
