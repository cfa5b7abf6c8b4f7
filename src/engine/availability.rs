use std::collections::BTreeMap;

use crate::model::{AvailableUnit, DurationClass, TimeRange, TypeAvailability, UnitState};

/// A unit can host the window when it is rentable and no claim overlaps.
pub fn unit_is_free(us: &UnitState, range: &TimeRange) -> bool {
    us.unit.active && us.conflicting(range).next().is_none()
}

/// Build the browse row for a free unit, priced for the requested duration.
pub fn available_view(us: &UnitState, duration: DurationClass) -> AvailableUnit {
    AvailableUnit {
        id: us.unit.id,
        label: us.unit.label.clone(),
        bike_type: us.unit.bike_type.clone(),
        size: us.unit.size.clone(),
        price_cents: us.unit.pricing.quote(duration),
        deposit_cents: us.unit.deposit_cents,
        photo_url: us.unit.photo_url.clone(),
        features: us.unit.features.clone(),
    }
}

/// Roll free units up into (type, size) groups, keeping the cheapest
/// price and deposit per group. Output is sorted by type then size.
pub fn summarize_by_type(units: &[AvailableUnit]) -> Vec<TypeAvailability> {
    let mut groups: BTreeMap<(String, String), TypeAvailability> = BTreeMap::new();
    for u in units {
        let key = (u.bike_type.clone(), u.size.clone());
        groups
            .entry(key)
            .and_modify(|g| {
                g.free_units += 1;
                g.price_cents = g.price_cents.min(u.price_cents);
                g.deposit_cents = g.deposit_cents.min(u.deposit_cents);
            })
            .or_insert_with(|| TypeAvailability {
                bike_type: u.bike_type.clone(),
                size: u.size.clone(),
                free_units: 1,
                price_cents: u.price_cents,
                deposit_cents: u.deposit_cents,
            });
    }
    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Claim, Ms, PriceTable, Unit};
    use ulid::Ulid;

    fn unit(bike_type: &str, size: &str, two_hour: i64) -> Unit {
        Unit {
            id: Ulid::new(),
            label: format!("{bike_type}-{size}"),
            bike_type: bike_type.into(),
            size: size.into(),
            pricing: PriceTable {
                two_hour_cents: two_hour,
                four_hour_cents: two_hour * 2,
                day_cents: two_hour * 3,
                extra_day_cents: two_hour * 2,
            },
            deposit_cents: 5_000,
            photo_url: None,
            features: vec![],
            active: true,
            created_at: 0,
        }
    }

    fn claim(start: Ms, end: Ms) -> Claim {
        Claim {
            reservation_id: Ulid::new(),
            item_id: Ulid::new(),
            range: TimeRange::new(start, end),
        }
    }

    #[test]
    fn inactive_unit_is_never_free() {
        let mut us = UnitState::new(unit("city", "M", 1_000));
        us.unit.active = false;
        assert!(!unit_is_free(&us, &TimeRange::new(0, 1_000)));
    }

    #[test]
    fn claimed_window_is_not_free() {
        let mut us = UnitState::new(unit("city", "M", 1_000));
        us.insert_claim(claim(1_000, 2_000));
        assert!(!unit_is_free(&us, &TimeRange::new(1_500, 2_500)));
        assert!(!unit_is_free(&us, &TimeRange::new(2_000, 2_500)));
        assert!(unit_is_free(&us, &TimeRange::new(2_001, 2_500)));
    }

    #[test]
    fn view_prices_requested_duration() {
        let us = UnitState::new(unit("city", "M", 1_000));
        let v = available_view(&us, DurationClass::FourHour);
        assert_eq!(v.price_cents, 2_000);
        let v = available_view(&us, DurationClass::MultiDay { days: 3 });
        // day + 2 extra days
        assert_eq!(v.price_cents, 3_000 + 2 * 2_000);
    }

    #[test]
    fn summary_groups_by_type_and_size() {
        let mk = |t: &str, s: &str, price: i64| AvailableUnit {
            id: Ulid::new(),
            label: format!("{t}-{s}"),
            bike_type: t.into(),
            size: s.into(),
            price_cents: price,
            deposit_cents: 5_000,
            photo_url: None,
            features: vec![],
        };
        let rows = vec![
            mk("city", "M", 1_200),
            mk("city", "M", 1_000),
            mk("city", "L", 1_100),
            mk("cargo", "M", 3_000),
        ];

        let groups = summarize_by_type(&rows);
        assert_eq!(groups.len(), 3);
        // BTreeMap ordering: cargo/M, city/L, city/M
        assert_eq!(groups[0].bike_type, "cargo");
        assert_eq!(groups[1].size, "L");
        assert_eq!(groups[2].free_units, 2);
        assert_eq!(groups[2].price_cents, 1_000);
    }

    #[test]
    fn summary_of_nothing_is_empty() {
        assert!(summarize_by_type(&[]).is_empty());
    }
}
