use chrono::{NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use ulid::Ulid;

use crate::interval::resolve_window;
use crate::limits::*;
use crate::model::*;

use super::availability::{available_view, summarize_by_type, unit_is_free};
use super::conflict::now_ms;
use super::{Engine, EngineError};

/// Calendar date of an instant in the shop's timezone. Instant-based
/// conversion is never ambiguous, so the single() always holds.
fn local_date(tz: &Tz, t: Ms) -> NaiveDate {
    tz.timestamp_millis_opt(t)
        .single()
        .expect("instant maps to one local time")
        .date_naive()
}

impl Engine {
    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let rs = self
            .reservation_state(&id)
            .ok_or(EngineError::NotFound("reservation", id))?;
        let row = rs.read().await;
        Ok(row.clone())
    }

    /// Look up by the printed booking code, case-insensitively.
    pub async fn find_by_reference(&self, reference: &str) -> Option<Reservation> {
        let key = reference.trim().to_ascii_uppercase();
        let id = self.by_reference.get(&key).map(|e| *e.value())?;
        let rs = self.reservation_state(&id)?;
        let row = rs.read().await;
        Some(row.clone())
    }

    /// Look up by the opaque self-service token.
    pub async fn find_by_token(&self, token: Ulid) -> Option<Reservation> {
        let id = self.by_token.get(&token).map(|e| *e.value())?;
        let rs = self.reservation_state(&id)?;
        let row = rs.read().await;
        Some(row.clone())
    }

    pub fn get_customer(&self, id: Ulid) -> Option<Customer> {
        self.customers.get(&id).map(|e| e.value().clone())
    }

    pub fn find_customer_by_email(&self, email: &str) -> Option<Customer> {
        let key = email.trim().to_ascii_lowercase();
        let id = self.customer_by_email.get(&key).map(|e| *e.value())?;
        self.get_customer(id)
    }

    pub async fn get_unit(&self, id: Ulid) -> Option<Unit> {
        let us = self.unit_state(&id)?;
        let guard = us.read().await;
        Some(guard.unit.clone())
    }

    pub async fn list_units(&self) -> Vec<Unit> {
        let arcs: Vec<_> = self.units.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(arcs.len());
        for us in arcs {
            let guard = us.read().await;
            out.push(guard.unit.clone());
        }
        out.sort_by(|a, b| a.label.cmp(&b.label));
        out
    }

    /// The live claims on one unit's schedule, sorted by start.
    pub async fn list_claims(&self, unit_id: Ulid) -> Result<Vec<Claim>, EngineError> {
        let us = self
            .unit_state(&unit_id)
            .ok_or(EngineError::NotFound("unit", unit_id))?;
        let guard = us.read().await;
        Ok(guard.claims.clone())
    }

    pub fn waiver_on_file(&self, customer_id: Ulid) -> bool {
        self.waivers_by_customer
            .get(&customer_id)
            .is_some_and(|w| !w.is_empty())
    }

    pub fn list_waivers_for(&self, customer_id: Ulid) -> Vec<Waiver> {
        let Some(ids) = self.waivers_by_customer.get(&customer_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.waivers.get(id).map(|e| e.value().clone()))
            .collect()
    }

    /// Every free unit for the window, priced for its duration.
    pub async fn list_available(
        &self,
        window: &WindowRequest,
    ) -> Result<Vec<AvailableUnit>, EngineError> {
        let (range, duration) = resolve_window(window, &self.config)?;
        Ok(self.free_units_in(&range, duration).await)
    }

    /// The storefront availability screen: free units rolled up per
    /// (type, size) with the cheapest price in each group.
    pub async fn check_availability(
        &self,
        window: &WindowRequest,
    ) -> Result<AvailabilityReport, EngineError> {
        let (range, duration) = resolve_window(window, &self.config)?;
        let units = self.free_units_in(&range, duration).await;
        Ok(AvailabilityReport {
            range,
            duration,
            free_units: units.len(),
            groups: summarize_by_type(&units),
        })
    }

    async fn free_units_in(&self, range: &TimeRange, duration: DurationClass) -> Vec<AvailableUnit> {
        let arcs: Vec<_> = self.units.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for us in arcs {
            let guard = us.read().await;
            if unit_is_free(&guard, range) {
                out.push(available_view(&guard, duration));
            }
        }
        out.sort_by(|a, b| {
            a.bike_type
                .cmp(&b.bike_type)
                .then_with(|| a.size.cmp(&b.size))
                .then_with(|| a.label.cmp(&b.label))
        });
        out
    }

    /// Admin listing: optional status filter (overdue is the derived view
    /// over active rows), calendar bucket in the shop's timezone, and a
    /// case-insensitive search over reference and customer fields. Rows
    /// come back newest rental start first.
    pub async fn list_reservations(&self, query: ListQuery) -> Result<ReservationPage, EngineError> {
        let limit = if query.limit == 0 { DEFAULT_PAGE_LIMIT } else { query.limit };
        if limit > MAX_PAGE_LIMIT {
            return Err(EngineError::LimitExceeded("page limit too large"));
        }
        if let Some(ref s) = query.search
            && s.len() > MAX_SEARCH_LEN {
                return Err(EngineError::LimitExceeded("search term too long"));
            }
        let page = query.page.max(1);
        let needle = query
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let now = now_ms();
        let today = Utc::now().with_timezone(&self.config.timezone).date_naive();

        let arcs: Vec<_> = self.reservations.iter().map(|e| e.value().clone()).collect();
        let mut rows = Vec::new();
        for rs in arcs {
            let row = rs.read().await;

            let status_ok = match query.status {
                None => true,
                Some(StatusFilter::Overdue) => row.is_overdue(now),
                Some(StatusFilter::Hold) => row.status == ReservationStatus::Hold,
                Some(StatusFilter::Paid) => row.status == ReservationStatus::Paid,
                Some(StatusFilter::Active) => row.status == ReservationStatus::Active,
                Some(StatusFilter::Completed) => row.status == ReservationStatus::Completed,
                Some(StatusFilter::Cancelled) => row.status == ReservationStatus::Cancelled,
            };
            if !status_ok {
                continue;
            }

            if let Some(bucket) = query.bucket {
                let start_day = local_date(&self.config.timezone, row.range.start);
                // End is exclusive; the last covered day is a tick before it.
                let last_day = local_date(&self.config.timezone, row.range.end - 1);
                let hit = match bucket {
                    DateBucket::Today => start_day <= today && today <= last_day,
                    DateBucket::Upcoming => start_day > today,
                    DateBucket::Past => last_day < today,
                };
                if !hit {
                    continue;
                }
            }

            let customer = row
                .customer_id
                .and_then(|cid| self.customers.get(&cid).map(|e| e.value().clone()));

            if let Some(ref needle) = needle {
                let needle = needle.as_str();
                let mut hit = row.reference.to_lowercase().contains(needle);
                if let Some(ref c) = customer {
                    hit = hit
                        || c.full_name.to_lowercase().contains(needle)
                        || c.email.contains(needle)
                        || c.phone.contains(needle);
                }
                if !hit {
                    continue;
                }
            }

            rows.push(ReservationSummary {
                id: row.id,
                reference: row.reference.clone(),
                customer_name: customer.as_ref().map(|c| c.full_name.clone()),
                customer_email: customer.as_ref().map(|c| c.email.clone()),
                status: row.status,
                overdue: row.is_overdue(now),
                range: row.range,
                duration: row.duration,
                source: row.source,
                unit_count: row.items.len(),
                total_cents: row.total_cents,
                created_at: row.created_at,
            });
        }

        rows.sort_by(|a, b| {
            b.range
                .start
                .cmp(&a.range.start)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = rows.len();
        let from = (page - 1).saturating_mul(limit).min(total);
        let to = (from + limit).min(total);
        Ok(ReservationPage {
            rows: rows[from..to].to_vec(),
            total,
            page,
            limit,
        })
    }
}
