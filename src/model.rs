use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type in storage.
pub type Ms = i64;

/// A rental window as stored: `[start, end]` in Unix ms.
///
/// Conflict bounds are inclusive on both ends: a rental ending exactly when
/// another starts still conflicts, because a handover is never instantaneous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Ms,
    pub end: Ms,
}

impl TimeRange {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Inclusive overlap test: back-to-back ranges sharing an instant conflict.
    pub fn conflicts_with(&self, other: &TimeRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t <= self.end
    }
}

/// Requested rental length, before calendar resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationKind {
    TwoHour,
    FourHour,
    FullDay,
    MultiDay,
}

/// Resolved rental length. Pricing keys off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurationClass {
    TwoHour,
    FourHour,
    FullDay,
    MultiDay { days: u32 },
}

/// Calendar-level booking request as a booking flow submits it.
/// `interval::resolve_window` turns this into a concrete [`TimeRange`]
/// in the shop's operating timezone.
#[derive(Debug, Clone)]
pub struct WindowRequest {
    pub date: NaiveDate,
    pub kind: DurationKind,
    /// Required for hourly rentals, ignored for full-day.
    pub start_time: Option<NaiveTime>,
    /// Required for multi-day rentals.
    pub end_date: Option<NaiveDate>,
}

/// Stored lifecycle states. Overdue is derived at read time, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Hold,
    Paid,
    Active,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    pub fn name(&self) -> &'static str {
        match self {
            ReservationStatus::Hold => "hold",
            ReservationStatus::Paid => "paid",
            ReservationStatus::Active => "active",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::Completed | ReservationStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationSource {
    Online,
    WalkIn,
}

impl ReservationSource {
    pub fn label(&self) -> &'static str {
        match self {
            ReservationSource::Online => "online",
            ReservationSource::WalkIn => "walkin",
        }
    }
}

/// Rental prices in integer cents. No floats anywhere near money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTable {
    pub two_hour_cents: i64,
    pub four_hour_cents: i64,
    pub day_cents: i64,
    /// Each day after the first on a multi-day rental.
    pub extra_day_cents: i64,
}

impl PriceTable {
    /// Rental price of one unit for a resolved duration.
    pub fn quote(&self, duration: DurationClass) -> i64 {
        match duration {
            DurationClass::TwoHour => self.two_hour_cents,
            DurationClass::FourHour => self.four_hour_cents,
            DurationClass::FullDay => self.day_cents,
            DurationClass::MultiDay { days } => {
                self.day_cents + self.extra_day_cents * (days as i64 - 1)
            }
        }
    }
}

/// A physical bike in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: Ulid,
    pub label: String,
    pub bike_type: String,
    pub size: String,
    pub pricing: PriceTable,
    pub deposit_cents: i64,
    pub photo_url: Option<String>,
    pub features: Vec<String>,
    /// Disabled units never appear in availability and reject new claims.
    pub active: bool,
    pub created_at: Ms,
}

/// Admin input for registering a unit.
#[derive(Debug, Clone)]
pub struct UnitDraft {
    pub label: String,
    pub bike_type: String,
    pub size: String,
    pub pricing: PriceTable,
    pub deposit_cents: i64,
    pub photo_url: Option<String>,
    pub features: Vec<String>,
}

/// One reservation item's claim on a unit's schedule.
///
/// Only live claims are stored — reservations in hold/paid/active. Cancelled
/// and completed reservations release their claims at transition commit, so
/// the availability read path never filters by status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub reservation_id: Ulid,
    pub item_id: Ulid,
    pub range: TimeRange,
}

/// A unit plus its schedule of live claims, sorted by `range.start`.
#[derive(Debug, Clone)]
pub struct UnitState {
    pub unit: Unit,
    pub claims: Vec<Claim>,
}

impl UnitState {
    pub fn new(unit: Unit) -> Self {
        Self {
            unit,
            claims: Vec::new(),
        }
    }

    /// Insert a claim maintaining sort order by range.start.
    pub fn insert_claim(&mut self, claim: Claim) {
        let pos = self
            .claims
            .binary_search_by_key(&claim.range.start, |c| c.range.start)
            .unwrap_or_else(|e| e);
        self.claims.insert(pos, claim);
    }

    /// Drop every claim belonging to one reservation.
    pub fn release_claims_of(&mut self, reservation_id: Ulid) -> usize {
        let before = self.claims.len();
        self.claims.retain(|c| c.reservation_id != reservation_id);
        before - self.claims.len()
    }

    /// Move the end of one reservation's claims. Start never changes, so
    /// the sort order by start is preserved.
    pub fn move_claim_end_of(&mut self, reservation_id: Ulid, new_end: Ms) {
        for c in &mut self.claims {
            if c.reservation_id == reservation_id {
                c.range.end = new_end;
            }
        }
    }

    /// Claims whose range conflicts with the query window.
    /// Binary search skips claims starting after `query.end`; bounds are
    /// inclusive to match [`TimeRange::conflicts_with`].
    pub fn conflicting(&self, query: &TimeRange) -> impl Iterator<Item = &Claim> {
        let right_bound = self
            .claims
            .partition_point(|c| c.range.start <= query.end);
        self.claims[..right_bound]
            .iter()
            .filter(move |c| c.range.end >= query.start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Ulid,
    /// Lowercased; the upsert key.
    pub email: String,
    pub full_name: String,
    pub phone: String,
    pub date_of_birth: Option<NaiveDate>,
    pub created_at: Ms,
}

/// Customer fields as submitted with a booking. Upsert-by-email merges name
/// and phone onto an existing row and keeps the stored date of birth when
/// the incoming one is absent.
#[derive(Debug, Clone)]
pub struct CustomerDraft {
    pub email: String,
    pub full_name: String,
    pub phone: String,
    pub date_of_birth: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationItem {
    pub id: Ulid,
    pub unit_id: Ulid,
    pub price_cents: i64,
    pub deposit_cents: i64,
    pub checked_out_at: Option<Ms>,
    pub checked_in_at: Option<Ms>,
}

/// Free-text annotation on a reservation. Append-only, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: Ulid,
    pub body: String,
    pub created_at: Ms,
}

/// Signed consent artifact. Immutable once recorded; stored and queryable
/// but never a state-machine gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waiver {
    pub id: Ulid,
    pub customer_id: Ulid,
    pub reservation_id: Option<Ulid>,
    pub document_ref: String,
    pub signed_at: Ms,
}

/// The aggregate root. One row per booking, whatever its state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    /// Short human-readable booking code, unique across the store.
    pub reference: String,
    /// Opaque capability letting an unauthenticated customer resume this
    /// reservation. Never printed in logs.
    pub token: Ulid,
    pub customer_id: Option<Ulid>,
    pub range: TimeRange,
    pub duration: DurationClass,
    pub status: ReservationStatus,
    pub source: ReservationSource,
    /// Set while status is hold; cleared by payment. Never moves once set.
    pub hold_expires_at: Option<Ms>,
    pub payment_token: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub payment_voided: bool,
    pub total_cents: i64,
    pub deposit_cents: i64,
    pub items: Vec<ReservationItem>,
    pub notes: Vec<Note>,
    pub created_at: Ms,
    pub paid_at: Option<Ms>,
    pub cancelled_at: Option<Ms>,
    pub completed_at: Option<Ms>,
}

impl Reservation {
    /// Expired holds are rejected by mark_paid and enacted by the sweeper.
    pub fn hold_expired(&self, now: Ms) -> bool {
        self.status == ReservationStatus::Hold && self.hold_expires_at.is_some_and(|t| t <= now)
    }

    /// Derived view: active past its return time with gear still out.
    pub fn is_overdue(&self, now: Ms) -> bool {
        self.status == ReservationStatus::Active
            && now > self.range.end
            && self
                .items
                .iter()
                .any(|i| i.checked_out_at.is_some() && i.checked_in_at.is_none())
    }

    /// True when nothing is out: every item was either returned or never
    /// handed over in the first place. The final check-in closes the
    /// rental on this predicate, so a no-show item cannot wedge a
    /// reservation in active forever.
    pub fn fully_returned(&self) -> bool {
        self.items
            .iter()
            .all(|i| i.checked_out_at.is_none() || i.checked_in_at.is_some())
    }

    pub fn item(&self, item_id: Ulid) -> Option<&ReservationItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn item_mut(&mut self, item_id: Ulid) -> Option<&mut ReservationItem> {
        self.items.iter_mut().find(|i| i.id == item_id)
    }

    pub fn unit_ids(&self) -> Vec<Ulid> {
        self.items.iter().map(|i| i.unit_id).collect()
    }
}

/// What a booking flow submits to claim units.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub unit_ids: Vec<Ulid>,
    pub window: WindowRequest,
    pub customer: Option<CustomerDraft>,
}

/// The event types — this is the WAL record format. Creation events carry
/// the full row so replay stays mechanical; transitions carry deltas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UnitRegistered {
        unit: Unit,
    },
    UnitActiveSet {
        id: Ulid,
        active: bool,
    },
    CustomerUpserted {
        customer: Customer,
    },
    ReservationOpened {
        reservation: Reservation,
    },
    ReservationPaid {
        id: Ulid,
        payment_token: String,
        at: Ms,
    },
    ReservationCancelled {
        id: Ulid,
        at: Ms,
        /// Staff-supplied reason, recorded as a note on the row.
        reason: Option<Note>,
    },
    ReservationCompleted {
        id: Ulid,
        at: Ms,
    },
    ReservationExtended {
        id: Ulid,
        new_end: Ms,
    },
    ItemsCheckedOut {
        reservation_id: Ulid,
        item_ids: Vec<Ulid>,
        at: Ms,
    },
    ItemsCheckedIn {
        reservation_id: Ulid,
        item_ids: Vec<Ulid>,
        at: Ms,
        /// True when this check-in returned the last outstanding item.
        completed: bool,
        /// Inspection note, committed with the check-in itself.
        note: Option<Note>,
    },
    NoteAdded {
        reservation_id: Ulid,
        note: Note,
    },
    PaymentCaptured {
        id: Ulid,
        transaction_id: String,
        at: Ms,
    },
    PaymentVoided {
        id: Ulid,
        at: Ms,
    },
    WaiverRecorded {
        waiver: Waiver,
    },
}

// ── Query parameter types ────────────────────────────────────────

/// Admin listing filter. `Overdue` selects the derived view over active rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Hold,
    Paid,
    Active,
    Completed,
    Cancelled,
    Overdue,
}

/// Calendar bucket relative to the shop's operating timezone, judged against
/// the rental window (a multi-day rental covering today is Today).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBucket {
    Today,
    Upcoming,
    Past,
}

#[derive(Debug, Clone)]
pub struct ListQuery {
    pub status: Option<StatusFilter>,
    pub bucket: Option<DateBucket>,
    pub search: Option<String>,
    /// 1-based.
    pub page: usize,
    pub limit: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            status: None,
            bucket: None,
            search: None,
            page: 1,
            limit: crate::limits::DEFAULT_PAGE_LIMIT,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// What create_hold / create_walk_in hand back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingConfirmation {
    pub reservation_id: Ulid,
    pub reference: String,
    pub token: Ulid,
    pub status: ReservationStatus,
    pub range: TimeRange,
    pub hold_expires_at: Option<Ms>,
    pub total_cents: i64,
    pub deposit_cents: i64,
}

/// Row shape returned by reservation listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationSummary {
    pub id: Ulid,
    pub reference: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub status: ReservationStatus,
    pub overdue: bool,
    pub range: TimeRange,
    pub duration: DurationClass,
    pub source: ReservationSource,
    pub unit_count: usize,
    pub total_cents: i64,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationPage {
    pub rows: Vec<ReservationSummary>,
    /// Matches before pagination.
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

/// One rentable unit as shown to a booking flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableUnit {
    pub id: Ulid,
    pub label: String,
    pub bike_type: String,
    pub size: String,
    /// Rental price for the requested duration.
    pub price_cents: i64,
    pub deposit_cents: i64,
    pub photo_url: Option<String>,
    pub features: Vec<String>,
}

/// Per-(type, size) rollup for the availability screen. Pricing is the
/// cheapest free unit in the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeAvailability {
    pub bike_type: String,
    pub size: String,
    pub free_units: usize,
    pub price_cents: i64,
    pub deposit_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityReport {
    pub range: TimeRange,
    pub duration: DurationClass,
    pub free_units: usize,
    pub groups: Vec<TypeAvailability>,
}
