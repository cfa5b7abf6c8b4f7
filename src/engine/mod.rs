mod availability;
mod conflict;
mod error;
mod fulfillment;
mod mutations;
mod payment;
mod queries;

pub use availability::{summarize_by_type, unit_is_free};
pub use error::{EngineError, ErrorKind};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::config::ShopConfig;
use crate::gateway::PaymentGateway;
use crate::model::*;
use crate::wal::Wal;

pub type SharedUnitState = Arc<RwLock<UnitState>>;
pub type SharedReservation = Arc<RwLock<Reservation>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub(super) units: DashMap<Ulid, SharedUnitState>,
    pub(super) reservations: DashMap<Ulid, SharedReservation>,
    pub(super) customers: DashMap<Ulid, Customer>,
    /// Lowercased email → customer id.
    pub(super) customer_by_email: DashMap<String, Ulid>,
    /// Human-facing booking reference → reservation id.
    pub(super) by_reference: DashMap<String, Ulid>,
    /// Opaque self-service token → reservation id.
    pub(super) by_token: DashMap<Ulid, Ulid>,
    pub(super) waivers: DashMap<Ulid, Waiver>,
    pub(super) waivers_by_customer: DashMap<Ulid, Vec<Ulid>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) gateway: Arc<dyn PaymentGateway>,
    pub(super) config: ShopConfig,
    /// Serializes upsert's check-then-insert on the email index.
    pub(super) customer_upsert: Mutex<()>,
}

/// Apply a reservation-scoped event to its row (no locking — caller holds
/// the lock). Claim bookkeeping on unit schedules stays with the caller:
/// live paths already hold the unit guards they need, replay walks the
/// schedules separately.
pub(super) fn apply_to_reservation(row: &mut Reservation, event: &Event) {
    match event {
        Event::ReservationPaid { payment_token, at, .. } => {
            row.status = ReservationStatus::Paid;
            row.payment_token = Some(payment_token.clone());
            row.paid_at = Some(*at);
            row.hold_expires_at = None;
        }
        Event::ReservationCancelled { at, reason, .. } => {
            row.status = ReservationStatus::Cancelled;
            row.cancelled_at = Some(*at);
            if let Some(note) = reason {
                row.notes.push(note.clone());
            }
        }
        Event::ReservationCompleted { at, .. } => {
            row.status = ReservationStatus::Completed;
            row.completed_at = Some(*at);
        }
        Event::ReservationExtended { new_end, .. } => {
            row.range.end = *new_end;
        }
        Event::ItemsCheckedOut { item_ids, at, .. } => {
            for item_id in item_ids {
                if let Some(item) = row.item_mut(*item_id) {
                    item.checked_out_at = Some(*at);
                }
            }
            row.status = ReservationStatus::Active;
        }
        Event::ItemsCheckedIn { item_ids, at, completed, note, .. } => {
            for item_id in item_ids {
                if let Some(item) = row.item_mut(*item_id) {
                    item.checked_in_at = Some(*at);
                }
            }
            if *completed {
                row.status = ReservationStatus::Completed;
                row.completed_at = Some(*at);
            }
            if let Some(note) = note {
                row.notes.push(note.clone());
            }
        }
        Event::NoteAdded { note, .. } => {
            row.notes.push(note.clone());
        }
        Event::PaymentCaptured { transaction_id, .. } => {
            row.gateway_transaction_id = Some(transaction_id.clone());
        }
        Event::PaymentVoided { .. } => {
            row.payment_voided = true;
        }
        // Creation and non-reservation events are handled at the map level.
        Event::UnitRegistered { .. }
        | Event::UnitActiveSet { .. }
        | Event::CustomerUpserted { .. }
        | Event::ReservationOpened { .. }
        | Event::WaiverRecorded { .. } => {}
    }
}

/// Extract the reservation id from a reservation-scoped event.
fn event_reservation_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ReservationPaid { id, .. }
        | Event::ReservationCancelled { id, .. }
        | Event::ReservationCompleted { id, .. }
        | Event::ReservationExtended { id, .. }
        | Event::PaymentCaptured { id, .. }
        | Event::PaymentVoided { id, .. } => Some(*id),
        Event::ItemsCheckedOut { reservation_id, .. }
        | Event::ItemsCheckedIn { reservation_id, .. }
        | Event::NoteAdded { reservation_id, .. } => Some(*reservation_id),
        Event::UnitRegistered { .. }
        | Event::UnitActiveSet { .. }
        | Event::CustomerUpserted { .. }
        | Event::ReservationOpened { .. }
        | Event::WaiverRecorded { .. } => None,
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        gateway: Arc<dyn PaymentGateway>,
        config: ShopConfig,
    ) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            units: DashMap::new(),
            reservations: DashMap::new(),
            customers: DashMap::new(),
            customer_by_email: DashMap::new(),
            by_reference: DashMap::new(),
            by_token: DashMap::new(),
            waivers: DashMap::new(),
            waivers_by_customer: DashMap::new(),
            wal_tx,
            gateway,
            config,
            customer_upsert: Mutex::new(()),
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context.
        for event in &events {
            match event {
                Event::UnitRegistered { unit } => {
                    engine
                        .units
                        .insert(unit.id, Arc::new(RwLock::new(UnitState::new(unit.clone()))));
                }
                Event::UnitActiveSet { id, active } => {
                    if let Some(entry) = engine.units.get(id) {
                        let us = entry.clone();
                        us.try_write().expect("replay: uncontended write").unit.active = *active;
                    }
                }
                Event::CustomerUpserted { customer } => {
                    engine
                        .customer_by_email
                        .insert(customer.email.clone(), customer.id);
                    engine.customers.insert(customer.id, customer.clone());
                }
                Event::ReservationOpened { reservation } => {
                    engine
                        .by_reference
                        .insert(reservation.reference.clone(), reservation.id);
                    engine.by_token.insert(reservation.token, reservation.id);
                    if !reservation.status.is_terminal() {
                        for item in &reservation.items {
                            if let Some(entry) = engine.units.get(&item.unit_id) {
                                let us = entry.clone();
                                us.try_write()
                                    .expect("replay: uncontended write")
                                    .insert_claim(Claim {
                                        reservation_id: reservation.id,
                                        item_id: item.id,
                                        range: reservation.range,
                                    });
                            }
                        }
                    }
                    engine
                        .reservations
                        .insert(reservation.id, Arc::new(RwLock::new(reservation.clone())));
                }
                Event::WaiverRecorded { waiver } => {
                    engine
                        .waivers_by_customer
                        .entry(waiver.customer_id)
                        .or_default()
                        .push(waiver.id);
                    engine.waivers.insert(waiver.id, waiver.clone());
                }
                other => {
                    let Some(reservation_id) = event_reservation_id(other) else {
                        continue;
                    };
                    let Some(entry) = engine.reservations.get(&reservation_id) else {
                        continue;
                    };
                    let row_arc = entry.clone();
                    drop(entry);
                    let mut row = row_arc.try_write().expect("replay: uncontended write");
                    apply_to_reservation(&mut row, other);

                    // Schedule side of claim-affecting transitions.
                    match other {
                        Event::ReservationCancelled { .. }
                        | Event::ReservationCompleted { .. } => {
                            engine.replay_release_claims(&row);
                        }
                        Event::ItemsCheckedIn { completed: true, .. } => {
                            engine.replay_release_claims(&row);
                        }
                        Event::ReservationExtended { new_end, .. } => {
                            for unit_id in row.unit_ids() {
                                if let Some(entry) = engine.units.get(&unit_id) {
                                    let us = entry.clone();
                                    us.try_write()
                                        .expect("replay: uncontended write")
                                        .move_claim_end_of(reservation_id, *new_end);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        Ok(engine)
    }

    fn replay_release_claims(&self, row: &Reservation) {
        for unit_id in row.unit_ids() {
            if let Some(entry) = self.units.get(&unit_id) {
                let us = entry.clone();
                us.try_write()
                    .expect("replay: uncontended write")
                    .release_claims_of(row.id);
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply to the row in one call. The caller holds the
    /// row's write lock; schedule updates stay with the caller.
    pub(super) async fn persist_to_row(
        &self,
        row: &mut Reservation,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_reservation(row, event);
        Ok(())
    }

    pub(super) fn unit_state(&self, id: &Ulid) -> Option<SharedUnitState> {
        self.units.get(id).map(|e| e.value().clone())
    }

    /// Write-lock every unit this reservation claims, in sorted id order.
    /// Callers hold the row lock first; that ordering is the same on every
    /// path, so the pair can never deadlock.
    pub(super) async fn lock_units_of(
        &self,
        row: &Reservation,
    ) -> Vec<tokio::sync::OwnedRwLockWriteGuard<UnitState>> {
        let mut unit_ids = row.unit_ids();
        unit_ids.sort();
        unit_ids.dedup();
        let mut guards = Vec::with_capacity(unit_ids.len());
        for uid in &unit_ids {
            if let Some(us) = self.unit_state(uid) {
                guards.push(us.write_owned().await);
            }
        }
        guards
    }

    pub(super) fn reservation_state(&self, id: &Ulid) -> Option<SharedReservation> {
        self.reservations.get(id).map(|e| e.value().clone())
    }

    pub fn config(&self) -> &ShopConfig {
        &self.config
    }
}
