use ulid::Ulid;

use crate::limits::MAX_NOTE_LEN;
use crate::model::*;
use crate::observability;

use super::conflict::now_ms;
use super::{Engine, EngineError};

impl Engine {
    /// Hand out gear. Takes any subset of the reservation's items, or the
    /// whole reservation when the list is empty; items already out are
    /// skipped, so a retried request is harmless. The first handout moves
    /// the reservation from paid to active.
    pub async fn check_out(&self, id: Ulid, item_ids: &[Ulid]) -> Result<(), EngineError> {
        let rs = self
            .reservation_state(&id)
            .ok_or(EngineError::NotFound("reservation", id))?;
        let mut row = rs.write().await;
        match row.status {
            ReservationStatus::Paid | ReservationStatus::Active => {}
            status => {
                return Err(EngineError::IllegalTransition { status, op: "check out" });
            }
        }
        let named = Self::select_items(&row, item_ids)?;

        let fresh: Vec<Ulid> = named
            .into_iter()
            .filter(|item_id| {
                row.item(*item_id)
                    .is_some_and(|i| i.checked_out_at.is_none())
            })
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }

        let event = Event::ItemsCheckedOut {
            reservation_id: id,
            item_ids: fresh.clone(),
            at: now_ms(),
        };
        self.persist_to_row(&mut row, &event).await?;

        metrics::counter!(observability::ITEMS_CHECKED_OUT_TOTAL).increment(fresh.len() as u64);
        Ok(())
    }

    /// Take gear back. An empty list means the whole reservation; items
    /// already returned or never handed out are skipped. When nothing is
    /// left out the reservation completes and its claims are released. An
    /// inspection note, if given, is committed with the check-in itself.
    pub async fn check_in(
        &self,
        id: Ulid,
        item_ids: &[Ulid],
        note: Option<String>,
    ) -> Result<(), EngineError> {
        let note = match note {
            Some(body) => {
                let body = body.trim().to_string();
                if body.is_empty() {
                    return Err(EngineError::Validation("empty note"));
                }
                if body.len() > MAX_NOTE_LEN {
                    return Err(EngineError::LimitExceeded("note too long"));
                }
                Some(body)
            }
            None => None,
        };
        let rs = self
            .reservation_state(&id)
            .ok_or(EngineError::NotFound("reservation", id))?;
        let mut row = rs.write().await;
        match row.status {
            ReservationStatus::Active => {}
            status => {
                return Err(EngineError::IllegalTransition { status, op: "check in" });
            }
        }
        let named = Self::select_items(&row, item_ids)?;

        let fresh: Vec<Ulid> = named
            .into_iter()
            .filter(|item_id| {
                row.item(*item_id)
                    .is_some_and(|i| i.checked_out_at.is_some() && i.checked_in_at.is_none())
            })
            .collect();

        let at = now_ms();
        let note = note.map(|body| Note {
            id: Ulid::new(),
            body,
            created_at: at,
        });

        if fresh.is_empty() {
            if let Some(note) = note {
                let event = Event::NoteAdded {
                    reservation_id: id,
                    note,
                };
                self.persist_to_row(&mut row, &event).await?;
            }
            return Ok(());
        }

        // Completion counts this batch as returned; items never handed
        // out do not hold the rental open.
        let completed = row.items.iter().all(|i| {
            fresh.contains(&i.id) || i.checked_out_at.is_none() || i.checked_in_at.is_some()
        });

        let mut guards = if completed {
            self.lock_units_of(&row).await
        } else {
            Vec::new()
        };

        let event = Event::ItemsCheckedIn {
            reservation_id: id,
            item_ids: fresh.clone(),
            at,
            completed,
            note,
        };
        self.persist_to_row(&mut row, &event).await?;
        for g in &mut guards {
            g.release_claims_of(id);
        }

        metrics::counter!(observability::ITEMS_CHECKED_IN_TOTAL).increment(fresh.len() as u64);
        if completed {
            metrics::counter!(observability::RESERVATIONS_COMPLETED_TOTAL).increment(1);
        }
        Ok(())
    }

    /// Resolve a fulfillment request's item list: empty means every item
    /// on the reservation, otherwise each named id must exist on the row.
    fn select_items(row: &Reservation, item_ids: &[Ulid]) -> Result<Vec<Ulid>, EngineError> {
        if item_ids.is_empty() {
            return Ok(row.items.iter().map(|i| i.id).collect());
        }
        for item_id in item_ids {
            if row.item(*item_id).is_none() {
                return Err(EngineError::NotFound("item", *item_id));
            }
        }
        let mut ids = item_ids.to_vec();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}
