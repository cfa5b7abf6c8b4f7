use std::time::{Duration, Instant};

use tokio::time::timeout;
use ulid::Ulid;

use crate::gateway::{CaptureReceipt, GatewayError};
use crate::model::*;
use crate::observability;

use super::conflict::now_ms;
use super::{Engine, EngineError};

impl Engine {
    /// Capture the stored payment token for the full rental amount.
    /// Returns the gateway transaction id. The row lock is held across
    /// the gateway call, so a concurrent capture waits here and then
    /// bails on the recorded transaction — one charge per reservation.
    pub async fn capture_payment(&self, id: Ulid) -> Result<String, EngineError> {
        let rs = self
            .reservation_state(&id)
            .ok_or(EngineError::NotFound("reservation", id))?;
        let mut row = rs.write().await;
        match row.status {
            ReservationStatus::Paid | ReservationStatus::Active => {}
            status => {
                return Err(EngineError::IllegalTransition {
                    status,
                    op: "capture payment for",
                });
            }
        }
        if row.gateway_transaction_id.is_some() {
            return Err(EngineError::AlreadyCaptured(id));
        }
        let Some(token) = row.payment_token.clone() else {
            return Err(EngineError::Validation("no payment token on reservation"));
        };

        let receipt = self.gateway_capture(&token, row.total_cents).await?;

        let event = Event::PaymentCaptured {
            id,
            transaction_id: receipt.transaction_id.clone(),
            at: now_ms(),
        };
        self.persist_to_row(&mut row, &event).await?;
        metrics::counter!(observability::PAYMENT_CAPTURES_TOTAL).increment(1);
        Ok(receipt.transaction_id)
    }

    async fn gateway_capture(
        &self,
        token: &str,
        amount_cents: i64,
    ) -> Result<CaptureReceipt, EngineError> {
        let budget = Duration::from_millis(self.config.gateway_timeout_ms);
        let start = Instant::now();
        let result = timeout(budget, self.gateway.capture(token, amount_cents)).await;
        metrics::histogram!(observability::GATEWAY_CALL_DURATION_SECONDS, "op" => "capture")
            .record(start.elapsed().as_secs_f64());
        match result {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(e)) => {
                metrics::counter!(observability::GATEWAY_FAILURES_TOTAL, "op" => "capture")
                    .increment(1);
                Err(e.into())
            }
            Err(_) => {
                metrics::counter!(observability::GATEWAY_FAILURES_TOTAL, "op" => "capture")
                    .increment(1);
                Err(EngineError::Gateway(GatewayError::Timeout))
            }
        }
    }

    /// Void a captured payment without touching the reservation's state.
    pub async fn void_payment(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self
            .reservation_state(&id)
            .ok_or(EngineError::NotFound("reservation", id))?;
        let mut row = rs.write().await;
        if row.gateway_transaction_id.is_none() {
            return Err(EngineError::Validation("no captured payment to void"));
        }
        self.void_captured_locked(&mut row).await
    }

    /// Void the capture on a row whose lock the caller already holds.
    /// No-op without a capture or when voided before; a gateway answering
    /// AlreadyVoided counts as success.
    pub(super) async fn void_captured_locked(
        &self,
        row: &mut Reservation,
    ) -> Result<(), EngineError> {
        let Some(transaction_id) = row.gateway_transaction_id.clone() else {
            return Ok(());
        };
        if row.payment_voided {
            return Ok(());
        }

        let budget = Duration::from_millis(self.config.gateway_timeout_ms);
        let start = Instant::now();
        let result = timeout(budget, self.gateway.void(&transaction_id)).await;
        metrics::histogram!(observability::GATEWAY_CALL_DURATION_SECONDS, "op" => "void")
            .record(start.elapsed().as_secs_f64());
        match result {
            Ok(Ok(())) | Ok(Err(GatewayError::AlreadyVoided)) => {}
            Ok(Err(e)) => {
                metrics::counter!(observability::GATEWAY_FAILURES_TOTAL, "op" => "void")
                    .increment(1);
                return Err(e.into());
            }
            Err(_) => {
                metrics::counter!(observability::GATEWAY_FAILURES_TOTAL, "op" => "void")
                    .increment(1);
                return Err(EngineError::Gateway(GatewayError::Timeout));
            }
        }

        let event = Event::PaymentVoided {
            id: row.id,
            at: now_ms(),
        };
        self.persist_to_row(row, &event).await?;
        metrics::counter!(observability::PAYMENT_VOIDS_TOTAL).increment(1);
        Ok(())
    }
}
