//! Payment gateway seam. The engine only ever talks to this trait; real
//! processor integrations live in the host. Calls are time-bounded by the
//! engine, so implementations may block on the network.

use async_trait::async_trait;
use ulid::Ulid;

/// Errors surfaced by a gateway implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The processor rejected the charge (declined card, dead token).
    Declined(String),
    /// The processor reports this transaction as already voided. The engine
    /// treats this as success: void is idempotent.
    AlreadyVoided,
    /// Transport failure or processor 5xx; safe to retry.
    Unavailable(String),
    /// Client-side deadline elapsed before the processor answered.
    Timeout,
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Declined(msg) => write!(f, "declined: {msg}"),
            GatewayError::AlreadyVoided => write!(f, "transaction already voided"),
            GatewayError::Unavailable(msg) => write!(f, "gateway unavailable: {msg}"),
            GatewayError::Timeout => write!(f, "gateway timed out"),
        }
    }
}

impl std::error::Error for GatewayError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReceipt {
    pub transaction_id: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charge a tokenized payment method. Implementations should treat the
    /// token as an idempotency key so a retried capture cannot double-charge.
    async fn capture(&self, token: &str, amount_cents: i64) -> Result<CaptureReceipt, GatewayError>;

    /// Release a captured charge. Voiding a transaction the processor has
    /// already voided reports [`GatewayError::AlreadyVoided`].
    async fn void(&self, transaction_id: &str) -> Result<(), GatewayError>;
}

/// Gateway stand-in that approves everything. For demos and benches; tests
/// that care about failure paths bring their own mock.
pub struct NullGateway;

#[async_trait]
impl PaymentGateway for NullGateway {
    async fn capture(
        &self,
        _token: &str,
        _amount_cents: i64,
    ) -> Result<CaptureReceipt, GatewayError> {
        Ok(CaptureReceipt {
            transaction_id: format!("null-{}", Ulid::new()),
        })
    }

    async fn void(&self, _transaction_id: &str) -> Result<(), GatewayError> {
        Ok(())
    }
}
