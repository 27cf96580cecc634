use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// What the caller hands over to pay for a hold. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub token: String,
}

impl PaymentDetails {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    Declined(String),
    Timeout,
    RefundFailed(String),
}

impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentError::Declined(reason) => write!(f, "payment declined: {reason}"),
            PaymentError::Timeout => write!(f, "payment timed out"),
            PaymentError::RefundFailed(reason) => write!(f, "refund failed: {reason}"),
        }
    }
}

impl std::error::Error for PaymentError {}

/// The payment side of the two-phase booking commit.
#[async_trait]
pub trait PaymentCoordinator: Send + Sync {
    /// Charge `amount` (minor units). Returns the gateway transaction id.
    async fn authorize_and_capture(
        &self,
        amount: u64,
        details: &PaymentDetails,
    ) -> Result<String, PaymentError>;

    /// Return a previously captured charge.
    async fn refund(&self, transaction_id: &str) -> Result<(), PaymentError>;
}

/// Scripted outcome for the next capture or refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Approve,
    Decline(String),
    Timeout,
    /// Succeed after sleeping.
    Delay(Duration),
    /// Never answer; the engine's payment timeout fires.
    Hang,
}

/// In-process gateway. Approves everything unless outcomes are queued.
#[derive(Default)]
pub struct SimulatedGateway {
    captures: Mutex<VecDeque<Outcome>>,
    refunds: Mutex<VecDeque<Outcome>>,
    captured: Mutex<Vec<(String, u64)>>,
    refunded: Mutex<Vec<String>>,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_capture(&self, outcome: Outcome) {
        lock(&self.captures).push_back(outcome);
    }

    pub fn queue_refund(&self, outcome: Outcome) {
        lock(&self.refunds).push_back(outcome);
    }

    /// `(transaction_id, amount)` of every successful capture.
    pub fn captured(&self) -> Vec<(String, u64)> {
        lock(&self.captured).clone()
    }

    /// Transaction ids refunded so far.
    pub fn refunded(&self) -> Vec<String> {
        lock(&self.refunded).clone()
    }

    async fn play(outcome: Outcome) -> Result<(), PaymentError> {
        match outcome {
            Outcome::Approve => Ok(()),
            Outcome::Decline(reason) => Err(PaymentError::Declined(reason)),
            Outcome::Timeout => Err(PaymentError::Timeout),
            Outcome::Delay(d) => {
                tokio::time::sleep(d).await;
                Ok(())
            }
            Outcome::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

/// Gateway bookkeeping never panics while held, so a poisoned lock still has
/// consistent contents.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl PaymentCoordinator for SimulatedGateway {
    async fn authorize_and_capture(
        &self,
        amount: u64,
        _details: &PaymentDetails,
    ) -> Result<String, PaymentError> {
        let outcome = lock(&self.captures).pop_front().unwrap_or(Outcome::Approve);
        Self::play(outcome).await?;
        let transaction_id = format!("txn_{}", Ulid::new());
        lock(&self.captured).push((transaction_id.clone(), amount));
        Ok(transaction_id)
    }

    async fn refund(&self, transaction_id: &str) -> Result<(), PaymentError> {
        let outcome = lock(&self.refunds).pop_front().unwrap_or(Outcome::Approve);
        match Self::play(outcome).await {
            Ok(()) => {
                lock(&self.refunded).push(transaction_id.to_string());
                Ok(())
            }
            Err(PaymentError::Declined(reason)) => Err(PaymentError::RefundFailed(reason)),
            Err(PaymentError::Timeout) => {
                Err(PaymentError::RefundFailed("gateway timed out".into()))
            }
            Err(e) => Err(e),
        }
    }
}
