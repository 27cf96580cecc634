use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot;
use ulid::Ulid;

use crate::catalog::Catalog;
use crate::limits::*;
use crate::model::*;
use crate::observability::*;
use crate::payment::{PaymentDetails, PaymentError};

use super::validate::{validate_seat_request, validate_show_spec, validate_user};
use super::{Engine, EngineError, ShowHandle, WalCommand, now_ms};

/// Result of cancelling a booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancellation {
    pub booking: Booking,
    pub refund: RefundOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    /// The hold was never paid for.
    NotRequired,
    Refunded,
    /// The booking is cancelled and its seats are free, but the money was
    /// not returned. Needs manual follow-up.
    Failed(String),
}

fn transition(outcome: &'static str) {
    metrics::counter!(BOOKING_TRANSITIONS_TOTAL, "outcome" => outcome).increment(1);
}

/// Bookkeeping for a hold that just stopped being ACTIVE.
fn left_active(outcome: &'static str) {
    metrics::gauge!(HOLDS_ACTIVE).decrement(1.0);
    transition(outcome);
}

impl Engine {
    pub async fn create_show(&self, spec: ShowSpec) -> Result<(), EngineError> {
        validate_show_spec(&spec)?;
        let _lifecycle = self.show_lifecycle.lock().await;
        if self.shows.len() >= MAX_SHOWS {
            return Err(EngineError::LimitExceeded("too many shows"));
        }
        if self.shows.contains_key(&spec.id) {
            return Err(EngineError::AlreadyExists(spec.id));
        }

        let event = Event::ShowCreated {
            id: spec.id,
            title: spec.title.clone(),
            seat_labels: spec.seat_labels.clone(),
            seat_price: spec.seat_price,
        };
        let id = spec.id;
        {
            let _gate = self.commit_gate.read().await;
            self.wal_append(&event).await?;
            self.shows.insert(id, ShowHandle::new(spec));
        }
        self.notify.send(id, &event);
        metrics::gauge!(SHOWS_ACTIVE).set(self.shows.len() as f64);
        tracing::info!("show {id} created");
        Ok(())
    }

    /// Create every catalog show the engine does not know yet. Shows already
    /// restored from the log keep their recorded layout.
    pub async fn load_catalog(&self, catalog: &dyn Catalog) -> Result<usize, EngineError> {
        let mut created = 0;
        for spec in catalog.shows() {
            if self.shows.contains_key(&spec.id) {
                continue;
            }
            self.create_show(spec).await?;
            created += 1;
        }
        Ok(created)
    }

    /// Remove a show that has no live holds or bookings. Its finished
    /// bookings stay in the ledger.
    pub async fn delete_show(&self, id: Ulid) -> Result<(), EngineError> {
        let _lifecycle = self.show_lifecycle.lock().await;
        let handle = self.get_show(&id).ok_or(EngineError::ShowNotFound(id))?;
        let mut guard = handle.state.write().await;
        if guard.has_live_holds() {
            return Err(EngineError::ShowHasBookings(id));
        }

        let event = Event::ShowDeleted { id };
        {
            let _gate = self.commit_gate.read().await;
            self.wal_append(&event).await?;
            guard.deleted = true;
            self.shows.remove(&id);
        }
        drop(guard);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        metrics::gauge!(SHOWS_ACTIVE).set(self.shows.len() as f64);
        tracing::info!("show {id} deleted");
        Ok(())
    }

    pub async fn request_booking(
        &self,
        show_id: Ulid,
        user_id: &str,
        seats: &[String],
    ) -> Result<Hold, EngineError> {
        self.request_booking_at(show_id, user_id, seats, now_ms()).await
    }

    /// Atomically hold every requested seat for `user_id`, or none of them.
    pub async fn request_booking_at(
        &self,
        show_id: Ulid,
        user_id: &str,
        seats: &[String],
        now: Ms,
    ) -> Result<Hold, EngineError> {
        validate_user(user_id)?;
        let handle = self
            .get_show(&show_id)
            .ok_or(EngineError::ShowNotFound(show_id))?;
        let seats = validate_seat_request(&handle.seat_labels, seats)?;

        let mut guard = handle.state.write().await;
        if guard.deleted {
            return Err(EngineError::ShowNotFound(show_id));
        }
        let hold_id = Ulid::new();
        let event = match guard.check_and_reserve(hold_id, user_id, &seats, now, self.config.hold_ttl_ms) {
            Ok(event) => event,
            Err(e) => {
                metrics::counter!(SEAT_CONFLICTS_TOTAL).increment(1);
                tracing::debug!("show {show_id}: {e}");
                return Err(e);
            }
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let hold = guard
            .holds
            .get(&hold_id)
            .cloned()
            .ok_or(EngineError::HoldNotFound(hold_id))?;
        drop(guard);

        metrics::gauge!(HOLDS_ACTIVE).increment(1.0);
        transition("held");
        tracing::info!(
            "hold {hold_id} placed on show {show_id} for {user_id}: {}",
            hold.seats.join(",")
        );
        Ok(hold)
    }

    pub async fn confirm_booking(
        &self,
        hold_id: Ulid,
        details: &PaymentDetails,
    ) -> Result<Booking, EngineError> {
        self.confirm_booking_at(hold_id, details, now_ms()).await
    }

    /// Pay for an ACTIVE hold and make its seats permanent.
    ///
    /// The show lock is held only around the state checks, never across the
    /// payment call. While the payment runs the hold carries an in-flight
    /// marker: a second confirm or a cancel gets `ConfirmInProgress`, and the
    /// sweeper leaves the hold alone until the payment timeout has passed.
    /// If payment fails or times out the hold is released.
    pub async fn confirm_booking_at(
        &self,
        hold_id: Ulid,
        details: &PaymentDetails,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        let amount = {
            let mut guard = self.resolve_hold_write(&hold_id).await?;
            let Some(hold) = guard.holds.get(&hold_id) else {
                return Err(self.terminal_error(hold_id));
            };
            if hold.status != HoldStatus::Active {
                return Err(EngineError::AlreadyFinal(hold_id));
            }
            if hold.confirm_started_at.is_some() {
                return Err(EngineError::ConfirmInProgress(hold_id));
            }
            if hold.is_expired_at(now) {
                let event = guard.expire(hold_id, now)?;
                self.persist_and_apply(&mut guard, &event).await?;
                metrics::counter!(HOLDS_EXPIRED_TOTAL).increment(1);
                left_active("expired");
                return Err(EngineError::HoldExpired(hold_id));
            }
            let amount = hold.amount;
            if let Some(hold) = guard.holds.get_mut(&hold_id) {
                hold.confirm_started_at = Some(now);
            }
            amount
        };

        let started = Instant::now();
        let payment = match tokio::time::timeout(
            self.config.payment_timeout,
            self.payments.authorize_and_capture(amount, details),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PaymentError::Timeout),
        };
        let outcome = match &payment {
            Ok(_) => "approved",
            Err(PaymentError::Timeout) => "timeout",
            Err(_) => "declined",
        };
        metrics::histogram!(PAYMENT_DURATION_SECONDS, "outcome" => outcome)
            .record(started.elapsed().as_secs_f64());

        let at = now_ms().max(now);
        let mut guard = match self.resolve_hold_write(&hold_id).await {
            Ok(guard) => guard,
            Err(e) => {
                if let Ok(transaction_id) = &payment {
                    self.refund_or_log(hold_id, transaction_id).await;
                }
                return Err(e);
            }
        };

        let transaction_id = match payment {
            Ok(transaction_id) => transaction_id,
            Err(e) => {
                if guard
                    .holds
                    .get(&hold_id)
                    .is_some_and(|h| h.status == HoldStatus::Active)
                {
                    let event = guard.release(hold_id, at)?;
                    match self.persist_and_apply(&mut guard, &event).await {
                        Ok(()) => left_active("payment_failed"),
                        Err(log_err) => {
                            if let Some(hold) = guard.holds.get_mut(&hold_id) {
                                hold.confirm_started_at = None;
                            }
                            tracing::error!("hold {hold_id}: release after failed payment: {log_err}");
                        }
                    }
                }
                tracing::info!("hold {hold_id}: {e}");
                return Err(match e {
                    PaymentError::Timeout => EngineError::PaymentTimeout,
                    PaymentError::Declined(reason) | PaymentError::RefundFailed(reason) => {
                        EngineError::PaymentDeclined(reason)
                    }
                });
            }
        };

        // The hold may have been swept or released while we were paying.
        let committed = if guard.holds.contains_key(&hold_id) {
            match guard.confirm(hold_id, transaction_id.clone(), at) {
                Ok(event) => self.persist_and_apply(&mut guard, &event).await,
                Err(e) => Err(e),
            }
        } else {
            Err(self.terminal_error(hold_id))
        };
        if let Err(e) = committed {
            if let Some(hold) = guard.holds.get_mut(&hold_id) {
                hold.confirm_started_at = None;
            }
            drop(guard);
            tracing::warn!("hold {hold_id}: captured {transaction_id} but could not commit: {e}");
            self.refund_or_log(hold_id, &transaction_id).await;
            return Err(e);
        }

        let booking = guard
            .holds
            .get(&hold_id)
            .map(Booking::from)
            .ok_or(EngineError::HoldNotFound(hold_id))?;
        drop(guard);
        left_active("confirmed");
        tracing::info!("booking {hold_id} confirmed, transaction {transaction_id}");
        Ok(booking)
    }

    async fn refund(&self, transaction_id: &str) -> Result<(), PaymentError> {
        match tokio::time::timeout(self.config.payment_timeout, self.payments.refund(transaction_id)).await {
            Ok(result) => result,
            Err(_) => Err(PaymentError::RefundFailed("refund timed out".into())),
        }
    }

    /// Return a charge that never turned into a booking.
    async fn refund_or_log(&self, hold_id: Ulid, transaction_id: &str) {
        if let Err(e) = self.refund(transaction_id).await {
            metrics::counter!(REFUND_FAILURES_TOTAL).increment(1);
            tracing::error!("hold {hold_id}: refund of {transaction_id} failed: {e}");
        }
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Cancellation, EngineError> {
        self.cancel_booking_at(id, now_ms()).await
    }

    /// Cancel a hold or a confirmed booking. An ACTIVE hold is simply
    /// released. A CONFIRMED booking frees its seats first, then refunds; a
    /// failed refund does not undo the cancellation.
    pub async fn cancel_booking_at(&self, id: Ulid, now: Ms) -> Result<Cancellation, EngineError> {
        let mut guard = self.resolve_hold_write(&id).await?;
        let Some(hold) = guard.holds.get(&id) else {
            return Err(match self.ledger.status(&id) {
                Some(_) => EngineError::AlreadyFinal(id),
                None => EngineError::HoldNotFound(id),
            });
        };
        let status = hold.status;
        let in_flight = hold.confirm_started_at.is_some();
        let transaction_id = hold.transaction_id.clone();

        match status {
            HoldStatus::Active if in_flight => Err(EngineError::ConfirmInProgress(id)),
            HoldStatus::Active => {
                let event = guard.release(id, now)?;
                self.persist_and_apply(&mut guard, &event).await?;
                drop(guard);
                left_active("released");
                tracing::info!("hold {id} released");
                Ok(Cancellation {
                    booking: self.get_booking(&id)?,
                    refund: RefundOutcome::NotRequired,
                })
            }
            HoldStatus::Confirmed => {
                let event = guard.cancel(id, now)?;
                self.persist_and_apply(&mut guard, &event).await?;
                drop(guard);
                transition("cancelled");
                tracing::info!("booking {id} cancelled");

                let refund = match transaction_id {
                    None => RefundOutcome::NotRequired,
                    Some(txn) => match self.refund(&txn).await {
                        Ok(()) => RefundOutcome::Refunded,
                        Err(e) => {
                            let reason = e.to_string();
                            metrics::counter!(REFUND_FAILURES_TOTAL).increment(1);
                            tracing::error!("booking {id}: refund of {txn} failed: {reason}");
                            self.record_refund_failure(id, &reason).await;
                            RefundOutcome::Failed(reason)
                        }
                    },
                };
                Ok(Cancellation {
                    booking: self.get_booking(&id)?,
                    refund,
                })
            }
            _ => Err(EngineError::AlreadyFinal(id)),
        }
    }

    /// Persist a failed refund against a cancelled booking. Best effort: the
    /// cancellation itself is already durable.
    async fn record_refund_failure(&self, id: Ulid, reason: &str) {
        let Some(show_id) = self.ledger.show_of(&id) else { return };
        let event = Event::RefundFailed {
            id,
            show_id,
            reason: reason.to_string(),
        };
        let result = match self.get_show(&show_id) {
            Some(handle) => {
                let mut guard = handle.state.write().await;
                self.persist_and_apply(&mut guard, &event).await
            }
            None => {
                let _gate = self.commit_gate.read().await;
                self.wal_append(&event)
                    .await
                    .map(|()| self.ledger.note_refund_failure(&id, reason))
            }
        };
        if let Err(e) = result {
            tracing::error!("booking {id}: could not record refund failure: {e}");
        }
    }

    pub async fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(now_ms()).await
    }

    /// Expire every ACTIVE hold past its deadline, one show at a time.
    /// Returns how many holds were expired.
    pub async fn sweep_expired_at(&self, now: Ms) -> usize {
        let grace = self.config.payment_timeout.as_millis() as Ms;
        let handles: Vec<(Ulid, ShowHandle)> = self
            .shows
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();

        let mut expired = 0;
        for (show_id, handle) in handles {
            if handle.state.read().await.expired_holds(now, grace).is_empty() {
                continue;
            }
            let mut guard = handle.state.write().await;
            if guard.deleted {
                continue;
            }
            for hold_id in guard.expired_holds(now, grace) {
                let event = match guard.expire(hold_id, now) {
                    Ok(event) => event,
                    Err(_) => continue,
                };
                match self.persist_and_apply(&mut guard, &event).await {
                    Ok(()) => {
                        expired += 1;
                        metrics::counter!(HOLDS_EXPIRED_TOTAL).increment(1);
                        left_active("expired");
                        tracing::debug!("hold {hold_id} on show {show_id} expired");
                    }
                    Err(e) => {
                        tracing::error!("show {show_id}: failed to expire hold {hold_id}: {e}");
                        break;
                    }
                }
            }
        }
        if expired > 0 {
            tracing::info!("expired {expired} holds");
        }
        expired
    }

    /// Rewrite the log as the minimal event list that rebuilds current state:
    /// one `ShowCreated` per show, then one `HoldRestored` per ledger entry.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut specs: Vec<Arc<ShowSpec>> = self.shows.iter().map(|e| e.value().spec.clone()).collect();
        specs.sort_by_key(|s| s.id);
        let holds = self.ledger.snapshot();

        let mut events = Vec::with_capacity(specs.len() + holds.len());
        events.extend(specs.iter().map(|s| Event::ShowCreated {
            id: s.id,
            title: s.title.clone(),
            seat_labels: s.seat_labels.clone(),
            seat_price: s.seat_price,
        }));
        events.extend(holds.into_iter().map(|hold| Event::HoldRestored { hold }));
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("log writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("log writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!("ledger log compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
