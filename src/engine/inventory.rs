//! Seat inventory transitions for a single show.
//!
//! Every operation here is pure: it checks the current state and returns the
//! event that would perform the transition, or the reason it can't. `apply`
//! is the only thing that mutates. Callers hold the show's write lock across
//! check, log append and apply.

use ulid::Ulid;

use crate::model::*;

use super::EngineError;

impl ShowInventory {
    /// Verify every requested seat is FREE and build the hold that claims them.
    /// Fails with all taken labels; nothing is claimed on failure.
    pub fn check_and_reserve(
        &self,
        hold_id: Ulid,
        user_id: &str,
        seats: &[String],
        now: Ms,
        ttl: Ms,
    ) -> Result<Event, EngineError> {
        let taken: Vec<String> = seats
            .iter()
            .filter(|label| !self.seats.get(*label).is_some_and(SeatState::is_free))
            .cloned()
            .collect();
        if !taken.is_empty() {
            return Err(EngineError::SeatUnavailable(taken));
        }
        Ok(Event::HoldPlaced {
            id: hold_id,
            show_id: self.id,
            user_id: user_id.to_string(),
            seats: seats.to_vec(),
            amount: self.seat_price.saturating_mul(seats.len() as u64),
            created_at: now,
            expires_at: now.saturating_add(ttl),
        })
    }

    fn hold_in(&self, id: Ulid, wanted: HoldStatus) -> Result<&Hold, EngineError> {
        let hold = self.holds.get(&id).ok_or(EngineError::HoldNotFound(id))?;
        if hold.status != wanted {
            return Err(EngineError::AlreadyFinal(id));
        }
        Ok(hold)
    }

    /// Give an ACTIVE hold's seats back.
    pub fn release(&self, id: Ulid, now: Ms) -> Result<Event, EngineError> {
        self.hold_in(id, HoldStatus::Active)?;
        Ok(Event::HoldReleased { id, show_id: self.id, at: now })
    }

    /// Like `release`, but the hold ends EXPIRED.
    pub fn expire(&self, id: Ulid, now: Ms) -> Result<Event, EngineError> {
        self.hold_in(id, HoldStatus::Active)?;
        Ok(Event::HoldExpired { id, show_id: self.id, at: now })
    }

    /// Make an ACTIVE hold's seats permanent. Expiry is judged at the moment
    /// the confirmation started, if one is in flight, else at `now`.
    pub fn confirm(&self, id: Ulid, transaction_id: String, now: Ms) -> Result<Event, EngineError> {
        let hold = self.hold_in(id, HoldStatus::Active)?;
        if hold.is_expired_at(hold.confirm_started_at.unwrap_or(now)) {
            return Err(EngineError::HoldExpired(id));
        }
        Ok(Event::HoldConfirmed { id, show_id: self.id, transaction_id, at: now })
    }

    /// Compensating cancellation of a CONFIRMED booking.
    pub fn cancel(&self, id: Ulid, now: Ms) -> Result<Event, EngineError> {
        self.hold_in(id, HoldStatus::Confirmed)?;
        Ok(Event::BookingCancelled { id, show_id: self.id, at: now })
    }

    /// ACTIVE holds past their expiry. A hold whose payment is in flight gets
    /// `payment_grace` extra from when the payment started.
    pub fn expired_holds(&self, now: Ms, payment_grace: Ms) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self
            .holds
            .values()
            .filter(|h| h.status == HoldStatus::Active && h.is_expired_at(now))
            .filter(|h| {
                h.confirm_started_at
                    .is_none_or(|started| now > started.saturating_add(payment_grace))
            })
            .map(|h| h.id)
            .collect();
        ids.sort();
        ids
    }

    fn set_seats(&mut self, labels: &[String], state: SeatState) {
        for label in labels {
            if let Some(seat) = self.seats.get_mut(label) {
                *seat = state;
            }
        }
    }

    /// Remove a live hold and free its seats.
    fn retire(&mut self, id: Ulid, status: HoldStatus, at: Ms) -> Option<Hold> {
        let mut hold = self.holds.remove(&id)?;
        self.set_seats(&hold.seats, SeatState::Free);
        self.available_seats = self
            .available_seats
            .saturating_add(hold.seats.len() as u32)
            .min(self.total_seats);
        hold.status = status;
        hold.updated_at = at;
        hold.confirm_started_at = None;
        Some(hold)
    }

    /// Install a live hold and claim its seats.
    fn install(&mut self, hold: Hold) -> Hold {
        let state = match hold.status {
            HoldStatus::Confirmed => SeatState::Booked(hold.id),
            _ => SeatState::Held(hold.id),
        };
        self.set_seats(&hold.seats, state);
        self.available_seats = self.available_seats.saturating_sub(hold.seats.len() as u32);
        self.holds.insert(hold.id, hold.clone());
        hold
    }

    /// Apply an event to this show. Returns the hold's new snapshot when the
    /// event touched a hold.
    pub fn apply(&mut self, event: &Event) -> Option<Hold> {
        match event {
            Event::HoldPlaced {
                id,
                show_id,
                user_id,
                seats,
                amount,
                created_at,
                expires_at,
            } => Some(self.install(Hold {
                id: *id,
                show_id: *show_id,
                user_id: user_id.clone(),
                seats: seats.clone(),
                amount: *amount,
                created_at: *created_at,
                expires_at: *expires_at,
                updated_at: *created_at,
                status: HoldStatus::Active,
                transaction_id: None,
                refund_failure: None,
                confirm_started_at: None,
            })),
            Event::HoldConfirmed { id, transaction_id, at, .. } => {
                let hold = self.holds.get_mut(id)?;
                hold.status = HoldStatus::Confirmed;
                hold.transaction_id = Some(transaction_id.clone());
                hold.updated_at = *at;
                hold.confirm_started_at = None;
                let hold = hold.clone();
                self.set_seats(&hold.seats, SeatState::Booked(hold.id));
                Some(hold)
            }
            Event::HoldReleased { id, at, .. } => self.retire(*id, HoldStatus::Released, *at),
            Event::HoldExpired { id, at, .. } => self.retire(*id, HoldStatus::Expired, *at),
            Event::BookingCancelled { id, at, .. } => self.retire(*id, HoldStatus::Cancelled, *at),
            Event::HoldRestored { hold } if hold.status.is_live() => Some(self.install(hold.clone())),
            Event::HoldRestored { hold } => Some(hold.clone()),
            Event::ShowCreated { .. } | Event::ShowDeleted { .. } | Event::RefundFailed { .. } => None,
        }
    }

    /// Check the inventory's internal consistency.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.total_seats as usize != self.seats.len() {
            return Err(format!(
                "total_seats {} but {} seats",
                self.total_seats,
                self.seats.len()
            ));
        }
        let free = self.free_count();
        if self.available_seats != free {
            return Err(format!(
                "available_seats {} but {free} seats are free",
                self.available_seats
            ));
        }
        for (label, state) in &self.seats {
            let Some(owner) = state.owner() else { continue };
            let Some(hold) = self.holds.get(&owner) else {
                return Err(format!("seat {label} owned by unknown hold {owner}"));
            };
            let consistent = matches!(
                (state, hold.status),
                (SeatState::Held(_), HoldStatus::Active) | (SeatState::Booked(_), HoldStatus::Confirmed)
            );
            if !consistent || !hold.seats.contains(label) {
                return Err(format!("seat {label} state {state:?} disagrees with hold {owner}"));
            }
        }
        for hold in self.holds.values() {
            for label in &hold.seats {
                if self.seats.get(label).and_then(SeatState::owner) != Some(hold.id) {
                    return Err(format!("hold {} does not own seat {label}", hold.id));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TTL: Ms = 2_000;

    fn labels(ls: &[&str]) -> Vec<String> {
        ls.iter().map(|s| s.to_string()).collect()
    }

    fn show(ls: &[&str]) -> ShowInventory {
        ShowInventory::new(Ulid::new(), None, &labels(ls), 500)
    }

    fn reserve(inv: &mut ShowInventory, seats: &[&str], now: Ms) -> Result<Ulid, EngineError> {
        let id = Ulid::new();
        let event = inv.check_and_reserve(id, "u1", &labels(seats), now, TTL)?;
        inv.apply(&event);
        Ok(id)
    }

    #[test]
    fn reserve_marks_seats_held() {
        let mut inv = show(&["A1", "A2", "A3"]);
        let id = reserve(&mut inv, &["A1", "A2"], 0).unwrap();
        assert_eq!(inv.available_seats, 1);
        assert_eq!(inv.seats["A1"], SeatState::Held(id));
        assert_eq!(inv.holds[&id].amount, 1000);
        assert_eq!(inv.holds[&id].expires_at, TTL);
        inv.check_invariants().unwrap();
    }

    #[test]
    fn partial_overlap_claims_nothing() {
        let mut inv = show(&["A1", "A2", "A3"]);
        reserve(&mut inv, &["A2"], 0).unwrap();
        let err = reserve(&mut inv, &["A1", "A2", "A3"], 0).unwrap_err();
        assert_eq!(err, EngineError::SeatUnavailable(labels(&["A2"])));
        assert_eq!(inv.available_seats, 2);
        assert!(inv.seats["A1"].is_free());
        inv.check_invariants().unwrap();
    }

    #[test]
    fn release_is_active_only() {
        let mut inv = show(&["A1"]);
        let id = reserve(&mut inv, &["A1"], 0).unwrap();
        let ev = inv.release(id, 10).unwrap();
        let snapshot = inv.apply(&ev).unwrap();
        assert_eq!(snapshot.status, HoldStatus::Released);
        assert_eq!(inv.available_seats, 1);
        assert_eq!(inv.release(id, 20), Err(EngineError::HoldNotFound(id)));
    }

    #[test]
    fn confirm_after_expiry_fails() {
        let mut inv = show(&["A1"]);
        let id = reserve(&mut inv, &["A1"], 0).unwrap();
        assert_eq!(
            inv.confirm(id, "t".into(), TTL + 1),
            Err(EngineError::HoldExpired(id))
        );
        assert!(inv.confirm(id, "t".into(), TTL).is_ok());
    }

    #[test]
    fn confirm_honours_in_flight_start() {
        let mut inv = show(&["A1"]);
        let id = reserve(&mut inv, &["A1"], 0).unwrap();
        inv.holds.get_mut(&id).unwrap().confirm_started_at = Some(TTL - 1);
        let ev = inv.confirm(id, "txn".into(), TTL + 500).unwrap();
        let snapshot = inv.apply(&ev).unwrap();
        assert_eq!(snapshot.status, HoldStatus::Confirmed);
        assert_eq!(snapshot.confirm_started_at, None);
        assert_eq!(inv.seats["A1"], SeatState::Booked(id));
        inv.check_invariants().unwrap();
    }

    #[test]
    fn confirmed_cannot_be_released_but_can_be_cancelled() {
        let mut inv = show(&["A1", "A2"]);
        let id = reserve(&mut inv, &["A1", "A2"], 0).unwrap();
        let ev = inv.confirm(id, "txn".into(), 1).unwrap();
        inv.apply(&ev);
        assert_eq!(inv.release(id, 2), Err(EngineError::AlreadyFinal(id)));
        assert_eq!(inv.expire(id, 2), Err(EngineError::AlreadyFinal(id)));

        let ev = inv.cancel(id, 3).unwrap();
        assert_eq!(inv.apply(&ev).unwrap().status, HoldStatus::Cancelled);
        assert_eq!(inv.available_seats, 2);
        inv.check_invariants().unwrap();
    }

    #[test]
    fn active_hold_cannot_be_cancelled_as_booking() {
        let mut inv = show(&["A1"]);
        let id = reserve(&mut inv, &["A1"], 0).unwrap();
        assert_eq!(inv.cancel(id, 1), Err(EngineError::AlreadyFinal(id)));
    }

    #[test]
    fn expired_holds_respects_payment_grace() {
        let mut inv = show(&["A1", "A2"]);
        let plain = reserve(&mut inv, &["A1"], 0).unwrap();
        let paying = reserve(&mut inv, &["A2"], 0).unwrap();
        inv.holds.get_mut(&paying).unwrap().confirm_started_at = Some(TTL);

        assert!(inv.expired_holds(TTL, 100).is_empty());
        assert_eq!(inv.expired_holds(TTL + 1, 100), vec![plain]);
        let mut both = vec![plain, paying];
        both.sort();
        assert_eq!(inv.expired_holds(TTL + 101, 100), both);
    }

    #[test]
    fn restore_reinstalls_live_holds_only() {
        let mut source = show(&["A1", "A2"]);
        let live = reserve(&mut source, &["A1"], 0).unwrap();
        let gone = reserve(&mut source, &["A2"], 0).unwrap();
        let ev = source.release(gone, 1).unwrap();
        let released = source.apply(&ev).unwrap();

        let mut copy = ShowInventory::new(source.id, None, &labels(&["A1", "A2"]), 500);
        copy.apply(&Event::HoldRestored { hold: source.holds[&live].clone() });
        copy.apply(&Event::HoldRestored { hold: released });
        assert_eq!(copy.available_seats, 1);
        assert_eq!(copy.seats["A1"], SeatState::Held(live));
        assert!(copy.seats["A2"].is_free());
        copy.check_invariants().unwrap();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Reserve(Vec<usize>),
        Release(usize),
        Expire(usize),
        Confirm(usize),
        Cancel(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            prop::collection::vec(0usize..8, 1..4).prop_map(Op::Reserve),
            (0usize..16).prop_map(Op::Release),
            (0usize..16).prop_map(Op::Expire),
            (0usize..16).prop_map(Op::Confirm),
            (0usize..16).prop_map(Op::Cancel),
        ]
    }

    fn pick(ids: &[Ulid], i: usize) -> Option<Ulid> {
        if ids.is_empty() { None } else { Some(ids[i % ids.len()]) }
    }

    proptest! {
        #[test]
        fn available_always_matches_free_seats(ops in prop::collection::vec(op(), 1..60)) {
            let all: Vec<String> = (0..8).map(|i| format!("R{i}")).collect();
            let mut inv = ShowInventory::new(Ulid::new(), None, &all, 100);
            let mut ids: Vec<Ulid> = Vec::new();
            for (step, op) in ops.into_iter().enumerate() {
                let now = step as Ms;
                let event = match op {
                    Op::Reserve(idx) => {
                        let mut seats: Vec<String> = idx.iter().map(|i| all[*i].clone()).collect();
                        seats.sort();
                        seats.dedup();
                        let id = Ulid::new();
                        let ev = inv.check_and_reserve(id, "p", &seats, now, 1_000).ok();
                        if ev.is_some() {
                            ids.push(id);
                        }
                        ev
                    }
                    Op::Release(i) => pick(&ids, i).and_then(|id| inv.release(id, now).ok()),
                    Op::Expire(i) => pick(&ids, i).and_then(|id| inv.expire(id, now).ok()),
                    Op::Confirm(i) => pick(&ids, i).and_then(|id| inv.confirm(id, "t".into(), now).ok()),
                    Op::Cancel(i) => pick(&ids, i).and_then(|id| inv.cancel(id, now).ok()),
                };
                if let Some(ev) = event {
                    inv.apply(&ev);
                }
                prop_assert_eq!(inv.available_seats, inv.free_count());
                prop_assert!(inv.check_invariants().is_ok(), "{:?}", inv.check_invariants());
            }
        }
    }
}
