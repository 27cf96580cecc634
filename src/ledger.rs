use dashmap::DashMap;
use ulid::Ulid;

use crate::model::{Booking, Hold, HoldStatus};

/// Record of every hold and booking, keyed by booking id (== hold id).
///
/// Written only by the engine, after the log append succeeded and while the
/// owning show's lock is still held. Read paths go straight here without
/// touching show locks.
#[derive(Default)]
pub struct Ledger {
    entries: DashMap<Ulid, Hold>,
    by_user: DashMap<String, Vec<Ulid>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `hold.id`.
    pub fn record(&self, hold: &Hold) {
        let mut snapshot = hold.clone();
        snapshot.confirm_started_at = None;
        if self.entries.insert(hold.id, snapshot).is_none() {
            self.by_user
                .entry(hold.user_id.clone())
                .or_default()
                .push(hold.id);
        }
    }

    pub fn note_refund_failure(&self, id: &Ulid, reason: &str) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.refund_failure = Some(reason.to_string());
        }
    }

    pub fn get(&self, id: &Ulid) -> Option<Hold> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    pub fn status(&self, id: &Ulid) -> Option<HoldStatus> {
        self.entries.get(id).map(|e| e.status)
    }

    pub fn show_of(&self, id: &Ulid) -> Option<Ulid> {
        self.entries.get(id).map(|e| e.show_id)
    }

    /// Bookings for a user, oldest first.
    pub fn bookings_for_user(&self, user_id: &str) -> Vec<Booking> {
        let Some(ids) = self.by_user.get(user_id).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.entries.get(id).map(|e| Booking::from(e.value())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every entry, ordered by id (creation order).
    pub fn snapshot(&self) -> Vec<Hold> {
        let mut all: Vec<Hold> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|h| h.id);
        all
    }
}
