use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Occupancy of a single seat. Held and booked seats remember their owning hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeatState {
    Free,
    Held(Ulid),
    Booked(Ulid),
}

impl SeatState {
    pub fn is_free(&self) -> bool {
        matches!(self, SeatState::Free)
    }

    pub fn owner(&self) -> Option<Ulid> {
        match self {
            SeatState::Free => None,
            SeatState::Held(id) | SeatState::Booked(id) => Some(*id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldStatus {
    Active,
    Confirmed,
    Released,
    Expired,
    /// A confirmed booking that was cancelled afterwards.
    Cancelled,
}

impl HoldStatus {
    /// Statuses that still own seats.
    pub fn is_live(&self) -> bool {
        matches!(self, HoldStatus::Active | HoldStatus::Confirmed)
    }
}

/// A time-bounded claim on a set of seats. Doubles as the ledger entry:
/// the booking id is the hold id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub id: Ulid,
    pub show_id: Ulid,
    pub user_id: String,
    /// Sorted, distinct seat labels.
    pub seats: Vec<String>,
    pub amount: u64,
    pub created_at: Ms,
    pub expires_at: Ms,
    pub updated_at: Ms,
    pub status: HoldStatus,
    pub transaction_id: Option<String>,
    pub refund_failure: Option<String>,
    /// Set while a payment capture for this hold is in flight. Never persisted.
    #[serde(skip)]
    pub confirm_started_at: Option<Ms>,
}

impl Hold {
    pub fn is_expired_at(&self, now: Ms) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    /// Seats held, payment not yet completed.
    Pending,
    Confirmed,
    Cancelled,
}

impl From<HoldStatus> for BookingStatus {
    fn from(status: HoldStatus) -> Self {
        match status {
            HoldStatus::Active => BookingStatus::Pending,
            HoldStatus::Confirmed => BookingStatus::Confirmed,
            HoldStatus::Released | HoldStatus::Expired | HoldStatus::Cancelled => {
                BookingStatus::Cancelled
            }
        }
    }
}

/// User-facing view of a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: String,
    pub show_id: Ulid,
    pub seats: Vec<String>,
    pub total_amount: u64,
    pub status: BookingStatus,
    pub expires_at: Ms,
    pub transaction_id: Option<String>,
}

impl From<&Hold> for Booking {
    fn from(hold: &Hold) -> Self {
        Self {
            id: hold.id,
            user_id: hold.user_id.clone(),
            show_id: hold.show_id,
            seats: hold.seats.clone(),
            total_amount: hold.amount,
            status: hold.status.into(),
            expires_at: hold.expires_at,
            transaction_id: hold.transaction_id.clone(),
        }
    }
}

/// A show as described by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowSpec {
    pub id: Ulid,
    #[serde(default)]
    pub title: Option<String>,
    pub seat_labels: Vec<String>,
    /// Price per seat in minor currency units.
    #[serde(default)]
    pub seat_price: u64,
}

#[derive(Debug, Clone)]
pub struct ShowInventory {
    pub id: Ulid,
    pub title: Option<String>,
    pub seat_price: u64,
    pub total_seats: u32,
    pub available_seats: u32,
    pub seats: BTreeMap<String, SeatState>,
    /// Holds that currently own seats (ACTIVE or CONFIRMED). Terminal holds
    /// live only in the ledger.
    pub holds: HashMap<Ulid, Hold>,
    /// Set under the write lock when the show is deleted. Callers that
    /// cloned the handle earlier must check it after locking.
    pub deleted: bool,
}

impl ShowInventory {
    pub fn new(id: Ulid, title: Option<String>, seat_labels: &[String], seat_price: u64) -> Self {
        let seats: BTreeMap<String, SeatState> = seat_labels
            .iter()
            .map(|l| (l.clone(), SeatState::Free))
            .collect();
        let total = seats.len() as u32;
        Self {
            id,
            title,
            seat_price,
            total_seats: total,
            available_seats: total,
            seats,
            holds: HashMap::new(),
            deleted: false,
        }
    }

    pub fn free_count(&self) -> u32 {
        self.seats.values().filter(|s| s.is_free()).count() as u32
    }

    pub fn has_live_holds(&self) -> bool {
        !self.holds.is_empty()
    }
}

/// Ledger log record. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ShowCreated {
        id: Ulid,
        title: Option<String>,
        seat_labels: Vec<String>,
        seat_price: u64,
    },
    ShowDeleted {
        id: Ulid,
    },
    HoldPlaced {
        id: Ulid,
        show_id: Ulid,
        user_id: String,
        seats: Vec<String>,
        amount: u64,
        created_at: Ms,
        expires_at: Ms,
    },
    HoldConfirmed {
        id: Ulid,
        show_id: Ulid,
        transaction_id: String,
        at: Ms,
    },
    HoldReleased {
        id: Ulid,
        show_id: Ulid,
        at: Ms,
    },
    HoldExpired {
        id: Ulid,
        show_id: Ulid,
        at: Ms,
    },
    BookingCancelled {
        id: Ulid,
        show_id: Ulid,
        at: Ms,
    },
    RefundFailed {
        id: Ulid,
        show_id: Ulid,
        reason: String,
    },
    /// Compaction snapshot of one ledger entry.
    HoldRestored {
        hold: Hold,
    },
}

impl Event {
    /// The show an event belongs to.
    pub fn show_id(&self) -> Ulid {
        match self {
            Event::ShowCreated { id, .. } | Event::ShowDeleted { id } => *id,
            Event::HoldPlaced { show_id, .. }
            | Event::HoldConfirmed { show_id, .. }
            | Event::HoldReleased { show_id, .. }
            | Event::HoldExpired { show_id, .. }
            | Event::BookingCancelled { show_id, .. }
            | Event::RefundFailed { show_id, .. } => *show_id,
            Event::HoldRestored { hold } => hold.show_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShowInfo {
    pub id: Ulid,
    pub title: Option<String>,
    pub seat_price: u64,
    pub total_seats: u32,
    pub available_seats: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Free,
    Held,
    Booked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatMap {
    pub show: ShowInfo,
    pub seats: Vec<(String, SeatStatus)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(ls: &[&str]) -> Vec<String> {
        ls.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn new_inventory_is_all_free() {
        let inv = ShowInventory::new(Ulid::new(), None, &labels(&["A1", "A2", "B1"]), 1200);
        assert_eq!(inv.total_seats, 3);
        assert_eq!(inv.available_seats, 3);
        assert_eq!(inv.free_count(), 3);
        assert!(!inv.has_live_holds());
    }

    #[test]
    fn duplicate_catalog_labels_collapse() {
        let inv = ShowInventory::new(Ulid::new(), None, &labels(&["A1", "A1", "A2"]), 0);
        assert_eq!(inv.total_seats, 2);
    }

    #[test]
    fn booking_status_mirrors_hold() {
        assert_eq!(BookingStatus::from(HoldStatus::Active), BookingStatus::Pending);
        assert_eq!(BookingStatus::from(HoldStatus::Confirmed), BookingStatus::Confirmed);
        assert_eq!(BookingStatus::from(HoldStatus::Released), BookingStatus::Cancelled);
        assert_eq!(BookingStatus::from(HoldStatus::Expired), BookingStatus::Cancelled);
        assert_eq!(BookingStatus::from(HoldStatus::Cancelled), BookingStatus::Cancelled);
    }

    #[test]
    fn seat_state_owner() {
        let id = Ulid::new();
        assert_eq!(SeatState::Free.owner(), None);
        assert_eq!(SeatState::Held(id).owner(), Some(id));
        assert_eq!(SeatState::Booked(id).owner(), Some(id));
    }

    #[test]
    fn hold_expiry_is_strict() {
        let hold = Hold {
            id: Ulid::new(),
            show_id: Ulid::new(),
            user_id: "u".into(),
            seats: labels(&["A1"]),
            amount: 0,
            created_at: 0,
            expires_at: 1000,
            updated_at: 0,
            status: HoldStatus::Active,
            transaction_id: None,
            refund_failure: None,
            confirm_started_at: None,
        };
        assert!(!hold.is_expired_at(1000));
        assert!(hold.is_expired_at(1001));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::HoldPlaced {
            id: Ulid::new(),
            show_id: Ulid::new(),
            user_id: "alice".into(),
            seats: labels(&["A1", "A2"]),
            amount: 2400,
            created_at: 10,
            expires_at: 600_010,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
