use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

fn show_info(show: &ShowInventory) -> ShowInfo {
    ShowInfo {
        id: show.id,
        title: show.title.clone(),
        seat_price: show.seat_price,
        total_seats: show.total_seats,
        available_seats: show.available_seats,
    }
}

impl Engine {
    /// Current state of a booking. Reads the ledger only, no show lock.
    pub fn get_booking(&self, id: &Ulid) -> Result<Booking, EngineError> {
        self.ledger
            .get(id)
            .map(|hold| Booking::from(&hold))
            .ok_or(EngineError::HoldNotFound(*id))
    }

    pub fn get_hold(&self, id: &Ulid) -> Option<Hold> {
        self.ledger.get(id)
    }

    pub fn list_bookings_for_user(&self, user_id: &str) -> Vec<Booking> {
        self.ledger.bookings_for_user(user_id)
    }

    /// Every seat of a show with its status, in label order.
    pub async fn seat_map(&self, show_id: Ulid) -> Result<SeatMap, EngineError> {
        let handle = self
            .get_show(&show_id)
            .ok_or(EngineError::ShowNotFound(show_id))?;
        let guard = handle.state.read().await;
        if guard.deleted {
            return Err(EngineError::ShowNotFound(show_id));
        }
        let seats = guard
            .seats
            .iter()
            .map(|(label, state)| {
                let status = match state {
                    SeatState::Free => SeatStatus::Free,
                    SeatState::Held(_) => SeatStatus::Held,
                    SeatState::Booked(_) => SeatStatus::Booked,
                };
                (label.clone(), status)
            })
            .collect();
        Ok(SeatMap {
            show: show_info(&guard),
            seats,
        })
    }

    pub async fn list_shows(&self) -> Vec<ShowInfo> {
        let handles: Vec<_> = self.shows.iter().map(|e| e.value().clone()).collect();
        let mut shows = Vec::with_capacity(handles.len());
        for handle in handles {
            let guard = handle.state.read().await;
            if !guard.deleted {
                shows.push(show_info(&guard));
            }
        }
        shows.sort_by_key(|s| s.id);
        shows
    }
}
