use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed, duplicate or unknown seat labels.
    InvalidSeats(String),
    /// Some requested seats are held or booked. Carries the taken labels.
    SeatUnavailable(Vec<String>),
    HoldExpired(Ulid),
    HoldNotFound(Ulid),
    /// The hold or booking already reached a terminal state.
    AlreadyFinal(Ulid),
    /// Another caller is paying for this hold right now.
    ConfirmInProgress(Ulid),
    ShowNotFound(Ulid),
    AlreadyExists(Ulid),
    ShowHasBookings(Ulid),
    PaymentDeclined(String),
    PaymentTimeout,
    LimitExceeded(&'static str),
    WalError(String),
    /// A response could not be built. Nothing was changed by it.
    Internal(String),
}

impl EngineError {
    /// Status code the API layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::InvalidSeats(_) => 400,
            EngineError::PaymentDeclined(_) => 402,
            EngineError::HoldNotFound(_) | EngineError::ShowNotFound(_) => 404,
            EngineError::SeatUnavailable(_)
            | EngineError::AlreadyFinal(_)
            | EngineError::ConfirmInProgress(_)
            | EngineError::AlreadyExists(_)
            | EngineError::ShowHasBookings(_) => 409,
            EngineError::HoldExpired(_) => 410,
            EngineError::LimitExceeded(_) => 422,
            EngineError::WalError(_) | EngineError::Internal(_) => 500,
            EngineError::PaymentTimeout => 504,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidSeats(_) => "invalid_seats",
            EngineError::SeatUnavailable(_) => "seat_unavailable",
            EngineError::HoldExpired(_) => "hold_expired",
            EngineError::HoldNotFound(_) => "hold_not_found",
            EngineError::AlreadyFinal(_) => "already_final",
            EngineError::ConfirmInProgress(_) => "confirm_in_progress",
            EngineError::ShowNotFound(_) => "show_not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::ShowHasBookings(_) => "show_has_bookings",
            EngineError::PaymentDeclined(_) => "payment_declined",
            EngineError::PaymentTimeout => "payment_timeout",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
            EngineError::Internal(_) => "internal",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidSeats(msg) => write!(f, "invalid seats: {msg}"),
            EngineError::SeatUnavailable(seats) => {
                write!(f, "seats unavailable: {}", seats.join(", "))
            }
            EngineError::HoldExpired(id) => write!(f, "hold expired: {id}"),
            EngineError::HoldNotFound(id) => write!(f, "hold not found: {id}"),
            EngineError::AlreadyFinal(id) => write!(f, "hold {id} is already final"),
            EngineError::ConfirmInProgress(id) => {
                write!(f, "payment for hold {id} is already in progress")
            }
            EngineError::ShowNotFound(id) => write!(f, "show not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::ShowHasBookings(id) => {
                write!(f, "cannot delete show {id}: it has live holds or bookings")
            }
            EngineError::PaymentDeclined(reason) => write!(f, "payment declined: {reason}"),
            EngineError::PaymentTimeout => write!(f, "payment timed out"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "ledger log error: {e}"),
            EngineError::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
