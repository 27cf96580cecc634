//! Hard caps on request and state sizes.

/// Seats a single show may have.
pub const MAX_SEATS_PER_SHOW: usize = 10_000;

/// Seats a single booking request may claim.
pub const MAX_SEATS_PER_REQUEST: usize = 20;

/// Length of a seat label, in bytes.
pub const MAX_SEAT_LABEL_LEN: usize = 32;

/// Length of a show title, in bytes.
pub const MAX_TITLE_LEN: usize = 256;

/// Length of a user id, in bytes.
pub const MAX_USER_ID_LEN: usize = 128;

/// Shows hosted by one engine.
pub const MAX_SHOWS: usize = 100_000;

/// Longest accepted protocol line, in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;
