use std::collections::HashSet;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Check a seat request against the show's (immutable) seat set. Runs before
/// any show lock is taken. Returns the labels sorted.
pub(crate) fn validate_seat_request(
    known: &HashSet<String>,
    requested: &[String],
) -> Result<Vec<String>, EngineError> {
    if requested.is_empty() {
        return Err(EngineError::InvalidSeats("no seats requested".into()));
    }
    if requested.len() > MAX_SEATS_PER_REQUEST {
        return Err(EngineError::LimitExceeded("too many seats in one request"));
    }
    let mut seen = HashSet::with_capacity(requested.len());
    for label in requested {
        if !seen.insert(label.as_str()) {
            return Err(EngineError::InvalidSeats(format!("duplicate seat {label}")));
        }
        if !known.contains(label) {
            return Err(EngineError::InvalidSeats(format!("unknown seat {label}")));
        }
    }
    let mut sorted = requested.to_vec();
    sorted.sort();
    Ok(sorted)
}

pub(crate) fn validate_user(user_id: &str) -> Result<(), EngineError> {
    if user_id.trim().is_empty() {
        return Err(EngineError::InvalidSeats("missing user id".into()));
    }
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(EngineError::LimitExceeded("user id too long"));
    }
    Ok(())
}

pub(crate) fn validate_show_spec(spec: &ShowSpec) -> Result<(), EngineError> {
    if spec.seat_labels.is_empty() {
        return Err(EngineError::InvalidSeats("show has no seats".into()));
    }
    if spec.seat_labels.len() > MAX_SEATS_PER_SHOW {
        return Err(EngineError::LimitExceeded("too many seats in show"));
    }
    if let Some(ref t) = spec.title
        && t.len() > MAX_TITLE_LEN {
            return Err(EngineError::LimitExceeded("show title too long"));
        }
    let mut seen = HashSet::with_capacity(spec.seat_labels.len());
    for label in &spec.seat_labels {
        if label.is_empty() || label.len() > MAX_SEAT_LABEL_LEN {
            return Err(EngineError::InvalidSeats(format!("bad seat label {label:?}")));
        }
        if !seen.insert(label.as_str()) {
            return Err(EngineError::InvalidSeats(format!("duplicate seat {label}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(ls: &[&str]) -> HashSet<String> {
        ls.iter().map(|s| s.to_string()).collect()
    }

    fn req(ls: &[&str]) -> Vec<String> {
        ls.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sorts_valid_request() {
        let seats = known(&["A1", "A2", "A3"]);
        assert_eq!(
            validate_seat_request(&seats, &req(&["A3", "A1"])).unwrap(),
            req(&["A1", "A3"])
        );
    }

    #[test]
    fn rejects_empty_duplicate_and_foreign() {
        let seats = known(&["A1", "A2"]);
        assert!(matches!(
            validate_seat_request(&seats, &[]),
            Err(EngineError::InvalidSeats(_))
        ));
        assert!(matches!(
            validate_seat_request(&seats, &req(&["A1", "A1"])),
            Err(EngineError::InvalidSeats(_))
        ));
        assert!(matches!(
            validate_seat_request(&seats, &req(&["Z9"])),
            Err(EngineError::InvalidSeats(_))
        ));
    }

    #[test]
    fn caps_request_size() {
        let labels: Vec<String> = (0..=MAX_SEATS_PER_REQUEST).map(|i| format!("S{i}")).collect();
        let seats: HashSet<String> = labels.iter().cloned().collect();
        assert!(matches!(
            validate_seat_request(&seats, &labels),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn show_spec_checks() {
        let mut spec = ShowSpec {
            id: ulid::Ulid::new(),
            title: None,
            seat_labels: req(&["A1", "A2"]),
            seat_price: 0,
        };
        assert!(validate_show_spec(&spec).is_ok());
        spec.seat_labels.push("A1".into());
        assert!(validate_show_spec(&spec).is_err());
        spec.seat_labels = vec![];
        assert!(validate_show_spec(&spec).is_err());
        spec.seat_labels = vec!["x".repeat(MAX_SEAT_LABEL_LEN + 1)];
        assert!(validate_show_spec(&spec).is_err());
    }

    #[test]
    fn blank_user_rejected() {
        assert!(validate_user("  ").is_err());
        assert!(validate_user("alice").is_ok());
    }
}
