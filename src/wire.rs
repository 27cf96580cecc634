//! Newline-delimited JSON command protocol.
//!
//! Every request is one JSON object on one line with an `op` field. Every
//! request gets exactly one response line, `{"ok":true,"data":...}` or
//! `{"ok":false,"status":...,"code":...,"message":...}`. A connection that
//! watches a show additionally receives `{"show_id":...,"event":...}` lines
//! for every committed change, interleaved with responses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::engine::{Engine, EngineError, RefundOutcome};
use crate::limits::MAX_LINE_LEN;
use crate::model::Event;
use crate::observability::{COMMAND_DURATION_SECONDS, COMMANDS_TOTAL, command_label};
use crate::payment::PaymentDetails;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    RequestBooking {
        show_id: Ulid,
        user_id: String,
        seats: Vec<String>,
    },
    ConfirmBooking {
        booking_id: Ulid,
        payment: PaymentDetails,
    },
    CancelBooking {
        booking_id: Ulid,
    },
    GetBooking {
        booking_id: Ulid,
    },
    ListBookings {
        user_id: String,
    },
    SeatMap {
        show_id: Ulid,
    },
    ListShows,
    Watch {
        show_id: Ulid,
    },
    Unwatch {
        show_id: Ulid,
    },
}

fn ok_line(data: Value) -> String {
    json!({ "ok": true, "data": data }).to_string()
}

fn error_line(status: u16, code: &str, message: &str) -> String {
    json!({ "ok": false, "status": status, "code": code, "message": message }).to_string()
}

fn engine_error_line(e: &EngineError) -> String {
    let mut line = json!({
        "ok": false,
        "status": e.status_code(),
        "code": e.code(),
        "message": e.to_string(),
    });
    if let EngineError::SeatUnavailable(seats) = e {
        line["seats"] = json!(seats);
    }
    line.to_string()
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, EngineError> {
    serde_json::to_value(value).map_err(|e| EngineError::Internal(e.to_string()))
}

/// Live show subscriptions of one connection. Each forwards a show's
/// broadcast into the connection's event channel.
struct Watches {
    tasks: HashMap<Ulid, JoinHandle<()>>,
    tx: mpsc::Sender<(Ulid, Event)>,
}

impl Watches {
    fn watch(&mut self, engine: &Engine, show_id: Ulid) {
        if self.tasks.contains_key(&show_id) {
            return;
        }
        let mut rx = engine.notify.subscribe(show_id);
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if tx.send((show_id, event)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("watcher of show {show_id} lagged, {n} events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.tasks.insert(show_id, task);
    }

    fn unwatch(&mut self, show_id: &Ulid) {
        if let Some(task) = self.tasks.remove(show_id) {
            task.abort();
        }
    }
}

impl Drop for Watches {
    fn drop(&mut self) {
        for task in self.tasks.values() {
            task.abort();
        }
    }
}

async fn dispatch(engine: &Engine, req: Request, watches: &mut Watches) -> Result<Value, EngineError> {
    match req {
        Request::RequestBooking { show_id, user_id, seats } => {
            let hold = engine.request_booking(show_id, &user_id, &seats).await?;
            to_value(&hold)
        }
        Request::ConfirmBooking { booking_id, payment } => {
            let booking = engine.confirm_booking(booking_id, &payment).await?;
            to_value(&booking)
        }
        Request::CancelBooking { booking_id } => {
            let cancelled = engine.cancel_booking(booking_id).await?;
            let (refund, refund_error) = match &cancelled.refund {
                RefundOutcome::NotRequired => ("not_required", None),
                RefundOutcome::Refunded => ("refunded", None),
                RefundOutcome::Failed(reason) => ("failed", Some(reason.as_str())),
            };
            Ok(json!({
                "booking": to_value(&cancelled.booking)?,
                "refund": refund,
                "refund_error": refund_error,
            }))
        }
        Request::GetBooking { booking_id } => to_value(&engine.get_booking(&booking_id)?),
        Request::ListBookings { user_id } => to_value(&engine.list_bookings_for_user(&user_id)),
        Request::SeatMap { show_id } => to_value(&engine.seat_map(show_id).await?),
        Request::ListShows => to_value(&engine.list_shows().await),
        Request::Watch { show_id } => {
            if engine.get_show(&show_id).is_none() {
                return Err(EngineError::ShowNotFound(show_id));
            }
            watches.watch(engine, show_id);
            Ok(json!({ "watching": show_id }))
        }
        Request::Unwatch { show_id } => {
            watches.unwatch(&show_id);
            Ok(json!({ "watching": Value::Null }))
        }
    }
}

async fn handle_line(engine: &Engine, line: &str, watches: &mut Watches) -> String {
    let req: Request = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => return error_line(400, "bad_request", &e.to_string()),
    };
    let command = command_label(&req);
    let start = Instant::now();
    let result = dispatch(engine, req, watches).await;
    metrics::histogram!(COMMAND_DURATION_SECONDS, "command" => command)
        .record(start.elapsed().as_secs_f64());
    match result {
        Ok(data) => {
            metrics::counter!(COMMANDS_TOTAL, "command" => command, "status" => "ok").increment(1);
            ok_line(data)
        }
        Err(e) => {
            metrics::counter!(COMMANDS_TOTAL, "command" => command, "status" => e.code()).increment(1);
            tracing::debug!("{command} failed: {e}");
            engine_error_line(&e)
        }
    }
}

/// Serve one client until it disconnects. Oversized lines end the connection.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> Result<(), LinesCodecError> {
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (tx, mut events) = mpsc::channel(256);
    let mut watches = Watches {
        tasks: HashMap::new(),
        tx,
    };

    loop {
        tokio::select! {
            line = lines.next() => {
                let line = match line {
                    Some(line) => line?,
                    None => return Ok(()),
                };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = handle_line(&engine, &line, &mut watches).await;
                lines.send(reply).await?;
            }
            Some((show_id, event)) = events.recv() => {
                lines.send(json!({ "show_id": show_id, "event": event }).to_string()).await?;
            }
        }
    }
}
