mod error;
mod inventory;
mod mutations;
mod queries;
mod validate;

pub use error::EngineError;
pub use mutations::{Cancellation, RefundOutcome};
pub(crate) use validate::now_ms;

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::ledger::Ledger;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::payment::PaymentCoordinator;
use crate::wal::Wal;

pub type SharedShowState = Arc<RwLock<ShowInventory>>;

/// One show: its catalog description and seat labels (immutable, readable
/// without the lock) and its lock-guarded inventory.
#[derive(Clone)]
pub struct ShowHandle {
    pub spec: Arc<ShowSpec>,
    pub seat_labels: Arc<HashSet<String>>,
    pub state: SharedShowState,
}

impl ShowHandle {
    fn new(spec: ShowSpec) -> Self {
        let inventory = ShowInventory::new(spec.id, spec.title.clone(), &spec.seat_labels, spec.seat_price);
        Self {
            seat_labels: Arc::new(spec.seat_labels.iter().cloned().collect()),
            spec: Arc::new(spec),
            state: Arc::new(RwLock::new(inventory)),
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the log and batches appends for group commit:
/// wait for one append, drain whatever else is already queued, then one
/// flush + fsync for the whole batch and answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut batch = match cmd {
            WalCommand::Append { event, response } => vec![(event, response)],
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(ref e) = result {
            tracing::error!("ledger log flush failed for {} events: {e}", batch.len());
        }
        for (_, tx) in batch {
            let _ = tx.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    tracing::debug!("ledger log writer stopped");
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so no partial batch lingers in the buffer.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

/// Apply a committed event to a show and mirror the hold into the ledger.
/// No locking: the caller holds the show's write lock.
fn apply_to_show(show: &mut ShowInventory, event: &Event, ledger: &Ledger) {
    if let Event::RefundFailed { id, reason, .. } = event {
        ledger.note_refund_failure(id, reason);
        return;
    }
    if let Some(snapshot) = show.apply(event) {
        ledger.record(&snapshot);
    }
}

pub struct Engine {
    pub(super) shows: DashMap<Ulid, ShowHandle>,
    pub ledger: Ledger,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) payments: Arc<dyn PaymentCoordinator>,
    pub(super) config: EngineConfig,
    /// Serializes show creation and deletion so id and count checks hold
    /// until the change is logged.
    pub(super) show_lifecycle: Mutex<()>,
    /// Held shared across every log append + apply, exclusively by compaction,
    /// so a compacted snapshot never misses an appended event.
    pub(super) commit_gate: RwLock<()>,
}

impl Engine {
    /// Replay the log at `wal_path` and start its writer task. Must be called
    /// inside a tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        payments: Arc<dyn PaymentCoordinator>,
        config: EngineConfig,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            shows: DashMap::new(),
            ledger: Ledger::new(),
            wal_tx,
            notify,
            payments,
            config,
            show_lifecycle: Mutex::new(()),
            commit_gate: RwLock::new(()),
        };

        // We are the only owner of these locks during replay, so try_write
        // always succeeds. Never block here: this may run inside async code.
        for event in &events {
            match event {
                Event::ShowCreated { id, title, seat_labels, seat_price } => {
                    let spec = ShowSpec {
                        id: *id,
                        title: title.clone(),
                        seat_labels: seat_labels.clone(),
                        seat_price: *seat_price,
                    };
                    engine.shows.insert(*id, ShowHandle::new(spec));
                }
                Event::ShowDeleted { id } => {
                    engine.shows.remove(id);
                }
                Event::HoldRestored { hold } if !engine.shows.contains_key(&hold.show_id) => {
                    engine.ledger.record(hold);
                }
                Event::RefundFailed { id, reason, .. } => {
                    engine.ledger.note_refund_failure(id, reason);
                }
                other => {
                    let Some(handle) = engine.get_show(&other.show_id()) else {
                        tracing::warn!("replay: event for unknown show {}", other.show_id());
                        continue;
                    };
                    match handle.state.try_write() {
                        Ok(mut guard) => apply_to_show(&mut guard, other, &engine.ledger),
                        Err(_) => tracing::error!("replay: show {} unexpectedly locked", other.show_id()),
                    }
                }
            }
        }

        if !events.is_empty() {
            tracing::info!(
                "replayed {} events: {} shows, {} ledger entries",
                events.len(),
                engine.shows.len(),
                engine.ledger.len()
            );
        }
        let active = engine
            .ledger
            .snapshot()
            .iter()
            .filter(|h| h.status == HoldStatus::Active)
            .count();
        metrics::gauge!(crate::observability::SHOWS_ACTIVE).set(engine.shows.len() as f64);
        metrics::gauge!(crate::observability::HOLDS_ACTIVE).set(active as f64);
        Ok(engine)
    }

    /// Write an event through the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("log writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("log writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_show(&self, id: &Ulid) -> Option<ShowHandle> {
        self.shows.get(id).map(|e| e.value().clone())
    }

    /// Log + apply + notify, in that order. Nothing changes if the log append fails.
    pub(super) async fn persist_and_apply(
        &self,
        show: &mut ShowInventory,
        event: &Event,
    ) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(event).await?;
        apply_to_show(show, event, &self.ledger);
        self.notify.send(show.id, event);
        Ok(())
    }

    /// Find the show owning a hold and take its write lock. A hold whose show
    /// is gone is finished, so the ledger decides the error.
    pub(super) async fn resolve_hold_write(
        &self,
        hold_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<ShowInventory>, EngineError> {
        let show_id = self
            .ledger
            .show_of(hold_id)
            .ok_or(EngineError::HoldNotFound(*hold_id))?;
        let handle = self
            .get_show(&show_id)
            .ok_or_else(|| self.terminal_error(*hold_id))?;
        let guard = handle.state.write_owned().await;
        if guard.deleted {
            return Err(self.terminal_error(*hold_id));
        }
        Ok(guard)
    }

    /// Error for a hold that is no longer live in its show: the ledger knows
    /// how it ended.
    pub(super) fn terminal_error(&self, hold_id: Ulid) -> EngineError {
        match self.ledger.status(&hold_id) {
            None => EngineError::HoldNotFound(hold_id),
            Some(HoldStatus::Expired) => EngineError::HoldExpired(hold_id),
            Some(_) => EngineError::AlreadyFinal(hold_id),
        }
    }
}
