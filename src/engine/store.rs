use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::wal::Wal;

use super::conflict::check_no_conflict;
use super::state::validate_transition;
use super::EngineError;

pub type SharedLedger = Arc<RwLock<BusinessLedger>>;

/// Persistence boundary for bookings — the concurrency-critical dependency.
///
/// Implementations must make "check no overlap, then insert" atomic per
/// business: `insert_if_no_overlap` either returns a committed,
/// non-overlapping booking or fails with `SlotUnavailable`, with no window in
/// which two overlapping bookings are both observable as active.
#[async_trait]
pub trait BookingStore: Send + Sync + 'static {
    /// Active (PENDING/CONFIRMED) bookings overlapping the window.
    async fn find_overlapping(
        &self,
        business_id: Ulid,
        window: Span,
    ) -> Result<Vec<Booking>, EngineError>;

    /// Atomically insert `booking` unless an active booking overlaps its
    /// span. If the booking carries an idempotency key that was already
    /// committed, the original booking is returned instead of re-inserting.
    async fn insert_if_no_overlap(&self, booking: Booking) -> Result<Booking, EngineError>;

    /// Atomically validate and apply a lifecycle transition, returning the
    /// event to publish. Validation runs under the same lock as the write, so
    /// two racing transitions can never both succeed.
    async fn apply_transition(
        &self,
        booking_id: Ulid,
        to: BookingStatus,
        now: Ms,
    ) -> Result<Event, EngineError>;

    async fn get(&self, booking_id: Ulid) -> Result<Booking, EngineError>;

    /// PENDING bookings created at or before `cutoff` — sweeper input.
    async fn stale_pending(&self, cutoff: Ms) -> Result<Vec<Ulid>, EngineError>;
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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

async fn wal_append(
    wal_tx: &mpsc::Sender<WalCommand>,
    event: &Event,
    commit_timeout: Duration,
) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
    match tokio::time::timeout(commit_timeout, rx).await {
        Err(_) => Err(EngineError::StoreUnavailable("commit timed out".into())),
        Ok(Err(_)) => Err(EngineError::WalError("WAL writer dropped response".into())),
        Ok(Ok(result)) => result.map_err(|e| EngineError::WalError(e.to_string())),
    }
}

// ── WalStore ─────────────────────────────────────────────

/// In-memory per-business ledgers made durable by the WAL.
///
/// Each business's calendar sits behind its own write lock; the overlap query
/// and the insert run under one acquisition, with the WAL append fsynced
/// before the in-memory apply. Commit units run on detached tasks so a caller
/// dropping its future mid-commit can never leave a half-committed booking.
pub struct WalStore {
    ledgers: Arc<DashMap<Ulid, SharedLedger>>,
    /// Reverse lookup: booking id → business id.
    booking_index: Arc<DashMap<Ulid, Ulid>>,
    /// Idempotency key → booking id.
    idempotency: Arc<DashMap<String, Ulid>>,
    wal_tx: mpsc::Sender<WalCommand>,
    commit_timeout: Duration,
}

/// Apply an event to a ledger (caller holds the write lock).
fn apply_event(
    ledger: &mut BusinessLedger,
    event: &Event,
    booking_index: &DashMap<Ulid, Ulid>,
    idempotency: &DashMap<String, Ulid>,
) {
    match event {
        Event::Created { booking } => {
            ledger.insert(booking.clone());
            booking_index.insert(booking.id, booking.business_id);
            if let Some(key) = &booking.idempotency_key {
                idempotency.insert(key.clone(), booking.id);
            }
        }
        // Status changes carry the post-transition snapshot; the span and
        // identity fields never change after creation.
        other => {
            let after = other.booking();
            if let Some(row) = ledger.get_mut(after.id) {
                row.status = after.status;
            }
        }
    }
}

impl WalStore {
    /// Open the store, replaying any existing WAL at `path`.
    pub fn open(path: &Path, commit_timeout: Duration) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            ledgers: Arc::new(DashMap::new()),
            booking_index: Arc::new(DashMap::new()),
            idempotency: Arc::new(DashMap::new()),
            wal_tx,
            commit_timeout,
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never use blocking_write here because this may
        // run inside an async context.
        for event in &events {
            let business_id = event.booking().business_id;
            let ledger = store.ledger_for(business_id);
            let mut guard = ledger.try_write().expect("replay: uncontended write");
            apply_event(&mut guard, event, &store.booking_index, &store.idempotency);
        }

        Ok(store)
    }

    fn ledger_for(&self, business_id: Ulid) -> SharedLedger {
        self.ledgers
            .entry(business_id)
            .or_insert_with(|| Arc::new(RwLock::new(BusinessLedger::new(business_id))))
            .clone()
    }

    fn ledger_of_booking(&self, booking_id: Ulid) -> Result<SharedLedger, EngineError> {
        let business_id = *self
            .booking_index
            .get(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        self.ledgers
            .get(&business_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(business_id))
    }

    /// Snapshot of every ledger as a minimal event list for compaction.
    /// CANCELLED and other terminal rows are kept — the audit trail survives
    /// compaction.
    async fn snapshot_events(&self) -> Vec<Event> {
        // Collect the Arcs first so no DashMap shard guard is held across an
        // await.
        let ledgers: Vec<SharedLedger> =
            self.ledgers.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for ledger in ledgers {
            let guard = ledger.read().await;
            for booking in &guard.bookings {
                events.push(Event::Created {
                    booking: booking.clone(),
                });
            }
        }
        events
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let events = self.snapshot_events().await;
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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

/// The atomic insert unit: lock, idempotency re-check, overlap check,
/// WAL append (fsync), apply. Runs on its own task via `tokio::spawn` so the
/// unit survives caller cancellation intact.
async fn commit_insert(
    ledger: SharedLedger,
    booking: Booking,
    wal_tx: mpsc::Sender<WalCommand>,
    commit_timeout: Duration,
    booking_index: Arc<DashMap<Ulid, Ulid>>,
    idempotency: Arc<DashMap<String, Ulid>>,
) -> Result<Booking, EngineError> {
    let mut guard = ledger.write_owned().await;
    if guard.bookings.len() >= MAX_BOOKINGS_PER_BUSINESS {
        return Err(EngineError::LimitExceeded("too many bookings for business"));
    }
    // Re-check the key under the lock: two same-key requests may race past
    // the lock-free lookup.
    if let Some(key) = &booking.idempotency_key
        && let Some(existing) = idempotency.get(key) {
            let id = *existing;
            return guard
                .get(id)
                .cloned()
                .ok_or(EngineError::NotFound(id));
        }
    check_no_conflict(&guard, &booking.span)?;

    let event = Event::Created {
        booking: booking.clone(),
    };
    wal_append(&wal_tx, &event, commit_timeout).await?;
    apply_event(&mut guard, &event, &booking_index, &idempotency);
    Ok(booking)
}

/// The atomic transition unit — same shape as `commit_insert`.
async fn commit_transition(
    ledger: SharedLedger,
    booking_id: Ulid,
    to: BookingStatus,
    now: Ms,
    wal_tx: mpsc::Sender<WalCommand>,
    commit_timeout: Duration,
    booking_index: Arc<DashMap<Ulid, Ulid>>,
    idempotency: Arc<DashMap<String, Ulid>>,
) -> Result<Event, EngineError> {
    let mut guard = ledger.write_owned().await;
    let current = guard
        .get(booking_id)
        .ok_or(EngineError::NotFound(booking_id))?;
    validate_transition(current.status, to, &current.span, now)?;

    let mut after = current.clone();
    after.status = to;
    let event = match to {
        BookingStatus::Confirmed => Event::Confirmed { booking: after },
        BookingStatus::Cancelled => Event::Cancelled { booking: after },
        BookingStatus::Completed => Event::Completed { booking: after },
        BookingStatus::NoShow => Event::NoShow { booking: after },
        BookingStatus::Pending => unreachable!("transitions never target PENDING"),
    };
    wal_append(&wal_tx, &event, commit_timeout).await?;
    apply_event(&mut guard, &event, &booking_index, &idempotency);
    Ok(event)
}

#[async_trait]
impl BookingStore for WalStore {
    async fn find_overlapping(
        &self,
        business_id: Ulid,
        window: Span,
    ) -> Result<Vec<Booking>, EngineError> {
        let ledger = match self.ledgers.get(&business_id) {
            Some(entry) => entry.value().clone(),
            None => return Ok(Vec::new()),
        };
        let guard = ledger.read().await;
        Ok(guard.active_overlapping(&window).cloned().collect())
    }

    async fn insert_if_no_overlap(&self, booking: Booking) -> Result<Booking, EngineError> {
        if let Some(key) = &booking.idempotency_key {
            if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
                return Err(EngineError::LimitExceeded("bad idempotency key length"));
            }
            // Fast path outside the lock; re-checked under it. Copy the id
            // out so no map guard is held across the await.
            let existing = self.idempotency.get(key).map(|e| *e.value());
            if let Some(id) = existing {
                return self.get(id).await;
            }
        }
        let task = tokio::spawn(commit_insert(
            self.ledger_for(booking.business_id),
            booking,
            self.wal_tx.clone(),
            self.commit_timeout,
            self.booking_index.clone(),
            self.idempotency.clone(),
        ));
        task.await
            .map_err(|e| EngineError::StoreUnavailable(format!("commit task failed: {e}")))?
    }

    async fn apply_transition(
        &self,
        booking_id: Ulid,
        to: BookingStatus,
        now: Ms,
    ) -> Result<Event, EngineError> {
        let ledger = self.ledger_of_booking(booking_id)?;
        let task = tokio::spawn(commit_transition(
            ledger,
            booking_id,
            to,
            now,
            self.wal_tx.clone(),
            self.commit_timeout,
            self.booking_index.clone(),
            self.idempotency.clone(),
        ));
        task.await
            .map_err(|e| EngineError::StoreUnavailable(format!("commit task failed: {e}")))?
    }

    async fn get(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let ledger = self.ledger_of_booking(booking_id)?;
        let guard = ledger.read().await;
        guard
            .get(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    async fn stale_pending(&self, cutoff: Ms) -> Result<Vec<Ulid>, EngineError> {
        let mut stale = Vec::new();
        for entry in self.ledgers.iter() {
            let ledger = entry.value().clone();
            if let Ok(guard) = ledger.try_read() {
                for booking in &guard.bookings {
                    if booking.status == BookingStatus::Pending && booking.created_at <= cutoff {
                        stale.push(booking.id);
                    }
                }
            }
        }
        Ok(stale)
    }
}
