mod conflict;
mod error;
mod mutations;
mod queries;
mod resolver;
mod slots;
mod store;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use resolver::{validate_appointment_slot, Rejection, SlotDecision};
pub use slots::{generate_slots, merge_overlapping, open_slots};
pub use store::{ScheduleStore, TeacherView};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::limits::MAX_TEACHERS;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;
use crate::zone::ZonePolicy;

pub type SharedTeacherState = Arc<RwLock<TeacherState>>;

// ── Group-commit WAL channel ─────────────────────────────

type Ack = oneshot::Sender<io::Result<()>>;

pub(super) enum WalCommand {
    Append { event: Event, response: Ack },
    Compact { events: Vec<Event>, response: Ack },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
}

/// Background task that owns the WAL and batches appends for group commit.
///
/// Blocks for the first append, drains whatever else is already queued,
/// then does one fsync for the whole batch and answers every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Commit what we have before touching the file otherwise.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, mut batch: Vec<(Event, Ack)>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err() {
        // No sender is acknowledged, so none of the batch may survive on disk.
        if let Err(e) = wal.rollback() {
            tracing::error!("WAL rollback failed: {e}");
            result = Err(e);
        }
    }
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
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
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// In-memory schedule of every teacher, backed by the WAL.
pub struct Engine {
    pub state: DashMap<Ulid, SharedTeacherState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub zone: ZonePolicy,
    /// Reverse lookup: entity (window/appointment) id → teacher id
    pub(super) entity_to_teacher: DashMap<Ulid, Ulid>,
    /// Shared by every mutation, taken exclusively by compaction.
    pub(super) commit_gate: RwLock<()>,
}

/// Apply an event to a TeacherState. Caller holds the lock.
fn apply_to_teacher(ts: &mut TeacherState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::WindowAdded { window } | Event::WindowUpdated { window } => {
            entity_map.insert(window.id, window.teacher_id);
            ts.put_window(window.clone());
        }
        Event::WindowRemoved { id, .. } => {
            ts.remove_window(*id);
            entity_map.remove(id);
        }
        Event::AppointmentRequested { appointment } | Event::AppointmentUpdated { appointment } => {
            entity_map.insert(appointment.id, appointment.teacher_id);
            ts.put_appointment(appointment.clone());
        }
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, zone: ZonePolicy) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            zone,
            entity_to_teacher: DashMap::new(),
            commit_gate: RwLock::new(()),
        };

        // Sole owner of these Arcs during replay: try_write never contends.
        // blocking_write would panic inside an async context.
        for event in &events {
            let teacher_id = event.teacher_id();
            let ts = engine
                .state
                .entry(teacher_id)
                .or_insert_with(|| Arc::new(RwLock::new(TeacherState::new(teacher_id))))
                .clone();
            let mut guard = ts
                .try_write()
                .map_err(|_| io::Error::other("replay: teacher state contended"))?;
            apply_to_teacher(&mut guard, event, &engine.entity_to_teacher);
        }

        tracing::debug!(
            events = events.len(),
            teachers = engine.state.len(),
            "replayed WAL"
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_teacher(&self, id: &Ulid) -> Option<SharedTeacherState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    /// Teachers come into existence with their first window.
    pub(super) fn get_or_create_teacher(&self, id: Ulid) -> Result<SharedTeacherState, EngineError> {
        if let Some(ts) = self.get_teacher(&id) {
            return Ok(ts);
        }
        if self.state.len() >= MAX_TEACHERS {
            return Err(EngineError::LimitExceeded("too many teachers"));
        }
        Ok(self
            .state
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(TeacherState::new(id))))
            .clone())
    }

    pub fn get_teacher_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_teacher.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        ts: &mut TeacherState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_teacher(ts, event, &self.entity_to_teacher);
        self.notify.send(event.teacher_id(), event);
        if let Some(student_id) = event.student_id() {
            self.notify.send(student_id, event);
        }
        Ok(())
    }

    /// Lookup entity → teacher, acquire that teacher's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<TeacherState>), EngineError> {
        let teacher_id = self
            .get_teacher_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let ts = self
            .get_teacher(&teacher_id)
            .ok_or(EngineError::NotFound(teacher_id))?;
        let guard = ts.write_owned().await;
        Ok((teacher_id, guard))
    }
}
