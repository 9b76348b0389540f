use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::APPOINTMENT_TRANSITIONS_TOTAL;

use super::conflict::{now_ms, validate_instant, validate_text, validate_window};
use super::resolver::{validate_appointment_slot, SlotDecision};
use super::store::TeacherView;
use super::{Engine, EngineError};

/// Who may drive a lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Party {
    Teacher,
    Student,
    Either,
}

fn check_party(appointment: &Appointment, actor: Ulid, party: Party) -> Result<(), EngineError> {
    let allowed = match party {
        Party::Teacher => appointment.teacher_id == actor,
        Party::Student => appointment.student_id == actor,
        Party::Either => appointment.is_participant(actor),
    };
    if allowed {
        Ok(())
    } else {
        Err(EngineError::Forbidden(appointment.id))
    }
}

impl Engine {
    // ── Availability windows ─────────────────────────────────

    pub async fn add_window(&self, id: Ulid, new: NewWindow) -> Result<AvailabilityWindow, EngineError> {
        let window = AvailabilityWindow {
            id,
            teacher_id: new.teacher_id,
            subject_id: new.subject_id,
            day: new.day,
            hours: new.hours,
            slot_minutes: new.slot_minutes.unwrap_or(DEFAULT_SLOT_MINUTES),
            max_bookings: new.max_bookings.unwrap_or(DEFAULT_MAX_BOOKINGS),
            valid_from: new.valid_from,
            valid_until: new.valid_until,
        };
        validate_window(&window)?;
        let _commit = self.commit_gate.read().await;
        if self.entity_to_teacher.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let ts = self.get_or_create_teacher(window.teacher_id)?;
        let mut guard = ts.write().await;
        if guard.windows.len() >= MAX_WINDOWS_PER_TEACHER {
            return Err(EngineError::LimitExceeded("too many windows for teacher"));
        }
        if let Some(existing) = guard.duplicate_of(&window) {
            return Err(EngineError::AlreadyExists(existing));
        }

        let event = Event::WindowAdded { window: window.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::debug!(window = %id, teacher = %window.teacher_id, "window added");
        Ok(window)
    }

    pub async fn update_window(
        &self,
        id: Ulid,
        actor: Ulid,
        patch: WindowPatch,
    ) -> Result<AvailabilityWindow, EngineError> {
        let _commit = self.commit_gate.read().await;
        let (teacher_id, mut guard) = self.resolve_entity_write(&id).await?;
        let mut window = guard.window(&id).cloned().ok_or(EngineError::NotFound(id))?;
        if teacher_id != actor {
            return Err(EngineError::Forbidden(id));
        }

        if let Some(hours) = patch.hours {
            window.hours = hours;
        }
        if let Some(slot_minutes) = patch.slot_minutes {
            window.slot_minutes = slot_minutes;
        }
        if let Some(valid_from) = patch.valid_from {
            window.valid_from = valid_from;
        }
        if patch.open_ended {
            window.valid_until = None;
        } else if let Some(valid_until) = patch.valid_until {
            window.valid_until = Some(valid_until);
        }
        validate_window(&window)?;
        if let Some(existing) = guard.duplicate_of(&window) {
            return Err(EngineError::AlreadyExists(existing));
        }

        let event = Event::WindowUpdated { window: window.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(window)
    }

    pub async fn remove_window(&self, id: Ulid, actor: Ulid) -> Result<(), EngineError> {
        let _commit = self.commit_gate.read().await;
        let (teacher_id, mut guard) = self.resolve_entity_write(&id).await?;
        if guard.window(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        if teacher_id != actor {
            return Err(EngineError::Forbidden(id));
        }
        let event = Event::WindowRemoved { id, teacher_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Appointments ─────────────────────────────────────────

    /// Book a pending appointment.
    ///
    /// The slot check and the insert run under the teacher's write lock, so
    /// two requests racing for one slot cannot both succeed.
    pub async fn request_appointment(
        &self,
        id: Ulid,
        new: NewAppointment,
    ) -> Result<Appointment, EngineError> {
        validate_instant(new.at)?;
        validate_text(new.notes.as_deref(), "notes too long")?;
        if new.student_id == new.teacher_id {
            return Err(EngineError::InvalidInput("student and teacher must differ"));
        }
        let _commit = self.commit_gate.read().await;
        if self.entity_to_teacher.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let Some(ts) = self.get_teacher(&new.teacher_id) else {
            // No windows were ever declared; let the resolver phrase the rejection.
            let empty = TeacherState::new(new.teacher_id);
            let decision = validate_appointment_slot(
                &TeacherView::new(&empty),
                &self.zone,
                new.teacher_id,
                new.subject_id,
                new.at,
            )
            .await?;
            return match decision {
                SlotDecision::Rejected(rejection) => Err(EngineError::SlotUnavailable(rejection)),
                SlotDecision::Accepted { .. } => Err(EngineError::NotFound(new.teacher_id)),
            };
        };

        let mut guard = ts.write().await;
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_TEACHER {
            return Err(EngineError::LimitExceeded("too many appointments for teacher"));
        }

        let decision = validate_appointment_slot(
            &TeacherView::new(&guard),
            &self.zone,
            new.teacher_id,
            new.subject_id,
            new.at,
        )
        .await?;
        let slot = match decision {
            SlotDecision::Accepted { slot, .. } => slot,
            SlotDecision::Rejected(rejection) => {
                tracing::debug!(teacher = %new.teacher_id, at = new.at, %rejection, "booking rejected");
                return Err(EngineError::SlotUnavailable(rejection));
            }
        };

        let appointment = Appointment {
            id,
            student_id: new.student_id,
            teacher_id: new.teacher_id,
            subject_id: new.subject_id,
            at: new.at,
            slot_minutes: (slot.duration_ms() / MINUTE_MS) as u16,
            status: AppointmentStatus::Pending,
            notes: new.notes,
            feedback: None,
            cancellation_reason: None,
            created_at: now_ms(),
            confirmed_at: None,
            completed_at: None,
            canceled_at: None,
        };
        let event = Event::AppointmentRequested {
            appointment: appointment.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(APPOINTMENT_TRANSITIONS_TOTAL, "to" => AppointmentStatus::Pending.as_str())
            .increment(1);
        Ok(appointment)
    }

    pub async fn confirm_appointment(&self, id: Ulid, actor: Ulid) -> Result<Appointment, EngineError> {
        self.transition(id, actor, Party::Teacher, None, AppointmentStatus::Confirmed, None)
            .await
    }

    /// Teacher declines a pending request; recorded as canceled.
    pub async fn reject_appointment(
        &self,
        id: Ulid,
        actor: Ulid,
        reason: Option<String>,
    ) -> Result<Appointment, EngineError> {
        self.transition(
            id,
            actor,
            Party::Teacher,
            Some(AppointmentStatus::Pending),
            AppointmentStatus::Canceled,
            reason,
        )
        .await
    }

    pub async fn complete_appointment(&self, id: Ulid, actor: Ulid) -> Result<Appointment, EngineError> {
        self.transition(id, actor, Party::Teacher, None, AppointmentStatus::Completed, None)
            .await
    }

    pub async fn cancel_appointment(
        &self,
        id: Ulid,
        actor: Ulid,
        reason: Option<String>,
    ) -> Result<Appointment, EngineError> {
        self.transition(id, actor, Party::Either, None, AppointmentStatus::Canceled, reason)
            .await
    }

    /// Student's feedback on a completed appointment. Overwrites earlier feedback.
    pub async fn leave_feedback(
        &self,
        id: Ulid,
        actor: Ulid,
        feedback: String,
    ) -> Result<Appointment, EngineError> {
        validate_text(Some(&feedback), "feedback too long")?;
        let _commit = self.commit_gate.read().await;
        let (_, mut guard) = self.resolve_entity_write(&id).await?;
        let mut appointment = guard.appointment(&id).cloned().ok_or(EngineError::NotFound(id))?;
        check_party(&appointment, actor, Party::Student)?;
        if appointment.status != AppointmentStatus::Completed {
            return Err(EngineError::InvalidInput("feedback requires a completed appointment"));
        }
        appointment.feedback = Some(feedback);
        let event = Event::AppointmentUpdated {
            appointment: appointment.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(appointment)
    }

    async fn transition(
        &self,
        id: Ulid,
        actor: Ulid,
        party: Party,
        required: Option<AppointmentStatus>,
        next: AppointmentStatus,
        reason: Option<String>,
    ) -> Result<Appointment, EngineError> {
        validate_text(reason.as_deref(), "cancellation reason too long")?;
        let _commit = self.commit_gate.read().await;
        let (_, mut guard) = self.resolve_entity_write(&id).await?;
        let mut appointment = guard.appointment(&id).cloned().ok_or(EngineError::NotFound(id))?;
        check_party(&appointment, actor, party)?;

        let from = appointment.status;
        if required.is_some_and(|r| r != from) || !from.can_become(next) {
            return Err(EngineError::InvalidTransition { id, from, to: next });
        }

        let now = now_ms();
        appointment.status = next;
        match next {
            AppointmentStatus::Confirmed => appointment.confirmed_at = Some(now),
            AppointmentStatus::Completed => appointment.completed_at = Some(now),
            AppointmentStatus::Canceled => {
                appointment.canceled_at = Some(now);
                appointment.cancellation_reason = reason;
            }
            AppointmentStatus::Pending => {}
        }

        let event = Event::AppointmentUpdated {
            appointment: appointment.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(APPOINTMENT_TRANSITIONS_TOTAL, "to" => next.as_str()).increment(1);
        tracing::debug!(appointment = %id, %from, to = %next, "appointment transition");
        Ok(appointment)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    ///
    /// Holds the commit gate exclusively, so no mutation can land in the old
    /// log after the snapshot is taken.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.commit_gate.write().await;
        let teachers: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for ts in teachers {
            let guard = ts.read().await;
            events.extend(guard.windows.iter().map(|w| Event::WindowAdded { window: w.clone() }));
            events.extend(guard.appointments.iter().map(|a| Event::AppointmentRequested {
                appointment: a.clone(),
            }));
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.wal_tx
            .send(super::WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self
            .wal_tx
            .send(super::WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
