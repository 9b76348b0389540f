use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use ulid::Ulid;

use crate::model::*;

use super::resolver::{validate_appointment_slot, SlotDecision};
use super::slots::open_slots;
use super::store::{ScheduleStore, TeacherView};
use super::{Engine, EngineError};

#[async_trait]
impl ScheduleStore for Engine {
    async fn find_availability_windows(
        &self,
        teacher_id: Ulid,
        subject_id: Ulid,
        day: DayOfWeek,
        on_date: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, EngineError> {
        let Some(ts) = self.get_teacher(&teacher_id) else {
            return Ok(Vec::new());
        };
        let guard = ts.read().await;
        Ok(TeacherView::new(&guard).windows(teacher_id, subject_id, day, on_date))
    }

    async fn find_overlapping_appointments(
        &self,
        teacher_id: Ulid,
        span: Span,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, EngineError> {
        let Some(ts) = self.get_teacher(&teacher_id) else {
            return Ok(Vec::new());
        };
        let guard = ts.read().await;
        Ok(TeacherView::new(&guard).appointments(teacher_id, &span, statuses))
    }
}

impl Engine {
    /// Read-only slot check against current state. Nothing is reserved;
    /// use `request_appointment` to book.
    pub async fn validate_appointment_slot(
        &self,
        teacher_id: Ulid,
        subject_id: Ulid,
        at: Ms,
    ) -> Result<SlotDecision, EngineError> {
        validate_appointment_slot(self, &self.zone, teacher_id, subject_id, at).await
    }

    /// Slots still free for `subject_id` with `teacher_id` on `date`.
    pub async fn open_slots(
        &self,
        teacher_id: Ulid,
        subject_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<OpenSlot>, EngineError> {
        let Some(ts) = self.get_teacher(&teacher_id) else {
            return Ok(Vec::new());
        };
        let day = DayOfWeek::from_weekday(date.weekday());
        let (day_start, day_end) = match (
            self.zone.instant_of(date, MinuteOfDay::MIDNIGHT),
            self.zone.instant_of(date, MinuteOfDay::END_OF_DAY),
        ) {
            (Some(start), Some(end)) => (start, end),
            _ => return Err(EngineError::InvalidInput("date not representable")),
        };

        let guard = ts.read().await;
        let windows: Vec<AvailabilityWindow> =
            guard.windows_on(subject_id, day, date).cloned().collect();
        let busy: Vec<Span> = guard
            .overlapping(&Span::new(day_start, day_end))
            .filter(|a| a.status.is_active())
            .map(Appointment::span)
            .collect();
        Ok(open_slots(&windows, &busy, date, &self.zone))
    }

    pub async fn get_window(&self, id: Ulid) -> Result<AvailabilityWindow, EngineError> {
        let teacher_id = self
            .get_teacher_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let ts = self
            .get_teacher(&teacher_id)
            .ok_or(EngineError::NotFound(teacher_id))?;
        let guard = ts.read().await;
        guard.window(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn list_windows(&self, teacher_id: Ulid) -> Vec<AvailabilityWindow> {
        match self.get_teacher(&teacher_id) {
            Some(ts) => ts.read().await.windows.clone(),
            None => Vec::new(),
        }
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let teacher_id = self
            .get_teacher_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;
        let ts = self
            .get_teacher(&teacher_id)
            .ok_or(EngineError::NotFound(teacher_id))?;
        let guard = ts.read().await;
        guard.appointment(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Every appointment of a teacher, ordered by instant.
    pub async fn list_appointments(&self, teacher_id: Ulid) -> Vec<Appointment> {
        match self.get_teacher(&teacher_id) {
            Some(ts) => ts.read().await.appointments.clone(),
            None => Vec::new(),
        }
    }
}
