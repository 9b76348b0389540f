use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Read side of whatever holds availability windows and appointments.
///
/// The resolver only ever calls these two lookups; errors are passed through
/// to its caller untouched.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Windows of `teacher_id` for `subject_id` on `day` that have not expired
    /// by `on_date`, in declaration order.
    async fn find_availability_windows(
        &self,
        teacher_id: Ulid,
        subject_id: Ulid,
        day: DayOfWeek,
        on_date: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, EngineError>;

    /// Appointments of `teacher_id` (any subject) whose span overlaps `span`
    /// and whose status is one of `statuses`.
    async fn find_overlapping_appointments(
        &self,
        teacher_id: Ulid,
        span: Span,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, EngineError>;
}

/// A store over a single teacher's state, used while its lock is held.
pub struct TeacherView<'a> {
    state: &'a TeacherState,
}

impl<'a> TeacherView<'a> {
    pub fn new(state: &'a TeacherState) -> Self {
        Self { state }
    }

    pub fn windows(
        &self,
        teacher_id: Ulid,
        subject_id: Ulid,
        day: DayOfWeek,
        on_date: NaiveDate,
    ) -> Vec<AvailabilityWindow> {
        if teacher_id != self.state.id {
            return Vec::new();
        }
        self.state
            .windows_on(subject_id, day, on_date)
            .cloned()
            .collect()
    }

    pub fn appointments(
        &self,
        teacher_id: Ulid,
        span: &Span,
        statuses: &[AppointmentStatus],
    ) -> Vec<Appointment> {
        if teacher_id != self.state.id {
            return Vec::new();
        }
        self.state
            .overlapping(span)
            .filter(|a| statuses.contains(&a.status))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ScheduleStore for TeacherView<'_> {
    async fn find_availability_windows(
        &self,
        teacher_id: Ulid,
        subject_id: Ulid,
        day: DayOfWeek,
        on_date: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, EngineError> {
        Ok(self.windows(teacher_id, subject_id, day, on_date))
    }

    async fn find_overlapping_appointments(
        &self,
        teacher_id: Ulid,
        span: Span,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, EngineError> {
        Ok(self.appointments(teacher_id, &span, statuses))
    }
}
