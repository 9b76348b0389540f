use chrono::NaiveDate;

use super::*;
use crate::limits::*;

// ── Fixtures ─────────────────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("consult_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn engine_at(path: &PathBuf) -> Engine {
    Engine::new(path.clone(), Arc::new(NotifyHub::new()), ZonePolicy::utc()).unwrap()
}

/// 2024-01-01 is a Monday.
fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn hm(s: &str) -> MinuteOfDay {
    s.parse().unwrap()
}

fn at(date: NaiveDate, clock: &str) -> Ms {
    ZonePolicy::utc().instant_of(date, hm(clock)).unwrap()
}

fn new_window(teacher: Ulid, subject: Ulid, start: &str, end: &str) -> NewWindow {
    NewWindow {
        teacher_id: teacher,
        subject_id: subject,
        day: DayOfWeek::MONDAY,
        hours: DailyHours::new(hm(start), hm(end)).unwrap(),
        slot_minutes: None,
        max_bookings: None,
        valid_from: monday(),
        valid_until: None,
    }
}

fn booking(student: Ulid, teacher: Ulid, subject: Ulid, when: Ms) -> NewAppointment {
    NewAppointment {
        student_id: student,
        teacher_id: teacher,
        subject_id: subject,
        at: when,
        notes: None,
    }
}

struct Setup {
    engine: Engine,
    teacher: Ulid,
    student: Ulid,
    subject: Ulid,
    window: AvailabilityWindow,
}

/// Monday 09:00-10:00, 30-minute slots.
async fn setup(name: &str) -> Setup {
    let engine = engine_at(&test_wal_path(name));
    let (teacher, student, subject) = (Ulid::new(), Ulid::new(), Ulid::new());
    let window = engine
        .add_window(Ulid::new(), new_window(teacher, subject, "09:00", "10:00"))
        .await
        .unwrap();
    Setup {
        engine,
        teacher,
        student,
        subject,
        window,
    }
}

impl Setup {
    async fn book(&self, clock: &str) -> Result<Appointment, EngineError> {
        self.engine
            .request_appointment(
                Ulid::new(),
                booking(self.student, self.teacher, self.subject, at(monday(), clock)),
            )
            .await
    }
}

fn rejection(result: Result<Appointment, EngineError>) -> Rejection {
    match result {
        Err(EngineError::SlotUnavailable(r)) => r,
        other => panic!("expected SlotUnavailable, got {other:?}"),
    }
}

// ── Availability windows ─────────────────────────────────

#[tokio::test]
async fn add_window_applies_defaults() {
    let s = setup("add_defaults.wal").await;
    assert_eq!(s.window.slot_minutes, DEFAULT_SLOT_MINUTES);
    assert_eq!(s.window.max_bookings, DEFAULT_MAX_BOOKINGS);
    assert_eq!(s.engine.get_window(s.window.id).await.unwrap(), s.window);
    assert_eq!(s.engine.list_windows(s.teacher).await, vec![s.window.clone()]);
}

#[tokio::test]
async fn duplicate_window_reports_existing_id() {
    let s = setup("dup_window.wal").await;

    let again = s
        .engine
        .add_window(Ulid::new(), new_window(s.teacher, s.subject, "09:00", "10:00"))
        .await;
    assert!(matches!(again, Err(EngineError::AlreadyExists(id)) if id == s.window.id));

    let same_id = s
        .engine
        .add_window(s.window.id, new_window(s.teacher, s.subject, "13:00", "14:00"))
        .await;
    assert!(matches!(same_id, Err(EngineError::AlreadyExists(_))));

    // Different hours on the same day is a separate window.
    s.engine
        .add_window(Ulid::new(), new_window(s.teacher, s.subject, "13:00", "14:00"))
        .await
        .unwrap();
    assert_eq!(s.engine.list_windows(s.teacher).await.len(), 2);
}

#[tokio::test]
async fn window_validation() {
    let engine = engine_at(&test_wal_path("window_validation.wal"));
    let (teacher, subject) = (Ulid::new(), Ulid::new());

    let mut short = new_window(teacher, subject, "09:00", "10:00");
    short.slot_minutes = Some(10);
    assert!(matches!(
        engine.add_window(Ulid::new(), short).await,
        Err(EngineError::InvalidInput(_))
    ));

    let mut long = new_window(teacher, subject, "09:00", "12:00");
    long.slot_minutes = Some(MAX_SLOT_MINUTES + 1);
    assert!(matches!(
        engine.add_window(Ulid::new(), long).await,
        Err(EngineError::InvalidInput(_))
    ));

    let mut backwards = new_window(teacher, subject, "09:00", "10:00");
    backwards.valid_until = NaiveDate::from_ymd_opt(2023, 12, 31);
    assert!(matches!(
        engine.add_window(Ulid::new(), backwards).await,
        Err(EngineError::InvalidInput(_))
    ));

    let mut zero = new_window(teacher, subject, "09:00", "10:00");
    zero.max_bookings = Some(0);
    assert!(matches!(
        engine.add_window(Ulid::new(), zero).await,
        Err(EngineError::InvalidInput(_))
    ));

    // Deserialized input can carry inverted hours.
    let mut inverted = new_window(teacher, subject, "09:00", "10:00");
    inverted.hours = DailyHours { start: hm("10:00"), end: hm("09:00") };
    assert!(matches!(
        engine.add_window(Ulid::new(), inverted).await,
        Err(EngineError::InvalidInput(_))
    ));

    assert!(engine.list_windows(teacher).await.is_empty());
}

#[tokio::test]
async fn only_owner_updates_or_removes_window() {
    let s = setup("window_owner.wal").await;
    let stranger = Ulid::new();

    let patch = WindowPatch {
        hours: Some(DailyHours::new(hm("08:00"), hm("10:00")).unwrap()),
        ..Default::default()
    };
    assert!(matches!(
        s.engine.update_window(s.window.id, stranger, patch.clone()).await,
        Err(EngineError::Forbidden(_))
    ));
    assert!(matches!(
        s.engine.remove_window(s.window.id, stranger).await,
        Err(EngineError::Forbidden(_))
    ));

    let updated = s.engine.update_window(s.window.id, s.teacher, patch).await.unwrap();
    assert_eq!(updated.hours.start, hm("08:00"));
    assert!(s.book("08:00").await.is_ok());

    s.engine.remove_window(s.window.id, s.teacher).await.unwrap();
    assert!(matches!(
        s.engine.get_window(s.window.id).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        s.engine.remove_window(s.window.id, s.teacher).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn update_window_expiry_and_reopen() {
    let s = setup("window_expiry.wal").await;
    let expire = WindowPatch {
        valid_until: NaiveDate::from_ymd_opt(2024, 1, 7),
        ..Default::default()
    };
    s.engine.update_window(s.window.id, s.teacher, expire).await.unwrap();

    let next_monday = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
    let later = s
        .engine
        .request_appointment(
            Ulid::new(),
            booking(s.student, s.teacher, s.subject, at(next_monday, "09:00")),
        )
        .await;
    assert_eq!(rejection(later), Rejection::NoAvailability { day: DayOfWeek::MONDAY });

    let reopen = WindowPatch {
        open_ended: true,
        ..Default::default()
    };
    let w = s.engine.update_window(s.window.id, s.teacher, reopen).await.unwrap();
    assert_eq!(w.valid_until, None);
    s.engine
        .request_appointment(
            Ulid::new(),
            booking(s.student, s.teacher, s.subject, at(next_monday, "09:00")),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn update_into_duplicate_rejected() {
    let s = setup("update_dup.wal").await;
    let other = s
        .engine
        .add_window(Ulid::new(), new_window(s.teacher, s.subject, "13:00", "14:00"))
        .await
        .unwrap();
    let patch = WindowPatch {
        hours: Some(s.window.hours),
        ..Default::default()
    };
    assert!(matches!(
        s.engine.update_window(other.id, s.teacher, patch).await,
        Err(EngineError::AlreadyExists(id)) if id == s.window.id
    ));
}

// ── Booking ──────────────────────────────────────────────

#[tokio::test]
async fn free_slot_is_accepted() {
    let s = setup("free_slot.wal").await;
    let decision = s
        .engine
        .validate_appointment_slot(s.teacher, s.subject, at(monday(), "09:30"))
        .await
        .unwrap();
    assert!(decision.is_accepted());
    assert_eq!(decision.reason(), None);

    let appointment = s.book("09:30").await.unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Pending);
    assert_eq!(appointment.slot_minutes, 30);
    assert_eq!(appointment.span(), Span::starting_at(at(monday(), "09:30"), 30));
}

#[tokio::test]
async fn booked_slot_is_taken() {
    let s = setup("taken_slot.wal").await;
    let first = s.book("09:00").await.unwrap();
    let second = rejection(s.book("09:00").await);
    assert_eq!(second, Rejection::SlotTaken { appointment_id: first.id });
    assert_eq!(second.to_string(), "slot already booked");

    let decision = s
        .engine
        .validate_appointment_slot(s.teacher, s.subject, at(monday(), "09:00"))
        .await
        .unwrap();
    assert_eq!(decision.reason().as_deref(), Some("slot already booked"));
}

#[tokio::test]
async fn partially_overlapping_slot_is_taken() {
    let s = setup("partial_overlap.wal").await;
    s.book("09:00").await.unwrap();
    let r = rejection(s.book("09:15").await);
    assert_eq!(r.kind(), "slot_taken");
    // Back-to-back is fine.
    s.book("09:30").await.unwrap();
}

#[tokio::test]
async fn end_of_window_is_outside_hours() {
    let s = setup("outside_hours.wal").await;
    let r = rejection(s.book("10:00").await);
    assert_eq!(r.to_string(), "10:00 is outside hours declared for Monday (09:00-10:00)");
}

#[tokio::test]
async fn other_weekday_has_no_availability() {
    let s = setup("other_day.wal").await;
    let tuesday = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    let r = rejection(
        s.engine
            .request_appointment(
                Ulid::new(),
                booking(s.student, s.teacher, s.subject, at(tuesday, "09:00")),
            )
            .await,
    );
    assert_eq!(r.to_string(), "no availability declared for Tuesday");
}

#[tokio::test]
async fn unknown_teacher_has_no_availability() {
    let engine = engine_at(&test_wal_path("unknown_teacher.wal"));
    let r = rejection(
        engine
            .request_appointment(
                Ulid::new(),
                booking(Ulid::new(), Ulid::new(), Ulid::new(), at(monday(), "09:00")),
            )
            .await,
    );
    assert_eq!(r, Rejection::NoAvailability { day: DayOfWeek::MONDAY });
}

#[tokio::test]
async fn other_subject_booking_still_blocks_teacher() {
    let s = setup("cross_subject.wal").await;
    let other_subject = Ulid::new();
    s.engine
        .add_window(Ulid::new(), new_window(s.teacher, other_subject, "09:00", "10:00"))
        .await
        .unwrap();
    s.book("09:00").await.unwrap();

    let r = rejection(
        s.engine
            .request_appointment(
                Ulid::new(),
                booking(Ulid::new(), s.teacher, other_subject, at(monday(), "09:00")),
            )
            .await,
    );
    assert_eq!(r.kind(), "slot_taken");
}

#[tokio::test]
async fn canceled_appointment_frees_slot() {
    let s = setup("cancel_frees.wal").await;
    let first = s.book("09:00").await.unwrap();
    s.engine
        .cancel_appointment(first.id, s.student, Some("sick".into()))
        .await
        .unwrap();
    s.book("09:00").await.unwrap();
}

#[tokio::test]
async fn booking_input_validation() {
    let s = setup("booking_input.wal").await;
    let own = s
        .engine
        .request_appointment(
            Ulid::new(),
            booking(s.teacher, s.teacher, s.subject, at(monday(), "09:00")),
        )
        .await;
    assert!(matches!(own, Err(EngineError::InvalidInput(_))));

    let negative = s
        .engine
        .request_appointment(Ulid::new(), booking(s.student, s.teacher, s.subject, -1))
        .await;
    assert!(matches!(negative, Err(EngineError::InvalidInput(_))));

    let mut chatty = booking(s.student, s.teacher, s.subject, at(monday(), "09:00"));
    chatty.notes = Some("x".repeat(MAX_TEXT_LEN + 1));
    assert!(matches!(
        s.engine.request_appointment(Ulid::new(), chatty).await,
        Err(EngineError::LimitExceeded(_))
    ));

    let taken = s.book("09:00").await.unwrap();
    let reused = s
        .engine
        .request_appointment(
            taken.id,
            booking(s.student, s.teacher, s.subject, at(monday(), "09:30")),
        )
        .await;
    assert!(matches!(reused, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn concurrent_requests_book_once() {
    let s = setup("concurrent.wal").await;
    let engine = Arc::new(s.engine);
    let when = at(monday(), "09:00");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        let req = booking(Ulid::new(), s.teacher, s.subject, when);
        handles.push(tokio::spawn(async move {
            engine.request_appointment(Ulid::new(), req).await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(EngineError::SlotUnavailable(Rejection::SlotTaken { .. })) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(engine.list_appointments(s.teacher).await.len(), 1);
}

// ── Lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn full_lifecycle_with_feedback() {
    let s = setup("lifecycle.wal").await;
    let a = s.book("09:00").await.unwrap();

    assert!(matches!(
        s.engine.confirm_appointment(a.id, s.student).await,
        Err(EngineError::Forbidden(_))
    ));
    let confirmed = s.engine.confirm_appointment(a.id, s.teacher).await.unwrap();
    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);
    assert!(confirmed.confirmed_at.is_some());

    assert!(matches!(
        s.engine.leave_feedback(a.id, s.student, "great".into()).await,
        Err(EngineError::InvalidInput(_))
    ));

    let completed = s.engine.complete_appointment(a.id, s.teacher).await.unwrap();
    assert_eq!(completed.status, AppointmentStatus::Completed);
    assert!(completed.completed_at.is_some());

    assert!(matches!(
        s.engine.leave_feedback(a.id, s.teacher, "great".into()).await,
        Err(EngineError::Forbidden(_))
    ));
    let reviewed = s.engine.leave_feedback(a.id, s.student, "great".into()).await.unwrap();
    assert_eq!(reviewed.feedback.as_deref(), Some("great"));
    assert_eq!(s.engine.get_appointment(a.id).await.unwrap(), reviewed);

    // Completed appointments keep the slot.
    assert_eq!(rejection(s.book("09:00").await).kind(), "slot_taken");
}

#[tokio::test]
async fn invalid_transitions_rejected() {
    let s = setup("bad_transitions.wal").await;
    let a = s.book("09:00").await.unwrap();

    assert!(matches!(
        s.engine.complete_appointment(a.id, s.teacher).await,
        Err(EngineError::InvalidTransition { from: AppointmentStatus::Pending, .. })
    ));

    s.engine.confirm_appointment(a.id, s.teacher).await.unwrap();
    assert!(matches!(
        s.engine.reject_appointment(a.id, s.teacher, None).await,
        Err(EngineError::InvalidTransition { from: AppointmentStatus::Confirmed, .. })
    ));
    assert!(matches!(
        s.engine.confirm_appointment(a.id, s.teacher).await,
        Err(EngineError::InvalidTransition { .. })
    ));

    let canceled = s
        .engine
        .cancel_appointment(a.id, s.teacher, Some("conference".into()))
        .await
        .unwrap();
    assert_eq!(canceled.cancellation_reason.as_deref(), Some("conference"));
    assert!(matches!(
        s.engine.cancel_appointment(a.id, s.student, None).await,
        Err(EngineError::InvalidTransition { from: AppointmentStatus::Canceled, .. })
    ));
}

#[tokio::test]
async fn teacher_rejects_pending_request() {
    let s = setup("reject_pending.wal").await;
    let a = s.book("09:00").await.unwrap();
    assert!(matches!(
        s.engine.reject_appointment(a.id, s.student, None).await,
        Err(EngineError::Forbidden(_))
    ));
    let rejected = s
        .engine
        .reject_appointment(a.id, s.teacher, Some("not my subject".into()))
        .await
        .unwrap();
    assert_eq!(rejected.status, AppointmentStatus::Canceled);
    assert!(rejected.canceled_at.is_some());
    s.book("09:00").await.unwrap();
}

#[tokio::test]
async fn unknown_appointment_not_found() {
    let engine = engine_at(&test_wal_path("unknown_appt.wal"));
    let id = Ulid::new();
    assert!(matches!(engine.get_appointment(id).await, Err(EngineError::NotFound(x)) if x == id));
    assert!(matches!(
        engine.confirm_appointment(id, Ulid::new()).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Open slots ───────────────────────────────────────────

#[tokio::test]
async fn open_slots_hide_booked_time() {
    let s = setup("open_slots.wal").await;
    let all = s.engine.open_slots(s.teacher, s.subject, monday()).await.unwrap();
    assert_eq!(
        all.iter().map(|o| o.start).collect::<Vec<_>>(),
        vec![at(monday(), "09:00"), at(monday(), "09:30")]
    );
    assert!(all.iter().all(|o| o.window_id == s.window.id));

    s.book("09:00").await.unwrap();
    let open = s.engine.open_slots(s.teacher, s.subject, monday()).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].start, at(monday(), "09:30"));

    let tuesday = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    assert!(s.engine.open_slots(s.teacher, s.subject, tuesday).await.unwrap().is_empty());
    assert!(s.engine.open_slots(Ulid::new(), s.subject, monday()).await.unwrap().is_empty());
}

#[tokio::test]
async fn open_slots_agree_with_validation() {
    let s = setup("open_agree.wal").await;
    s.book("09:30").await.unwrap();
    for slot in s.engine.open_slots(s.teacher, s.subject, monday()).await.unwrap() {
        let decision = s
            .engine
            .validate_appointment_slot(s.teacher, s.subject, slot.start)
            .await
            .unwrap();
        assert!(decision.is_accepted(), "open slot at {} rejected", slot.start);
    }
}

// ── Zone ─────────────────────────────────────────────────

#[tokio::test]
async fn offset_zone_shifts_weekday() {
    let path = test_wal_path("offset_zone.wal");
    let zone = ZonePolicy::parse("-05:00").unwrap();
    let engine = Engine::new(path, Arc::new(NotifyHub::new()), zone).unwrap();
    let (teacher, subject) = (Ulid::new(), Ulid::new());
    let mut w = new_window(teacher, subject, "21:00", "23:00");
    w.day = DayOfWeek::SUNDAY;
    engine.add_window(Ulid::new(), w).await.unwrap();

    // Monday 02:00 UTC is Sunday 21:00 at -05:00.
    let decision = engine
        .validate_appointment_slot(teacher, subject, at(monday(), "02:00"))
        .await
        .unwrap();
    assert!(decision.is_accepted());

    let sunday = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
    let open = engine.open_slots(teacher, subject, sunday).await.unwrap();
    assert_eq!(open.first().map(|o| o.start), Some(at(monday(), "02:00")));
    assert_eq!(open.len(), 4);
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn replay_restores_state() {
    let path = test_wal_path("replay.wal");
    let (teacher, student, subject) = (Ulid::new(), Ulid::new(), Ulid::new());
    let (window, kept, canceled) = {
        let engine = engine_at(&path);
        let window = engine
            .add_window(Ulid::new(), new_window(teacher, subject, "09:00", "10:00"))
            .await
            .unwrap();
        let kept = engine
            .request_appointment(Ulid::new(), booking(student, teacher, subject, at(monday(), "09:00")))
            .await
            .unwrap();
        let kept = engine.confirm_appointment(kept.id, teacher).await.unwrap();
        let canceled = engine
            .request_appointment(Ulid::new(), booking(student, teacher, subject, at(monday(), "09:30")))
            .await
            .unwrap();
        let canceled = engine.cancel_appointment(canceled.id, student, None).await.unwrap();
        (window, kept, canceled)
    };

    let engine = engine_at(&path);
    assert_eq!(engine.list_windows(teacher).await, vec![window]);
    assert_eq!(engine.get_appointment(kept.id).await.unwrap(), kept);
    assert_eq!(engine.get_appointment(canceled.id).await.unwrap(), canceled);

    // The canceled slot is bookable, the confirmed one is not.
    let r = engine
        .request_appointment(Ulid::new(), booking(student, teacher, subject, at(monday(), "09:00")))
        .await;
    assert_eq!(rejection(r).kind(), "slot_taken");
    engine
        .request_appointment(Ulid::new(), booking(student, teacher, subject, at(monday(), "09:30")))
        .await
        .unwrap();
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    let (teacher, student, subject) = (Ulid::new(), Ulid::new(), Ulid::new());
    let appointment = {
        let engine = engine_at(&path);
        engine
            .add_window(Ulid::new(), new_window(teacher, subject, "09:00", "10:00"))
            .await
            .unwrap();
        for _ in 0..5 {
            let w = engine
                .add_window(Ulid::new(), new_window(teacher, subject, "15:00", "16:00"))
                .await
                .unwrap();
            engine.remove_window(w.id, teacher).await.unwrap();
        }
        let a = engine
            .request_appointment(Ulid::new(), booking(student, teacher, subject, at(monday(), "09:00")))
            .await
            .unwrap();
        let a = engine.confirm_appointment(a.id, teacher).await.unwrap();
        let before = std::fs::metadata(&path).unwrap().len();

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert!(std::fs::metadata(&path).unwrap().len() < before);
        a
    };

    let engine = engine_at(&path);
    assert_eq!(engine.list_windows(teacher).await.len(), 1);
    assert_eq!(engine.list_appointments(teacher).await, vec![appointment]);
}

#[tokio::test]
async fn writes_after_compaction_survive() {
    let path = test_wal_path("after_compaction.wal");
    let (teacher, subject) = (Ulid::new(), Ulid::new());
    {
        let engine = engine_at(&path);
        engine
            .add_window(Ulid::new(), new_window(teacher, subject, "09:00", "10:00"))
            .await
            .unwrap();
        engine.compact_wal().await.unwrap();
        engine
            .add_window(Ulid::new(), new_window(teacher, subject, "11:00", "12:00"))
            .await
            .unwrap();
    }
    let engine = engine_at(&path);
    assert_eq!(engine.list_windows(teacher).await.len(), 2);
}

#[tokio::test]
async fn writes_after_torn_tail_restart_survive() {
    use std::io::Write;

    let path = test_wal_path("torn_tail_restart.wal");
    let (teacher, subject) = (Ulid::new(), Ulid::new());
    {
        let engine = engine_at(&path);
        engine
            .add_window(Ulid::new(), new_window(teacher, subject, "09:00", "10:00"))
            .await
            .unwrap();
    }
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[0x20, 0x00, 0x00, 0x00, 0xaa, 0xbb]).unwrap();
    }

    let second = {
        let engine = engine_at(&path);
        assert_eq!(engine.list_windows(teacher).await.len(), 1);
        engine
            .add_window(Ulid::new(), new_window(teacher, subject, "11:00", "12:00"))
            .await
            .unwrap()
    };

    let engine = engine_at(&path);
    let windows = engine.list_windows(teacher).await;
    assert_eq!(windows.len(), 2);
    assert!(windows.contains(&second));
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn participants_are_notified() {
    let s = setup("notify.wal").await;
    let mut teacher_rx = s.engine.notify.subscribe(s.teacher);
    let mut student_rx = s.engine.notify.subscribe(s.student);

    let a = s.book("09:00").await.unwrap();
    let expected = Event::AppointmentRequested { appointment: a.clone() };
    assert_eq!(teacher_rx.recv().await.unwrap(), expected);
    assert_eq!(student_rx.recv().await.unwrap(), expected);

    let confirmed = s.engine.confirm_appointment(a.id, s.teacher).await.unwrap();
    let expected = Event::AppointmentUpdated { appointment: confirmed };
    assert_eq!(teacher_rx.recv().await.unwrap(), expected);
    assert_eq!(student_rx.recv().await.unwrap(), expected);

    s.engine.remove_window(s.window.id, s.teacher).await.unwrap();
    assert!(matches!(teacher_rx.recv().await.unwrap(), Event::WindowRemoved { .. }));
    assert!(student_rx.try_recv().is_err());
}

// ── Limits ───────────────────────────────────────────────

#[tokio::test]
async fn oversized_feedback_rejected() {
    let s = setup("feedback_limit.wal").await;
    let a = s.book("09:00").await.unwrap();
    s.engine.confirm_appointment(a.id, s.teacher).await.unwrap();
    s.engine.complete_appointment(a.id, s.teacher).await.unwrap();
    assert!(matches!(
        s.engine.leave_feedback(a.id, s.student, "x".repeat(MAX_TEXT_LEN + 1)).await,
        Err(EngineError::LimitExceeded(_))
    ));
}
