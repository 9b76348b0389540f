//! JSON-lines protocol: one request object per line in, one response per
//! line out. Subscribed connections also receive `event` lines as schedule
//! changes land.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::engine::{Engine, EngineError, SlotDecision};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability::{REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};

const PUSH_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    ValidateSlot {
        teacher_id: Ulid,
        subject_id: Ulid,
        at: Ms,
    },
    OpenSlots {
        teacher_id: Ulid,
        subject_id: Ulid,
        date: NaiveDate,
    },
    AddWindow {
        #[serde(default = "Ulid::new")]
        id: Ulid,
        window: NewWindow,
    },
    UpdateWindow {
        id: Ulid,
        actor: Ulid,
        #[serde(default)]
        patch: WindowPatch,
    },
    RemoveWindow {
        id: Ulid,
        actor: Ulid,
    },
    GetWindow {
        id: Ulid,
    },
    ListWindows {
        teacher_id: Ulid,
    },
    RequestAppointment {
        #[serde(default = "Ulid::new")]
        id: Ulid,
        appointment: NewAppointment,
    },
    ConfirmAppointment {
        id: Ulid,
        actor: Ulid,
    },
    RejectAppointment {
        id: Ulid,
        actor: Ulid,
        #[serde(default)]
        reason: Option<String>,
    },
    CompleteAppointment {
        id: Ulid,
        actor: Ulid,
    },
    CancelAppointment {
        id: Ulid,
        actor: Ulid,
        #[serde(default)]
        reason: Option<String>,
    },
    LeaveFeedback {
        id: Ulid,
        actor: Ulid,
        feedback: String,
    },
    GetAppointment {
        id: Ulid,
    },
    ListAppointments {
        teacher_id: Ulid,
    },
    Subscribe {
        user_id: Ulid,
    },
    Unsubscribe {
        user_id: Ulid,
    },
}

impl Request {
    /// Short label for metrics.
    pub fn op(&self) -> &'static str {
        match self {
            Request::ValidateSlot { .. } => "validate_slot",
            Request::OpenSlots { .. } => "open_slots",
            Request::AddWindow { .. } => "add_window",
            Request::UpdateWindow { .. } => "update_window",
            Request::RemoveWindow { .. } => "remove_window",
            Request::GetWindow { .. } => "get_window",
            Request::ListWindows { .. } => "list_windows",
            Request::RequestAppointment { .. } => "request_appointment",
            Request::ConfirmAppointment { .. } => "confirm_appointment",
            Request::RejectAppointment { .. } => "reject_appointment",
            Request::CompleteAppointment { .. } => "complete_appointment",
            Request::CancelAppointment { .. } => "cancel_appointment",
            Request::LeaveFeedback { .. } => "leave_feedback",
            Request::GetAppointment { .. } => "get_appointment",
            Request::ListAppointments { .. } => "list_appointments",
            Request::Subscribe { .. } => "subscribe",
            Request::Unsubscribe { .. } => "unsubscribe",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok { data: serde_json::Value },
    /// The slot cannot be booked; `reason` is meant for the student.
    Rejected { kind: &'static str, reason: String },
    Error { code: &'static str, message: String },
    /// Pushed to subscribers; never a reply to a request.
    Event { event: Event },
}

impl Response {
    fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Response::Ok { data },
            Err(e) => Response::error("internal", e.to_string()),
        }
    }

    fn error(code: &'static str, message: impl Into<String>) -> Self {
        Response::Error {
            code,
            message: message.into(),
        }
    }

    fn status_label(&self) -> &'static str {
        match self {
            Response::Ok { .. } | Response::Event { .. } => "ok",
            Response::Rejected { .. } => "rejected",
            Response::Error { .. } => "error",
        }
    }
}

impl From<EngineError> for Response {
    fn from(e: EngineError) -> Self {
        let code = match &e {
            EngineError::SlotUnavailable(rejection) => {
                return Response::Rejected {
                    kind: rejection.kind(),
                    reason: rejection.to_string(),
                };
            }
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Storage(_) | EngineError::WalError(_) => "internal",
        };
        Response::error(code, e.to_string())
    }
}

fn reply<T: Serialize>(result: Result<T, EngineError>) -> Response {
    match result {
        Ok(data) => Response::ok(data),
        Err(e) => e.into(),
    }
}

/// Per-connection state: the engine plus any live subscriptions.
struct Session {
    engine: Arc<Engine>,
    push_tx: mpsc::Sender<Event>,
    listeners: HashMap<Ulid, JoinHandle<()>>,
}

impl Session {
    async fn handle(&mut self, request: Request) -> Response {
        let engine = &self.engine;
        match request {
            Request::ValidateSlot {
                teacher_id,
                subject_id,
                at,
            } => match engine.validate_appointment_slot(teacher_id, subject_id, at).await {
                Ok(SlotDecision::Accepted { window_id, slot }) => Response::ok(json!({
                    "accepted": true,
                    "window_id": window_id,
                    "slot": slot,
                })),
                Ok(SlotDecision::Rejected(rejection)) => Response::Rejected {
                    kind: rejection.kind(),
                    reason: rejection.to_string(),
                },
                Err(e) => e.into(),
            },
            Request::OpenSlots {
                teacher_id,
                subject_id,
                date,
            } => reply(engine.open_slots(teacher_id, subject_id, date).await),
            Request::AddWindow { id, window } => reply(engine.add_window(id, window).await),
            Request::UpdateWindow { id, actor, patch } => {
                reply(engine.update_window(id, actor, patch).await)
            }
            Request::RemoveWindow { id, actor } => reply(
                engine
                    .remove_window(id, actor)
                    .await
                    .map(|()| json!({ "removed": id })),
            ),
            Request::GetWindow { id } => reply(engine.get_window(id).await),
            Request::ListWindows { teacher_id } => Response::ok(engine.list_windows(teacher_id).await),
            Request::RequestAppointment { id, appointment } => {
                reply(engine.request_appointment(id, appointment).await)
            }
            Request::ConfirmAppointment { id, actor } => {
                reply(engine.confirm_appointment(id, actor).await)
            }
            Request::RejectAppointment { id, actor, reason } => {
                reply(engine.reject_appointment(id, actor, reason).await)
            }
            Request::CompleteAppointment { id, actor } => {
                reply(engine.complete_appointment(id, actor).await)
            }
            Request::CancelAppointment { id, actor, reason } => {
                reply(engine.cancel_appointment(id, actor, reason).await)
            }
            Request::LeaveFeedback { id, actor, feedback } => {
                reply(engine.leave_feedback(id, actor, feedback).await)
            }
            Request::GetAppointment { id } => reply(engine.get_appointment(id).await),
            Request::ListAppointments { teacher_id } => {
                Response::ok(engine.list_appointments(teacher_id).await)
            }
            Request::Subscribe { user_id } => {
                if !self.listeners.contains_key(&user_id) {
                    let rx = engine.notify.subscribe(user_id);
                    let handle = tokio::spawn(forward(user_id, rx, self.push_tx.clone()));
                    self.listeners.insert(user_id, handle);
                }
                Response::ok(json!({ "subscribed": user_id }))
            }
            Request::Unsubscribe { user_id } => {
                if let Some(handle) = self.listeners.remove(&user_id) {
                    handle.abort();
                    let _ = handle.await;
                    engine.notify.release(&user_id);
                }
                Response::ok(json!({ "unsubscribed": user_id }))
            }
        }
    }

    async fn close(self) {
        for (user_id, handle) in self.listeners {
            handle.abort();
            let _ = handle.await;
            self.engine.notify.release(&user_id);
        }
    }
}

/// Relay one user's events onto the connection until either side goes away.
async fn forward(user_id: Ulid, mut rx: broadcast::Receiver<Event>, tx: mpsc::Sender<Event>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(user = %user_id, skipped, "subscriber lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn write_response<T>(framed: &mut Framed<T, LinesCodec>, response: &Response) -> io::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let line = serde_json::to_string(response).map_err(io::Error::other)?;
    framed.send(line).await.map_err(|e| match e {
        LinesCodecError::Io(e) => e,
        other => io::Error::other(other),
    })
}

async fn respond(session: &mut Session, line: &str) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            metrics::counter!(REQUESTS_TOTAL, "op" => "unknown", "status" => "error").increment(1);
            return Response::error("bad_request", e.to_string());
        }
    };
    let op = request.op();
    let started = std::time::Instant::now();
    let response = session.handle(request).await;
    metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
    metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => response.status_label()).increment(1);
    response
}

/// Serve one client until it disconnects.
pub async fn process_connection<T>(io: T, engine: Arc<Engine>) -> io::Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (push_tx, mut push_rx) = mpsc::channel(PUSH_CAPACITY);
    let mut session = Session {
        engine,
        push_tx,
        listeners: HashMap::new(),
    };

    let result = loop {
        tokio::select! {
            line = framed.next() => {
                let response = match line {
                    None => break Ok(()),
                    Some(Ok(line)) if line.trim().is_empty() => continue,
                    Some(Ok(line)) => respond(&mut session, &line).await,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        Response::error("line_too_long", format!("request exceeds {MAX_LINE_LEN} bytes"))
                    }
                    Some(Err(LinesCodecError::Io(e))) => break Err(e),
                };
                if let Err(e) = write_response(&mut framed, &response).await {
                    break Err(e);
                }
            }
            Some(event) = push_rx.recv() => {
                if let Err(e) = write_response(&mut framed, &Response::Event { event }).await {
                    break Err(e);
                }
            }
        }
    };

    session.close().await;
    result
}
