//! The programmatic endpoint `/v1/ask`.
//!
//! Long-poll JSON mode (default) blocks until the request's terminal event
//! and returns it as a single document. Stream mode (`stream=true`) renders
//! the event history and live events as a text event stream with periodic
//! heartbeats and a final `[DONE]` marker.
//!
//! Stream resumption combines a durable replay (strictly after the caller's
//! `last_event_id` cursor) with an event-id dedup set over the live
//! subscription; the hub alone is lossy by design and never trusted as the
//! only source.

use std::collections::HashSet;
use std::convert::Infallible;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::AppState;
use crate::error::ServiceError;
use crate::event::Event;
use crate::lifecycle::{AskQuestion, JoinOutcome};

/// Stream terminator sent after the terminal event.
const DONE_MARKER: &str = "[DONE]";

static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-ask4me-request-id");

/// Query parameters of `/v1/ask`. The question fields are only read for
/// GET requests; `key` is consumed by the auth layer.
#[derive(Debug, Default, Deserialize)]
pub struct AskParams {
    pub request_id: Option<String>,
    pub stream: Option<String>,
    pub last_event_id: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub mcd: Option<String>,
    pub expires_in_seconds: Option<String>,
    #[allow(dead_code)]
    pub key: Option<String>,
}

/// Long-poll response document.
#[derive(Debug, Serialize)]
struct AskWaitResponse {
    request_id: String,
    last_event_type: &'static str,
    last_event_id: String,
    data: Value,
}

pub async fn handle_ask(
    State(state): State<AppState>,
    method: Method,
    Query(params): Query<AskParams>,
    body: Bytes,
) -> Response {
    let question = match parse_question(&method, &params, &body) {
        Ok(question) => question,
        Err(err) => return err.into_response(),
    };
    let hint = params
        .request_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let (request_id, outcome) = match state.engine.create_or_join(hint, question).await {
        Ok(resolved) => resolved,
        Err(err) => return err.into_response(),
    };

    if parse_bool_flag(params.stream.as_deref()) {
        let cursor = params
            .last_event_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        stream_response(state, request_id, outcome, cursor)
    } else {
        long_poll_response(state, request_id, outcome).await
    }
}

/// Waits for the terminal event and returns the single JSON document.
async fn long_poll_response(state: AppState, request_id: String, outcome: JoinOutcome) -> Response {
    let terminal = match outcome {
        JoinOutcome::Terminal => match state.engine.peek_terminal(&request_id) {
            Ok(Some(event)) => event,
            Ok(None) => return ServiceError::NotFound.into_response(),
            Err(err) => return err.into_response(),
        },
        JoinOutcome::Created { .. } | JoinOutcome::Pending => {
            match state.engine.wait_terminal(&request_id).await {
                Ok(event) => event,
                Err(err) => return err.into_response(),
            }
        }
    };

    let response = AskWaitResponse {
        request_id: request_id.clone(),
        last_event_type: terminal.event_type.as_str(),
        last_event_id: terminal.id.clone(),
        data: terminal.data,
    };
    (
        [(REQUEST_ID_HEADER.clone(), request_id)],
        Json(response),
    )
        .into_response()
}

/// Renders the event history and live events as a text event stream.
fn stream_response(
    state: AppState,
    request_id: String,
    outcome: JoinOutcome,
    cursor: Option<String>,
) -> Response {
    let engine = state.engine.clone();
    let heartbeat_interval = state.heartbeat_interval;
    let terminal_only = matches!(outcome, JoinOutcome::Terminal);
    let id = request_id.clone();

    let stream = async_stream::stream! {
        let mut seen: HashSet<String> = HashSet::new();
        if let Some(c) = &cursor {
            seen.insert(c.clone());
        }

        if terminal_only {
            // The request already terminated: drain whatever the cursor has
            // not seen and close.
            match engine.store().list_events_after(&id, cursor.as_deref()) {
                Ok(events) => {
                    for event in events {
                        seen.insert(event.id.clone());
                        yield Ok::<_, Infallible>(SseEvent::default().data(event.to_wire_json()));
                    }
                }
                Err(err) => warn!(request_id = %id, error = %err, "terminal replay failed"),
            }
            yield Ok(SseEvent::default().data(DONE_MARKER));
            return;
        }

        // Subscribe before draining the log so an event landing in between
        // is seen by one of the two sources; the dedup set drops overlap.
        let mut subscription = engine.hub().subscribe(&id);

        match engine.store().list_events_after(&id, cursor.as_deref()) {
            Ok(events) => {
                for event in events {
                    seen.insert(event.id.clone());
                    let terminal = event.event_type.is_terminal();
                    yield Ok(SseEvent::default().data(event.to_wire_json()));
                    if terminal {
                        yield Ok(SseEvent::default().data(DONE_MARKER));
                        return;
                    }
                }
            }
            Err(err) => warn!(request_id = %id, error = %err, "stream replay failed"),
        }

        let mut ticker = tokio::time::interval(heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // consume the immediate first tick

        loop {
            // Yields stay outside the select; arms only pick the step.
            let received = tokio::select! {
                _ = ticker.tick() => None,
                received = subscription.recv() => Some(received),
            };
            match received {
                None => {
                    yield Ok(SseEvent::default().data(Event::heartbeat(&id).to_wire_json()));
                }
                Some(Some(event)) => {
                    if !event.id.is_empty() && !seen.insert(event.id.clone()) {
                        continue;
                    }
                    let terminal = event.event_type.is_terminal();
                    yield Ok(SseEvent::default().data(event.to_wire_json()));
                    if terminal {
                        yield Ok(SseEvent::default().data(DONE_MARKER));
                        return;
                    }
                }
                Some(None) => {
                    // The hub released this request's subscribers, so a
                    // terminal event fired; recover it from the cache or the
                    // log in case the live publish was missed.
                    match engine.peek_terminal(&id) {
                        Ok(Some(event)) => {
                            if event.id.is_empty() || seen.insert(event.id.clone()) {
                                yield Ok(SseEvent::default().data(event.to_wire_json()));
                            }
                        }
                        Ok(None) => {}
                        Err(err) => {
                            warn!(request_id = %id, error = %err, "terminal recovery failed");
                        }
                    }
                    yield Ok(SseEvent::default().data(DONE_MARKER));
                    return;
                }
            }
        }
    };

    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(REQUEST_ID_HEADER.clone(), value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

/// Question extraction: JSON body for POST (empty body reads as `{}`),
/// query parameters for GET.
fn parse_question(
    method: &Method,
    params: &AskParams,
    body: &Bytes,
) -> Result<AskQuestion, ServiceError> {
    if *method == Method::POST {
        let bytes: &[u8] = if body.is_empty() { b"{}" } else { body.as_ref() };
        serde_json::from_slice(bytes).map_err(|_| ServiceError::bad_request("bad request"))
    } else if *method == Method::GET {
        Ok(AskQuestion {
            title: params.title.clone().unwrap_or_default(),
            body: params.body.clone().unwrap_or_default(),
            mcd: params.mcd.clone().unwrap_or_default(),
            expires_in_seconds: params
                .expires_in_seconds
                .as_deref()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0),
        })
    } else {
        Err(ServiceError::MethodNotAllowed)
    }
}

/// Permissive boolean: `1,t,true,y,yes,on` case-insensitively.
fn parse_bool_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.unwrap_or_default().trim().to_lowercase().as_str(),
        "1" | "t" | "true" | "y" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_flag_accepts_the_permissive_set() {
        for yes in ["1", "t", "true", "y", "yes", "on", "TRUE", " Yes "] {
            assert!(parse_bool_flag(Some(yes)), "{yes} should parse true");
        }
        for no in ["", "0", "false", "no", "off", "2", "enabled"] {
            assert!(!parse_bool_flag(Some(no)), "{no} should parse false");
        }
        assert!(!parse_bool_flag(None));
    }

    #[test]
    fn post_question_parses_json_body() {
        let body = Bytes::from_static(br#"{"title":"T","expires_in_seconds":9}"#);
        let q = parse_question(&Method::POST, &AskParams::default(), &body).unwrap();
        assert_eq!(q.title, "T");
        assert_eq!(q.expires_in_seconds, 9);
    }

    #[test]
    fn post_empty_body_reads_as_empty_object() {
        let q = parse_question(&Method::POST, &AskParams::default(), &Bytes::new()).unwrap();
        assert!(q.title.is_empty());
    }

    #[test]
    fn post_malformed_body_is_bad_request() {
        let body = Bytes::from_static(b"{nope");
        let err = parse_question(&Method::POST, &AskParams::default(), &body).unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));
    }

    #[test]
    fn get_question_reads_query_params() {
        let params = AskParams {
            title: Some("T".to_string()),
            expires_in_seconds: Some("12".to_string()),
            ..Default::default()
        };
        let q = parse_question(&Method::GET, &params, &Bytes::new()).unwrap();
        assert_eq!(q.title, "T");
        assert_eq!(q.expires_in_seconds, 12);

        let params = AskParams {
            expires_in_seconds: Some("garbage".to_string()),
            ..Default::default()
        };
        let q = parse_question(&Method::GET, &params, &Bytes::new()).unwrap();
        assert_eq!(q.expires_in_seconds, 0);
    }
}
