//! Request lifecycle engine.
//!
//! Creates requests, mints tokens, runs the expiry timer, records the one
//! permitted submission, and emits events in canonical order: persist to
//! the durable log, publish on the hub, and, for terminal events, install
//! in the terminal cache.
//!
//! The notifier and expiry timer run as detached tasks so that cancelling
//! a waiting caller never orphans the request.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::event::{Event, EventType, TERMINAL_EVENT_TYPES};
use crate::hub::EventHub;
use crate::ids;
use crate::mcd::{self, ControlSpec};
use crate::notify::{Notifier, NotifyReport};
use crate::store::{RequestStatus, Store, StoreError};

/// A question as accepted from the caller, before normalization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AskQuestion {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub mcd: String,
    #[serde(default)]
    pub expires_in_seconds: i64,
}

impl AskQuestion {
    /// Trims fields and applies defaults for anything left blank.
    fn normalize(&mut self) {
        self.title = self.title.trim().to_string();
        self.body = self.body.trim().to_string();
        self.mcd = self.mcd.trim().to_string();
        if self.title.is_empty() {
            self.title = "Ask4Me".to_string();
        }
        if self.body.is_empty() {
            self.body = "Please respond.".to_string();
        }
        if self.mcd.is_empty() {
            self.mcd = ":::buttons\n- [OK](ok)\n:::".to_string();
        }
    }
}

/// How `create_or_join` resolved the request id.
#[derive(Debug)]
pub enum JoinOutcome {
    /// A fresh request was created; its `request.created` event id is the
    /// stream cursor origin.
    Created { first_event_id: String },
    /// The request exists and has not terminated.
    Pending,
    /// The request has already terminated; the caller should read the
    /// terminal event from the cache or the durable log.
    Terminal,
}

/// Result of a submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Recorded,
    /// An answer already exists (or the request otherwise terminated); the
    /// surface redirects rather than failing.
    AlreadyDone,
}

/// Everything the interaction page needs to render.
#[derive(Debug)]
pub struct PageView {
    pub title: String,
    pub body: String,
    pub controls: ControlSpec,
    /// True once the request has terminated; the page shows the done panel
    /// and no controls.
    pub done: bool,
}

/// The lifecycle engine. Cheap to clone; clones share the store, hub, and
/// notifier.
#[derive(Clone)]
pub struct Engine {
    store: Arc<Store>,
    hub: EventHub,
    notifier: Arc<Notifier>,
    base_url: String,
    default_expires_in: i64,
}

impl Engine {
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        hub: EventHub,
        notifier: Arc<Notifier>,
        base_url: impl Into<String>,
        default_expires_in: i64,
    ) -> Self {
        Self {
            store,
            hub,
            notifier,
            base_url: base_url.into(),
            default_expires_in,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    #[must_use]
    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Resolves a request id: mints one (creating the request), joins a
    /// pending one, or reports that the id already terminated.
    ///
    /// A provided hint must pass the id-validity predicate. An unknown hint
    /// creates the request under that id so a caller can resume with a
    /// stable identifier across reconnects.
    pub async fn create_or_join(
        &self,
        request_id_hint: Option<&str>,
        question: AskQuestion,
    ) -> Result<(String, JoinOutcome), ServiceError> {
        let request_id = match request_id_hint {
            None => ids::new_request_id(),
            Some(hint) => {
                if !ids::is_valid_request_id(hint) {
                    return Err(ServiceError::bad_request("invalid request_id"));
                }
                hint.trim().to_string()
            }
        };

        match self.store.get_request_state(&request_id)? {
            None => {
                let first_event_id = self.create(&request_id, question).await?;
                Ok((request_id, JoinOutcome::Created { first_event_id }))
            }
            Some(state) if state.status.is_terminal() => Ok((request_id, JoinOutcome::Terminal)),
            Some(_) => Ok((request_id, JoinOutcome::Pending)),
        }
    }

    /// Creates the request row, token, and `request.created` event, then
    /// detaches the notifier and expiry tasks.
    async fn create(&self, request_id: &str, mut question: AskQuestion) -> Result<String, ServiceError> {
        question.normalize();
        let mut expires_in = question.expires_in_seconds;
        if expires_in <= 0 {
            expires_in = self.default_expires_in;
        }
        let expires_at = Utc::now() + Duration::seconds(expires_in);

        self.store.create_request(
            request_id,
            &question.title,
            &question.body,
            &question.mcd,
            RequestStatus::Created,
            expires_at,
        )?;

        let token_plain = ids::new_token();
        self.store
            .insert_token(request_id, &ids::token_hash_hex(&token_plain), expires_at)?;

        let interaction_url = self.interaction_url(request_id, &token_plain);
        let created = Event::new(
            request_id,
            EventType::RequestCreated,
            json!({
                "interaction_url": interaction_url,
                "expires_at": expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            }),
        );
        let first_event_id = created.id.clone();
        self.emit(&created)?;

        info!(request_id, %expires_at, "request created");

        let engine = self.clone();
        let id = request_id.to_string();
        let (title, body) = (question.title.clone(), question.body.clone());
        tokio::spawn(async move {
            engine.run_notifier(&id, &title, &body, &interaction_url).await;
        });

        let engine = self.clone();
        let id = request_id.to_string();
        tokio::spawn(async move {
            engine.run_expiry(&id, expires_at).await;
        });

        Ok(first_event_id)
    }

    /// Records the one permitted submission from the interaction surface.
    pub async fn submit(
        &self,
        request_id: &str,
        token_plain: &str,
        action: &str,
        text: &str,
    ) -> Result<SubmitOutcome, ServiceError> {
        let token_hash = ids::token_hash_hex(token_plain);
        if !self.store.verify_token(request_id, &token_hash)? {
            return Err(ServiceError::Forbidden);
        }
        let state = self
            .store
            .get_request_state(request_id)?
            .ok_or(ServiceError::NotFound)?;
        if Utc::now() > state.expires_at {
            return Err(ServiceError::Gone);
        }
        if state.status.is_terminal() {
            return Ok(SubmitOutcome::AlreadyDone);
        }

        let action = action.trim();
        let text = text.trim();
        if action.is_empty() && text.is_empty() {
            return Err(ServiceError::bad_request("empty submission"));
        }

        match self.store.insert_answer(request_id, action, text) {
            Ok(()) => {}
            Err(StoreError::Duplicate) => return Ok(SubmitOutcome::AlreadyDone),
            Err(err) => return Err(err.into()),
        }

        self.store.mark_token_used(request_id, &token_hash)?;
        self.store
            .update_request_status(request_id, RequestStatus::Submitted)?;

        let event = Event::new(
            request_id,
            EventType::UserSubmitted,
            json!({ "action": action, "text": text }),
        );
        self.emit(&event)?;
        self.hub.set_terminal(event);
        info!(request_id, "submission recorded");
        Ok(SubmitOutcome::Recorded)
    }

    /// Validates a token and loads everything the interaction page renders.
    /// Emits `user.page_loaded` for requests that have not terminated.
    pub async fn page_view(
        &self,
        request_id: &str,
        token_plain: &str,
    ) -> Result<PageView, ServiceError> {
        let token_hash = ids::token_hash_hex(token_plain);
        if !self.store.verify_token(request_id, &token_hash)? {
            return Err(ServiceError::Forbidden);
        }
        let state = self
            .store
            .get_request_state(request_id)?
            .ok_or(ServiceError::NotFound)?;
        if Utc::now() > state.expires_at {
            return Err(ServiceError::Gone);
        }
        let fields = self
            .store
            .read_request_display_fields(request_id)?
            .ok_or(ServiceError::NotFound)?;

        let done = state.status.is_terminal();
        if !done {
            let event = Event::new(request_id, EventType::UserPageLoaded, json!({}));
            self.emit(&event)?;
        }

        Ok(PageView {
            title: fields.title,
            body: fields.body,
            controls: mcd::parse(&fields.mcd),
            done,
        })
    }

    /// Blocks until the request's terminal event is available, consulting
    /// the terminal cache, the durable log, and finally a fresh
    /// subscription (re-checking both after subscribing so a terminal that
    /// fires in between is never missed).
    pub async fn wait_terminal(&self, request_id: &str) -> Result<Event, ServiceError> {
        if let Some(event) = self.hub.get_terminal(request_id) {
            return Ok(event);
        }
        if let Some(event) = self
            .store
            .latest_event_of_types(request_id, &TERMINAL_EVENT_TYPES)?
        {
            return Ok(event);
        }

        let mut subscription = self.hub.subscribe(request_id);

        if let Some(event) = self.hub.get_terminal(request_id) {
            return Ok(event);
        }
        if let Some(event) = self
            .store
            .latest_event_of_types(request_id, &TERMINAL_EVENT_TYPES)?
        {
            return Ok(event);
        }

        loop {
            match subscription.recv().await {
                Some(event) if event.event_type.is_terminal() => return Ok(event),
                Some(_) => continue,
                None => {
                    // The hub released the subscriber set: the terminal
                    // event fired. Fetch it from the cache or the log.
                    if let Some(event) = self.hub.get_terminal(request_id) {
                        return Ok(event);
                    }
                    return self
                        .store
                        .latest_event_of_types(request_id, &TERMINAL_EVENT_TYPES)?
                        .ok_or_else(|| {
                            ServiceError::Internal("subscription closed without terminal".into())
                        });
                }
            }
        }
    }

    /// Reads the terminal event without waiting: cache first, then log.
    pub fn peek_terminal(&self, request_id: &str) -> Result<Option<Event>, ServiceError> {
        if let Some(event) = self.hub.get_terminal(request_id) {
            return Ok(Some(event));
        }
        Ok(self
            .store
            .latest_event_of_types(request_id, &TERMINAL_EVENT_TYPES)?)
    }

    /// Persist, then publish; terminal installation is the caller's step.
    fn emit(&self, event: &Event) -> Result<(), ServiceError> {
        self.store.insert_event(event)?;
        self.hub.publish(event);
        Ok(())
    }

    /// Detached task: dispatch the notification and emit the classified
    /// outcome, unless the request terminated in the meantime.
    async fn run_notifier(&self, request_id: &str, title: &str, body: &str, interaction_url: &str) {
        let report = self.notifier.dispatch(title, body, interaction_url).await;

        let still_live = matches!(
            self.store.get_request_state(request_id),
            Ok(Some(state)) if !state.status.is_terminal()
        );
        if !still_live {
            debug!(request_id, "request terminated before notify outcome, skipping");
            return;
        }

        match report {
            NotifyReport::Sent { payload } => {
                let event = Event::new(request_id, EventType::NotifySent, payload);
                if let Err(err) = self.emit(&event) {
                    warn!(request_id, error = %err, "failed to record notify.sent");
                    return;
                }
                let _ = self
                    .store
                    .update_request_status(request_id, RequestStatus::Delivered);
            }
            NotifyReport::Failed { payload } => {
                let event = Event::new(request_id, EventType::NotifyFailed, payload);
                if let Err(err) = self.emit(&event) {
                    warn!(request_id, error = %err, "failed to record notify.failed");
                    return;
                }
                self.hub.set_terminal(event);
                let _ = self
                    .store
                    .update_request_status(request_id, RequestStatus::NotifyFailed);
            }
        }
    }

    /// Detached task: sleep until the deadline, then expire the request if
    /// nothing else terminated it first.
    async fn run_expiry(&self, request_id: &str, expires_at: DateTime<Utc>) {
        let wait = (expires_at - Utc::now())
            .to_std()
            .unwrap_or(StdDuration::ZERO);
        tokio::time::sleep(wait).await;

        match self.store.has_answer(request_id) {
            Ok(false) => {}
            // Answered, or the store is unreachable; either way leave state alone.
            _ => return,
        }
        match self.store.get_request_state(request_id) {
            Ok(Some(state)) if !state.status.is_terminal() => {}
            _ => return,
        }

        if let Err(err) = self
            .store
            .update_request_status(request_id, RequestStatus::Expired)
        {
            warn!(request_id, error = %err, "failed to mark request expired");
            return;
        }
        let event = Event::new(request_id, EventType::RequestExpired, json!({}));
        if let Err(err) = self.emit(&event) {
            warn!(request_id, error = %err, "failed to record request.expired");
            return;
        }
        self.hub.set_terminal(event);
        info!(request_id, "request expired");
    }

    /// Interaction URL for a request: `<base>/r/<id>/?k=<token>`, with the
    /// id path-escaped and the token query-escaped.
    fn interaction_url(&self, request_id: &str, token_plain: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!(
            "{base}/r/{}/?k={}",
            urlencoding::encode(request_id),
            urlencoding::encode(token_plain)
        )
    }
}
