//! ask4me - Human-in-the-loop rendezvous service.
//!
//! A programmatic caller submits a question to `/v1/ask`, the service pushes
//! an interaction link through an out-of-band notification channel, a human
//! opens the link in a browser and answers, and the original call returns
//! that answer synchronously.
//!
//! The library is organized around a per-request lifecycle engine whose
//! terminal state is produced by exactly one of three disjoint events:
//!
//! - `user.submitted` - the human answered via the interaction page
//! - `request.expired` - the deadline passed with no answer
//! - `notify.failed` - the notification channel rejected the dispatch
//!
//! Waiters rendezvous with that terminal state through the in-memory event
//! hub (live publish plus a short-TTL terminal cache), backed by the
//! append-only durable event log, which is the authoritative replay source.

pub mod config;
pub mod error;
pub mod event;
pub mod http;
pub mod hub;
pub mod ids;
pub mod lifecycle;
pub mod mcd;
pub mod notify;
pub mod store;
