//! The human interaction surface: `/r/{request_id}/` and its submit
//! endpoint.
//!
//! Both endpoints are gated by the single-use token carried in the `k`
//! query component of the interaction URL. Submissions redirect back to
//! the page, including when an answer already exists, so a double-post is
//! idempotent for the person clicking.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Form;
use serde::Deserialize;

use super::{page, AppState};

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    k: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitForm {
    #[serde(default)]
    action: String,
    #[serde(default)]
    text: String,
}

pub async fn show(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Response {
    let Some(token) = query.k.filter(|k| !k.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing token").into_response();
    };
    match state.engine.page_view(&request_id, &token).await {
        Ok(view) => Html(page::render(&view, &token)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn submit(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Query(query): Query<TokenQuery>,
    Form(form): Form<SubmitForm>,
) -> Response {
    let Some(token) = query.k.filter(|k| !k.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing token").into_response();
    };
    match state
        .engine
        .submit(&request_id, &token, &form.action, &form.text)
        .await
    {
        // Recorded or already answered: either way, back to the page.
        Ok(_) => Redirect::to(&format!("./?k={}", urlencoding::encode(&token))).into_response(),
        Err(err) => err.into_response(),
    }
}
