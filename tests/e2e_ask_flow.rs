//! End-to-end flows over a live listener: long-poll ask, browser-simulated
//! submission, expiry, notification failure, and resumption.

mod helpers;

use std::time::Duration;

use helpers::{spawn, SseReader, API_KEY};
use reqwest::StatusCode;

#[tokio::test]
async fn button_submission_long_poll() {
    let server = spawn(true, Duration::from_secs(15)).await;
    let ask = server
        .client
        .post(format!("{}/v1/ask?request_id=req_e2e_btn", server.base))
        .bearer_auth(API_KEY)
        .json(&serde_json::json!({
            "title": "T",
            "body": "B",
            "mcd": ":::buttons\n- [OK](ok)\n:::",
        }))
        .send();
    let waiter = tokio::spawn(ask);

    // Mid-flight, the "browser" opens the page and clicks OK.
    let token = server.token_for("req_e2e_btn").await;
    let page = server
        .client
        .get(server.interaction_url("req_e2e_btn").await)
        .send()
        .await
        .unwrap();
    assert_eq!(page.status(), StatusCode::OK);
    let html = page.text().await.unwrap();
    assert!(html.contains("name=\"action\" value=\"ok\""));

    let submit = server.submit_form("req_e2e_btn", &token, "ok", "").await;
    assert_eq!(submit.status(), StatusCode::OK, "redirect followed to page");
    assert!(submit.text().await.unwrap().contains("Submitted."));

    let response = waiter.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("x-ask4me-request-id")
            .and_then(|v| v.to_str().ok()),
        Some("req_e2e_btn")
    );
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["request_id"], "req_e2e_btn");
    assert_eq!(body["last_event_type"], "user.submitted");
    assert_eq!(body["data"]["action"], "ok");
    assert_eq!(body["data"]["text"], "");
}

#[tokio::test]
async fn input_submission_with_caller_chosen_id() {
    let server = spawn(true, Duration::from_secs(15)).await;
    let ask = server
        .client
        .post(format!("{}/v1/ask?request_id=req_myjob_1", server.base))
        .bearer_auth(API_KEY)
        .json(&serde_json::json!({
            "mcd": ":::input name=\"note\" label=\"L\" submit=\"S\"\n:::",
        }))
        .send();
    let waiter = tokio::spawn(ask);

    let token = server.token_for("req_myjob_1").await;
    let page_html = server
        .client
        .get(server.interaction_url("req_myjob_1").await)
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(page_html.contains("<label>L</label>"));
    assert!(page_html.contains(">S</button>"));

    server.submit_form("req_myjob_1", &token, "", "hello").await;

    let body: serde_json::Value = waiter.await.unwrap().unwrap().json().await.unwrap();
    assert_eq!(body["last_event_type"], "user.submitted");
    assert_eq!(body["data"]["action"], "");
    assert_eq!(body["data"]["text"], "hello");
}

#[tokio::test]
async fn unanswered_request_expires() {
    let server = spawn(true, Duration::from_secs(15)).await;
    let response = server
        .client
        .post(format!("{}/v1/ask", server.base))
        .bearer_auth(API_KEY)
        .json(&serde_json::json!({
            "expires_in_seconds": 1,
            "mcd": ":::buttons\n- [OK](ok)\n:::",
        }))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["last_event_type"], "request.expired");
    assert_eq!(body["data"], serde_json::json!({}));
}

#[tokio::test]
async fn no_channel_terminates_with_notify_failed() {
    let server = spawn(false, Duration::from_secs(15)).await;
    let body: serde_json::Value = server
        .client
        .post(format!("{}/v1/ask", server.base))
        .bearer_auth(API_KEY)
        .json(&serde_json::json!({ "mcd": ":::buttons\n- [OK](ok)\n:::" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["last_event_type"], "notify.failed");
    assert!(body["data"]["error"]
        .as_str()
        .unwrap()
        .contains("no serverchan_sendkey or apprise_urls configured"));
}

#[tokio::test]
async fn resumption_after_client_timeout() {
    let server = spawn(true, Duration::from_secs(15)).await;

    // First call gives up before any terminal event exists.
    let err = server
        .client
        .post(format!("{}/v1/ask?request_id=req_r_1", server.base))
        .bearer_auth(API_KEY)
        .json(&serde_json::json!({ "mcd": ":::buttons\n- [OK](ok)\n:::" }))
        .timeout(Duration::from_millis(500))
        .send()
        .await;
    assert!(err.is_err(), "long-poll should outlive the client timeout");

    // The human answers while nobody is waiting.
    let token = server.token_for("req_r_1").await;
    server.submit_form("req_r_1", &token, "ok", "").await;

    // The same id resumes and is served from the terminal cache or log.
    let body: serde_json::Value = server
        .client
        .post(format!("{}/v1/ask?request_id=req_r_1", server.base))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["last_event_type"], "user.submitted");
    assert_eq!(body["data"]["action"], "ok");
}

#[tokio::test]
async fn repeated_joins_return_identical_terminal() {
    let server = spawn(true, Duration::from_secs(15)).await;
    let waiter = tokio::spawn(
        server
            .client
            .post(format!("{}/v1/ask?request_id=req_same", server.base))
            .bearer_auth(API_KEY)
            .json(&serde_json::json!({}))
            .send(),
    );
    let token = server.token_for("req_same").await;
    server.submit_form("req_same", &token, "ok", "").await;
    let first: serde_json::Value = waiter.await.unwrap().unwrap().json().await.unwrap();

    let second: serde_json::Value = server
        .client
        .post(format!("{}/v1/ask?request_id=req_same", server.base))
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["last_event_id"], second["last_event_id"]);
    assert_eq!(first["data"], second["data"]);
}

#[tokio::test]
async fn ask_requires_the_shared_credential() {
    let server = spawn(true, Duration::from_secs(15)).await;

    let response = server
        .client
        .post(format!("{}/v1/ask", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response
            .headers()
            .get("www-authenticate")
            .and_then(|v| v.to_str().ok()),
        Some(r#"Bearer realm="ask4me""#)
    );

    let response = server
        .client
        .post(format!("{}/v1/ask", server.base))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // GET may present the credential as a query parameter instead.
    let response = server
        .client
        .get(format!(
            "{}/v1/ask?key={}&stream=true&expires_in_seconds=1",
            server.base, API_KEY
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut reader = SseReader::new(response);
    let created = reader.next_event().await.unwrap();
    assert_eq!(created["type"], "request.created");
}

#[tokio::test]
async fn invalid_request_id_is_rejected() {
    let server = spawn(true, Duration::from_secs(15)).await;
    let response = server
        .client
        .post(format!("{}/v1/ask?request_id=not_a_req_id", server.base))
        .bearer_auth(API_KEY)
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn interaction_page_rejects_bad_tokens() {
    let server = spawn(true, Duration::from_secs(15)).await;
    let waiter = tokio::spawn(
        server
            .client
            .post(format!("{}/v1/ask?request_id=req_guard", server.base))
            .bearer_auth(API_KEY)
            .json(&serde_json::json!({}))
            .send(),
    );
    let token = server.token_for("req_guard").await;

    // Missing token.
    let response = server
        .client
        .get(format!("{}/r/req_guard/", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Wrong token.
    let response = server
        .client
        .get(format!("{}/r/req_guard/?k=wrong", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Empty submission with a good token.
    let response = server.submit_form("req_guard", &token, "", "  ").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    server.submit_form("req_guard", &token, "ok", "").await;
    waiter.await.unwrap().unwrap();
}

#[tokio::test]
async fn double_submission_redirects_without_a_second_answer() {
    let server = spawn(true, Duration::from_secs(15)).await;
    let waiter = tokio::spawn(
        server
            .client
            .post(format!("{}/v1/ask?request_id=req_double", server.base))
            .bearer_auth(API_KEY)
            .json(&serde_json::json!({ "mcd": ":::input\n:::" }))
            .send(),
    );
    let token = server.token_for("req_double").await;

    let first = server.submit_form("req_double", &token, "", "one").await;
    assert_eq!(first.status(), StatusCode::OK);
    let second = server.submit_form("req_double", &token, "", "two").await;
    assert_eq!(second.status(), StatusCode::OK, "second post also redirects");

    let body: serde_json::Value = waiter.await.unwrap().unwrap().json().await.unwrap();
    assert_eq!(body["data"]["text"], "one", "first answer wins");

    // The page now shows the done panel.
    let html = server
        .client
        .get(format!("{}/r/req_double/?k={}", server.base, token))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(html.contains("Submitted."));
    assert!(!html.contains("name=\"text\""));
}

#[tokio::test]
async fn interaction_after_deadline_is_refused() {
    let server = spawn(true, Duration::from_secs(15)).await;
    let waiter = tokio::spawn(
        server
            .client
            .post(format!("{}/v1/ask?request_id=req_late", server.base))
            .bearer_auth(API_KEY)
            .json(&serde_json::json!({ "expires_in_seconds": 1 }))
            .send(),
    );
    let token = server.token_for("req_late").await;
    waiter.await.unwrap().unwrap(); // long-poll ends at expiry

    // Tokens expire with the request, so the row-TTL gate fires first.
    tokio::time::sleep(Duration::from_millis(1300)).await;
    let response = server
        .client
        .get(format!("{}/r/req_late/?k={}", server.base, token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = server.submit_form("req_late", &token, "ok", "").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_request_page_is_not_found() {
    let server = spawn(true, Duration::from_secs(15)).await;
    let response = server
        .client
        .get(format!("{}/r/req_missing/?k=sometoken", server.base))
        .send()
        .await
        .unwrap();
    // No token row exists, so the gate reports forbidden before the request
    // lookup can 404.
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
