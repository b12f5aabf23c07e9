//! End-to-end tests of the request pipeline over a real listener.

use access_gate::auth::SignedTokens;
use access_gate::config::AuthMode;
use chrono::Duration;
use reqwest::{header, Method, StatusCode};
use serde_json::Value;

mod common;

use common::{quiet_config, start_gate, INACTIVE, READER, SECRET, WRITER};

#[tokio::test]
async fn test_rate_limit_burst() {
    let mut config = quiet_config();
    config.rate_limit.enabled = true;
    config.rate_limit.requests_per_second = 2.0;
    config.rate_limit.burst_size = 4;
    let gate = start_gate(config).await;

    for _ in 0..4 {
        let res = gate.client.get(gate.url("/v1/open")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let res = gate.client.get(gate.url("/v1/open")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "rate limit exceeded");

    gate.stop().await;
}

#[tokio::test]
async fn test_trusted_preflight_skips_handler_and_auth() {
    let mut config = quiet_config();
    config.cors.trusted_origins = vec!["https://app.example.com".to_string()];
    let gate = start_gate(config).await;

    // A broken credential would be refused if the preflight reached authentication.
    let res = gate
        .client
        .request(Method::OPTIONS, gate.url("/v1/movies"))
        .header(header::ORIGIN, "https://app.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PUT")
        .header(header::AUTHORIZATION, "Bearer broken")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://app.example.com"
    );
    assert_eq!(
        res.headers()[header::ACCESS_CONTROL_ALLOW_METHODS],
        "OPTIONS, PUT, PATCH, DELETE"
    );
    assert_eq!(
        res.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS],
        "Authorization, Content-Type"
    );
    assert!(res.text().await.unwrap().is_empty());

    gate.stop().await;
}

#[tokio::test]
async fn test_untrusted_origin_gets_no_cors_headers() {
    let mut config = quiet_config();
    config.cors.trusted_origins = vec!["https://app.example.com".to_string()];
    let gate = start_gate(config).await;

    let res = gate
        .client
        .get(gate.url("/v1/open"))
        .header(header::ORIGIN, "https://evil.example.com")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert!(!res.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    let vary: Vec<_> = res.headers().get_all(header::VARY).iter().collect();
    assert!(vary.iter().any(|v| *v == "Origin"));
    assert!(vary.iter().any(|v| *v == "Access-Control-Request-Method"));
    assert!(vary.iter().any(|v| *v == "Authorization"));

    gate.stop().await;
}

#[tokio::test]
async fn test_anonymous_is_refused_by_gated_route() {
    let gate = start_gate(quiet_config()).await;

    let res = gate.client.get(gate.url("/v1/me")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "you must be authenticated to access this resource");

    // Open routes still see the anonymous principal.
    let res = gate.client.get(gate.url("/v1/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert!(body.is_null());

    gate.stop().await;
}

#[tokio::test]
async fn test_permission_scenarios() {
    let gate = start_gate(quiet_config()).await;
    let reader = gate.opaque_token(READER, Duration::hours(1));
    let writer = gate.opaque_token(WRITER, Duration::hours(1));
    let inactive = gate.opaque_token(INACTIVE, Duration::hours(1));

    let res = gate.client.get(gate.url("/v1/movies")).bearer_auth(&reader).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = gate.client.post(gate.url("/v1/movies")).bearer_auth(&reader).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = res.json().await.unwrap();
    assert_eq!(
        body["error"],
        "your user account doesn't have the necessary permissions to access this resource"
    );

    let res = gate.client.post(gate.url("/v1/movies")).bearer_auth(&writer).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "created");

    let res = gate.client.get(gate.url("/v1/movies")).bearer_auth(&inactive).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = res.json().await.unwrap();
    assert_eq!(
        body["error"],
        "your user account must be activated to access this resource"
    );

    gate.stop().await;
}

#[tokio::test]
async fn test_grant_takes_effect_on_next_request() {
    let gate = start_gate(quiet_config()).await;
    let reader = gate.opaque_token(READER, Duration::hours(1));

    let res = gate.client.post(gate.url("/v1/movies")).bearer_auth(&reader).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    gate.store.grant(READER, ["movies:write"]);

    let res = gate.client.post(gate.url("/v1/movies")).bearer_auth(&reader).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    gate.stop().await;
}

#[tokio::test]
async fn test_opaque_tokens() {
    let gate = start_gate(quiet_config()).await;
    let valid = gate.opaque_token(READER, Duration::hours(1));
    let expired = gate.opaque_token(READER, Duration::hours(-1));

    let res = gate.client.get(gate.url("/v1/me")).bearer_auth(&valid).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["id"], READER);

    for token in [expired.as_str(), "TOOSHORT", "ABCDEFGHIJKLMNOPQRSTUVWXYZ"] {
        let res = gate.client.get(gate.url("/v1/open")).bearer_auth(token).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "token {token}");
        assert_eq!(res.headers()[header::WWW_AUTHENTICATE], "Bearer");
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["error"], "invalid or missing authentication token");
    }

    gate.stop().await;
}

#[tokio::test]
async fn test_malformed_authorization_header() {
    let gate = start_gate(quiet_config()).await;
    let valid = gate.opaque_token(READER, Duration::hours(1));

    for value in [format!("Token {valid}"), format!("Bearer {valid} extra"), "Bearer".to_string()] {
        let res = gate
            .client
            .get(gate.url("/v1/open"))
            .header(header::AUTHORIZATION, value.as_str())
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "header {value:?}");
    }

    gate.stop().await;
}

#[tokio::test]
async fn test_store_outage_is_server_error() {
    let gate = start_gate(quiet_config()).await;
    let valid = gate.opaque_token(READER, Duration::hours(1));
    gate.store.set_available(false);

    let res = gate.client.get(gate.url("/v1/open")).bearer_auth(&valid).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = res.json().await.unwrap();
    assert_eq!(
        body["error"],
        "the server encountered a problem and could not process your request"
    );

    gate.stop().await;
}

#[tokio::test]
async fn test_signed_tokens() {
    let mut config = quiet_config();
    config.auth.mode = AuthMode::Signed;
    let gate = start_gate(config).await;

    let tokens = SignedTokens::new(SECRET.as_bytes(), "access-gate", "access-gate", 3600);
    let token = tokens.issue(WRITER).unwrap();
    let res = gate.client.get(gate.url("/v1/me")).bearer_auth(&token).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["id"], WRITER);

    let foreign = SignedTokens::new(SECRET.as_bytes(), "someone-else", "access-gate", 3600);
    let res = gate
        .client
        .get(gate.url("/v1/open"))
        .bearer_auth(foreign.issue(WRITER).unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.headers()[header::WWW_AUTHENTICATE], "Bearer");

    // Valid signature, but the subject is not a known user.
    let res = gate
        .client
        .get(gate.url("/v1/open"))
        .bearer_auth(tokens.issue(999).unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    gate.stop().await;
}

#[tokio::test]
async fn test_panic_is_contained() {
    let gate = start_gate(quiet_config()).await;

    let res = gate.client.get(gate.url("/v1/panic")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.headers()[header::CONNECTION], "close");

    // The server keeps serving.
    let res = reqwest::get(gate.url("/v1/open")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    gate.stop().await;
}

#[tokio::test]
async fn test_debug_vars_counts_responses() {
    let gate = start_gate(quiet_config()).await;

    gate.client.get(gate.url("/v1/open")).send().await.unwrap();
    gate.client.get(gate.url("/v1/me")).send().await.unwrap();
    gate.client.get(gate.url("/nowhere")).send().await.unwrap();

    let res = gate.client.get(gate.url("/debug/vars")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));
    let vars: Value = res.json().await.unwrap();

    // The /debug/vars request itself is in flight while the snapshot is taken.
    assert_eq!(vars["total_requests_received"], 4);
    assert_eq!(vars["total_responses_sent"], 3);
    assert_eq!(vars["in_flight_requests"], 1);
    assert_eq!(vars["total_responses_sent_by_status"]["200"], 1);
    assert_eq!(vars["total_responses_sent_by_status"]["401"], 1);
    assert_eq!(vars["total_responses_sent_by_status"]["404"], 1);
    assert_eq!(vars["database"]["status"], "ok");

    gate.stop().await;
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let gate = start_gate(quiet_config()).await;

    let res = gate.client.get(gate.url("/v1/open")).send().await.unwrap();
    assert!(!res.headers()["x-request-id"].is_empty());

    let res = gate
        .client
        .get(gate.url("/v1/open"))
        .header("x-request-id", "caller-chosen-id")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "caller-chosen-id");

    gate.stop().await;
}
