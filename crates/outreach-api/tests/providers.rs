//! Provider clients against mocked HTTP APIs.

use std::time::Duration;

use outreach_api::providers::{
    BrightDataClient, BrightDataConfig, EmailFinder, GeminiClient, GeminiConfig, ProviderError,
    ScrapeProvider, SnovClient, SnovConfig, TextGenerator,
};
use outreach_api::services::profiles::scrape_to_completion;
use outreach_models::ScrapeStatus;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn brightdata(server: &MockServer) -> BrightDataClient {
    BrightDataClient::new(BrightDataConfig {
        api_key: "bd-key".into(),
        dataset_id: "ds-profiles".into(),
        base_url: server.uri(),
        request_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn gemini(server: &MockServer) -> GeminiClient {
    GeminiClient::new(GeminiConfig {
        api_key: "g-key".into(),
        base_url: server.uri(),
        models: vec!["primary".into(), "fallback".into()],
        request_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn snov(server: &MockServer) -> SnovClient {
    SnovClient::new(SnovConfig {
        client_id: "id".into(),
        client_secret: "secret".into(),
        base_url: server.uri(),
        request_timeout: Duration::from_secs(5),
    })
    .unwrap()
}

#[tokio::test]
async fn test_brightdata_scrape_runs_to_completion() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/datasets/v3/trigger"))
        .and(query_param("dataset_id", "ds-profiles"))
        .and(header("authorization", "Bearer bd-key"))
        .and(body_json(json!([{"url": "https://www.linkedin.com/in/jane-doe"}])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"snapshot_id": "s_1"})))
        .expect(1)
        .mount(&server)
        .await;

    // First poll still running, then ready
    Mock::given(method("GET"))
        .and(path("/datasets/v3/progress/s_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "running"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/datasets/v3/progress/s_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ready"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/datasets/v3/snapshot/s_1"))
        .and(query_param("format", "json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"name": "Jane Doe", "city": "Berlin"}])),
        )
        .mount(&server)
        .await;

    let client = brightdata(&server);
    let extracted = scrape_to_completion(
        &client,
        "https://www.linkedin.com/in/jane-doe",
        Duration::from_millis(10),
    )
    .await
    .unwrap();

    assert_eq!(extracted.job_id, "s_1");
    assert_eq!(extracted.profile["name"], "Jane Doe");
}

#[tokio::test]
async fn test_brightdata_error_record_fails_the_job() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/datasets/v3/progress/s_2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ready"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/datasets/v3/snapshot/s_2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"error": "Page not found"}])),
        )
        .mount(&server)
        .await;

    let err = brightdata(&server).poll("s_2").await.unwrap_err();
    assert!(matches!(err, ProviderError::JobFailed { .. }));
}

#[tokio::test]
async fn test_brightdata_pending_poll_has_no_result() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/datasets/v3/progress/s_3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "starting"})))
        .mount(&server)
        .await;

    let poll = brightdata(&server).poll("s_3").await.unwrap();
    assert_eq!(poll.status, ScrapeStatus::Pending);
    assert!(poll.result.is_none());
}

#[tokio::test]
async fn test_brightdata_http_error_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/datasets/v3/trigger"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .mount(&server)
        .await;

    let err = brightdata(&server)
        .submit("https://www.linkedin.com/in/jane-doe")
        .await
        .unwrap_err();
    match err {
        ProviderError::Status { status, body, .. } => {
            assert_eq!(status, 401);
            assert_eq!(body, "bad token");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_gemini_falls_back_to_next_model() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/primary:generateContent"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/fallback:generateContent"))
        .and(query_param("key", "g-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "  Hi Jane!  "}]}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let text = gemini(&server).generate("Write a note").await.unwrap();
    assert_eq!(text, "Hi Jane!");
}

#[tokio::test]
async fn test_gemini_empty_candidates_fail() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
        .mount(&server)
        .await;

    let err = gemini(&server).generate("Write a note").await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidResponse { .. }));
}

#[tokio::test]
async fn test_snov_finds_email_and_caches_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/oauth/access_token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "tok-1", "expires_in": 3600})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/get-emails-from-names"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {"emails": [{"email": "jane@acme.com", "emailStatus": "valid"}]}
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = snov(&server);
    for _ in 0..2 {
        let found = client.find("Jane", "Doe", "acme.com").await.unwrap();
        assert_eq!(found.email, "jane@acme.com");
        assert_eq!(found.status.as_deref(), Some("valid"));
    }
}

#[tokio::test]
async fn test_snov_refreshes_revoked_token_once() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok"})))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/get-emails-from-names"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/get-emails-from-names"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {"emails": [{"email": "jane@acme.com"}]}
        })))
        .mount(&server)
        .await;

    let found = snov(&server).find("Jane", "Doe", "acme.com").await.unwrap();
    assert_eq!(found.email, "jane@acme.com");
    assert_eq!(found.status, None);
}

#[tokio::test]
async fn test_snov_empty_result_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "tok"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/get-emails-from-names"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": {"emails": []}})),
        )
        .mount(&server)
        .await;

    let err = snov(&server).find("John", "Roe", "acme.com").await.unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)));
}
