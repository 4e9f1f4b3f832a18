//! Remote backend source tests against a mock HTTP server

mod common;

use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use harvester::config::BackendConfig;
use harvester::harvest::{ContentSource, FetchRequest, RemoteBackendSource};
use harvester::rotation::{Classify, ErrorClass};
use harvester::utils::error::FetchError;

fn backend(server: &MockServer) -> RemoteBackendSource {
    let config = BackendConfig {
        url: server.uri(),
        request_timeout_secs: 1,
        request_delay_ms: 0,
        ..Default::default()
    };
    RemoteBackendSource::new(&config).unwrap()
}

fn request(keyword: &str) -> FetchRequest {
    FetchRequest {
        keyword: Some(keyword.to_string()),
        size: 20,
    }
}

async fn fetch(
    source: &RemoteBackendSource,
    keyword: &str,
) -> Result<Vec<harvester::RawRecord>, FetchError> {
    let resource = common::direct_resources(1).remove(0);
    source
        .fetch(&resource, &resource.credential, &request(keyword))
        .await
}

// ============================================================================
// Success
// ============================================================================

#[tokio::test]
async fn test_fetch_posts_keyword_and_parses_records() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/get_tweets"))
        .and(body_json(serde_json::json!({"size": 20, "keyword": "bitcoin"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "tweets": [
                {
                    "content_": "Bitcoin breaks resistance",
                    "author_": "@trader",
                    "created_at_": "Wed May 01 08:00:00 +0000 2024",
                    "domain_": "x.com",
                    "url_": "https://x.com/trader/status/1001",
                    "external_id_": "1001"
                },
                {
                    "content": "Plain field names work too",
                    "url": "https://x.com/other/status/1002"
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let records = fetch(&backend(&server), "bitcoin").await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].author.as_deref(), Some("@trader"));
    assert_eq!(records[0].external_id.as_deref(), Some("1001"));
    assert_eq!(records[1].content.as_deref(), Some("Plain field names work too"));
    assert_eq!(records[1].external_id, None);
}

#[tokio::test]
async fn test_missing_tweets_key_is_empty_batch() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/get_tweets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let records = fetch(&backend(&server), "eth").await.unwrap();
    assert!(records.is_empty());
}

// ============================================================================
// Failure Classification
// ============================================================================

#[tokio::test]
async fn test_status_codes_map_to_error_classes() {
    let cases = [
        (429, ErrorClass::RateLimited),
        (401, ErrorClass::ResourceInvalid),
        (403, ErrorClass::ResourceInvalid),
        (500, ErrorClass::Transient),
        (503, ErrorClass::Transient),
        (404, ErrorClass::Transient),
    ];

    for (status, expected) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/get_tweets"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let err = fetch(&backend(&server), "btc").await.unwrap_err();
        assert_eq!(err.classify(), expected, "status {status}: {err}");
    }
}

#[tokio::test]
async fn test_rate_limit_error_variant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = fetch(&backend(&server), "btc").await.unwrap_err();
    assert!(matches!(err, FetchError::RateLimit));
}

#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/get_tweets"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = fetch(&backend(&server), "btc").await.unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)));
    assert_eq!(err.classify(), ErrorClass::Transient);
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/get_tweets"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"tweets": []}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let err = fetch(&backend(&server), "btc").await.unwrap_err();
    assert!(matches!(err, FetchError::Timeout), "got {err:?}");
    assert_eq!(err.classify(), ErrorClass::Transient);
}
