//! Integration tests for the edge client against a mock content server.

use steampipe_cdn::{CdnClient, ContentServer, Error, fetch_content_servers_from};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn server_for(mock: &MockServer) -> ContentServer {
    ContentServer {
        server_type: "CDN".into(),
        host: mock.address().to_string(),
        vhost: None,
        weighted_load: 0,
        https: false,
    }
}

fn fast_client() -> CdnClient {
    CdnClient::builder()
        .max_retries(2)
        .initial_backoff_ms(1)
        .max_backoff_ms(10)
        .build()
        .unwrap()
}

#[tokio::test]
async fn fetch_chunk_success() {
    let mock = MockServer::start().await;
    let sha = [0xabu8; 20];
    let sha_hex = hex::encode(sha);

    Mock::given(method("GET"))
        .and(path(format!("/depot/570/chunk/{sha_hex}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"chunk payload".to_vec()))
        .mount(&mock)
        .await;

    let client = fast_client();
    client.set_servers(vec![server_for(&mock)]);

    let data = client.fetch_chunk(570, &sha).await.unwrap();
    assert_eq!(data, b"chunk payload");
}

#[tokio::test]
async fn fetch_manifest_with_request_code() {
    let mock = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/depot/570/manifest/42/5/777"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"manifest bytes".to_vec()))
        .mount(&mock)
        .await;

    let client = fast_client();
    client.set_servers(vec![server_for(&mock)]);

    let data = client.fetch_manifest(570, 42, Some(777)).await.unwrap();
    assert_eq!(data, b"manifest bytes");
}

#[tokio::test]
async fn missing_chunk_is_not_retried_elsewhere() {
    let mock = MockServer::start().await;
    let sha = [0x01u8; 20];

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock)
        .await;

    let client = fast_client();
    // Two entries for the same mock; a 404 must short-circuit rotation
    client.set_servers(vec![server_for(&mock), server_for(&mock)]);

    let err = client.fetch_chunk(570, &sha).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn forbidden_maps_to_access_denied() {
    let mock = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock)
        .await;

    let client = fast_client();
    client.set_servers(vec![server_for(&mock)]);

    let err = client.fetch_manifest(730, 99, None).await.unwrap_err();
    assert!(matches!(err, Error::AccessDenied { .. }));
}

#[tokio::test]
async fn server_errors_are_retried_then_succeed() {
    let mock = MockServer::start().await;
    let sha = [0x02u8; 20];
    let sha_hex = hex::encode(sha);

    Mock::given(method("GET"))
        .and(path(format!("/depot/570/chunk/{sha_hex}")))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/depot/570/chunk/{sha_hex}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"recovered".to_vec()))
        .mount(&mock)
        .await;

    let client = fast_client();
    client.set_servers(vec![server_for(&mock)]);

    let data = client.fetch_chunk(570, &sha).await.unwrap();
    assert_eq!(data, b"recovered");
}

#[tokio::test]
async fn rotation_falls_back_to_healthy_server() {
    let broken = MockServer::start().await;
    let healthy = MockServer::start().await;
    let sha = [0x03u8; 20];
    let sha_hex = hex::encode(sha);

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&broken)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/depot/440/chunk/{sha_hex}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"from healthy".to_vec()))
        .mount(&healthy)
        .await;

    let client = CdnClient::builder()
        .max_retries(0)
        .initial_backoff_ms(1)
        .build()
        .unwrap();
    client.set_servers(vec![server_for(&broken), server_for(&healthy)]);

    let data = client.fetch_chunk(440, &sha).await.unwrap();
    assert_eq!(data, b"from healthy");
}

#[tokio::test]
async fn all_servers_failing_exhausts() {
    let mock = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock)
        .await;

    let client = CdnClient::builder()
        .max_retries(0)
        .initial_backoff_ms(1)
        .build()
        .unwrap();
    client.set_servers(vec![server_for(&mock), server_for(&mock)]);

    let err = client.fetch_chunk(570, &[0u8; 20]).await.unwrap_err();
    assert!(matches!(err, Error::ServersExhausted { .. }));
}

#[tokio::test]
async fn parallel_fetch_preserves_order_and_isolates_failures() {
    let mock = MockServer::start().await;
    let good = [0x10u8; 20];
    let missing = [0x11u8; 20];

    Mock::given(method("GET"))
        .and(path(format!("/depot/570/chunk/{}", hex::encode(good))))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"good".to_vec()))
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/depot/570/chunk/{}", hex::encode(missing))))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock)
        .await;

    let client = fast_client();
    client.set_servers(vec![server_for(&mock)]);

    let results = client
        .fetch_chunks_parallel(570, &[good, missing, good], 4)
        .await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap(), b"good");
    assert!(matches!(results[1], Err(Error::NotFound { .. })));
    assert_eq!(results[2].as_ref().unwrap(), b"good");
}

#[tokio::test]
async fn directory_service_sorts_by_load() {
    let mock = MockServer::start().await;

    let body = serde_json::json!({
        "response": {
            "servers": [
                {"type": "CDN", "host": "b.example.com", "weighted_load": 90},
                {"type": "SteamCache", "host": "a.example.com", "weighted_load": 10},
                {"type": "CDN", "host": "", "weighted_load": 1}
            ]
        }
    });
    Mock::given(method("GET"))
        .and(path("/directory"))
        .and(query_param("cell_id", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&mock)
        .await;

    let http = reqwest::Client::new();
    let endpoint = format!("{}/directory", mock.uri());
    let servers = fetch_content_servers_from(&http, &endpoint, 5).await.unwrap();

    let hosts: Vec<_> = servers.iter().map(|s| s.host.as_str()).collect();
    assert_eq!(hosts, vec!["a.example.com", "b.example.com"]);
}

#[tokio::test]
async fn directory_service_empty_list_is_an_error() {
    let mock = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"response": {}})),
        )
        .mount(&mock)
        .await;

    let http = reqwest::Client::new();
    let err = fetch_content_servers_from(&http, &mock.uri(), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidResponse { .. }));
}
