//! DVLA client against a local HTTP server

use anpr2mqtt_core::registry::{DvlaClient, LookupError, RegistryClient, RegistryLookup};
use mockito::Matcher;
use serde_json::json;

const PATH: &str = "/vehicle-enquiry/v1/vehicles";

#[tokio::test]
async fn test_lookup_success_is_cached() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", PATH)
        .match_header("x-api-key", "test-key")
        .match_body(Matcher::Json(json!({"registrationNumber": "AB12CDE"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"registrationNumber":"AB12CDE","make":"FORD","colour":"BLUE"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = DvlaClient::new("test-key", 3600).unwrap().with_base_url(server.url());
    for _ in 0..3 {
        match client.lookup("AB12CDE").await {
            RegistryLookup::Found(payload) => assert_eq!(payload["make"], "FORD"),
            other => panic!("Expected a vehicle, got {:?}", other),
        }
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_lookup_not_cached_with_zero_ttl() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"make":"FORD"}"#)
        .expect(2)
        .create_async()
        .await;

    let client = DvlaClient::new("test-key", 0).unwrap().with_base_url(server.url());
    assert!(client.lookup("AB12CDE").await.is_found());
    assert!(client.lookup("AB12CDE").await.is_found());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_lookup_api_error() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", PATH)
        .with_status(404)
        .with_header("content-type", "application/json")
        .with_body(r#"{"errors":[{"status":"404","code":"404","title":"Vehicle Not Found"}]}"#)
        .create_async()
        .await;

    let client = DvlaClient::new("test-key", 3600).unwrap().with_base_url(server.url());
    let result = client.lookup("AB12CDE").await;
    match &result {
        RegistryLookup::Failed(LookupError::ApiErrors { errors, status }) => {
            assert_eq!(*status, 404);
            assert_eq!(errors[0]["title"], "Vehicle Not Found");
        }
        other => panic!("Expected api_errors, got {:?}", other),
    }
    assert_eq!(result.to_json()["api_status"], 404);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_lookup_undecodable_body() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", PATH)
        .with_status(500)
        .with_body("<html>gateway timeout</html>")
        .create_async()
        .await;

    let client = DvlaClient::new("test-key", 3600).unwrap().with_base_url(server.url());
    let result = client.lookup("AB12CDE").await;
    assert!(matches!(result, RegistryLookup::Failed(LookupError::ApiException(_))));
    assert!(result.to_json().get("api_exception").is_some());
}

#[tokio::test]
async fn test_invalid_plate_never_hits_network() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("POST", PATH).expect(0).create_async().await;

    let client = DvlaClient::new("test-key", 3600).unwrap().with_base_url(server.url());
    let result = client.lookup("B4DM3N!").await;
    assert_eq!(result.to_json(), json!({"reg_match_fail": "GB"}));
    mock.assert_async().await;
}
