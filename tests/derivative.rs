//! Derivative Connector Integration Tests

use std::sync::Arc;

use repobridge::adapters::HttpClient;
use repobridge::config::HttpSettings;
use repobridge::connectors::derivative::{self, DerivativeContext, DerivativeServices, DerivativeSettings};
use repobridge::connectors::Wiring;
use repobridge::core::{Pipeline, RedeliveryPolicy, RunOutcome};
use repobridge::domain::Message;
use repobridge::transport::MemoryBus;
use serde_json::json;
use wiremock::{
    matchers::{body_bytes, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn connector(server: &MockServer) -> Pipeline<DerivativeContext> {
    let http = HttpClient::new(&HttpSettings::default()).unwrap();
    let settings = DerivativeSettings {
        service_url: format!("{}/convert", server.uri()),
    };
    let wiring = Wiring {
        name: "derivatives.thumbnails".to_string(),
        media_type: "application/json".to_string(),
        redelivery: RedeliveryPolicy::immediate(1),
        output: None,
        dead_letter: None,
        bus: Arc::new(MemoryBus::new()),
    };
    derivative::pipeline(&wiring, DerivativeServices::http(&http, &settings))
}

fn generate(server: &MockServer) -> Message {
    let body = json!({
        "type": "Generate",
        "object": {
            "id": "urn:uuid:6f1c2e9a-1b2c-4d3e-8f90-a1b2c3d4e5f6",
            "url": [{"mediaType": "text/html", "rel": "canonical", "href": "http://cms/node/1"}]
        },
        "attachment": {
            "type": "Object",
            "mediaType": "application/json",
            "content": {
                "sourceUri": "http://repo/rest/binary/a.jpg",
                "destinationUri": format!("{}/media/7/thumbnail", server.uri()),
                "mimetype": "image/png",
                "args": "-thumbnail 100x100",
                "fileUploadUri": "public://thumbs/a.png",
                "sourceField": "field_media_image"
            }
        }
    });
    Message::new(body.to_string())
        .with_header("Authorization", "Bearer T")
        .with_header("X-Trace-Id", "trace-3")
}

#[tokio::test]
async fn test_generate_then_put() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/convert"))
        .and(header("accept", "image/png"))
        .and(header("x-derivative-args", "-thumbnail 100x100"))
        .and(header("x-derivative-source", "http://repo/rest/binary/a.jpg"))
        .and(header("authorization", "Bearer T"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"PNGDATA".to_vec(), "image/png"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/media/7/thumbnail"))
        .and(header("authorization", "Bearer T"))
        .and(header("content-type", "image/png"))
        .and(header("content-location", "public://thumbs/a.png"))
        .and(body_bytes(b"PNGDATA".to_vec()))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = connector(&server).run(generate(&server)).await;
    assert_eq!(outcome, RunOutcome::Completed);
    server.verify().await;

    let received = server.received_requests().await.unwrap();
    let verbs: Vec<&str> = received.iter().map(|r| r.method.as_str()).collect();
    assert_eq!(verbs, vec!["GET", "PUT"]);
    assert!(received.iter().all(|r| r.headers.get("x-trace-id").is_none()));
}

#[tokio::test]
async fn test_failed_generation_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/convert"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = connector(&server).run(generate(&server)).await;

    // No dead-letter destination: logged and dropped
    assert!(matches!(outcome, RunOutcome::DeadLettered(_)));
    server.verify().await;
}
