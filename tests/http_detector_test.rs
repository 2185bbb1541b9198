//! Integration tests for the HTTP detector adapter and content extractor
//!
//! Tests HTTP client behavior using wiremock for request/response mocking.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use failsafe_pipeline::canonical::{
    AnalysisOptions, AnalyzeRequest, CanonicalInput, ContentExtractor, HttpContentExtractor,
};
use failsafe_pipeline::config::{Config, DetectorConfig, RequestConfig};
use failsafe_pipeline::detectors::{
    Detector, DetectorContext, DetectorKind, DetectorPayload, HttpDetector,
};
use failsafe_pipeline::error::DetectorError;
use failsafe_pipeline::pipeline::Verdict;
use failsafe_pipeline::server::FactCheckService;

fn request_config() -> RequestConfig {
    RequestConfig {
        timeout_ms: 5000,
        max_retries: 0, // No retries for testing
        retry_delay_ms: 1,
    }
}

/// Create a detector pointing to the mock server
fn create_test_detector(kind: DetectorKind, base_url: &str, api_key: Option<&str>) -> HttpDetector {
    let config = DetectorConfig {
        base_url: base_url.to_string(),
        api_key: api_key.map(str::to_string),
        enable_translation: true,
    };
    HttpDetector::new(kind, &config, &request_config()).expect("Failed to create detector")
}

fn claim() -> CanonicalInput {
    CanonicalInput::from_parts(
        "the earth is flat.",
        None,
        "en",
        BTreeMap::new(),
        AnalysisOptions::default(),
    )
}

fn evidence_body() -> Value {
    json!({
        "confidence": 0.9,
        "method": "retrieval",
        "payload": {
            "kind": "evidence",
            "items": [
                {"source": "nasa.gov", "score": 0.97, "stance": "contradicts"},
                {"source": "esa.int", "score": 0.93, "stance": "contradicts"},
                {"source": "noaa.gov", "score": 0.9, "stance": "contradicts"}
            ]
        }
    })
}

fn fallacy_body() -> Value {
    json!({
        "confidence": 0.6,
        "method": "classifier",
        "payload": {"kind": "fallacy", "items": []}
    })
}

fn ai_detection_body() -> Value {
    json!({
        "confidence": 0.8,
        "method": "ensemble",
        "payload": {
            "kind": "ai_detection",
            "is_ai_generated": false,
            "confidence": 0.8,
            "method": "ensemble"
        }
    })
}

fn verification_body() -> Value {
    json!({
        "confidence": 0.95,
        "method": "nli",
        "payload": {
            "kind": "verification",
            "confidence": 0.95,
            "method": "nli"
        }
    })
}

#[cfg(test)]
mod detector_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_detector_call() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/evidence"))
            .and(header("Authorization", "Bearer test-api-key"))
            .and(header("Content-Type", "application/json"))
            .and(body_partial_json(json!({
                "context": {"processing_language": "en"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(evidence_body()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let detector =
            create_test_detector(DetectorKind::Evidence, &mock_server.uri(), Some("test-api-key"));
        assert_eq!(detector.endpoint(), format!("{}/evidence", mock_server.uri()));

        let result = detector
            .run(&claim(), &DetectorContext::new("en"))
            .await
            .unwrap();

        assert_eq!(result.kind(), DetectorKind::Evidence);
        match result.payload {
            DetectorPayload::Evidence { items } => assert_eq!(items.len(), 3),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_authorization_header_without_key() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/verification"))
            .respond_with(ResponseTemplate::new(200).set_body_json(verification_body()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let detector = create_test_detector(DetectorKind::Verification, &mock_server.uri(), None);
        detector
            .run(&claim(), &DetectorContext::new("en"))
            .await
            .unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_server_error_maps_to_api_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/fallacy"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let detector = create_test_detector(DetectorKind::Fallacy, &mock_server.uri(), None);
        let err = detector
            .run(&claim(), &DetectorContext::new("en"))
            .await
            .unwrap_err();

        match err {
            DetectorError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "model crashed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wrong_payload_kind_is_rejected() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/evidence"))
            .respond_with(ResponseTemplate::new(200).set_body_json(verification_body()))
            .mount(&mock_server)
            .await;

        let detector = create_test_detector(DetectorKind::Evidence, &mock_server.uri(), None);
        let err = detector
            .run(&claim(), &DetectorContext::new("en"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DetectorError::KindMismatch {
                expected: DetectorKind::Evidence,
                actual: DetectorKind::Verification,
            }
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_score_is_invalid() {
        let mock_server = MockServer::start().await;
        let mut body = evidence_body();
        body["payload"]["items"][0]["score"] = json!(1.7);

        Mock::given(method("POST"))
            .and(path("/evidence"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&mock_server)
            .await;

        let detector = create_test_detector(DetectorKind::Evidence, &mock_server.uri(), None);
        let err = detector
            .run(&claim(), &DetectorContext::new("en"))
            .await
            .unwrap_err();

        assert!(matches!(err, DetectorError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/evidence"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let detector = create_test_detector(DetectorKind::Evidence, &mock_server.uri(), None);
        let err = detector
            .run(&claim(), &DetectorContext::new("en"))
            .await
            .unwrap_err();

        assert!(matches!(err, DetectorError::InvalidResponse { .. }));
    }
}

#[cfg(test)]
mod extractor_tests {
    use super::*;

    #[tokio::test]
    async fn test_extract_strips_markup() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/article"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><head><style>p { color: red; }</style></head>\
                 <body><p>The Earth is flat &amp; still.</p>\
                 <script>track()</script></body></html>",
            ))
            .mount(&mock_server)
            .await;

        let extractor = HttpContentExtractor::new(5000).unwrap();
        let text = extractor
            .extract(&format!("{}/article", mock_server.uri()))
            .await
            .unwrap();

        assert!(text.contains("The Earth is flat & still."));
        assert!(!text.contains("color"));
        assert!(!text.contains("track()"));
    }

    #[tokio::test]
    async fn test_extract_reports_http_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let extractor = HttpContentExtractor::new(5000).unwrap();
        let err = extractor
            .extract(&format!("{}/missing", mock_server.uri()))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("404"));
    }
}

// ============================================================================
// Service over HTTP detectors
// ============================================================================

async fn mount_all_detectors(mock_server: &MockServer) {
    for (stage, body) in [
        ("/evidence", evidence_body()),
        ("/fallacy", fallacy_body()),
        ("/ai_detection", ai_detection_body()),
        ("/verification", verification_body()),
    ] {
        Mock::given(method("POST"))
            .and(path(stage))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(mock_server)
            .await;
    }
}

#[tokio::test]
async fn test_service_from_config_analyzes_text() {
    let mock_server = MockServer::start().await;
    mount_all_detectors(&mock_server).await;

    let mut config = Config::default();
    config.request = request_config();
    config.detectors.base_url = mock_server.uri();
    let service = FactCheckService::from_config(config).unwrap();

    let report = service
        .analyze(&AnalyzeRequest::text("The Earth is flat."))
        .await
        .unwrap();

    assert_eq!(report.verdict, Verdict::False);
    assert!(report.degraded_stages.is_empty());
    assert!(report.multilingual.is_none());
}

#[tokio::test]
async fn test_service_from_config_analyzes_url() {
    let mock_server = MockServer::start().await;
    mount_all_detectors(&mock_server).await;
    Mock::given(method("GET"))
        .and(path("/claim.html"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<p>The Earth is flat.</p>"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = Config::default();
    config.request = request_config();
    config.detectors.base_url = mock_server.uri();
    let service = FactCheckService::from_config(config).unwrap();

    let report = service
        .analyze(&AnalyzeRequest::url(format!("{}/claim.html", mock_server.uri())))
        .await
        .unwrap();

    assert_eq!(report.verdict, Verdict::False);
}
