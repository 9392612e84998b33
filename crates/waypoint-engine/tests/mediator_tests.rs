use std::sync::Arc;

use uuid::Uuid;
use waypoint_core::{MediationType, Message, OutcomeResult};
use waypoint_engine::mediator::HttpMediator;
use waypoint_engine::{Mediator, WarningService};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn message_to(target: String) -> Message {
    Message {
        id: Uuid::new_v4().to_string(),
        pool_code: "p".into(),
        auth_token: "tok".into(),
        mediation_type: MediationType::Http,
        mediation_target: target,
        message_group_id: Some("g1".into()),
        high_priority: false,
        payload: None,
    }
}

#[tokio::test]
async fn ack_true_returns_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ack": true})))
        .mount(&server)
        .await;

    let mediator = HttpMediator::new(Arc::new(WarningService::new("test")));
    let outcome = mediator
        .mediate(&message_to(format!("{}/hook", server.uri())))
        .await;
    assert_eq!(outcome.result, OutcomeResult::Success);
}

#[tokio::test]
async fn ack_false_with_delay_returns_error_process_with_that_delay() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({"ack": false, "delaySeconds": 120}),
        ))
        .mount(&server)
        .await;

    let mediator = HttpMediator::new(Arc::new(WarningService::new("test")));
    let outcome = mediator
        .mediate(&message_to(format!("{}/hook", server.uri())))
        .await;
    assert_eq!(outcome.result, OutcomeResult::ErrorProcess);
    assert_eq!(outcome.delay_seconds, Some(120));
}

#[tokio::test]
async fn unparseable_200_body_is_treated_as_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let mediator = HttpMediator::new(Arc::new(WarningService::new("test")));
    let outcome = mediator
        .mediate(&message_to(format!("{}/hook", server.uri())))
        .await;
    assert_eq!(outcome.result, OutcomeResult::Success);
}

#[tokio::test]
async fn client_error_returns_error_config_without_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(418))
        .expect(1)
        .mount(&server)
        .await;

    let mediator = HttpMediator::new(Arc::new(WarningService::new("test")));
    let outcome = mediator
        .mediate(&message_to(format!("{}/hook", server.uri())))
        .await;
    assert_eq!(outcome.result, OutcomeResult::ErrorConfig);
}

#[tokio::test]
async fn server_error_retries_up_to_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let mediator = HttpMediator::new(Arc::new(WarningService::new("test")));
    let outcome = mediator
        .mediate(&message_to(format!("{}/hook", server.uri())))
        .await;
    assert_eq!(outcome.result, OutcomeResult::ErrorProcess);
}

#[tokio::test]
async fn rate_limited_with_integer_retry_after_carries_that_delay() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "45"))
        .expect(1)
        .mount(&server)
        .await;

    let mediator = HttpMediator::new(Arc::new(WarningService::new("test")));
    let outcome = mediator
        .mediate(&message_to(format!("{}/hook", server.uri())))
        .await;
    assert_eq!(outcome.result, OutcomeResult::ErrorProcess);
    assert_eq!(outcome.delay_seconds, Some(45));
}

#[tokio::test]
async fn rate_limited_without_retry_after_carries_no_delay() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let mediator = HttpMediator::new(Arc::new(WarningService::new("test")));
    let outcome = mediator
        .mediate(&message_to(format!("{}/hook", server.uri())))
        .await;
    assert_eq!(outcome.result, OutcomeResult::ErrorProcess);
    assert_eq!(outcome.delay_seconds, None);
}

#[tokio::test]
async fn not_implemented_returns_error_config_and_emits_a_critical_warning() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(501))
        .expect(1)
        .mount(&server)
        .await;

    let warnings = Arc::new(WarningService::new("test"));
    let mediator = HttpMediator::new(warnings.clone());
    let outcome = mediator
        .mediate(&message_to(format!("{}/hook", server.uri())))
        .await;
    assert_eq!(outcome.result, OutcomeResult::ErrorConfig);

    let recent = warnings.recent(10);
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].severity, waypoint_core::WarningSeverity::Critical);
}

#[tokio::test]
async fn request_that_exceeds_the_configured_timeout_is_classified_as_timeout_and_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_millis(300)))
        .expect(3)
        .mount(&server)
        .await;

    let mediator = HttpMediator::with_timeout(
        Arc::new(WarningService::new("test")),
        std::time::Duration::from_millis(50),
    );
    let outcome = mediator
        .mediate(&message_to(format!("{}/hook", server.uri())))
        .await;
    assert_eq!(outcome.result, OutcomeResult::ErrorProcess);
}

#[tokio::test]
async fn connection_refused_is_classified_as_a_network_error() {
    // Nothing is listening on this port; the connect attempt itself fails.
    let mediator = HttpMediator::new(Arc::new(WarningService::new("test")));
    let outcome = mediator
        .mediate(&message_to("http://127.0.0.1:1/hook".to_string()))
        .await;
    assert_eq!(outcome.result, OutcomeResult::ErrorConnection);
}
