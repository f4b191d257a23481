//! Integration tests for policy chains over the mock transport.

mod common;

use cloud_pipeline::response;
use cloud_pipeline::{
    BufferPool, KeyCredentialPolicy, LogLevel, LoggingPolicy, MockResponse, MockTransport,
    Pipeline, PipelineError, PipelineOptions, RetryPolicy, RetrySettings, TelemetryPolicy,
    Transport,
};
use common::{Events, Marker, MemoryLogger, RecordingTransport};
use http::Method;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const URL: &str = "http://contoso.a.io/";

fn retry(settings: RetrySettings) -> RetryPolicy {
    RetryPolicy::new(settings)
}

#[tokio::test]
async fn test_retry_then_success_is_logged_per_attempt() {
    // Arrange
    let logger = Arc::new(MemoryLogger::default());
    let transport = Arc::new(MockTransport::with_statuses([500, 1]).unwrap());
    let pipeline = Pipeline::builder(transport.clone())
        .policy(retry(
            RetrySettings::new()
                .success_when(|status| status == 1)
                .max_retries(5)
                .no_delay(),
        ))
        .policy(LoggingPolicy::new(logger.clone()))
        .build();

    // Act
    let mut context = pipeline
        .create_context(CancellationToken::new(), Method::GET, URL)
        .unwrap();
    pipeline.process(&mut context).await.unwrap();

    // Assert
    assert_eq!(context.status(), Some(1));
    assert_eq!(transport.call_count(), 2);
    assert_eq!(
        logger.messages_at(LogLevel::Info),
        vec![
            "Request: GET http://contoso.a.io/",
            "Response: 500",
            "Request: GET http://contoso.a.io/",
            "Response: 1",
        ]
    );
}

#[tokio::test]
async fn test_retry_until_success() {
    let transport = Arc::new(MockTransport::with_statuses([500, 500, 200]).unwrap());
    let pipeline = Pipeline::builder(transport.clone())
        .policy(retry(
            RetrySettings::new()
                .success_when(|status| status == 200)
                .max_retries(5)
                .no_delay(),
        ))
        .build();

    let mut context = pipeline
        .create_context(CancellationToken::new(), Method::GET, URL)
        .unwrap();
    pipeline.process(&mut context).await.unwrap();

    assert_eq!(context.status(), Some(200));
    assert_eq!(transport.call_count(), 3);
}

#[tokio::test]
async fn test_retry_exhaustion_keeps_last_status() {
    let transport = Arc::new(MockTransport::with_statuses([500]).unwrap());
    let pipeline = Pipeline::builder(transport.clone())
        .policy(retry(RetrySettings::new().max_retries(2).no_delay()))
        .build();

    let mut context = pipeline
        .create_context(CancellationToken::new(), Method::GET, URL)
        .unwrap();
    let result = pipeline.process(&mut context).await;

    assert!(result.is_ok());
    assert_eq!(context.status(), Some(500));
    assert_eq!(transport.call_count(), 3);
}

#[tokio::test]
async fn test_non_retryable_status_is_returned_at_once() {
    let transport = Arc::new(MockTransport::with_statuses([404]).unwrap());
    let pipeline = Pipeline::builder(transport.clone())
        .policy(retry(RetrySettings::new().no_delay()))
        .build();

    let mut context = pipeline
        .create_context(CancellationToken::new(), Method::GET, URL)
        .unwrap();
    pipeline.process(&mut context).await.unwrap();

    assert_eq!(context.status(), Some(404));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn test_policies_wrap_in_order_around_custom_transport() {
    let events = Events::default();
    let transport = Arc::new(RecordingTransport::new(events.clone()));
    let pipeline = Pipeline::builder(transport)
        .policy(Marker {
            name: "A",
            events: events.clone(),
        })
        .policy(Marker {
            name: "B",
            events: events.clone(),
        })
        .build();

    let mut context = pipeline
        .create_context(CancellationToken::new(), Method::GET, URL)
        .unwrap();
    pipeline.process(&mut context).await.unwrap();

    assert_eq!(events.joined(), "A-before,B-before,T,B-after,A-after");
    assert_eq!(context.status(), Some(200));
}

#[tokio::test]
async fn test_context_from_another_transport_is_rejected() {
    let first = Arc::new(MockTransport::with_statuses([200]).unwrap());
    let second = Arc::new(MockTransport::with_statuses([200]).unwrap());
    let pipeline = Pipeline::builder(second.clone()).build();

    let mut context = first
        .create_context(
            pipeline.pool(),
            Method::GET,
            cloud_pipeline::Url::parse(URL).unwrap(),
            CancellationToken::new(),
        )
        .unwrap();
    let result = pipeline.process(&mut context).await;

    assert!(matches!(result, Err(PipelineError::TransportMismatch { .. })));
    assert_eq!(second.call_count(), 0);
}

#[tokio::test]
async fn test_buffers_return_to_pool_after_send() {
    let pool = BufferPool::default();
    let ok = MockResponse::json(200, &serde_json::json!({"value": "blue"})).unwrap();
    let transport = Arc::new(MockTransport::new([ok, MockResponse::status(500)]).unwrap());
    let pipeline = Pipeline::builder(transport)
        .policy(TelemetryPolicy::for_sdk("config", "1.0.0", None).unwrap())
        .pool(pool.clone())
        .build();

    for _ in 0..2 {
        let context = pipeline
            .create_context(CancellationToken::new(), Method::GET, URL)
            .unwrap();
        let response = pipeline
            .send(context, response::json::<serde_json::Value>)
            .await
            .unwrap();
        let _ = response.ensure_status(&[200]);
    }

    assert_eq!(pool.rented(), 0);
}

#[tokio::test]
async fn test_buffers_return_to_pool_after_failure() {
    let pool = BufferPool::default();
    let transport = Arc::new(
        MockTransport::with_statuses([200])
            .unwrap()
            .with_delay(Duration::from_secs(5)),
    );
    let pipeline = Pipeline::builder(transport).pool(pool.clone()).build();

    let token = CancellationToken::new();
    token.cancel();
    let context = pipeline
        .create_context(token, Method::GET, URL)
        .unwrap();
    let result = pipeline.send(context, response::empty).await;

    assert!(matches!(result, Err(PipelineError::Cancelled)));
    assert_eq!(pool.rented(), 0);
}

#[tokio::test]
async fn test_concurrent_calls_share_one_pipeline() {
    let pool = BufferPool::default();
    let transport = Arc::new(MockTransport::with_statuses([200]).unwrap());
    let options = PipelineOptions::new()
        .with_transport(transport.clone())
        .with_pool(pool.clone());
    let pipeline = Pipeline::with_options("config", "1.0.0", options).unwrap();

    let calls = (0..16).map(|i| {
        let pipeline = pipeline.clone();
        async move {
            let url = format!("http://contoso.a.io/kv/{}", i);
            let context = pipeline
                .create_context(CancellationToken::new(), Method::GET, &url)
                .unwrap();
            pipeline.send(context, response::empty).await.map(|r| r.status())
        }
    });
    let statuses = futures::future::join_all(calls).await;

    assert!(statuses.into_iter().all(|s| s.unwrap() == 200));
    assert_eq!(transport.call_count(), 16);
    assert!(transport
        .requests()
        .iter()
        .all(|r| r.header("User-Agent").is_some()));
    assert_eq!(pool.rented(), 0);
}

#[tokio::test]
async fn test_per_call_settings_override_policy() {
    let transport = Arc::new(MockTransport::with_statuses([503]).unwrap());
    let pipeline = Pipeline::builder(transport.clone())
        .policy(retry(RetrySettings::new().max_retries(4).no_delay()))
        .build();

    let mut context = pipeline
        .create_context(CancellationToken::new(), Method::GET, URL)
        .unwrap();
    context
        .options_mut()
        .insert(RetrySettings::no_retries());
    pipeline.process(&mut context).await.unwrap();

    assert_eq!(context.status(), Some(503));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn test_cancellation_interrupts_backoff() {
    let transport = Arc::new(MockTransport::with_statuses([503]).unwrap());
    let pipeline = Pipeline::builder(transport.clone())
        .policy(retry(
            RetrySettings::new()
                .initial_delay(Duration::from_secs(30))
                .jitter(false),
        ))
        .build();

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let mut context = pipeline
        .create_context(token, Method::GET, URL)
        .unwrap();
    let result = pipeline.process(&mut context).await;

    assert!(matches!(result, Err(PipelineError::Cancelled)));
    assert_eq!(transport.call_count(), 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_retry_after_header_sets_delay() {
    let throttled = MockResponse::raw(
        &b"HTTP/1.1 429 Too Many Requests\r\nRetry-After: 1\r\nContent-Length: 0\r\n\r\n"[..],
    );
    let transport = Arc::new(MockTransport::new([throttled, MockResponse::status(200)]).unwrap());
    let pipeline = Pipeline::builder(transport.clone())
        .policy(retry(
            RetrySettings::new()
                .initial_delay(Duration::from_millis(1))
                .jitter(false),
        ))
        .build();

    let started = Instant::now();
    let mut context = pipeline
        .create_context(CancellationToken::new(), Method::GET, URL)
        .unwrap();
    pipeline.process(&mut context).await.unwrap();

    assert_eq!(context.status(), Some(200));
    assert_eq!(transport.call_count(), 2);
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_default_chain_stamps_user_agent() {
    let transport = Arc::new(MockTransport::with_statuses([200]).unwrap());
    let pipeline = Pipeline::create("keyvault", "2.1.0", Some(transport.clone() as Arc<dyn Transport>))
        .unwrap();

    let context = pipeline
        .create_context(CancellationToken::new(), Method::GET, URL)
        .unwrap();
    let response = pipeline.send(context, response::empty).await.unwrap();
    assert_eq!(response.status(), 200);

    let user_agent = transport.last_request().unwrap();
    let user_agent = user_agent.header("User-Agent").unwrap();
    assert!(user_agent.starts_with("keyvault/2.1.0 (Rust;"), "{}", user_agent);
}

#[tokio::test]
async fn test_retried_request_repeats_the_first_attempt() {
    // Arrange
    let transport = Arc::new(MockTransport::with_statuses([500, 200]).unwrap());
    let mut pipeline = Pipeline::create("face", "1.0.0", Some(transport.clone() as Arc<dyn Transport>))
        .unwrap();
    pipeline.add(
        KeyCredentialPolicy::from_string("Ocp-Apim-Subscription-Key", "0123456789abcdef").unwrap(),
    );
    let mut context = pipeline
        .create_context(CancellationToken::new(), Method::POST, "http://contoso.a.io/face/detect")
        .unwrap();
    context.add_header(&cloud_pipeline::wire::CONTENT_TYPE_JSON);
    context.set_content(&br#"{"url":"http://img"}"#[..]);
    context
        .options_mut()
        .insert(RetrySettings::new().no_delay());

    // Act
    pipeline.process(&mut context).await.unwrap();

    // Assert
    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].headers, requests[1].headers);
    assert_eq!(requests[0].content, requests[1].content);
    assert_eq!(
        requests[1]
            .headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("Ocp-Apim-Subscription-Key"))
            .count(),
        1
    );
}
