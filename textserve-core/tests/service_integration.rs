//! Integration tests for the inference service: lazy loading, dispatch,
//! batch fan-out, and metrics, all against the in-process mock backend.

use std::sync::Arc;
use std::time::Duration;

use textserve_core::pipeline::mock::GeneratorMode;
use textserve_core::{
    InferenceRequest, InferenceService, MockPipelineFactory, ModelKey, ModelKind, Parameters,
    ServeConfig,
};

fn make_service(factory: MockPipelineFactory) -> (Arc<InferenceService>, Arc<MockPipelineFactory>) {
    let factory = Arc::new(factory);
    let service = InferenceService::new(&ServeConfig::default(), factory.clone());
    (Arc::new(service), factory)
}

fn assert_metrics_consistent(service: &InferenceService) {
    let m = service.get_metrics();
    assert_eq!(m.total_requests, m.successful_requests + m.failed_requests);
    assert_eq!(m.requests_per_model.values().sum::<u64>(), m.total_requests);
}

#[tokio::test]
async fn sentiment_request_reports_top_label() {
    let (service, _) = make_service(MockPipelineFactory::new());
    let resp = service
        .process_inference(InferenceRequest::new("I love this").with_model("sentiment"))
        .await;

    assert!(resp.success);
    assert_eq!(resp.model_used, "sentiment:v1");
    let result = resp.result.unwrap();
    assert!(result.starts_with("Classification: positive (confidence: "));
    assert!(result.ends_with(')'));
    let score = result
        .trim_start_matches("Classification: positive (confidence: ")
        .trim_end_matches(')');
    assert_eq!(score.split('.').nth(1).map(str::len), Some(3));
    assert!(service.get_loaded_models().contains(&"sentiment:v1".to_string()));
}

#[tokio::test]
async fn unknown_model_is_reported_not_raised() {
    let (service, factory) = make_service(MockPipelineFactory::new());
    let resp = service
        .process_inference(InferenceRequest::new("hello").with_model("ghost"))
        .await;

    assert!(!resp.success);
    assert!(resp.error.unwrap().contains("not available"));
    assert!(resp.latency_ms >= 0.0);
    assert_eq!(factory.total_builds(), 0);
    assert_metrics_consistent(&service);
}

#[tokio::test]
async fn default_model_is_used_when_none_named() {
    let (service, _) = make_service(MockPipelineFactory::new());
    assert!(service.initialize().await);
    let resp = service
        .process_inference(InferenceRequest::new(
            "The first sentence is the summary. Everything after it is dropped.",
        ))
        .await;
    assert!(resp.success);
    assert_eq!(resp.model_used, "summarizer:v1");
    assert_eq!(resp.metadata["model_type"], "summarizer");
    assert_eq!(
        resp.result.as_deref(),
        Some("The first sentence is the summary.")
    );
}

#[tokio::test]
async fn batch_isolates_failures_and_keeps_order() {
    let (service, _) = make_service(MockPipelineFactory::new());
    let requests = vec![
        InferenceRequest::new("I love this").with_model("sentiment"),
        InferenceRequest::new("this one will [fail]").with_model("sentiment"),
        InferenceRequest::new("this one will [panic]").with_model("summarizer"),
        InferenceRequest::new("Once upon a time").with_model("generator"),
    ];
    let responses = service.process_batch_inference(requests).await.unwrap();

    assert_eq!(responses.len(), 4);
    assert!(responses[0].success);
    assert!(!responses[1].success);
    assert_eq!(responses[1].model_used, "sentiment:v1");
    assert!(!responses[2].success);
    assert_eq!(responses[2].model_used, "summarizer:v1");
    assert!(responses[2].error.as_deref().unwrap().contains("panicked"));
    assert!(responses[3].success);
    assert!(
        responses[3]
            .result
            .as_deref()
            .unwrap()
            .starts_with("Once upon a time")
    );

    let ids: std::collections::HashSet<_> = responses.iter().map(|r| r.request_id).collect();
    assert_eq!(ids.len(), 4);
    assert_metrics_consistent(&service);
    assert_eq!(service.get_metrics().failed_requests, 2);
}

#[tokio::test]
async fn degenerate_generation_is_a_failure() {
    let (service, factory) =
        make_service(MockPipelineFactory::new().with_generator_mode(GeneratorMode::AlwaysEcho));
    let resp = service
        .process_inference(InferenceRequest::new("Once upon a time").with_model("generator"))
        .await;

    assert!(!resp.success);
    assert_eq!(
        resp.error.as_deref(),
        Some("Generation failed - please try different input")
    );
    assert_eq!(factory.generator_calls().len(), 2);
    assert_eq!(service.get_metrics().failed_requests, 1);
}

#[tokio::test]
async fn generator_retry_recovers() {
    let (service, factory) = make_service(
        MockPipelineFactory::new().with_generator_mode(GeneratorMode::EchoUnlessSampling),
    );
    let resp = service
        .process_inference(InferenceRequest::new("Once upon a time").with_model("generator"))
        .await;

    assert!(resp.success);
    let calls = factory.generator_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1]["do_sample"], true);
    // Descriptor defaults survive into the retry.
    assert_eq!(calls[1]["max_length"], 100);
}

#[tokio::test]
async fn unload_all_with_nothing_loaded_is_noop() {
    let (service, _) = make_service(MockPipelineFactory::new());
    service.model_loader().unload_all_models().await;
    assert!(service.get_loaded_models().is_empty());
}

#[tokio::test]
async fn concurrent_first_requests_build_model_once() {
    let (service, factory) =
        make_service(MockPipelineFactory::new().with_build_delay(Duration::from_millis(50)));

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .process_inference(
                        InferenceRequest::new(format!("I like request {i}")).with_model("sentiment"),
                    )
                    .await
            })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().success);
    }

    assert_eq!(factory.build_count("sentiment:v1"), 1);
    assert_eq!(service.get_metrics().requests_per_model["sentiment:v1"], 10);
}

#[tokio::test]
async fn metrics_stay_consistent_across_mixed_traffic() {
    let (service, _) = make_service(MockPipelineFactory::new());
    let texts = ["I love this", "awful [fail]", "plain text", "ok"];
    let models = ["sentiment", "summarizer", "ghost", "generator"];

    for (i, text) in texts.iter().enumerate() {
        for model in models {
            service
                .process_inference(InferenceRequest::new(format!("{text} {i}")).with_model(model))
                .await;
        }
    }

    let m = service.get_metrics();
    assert_eq!(m.total_requests, 16);
    assert_eq!(m.requests_per_model["ghost:v1"], 4);
    assert_metrics_consistent(&service);
    assert!(m.average_latency_ms >= 0.0);

    // Reading metrics has no side effects.
    assert_eq!(service.get_metrics(), service.get_metrics());
}

#[tokio::test]
async fn catalog_registration_is_visible_to_dispatch() {
    let (service, _) = make_service(MockPipelineFactory::new());
    let mut params = Parameters::new();
    params.insert("max_length".into(), serde_json::json!(2));
    service
        .model_registry()
        .register("tiny", "v2", ModelKind::Summarizer, "tiny-ref", params);

    let resp = service
        .process_inference(
            InferenceRequest::new("one two three four.")
                .with_model("tiny")
                .with_version("v2"),
        )
        .await;
    assert!(resp.success);
    assert_eq!(resp.result.as_deref(), Some("one two"));
    assert!(
        service
            .model_loader()
            .is_loaded(&ModelKey::new("tiny", "v2"))
    );
}

#[tokio::test]
async fn panicking_build_is_a_load_failure() {
    let (service, factory) =
        make_service(MockPipelineFactory::new().panic_builds_for("facebook/bart-large-cnn"));
    assert!(!service.model_loader().load_model("summarizer", "v1").await);
    assert!(!service.initialize().await);

    let resp = service
        .process_inference(InferenceRequest::new("Some text to summarize."))
        .await;
    assert!(!resp.success);
    assert_eq!(resp.error.as_deref(), Some("Model summarizer:v1 not available"));
    assert_eq!(factory.build_count("summarizer:v1"), 3);
    assert_metrics_consistent(&service);
}
