//! 订单管道端到端测试
//!
//! 消息源 → 消费者 → 服务 → 仓储 → 缓存 → HTTP 路由，全部使用内存实现，无需外部依赖。

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use order_service::{
    cache::{InMemoryOrderCache, OrderCache},
    consumer::{IngestionConsumer, ProcessOutcome},
    repository::InMemoryOrderRepository,
    routes::build_router,
    service::OrderService,
    source::InMemorySource,
    state::AppState,
};
use order_shared::{
    config::ConsumerConfig,
    error::OrderError,
    models::Order,
    observability::metrics::RecordingMetrics,
    test_utils::sample_order,
};
use serde_json::Value;
use tokio::sync::watch;
use tower::ServiceExt;

type Service = OrderService<InMemoryOrderRepository, InMemoryOrderCache>;

struct Pipeline {
    source: Arc<InMemorySource>,
    repo: Arc<InMemoryOrderRepository>,
    cache: Arc<InMemoryOrderCache>,
    metrics: Arc<RecordingMetrics>,
    consumer: IngestionConsumer<InMemorySource, Service>,
    app: Router,
}

fn pipeline() -> Pipeline {
    let source = Arc::new(InMemorySource::new("orders"));
    let repo = Arc::new(InMemoryOrderRepository::new());
    let metrics = Arc::new(RecordingMetrics::new());
    let cache = Arc::new(InMemoryOrderCache::new(
        Duration::from_secs(120),
        64,
        metrics.clone(),
    ));
    let service = Arc::new(OrderService::new(repo.clone(), cache.clone(), metrics.clone()));
    let consumer = IngestionConsumer::new(
        source.clone(),
        service.clone(),
        &ConsumerConfig::default(),
        "orders",
        metrics.clone(),
    );
    let app = build_router(AppState::new(service, metrics.clone()));

    Pipeline {
        source,
        repo,
        cache,
        metrics,
        consumer,
        app,
    }
}

fn reference_order() -> Order {
    sample_order("ABCDEFGHIJ", "TRACK12345")
}

async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

async fn consume_next(p: &Pipeline) -> ProcessOutcome {
    use order_shared::kafka::MessageSource;

    let msg = p.source.fetch().await.unwrap();
    p.consumer.process_message(&msg).await.outcome
}

#[tokio::test]
async fn test_published_order_is_served_over_http() {
    let p = pipeline();
    let order = reference_order();
    p.source.publish_json(&order.order_uid, &order).unwrap();

    assert_eq!(
        consume_next(&p).await,
        ProcessOutcome::Persisted { attempts: 1 }
    );
    assert_eq!(p.source.committed(), vec![0]);

    let (status, body) = send(&p.app, Method::GET, "/order/ABCDEFGHIJ").await;
    assert_eq!(status, StatusCode::OK);
    let served: Order = serde_json::from_slice(&body).unwrap();
    assert_eq!(served, order);

    // 首次读取回源后写入缓存
    assert_eq!(p.cache.get("ABCDEFGHIJ"), Some(order));
    assert_eq!(p.repo.get_calls(), 1);

    let (status, _) = send(&p.app, Method::GET, "/order/ABCDEFGHIJ").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(p.repo.get_calls(), 1);
}

#[tokio::test]
async fn test_nanosecond_timestamp_is_served_at_store_precision() {
    let p = pipeline();
    let mut payload = serde_json::to_value(reference_order()).unwrap();
    payload["date_created"] = serde_json::json!("2024-03-05T10:11:12.123456789Z");
    p.source.publish_json("ABCDEFGHIJ", &payload).unwrap();

    assert_eq!(
        consume_next(&p).await,
        ProcessOutcome::Persisted { attempts: 1 }
    );

    let (_, from_store) = send(&p.app, Method::GET, "/order/ABCDEFGHIJ").await;
    let (_, from_cache) = send(&p.app, Method::GET, "/order/ABCDEFGHIJ").await;
    let from_store: Order = serde_json::from_slice(&from_store).unwrap();
    let from_cache: Order = serde_json::from_slice(&from_cache).unwrap();

    assert_eq!(from_store.date_created.timestamp_subsec_nanos(), 123_456_000);
    assert_eq!(from_store, from_cache);
    assert_eq!(p.repo.get_calls(), 1);
}

#[tokio::test]
async fn test_duplicate_delivery_is_committed_and_data_unchanged() {
    let p = pipeline();
    let order = reference_order();
    p.source.publish_json(&order.order_uid, &order).unwrap();
    p.source.publish_json(&order.order_uid, &order).unwrap();

    assert!(matches!(
        consume_next(&p).await,
        ProcessOutcome::Persisted { .. }
    ));
    assert_eq!(consume_next(&p).await, ProcessOutcome::AlreadyExists);

    assert_eq!(p.source.committed(), vec![0, 1]);
    assert_eq!(p.repo.len(), 1);

    let (status, body) = send(&p.app, Method::GET, "/order/ABCDEFGHIJ").await;
    assert_eq!(status, StatusCode::OK);
    let served: Order = serde_json::from_slice(&body).unwrap();
    assert_eq!(served, order);
}

#[tokio::test]
async fn test_invalid_order_is_skipped_and_never_stored() {
    let p = pipeline();
    let mut order = reference_order();
    order.delivery.email = "not-an-email".to_string();
    p.source.publish_json(&order.order_uid, &order).unwrap();

    assert_eq!(consume_next(&p).await, ProcessOutcome::ValidationFailed);
    assert_eq!(p.source.committed(), vec![0]);
    assert!(p.repo.is_empty());

    let (status, body) = send(&p.app, Method::GET, "/order/ABCDEFGHIJ").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "Order ABCDEFGHIJ not found");
}

#[tokio::test]
async fn test_create_invalidates_previously_cached_entry() {
    let p = pipeline();
    let order = reference_order();
    let mut stale = order.clone();
    stale.entry = "STALE".to_string();
    p.cache.set(&order.order_uid, stale);

    p.source.publish_json(&order.order_uid, &order).unwrap();
    consume_next(&p).await;

    let (_, body) = send(&p.app, Method::GET, "/order/ABCDEFGHIJ").await;
    let served: Order = serde_json::from_slice(&body).unwrap();
    assert_eq!(served.entry, "WBIL");
}

#[tokio::test]
async fn test_missing_uid_returns_400() {
    let p = pipeline();

    for uri in ["/order", "/order/", "/order/%20%20"] {
        let (status, body) = send(&p.app, Method::GET, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "uri {uri}");
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "order_uid is required");
    }
}

#[tokio::test]
async fn test_store_failure_returns_500_without_details() {
    let p = pipeline();
    p.repo.fail_next_get(OrderError::PartialData {
        order_uid: "ABCDEFGHIJ".to_string(),
        part: "payment",
        reason: "row missing".to_string(),
    });

    let (status, body) = send(&p.app, Method::GET, "/order/ABCDEFGHIJ").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "Internal server error");
}

#[tokio::test]
async fn test_options_returns_cors_headers() {
    let p = pipeline();

    let response = p
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/order/ABCDEFGHIJ")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "GET, OPTIONS");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
}

#[tokio::test]
async fn test_http_metrics_use_route_template() {
    let p = pipeline();
    send(&p.app, Method::GET, "/order/UNKNOWN000").await;
    send(&p.app, Method::GET, "/health").await;

    let requests = p.metrics.snapshot().http_requests;
    assert!(requests.contains(&("GET".to_string(), "/order/{order_uid}".to_string(), 404)));
    assert!(requests.contains(&("GET".to_string(), "/health".to_string(), 200)));
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_ingests_until_shutdown() {
    let p = Arc::new(pipeline());
    for i in 0..3 {
        let uid = format!("ORDER0000{i}");
        let track = format!("TRACK0000{i}");
        p.source
            .publish_json(&uid, &sample_order(&uid, &track))
            .unwrap();
    }
    // 一条无法解析的消息夹在中间
    p.source.publish(None, b"garbage".to_vec());

    let (tx, rx) = watch::channel(false);
    let runner = {
        let p = p.clone();
        tokio::spawn(async move { p.consumer.run(rx).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send_replace(true);
    runner.await.unwrap();

    assert_eq!(p.source.committed(), vec![0, 1, 2, 3]);
    assert_eq!(p.repo.len(), 3);
    assert_eq!(p.metrics.kafka_count("error", "parse"), 1);
    assert_eq!(p.metrics.snapshot().orders_created, 3);
}

#[tokio::test(start_paused = true)]
async fn test_transient_store_failure_is_retried_then_served() {
    let p = pipeline();
    p.repo
        .fail_next_create(OrderError::Internal("too many connections".to_string()));
    let order = reference_order();
    p.source.publish_json(&order.order_uid, &order).unwrap();

    assert_eq!(
        consume_next(&p).await,
        ProcessOutcome::Persisted { attempts: 2 }
    );
    assert_eq!(p.repo.create_calls(), 2);

    let (status, _) = send(&p.app, Method::GET, "/order/ABCDEFGHIJ").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_warm_up_serves_from_cache() {
    let p = pipeline();
    let order = reference_order();
    let repo = Arc::new(InMemoryOrderRepository::with_orders([order.clone()]));
    let service = OrderService::new(repo.clone(), p.cache.clone(), p.metrics.clone());

    assert_eq!(service.warm_up_cache().await.unwrap(), 1);
    assert_eq!(p.cache.get("ABCDEFGHIJ"), Some(order));
    assert_eq!(p.metrics.cache_size(), Some(1));
}
