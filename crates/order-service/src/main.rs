//! 订单服务入口
//!
//! 启动顺序：配置 → 可观测性 → 数据库 → 缓存与预热 → Kafka 消费循环 → HTTP 服务。
//! 关闭时按逆序释放资源。

use std::sync::Arc;

use anyhow::Context;
use order_service::{
    cache::InMemoryOrderCache,
    consumer::IngestionConsumer,
    repository::{PgOrderRepository, schema},
    routes,
    service::OrderService,
    state::AppState,
};
use order_shared::{
    config::AppConfig,
    database::Database,
    kafka::KafkaConsumer,
    observability::{
        self,
        metrics::{MetricsSink, NoopMetrics, PrometheusMetrics},
    },
    shutdown::{ShutdownCoordinator, TaskCloser, cancelled, shutdown_signal},
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("order-service").context("加载配置失败")?;
    let _guard = observability::init(&config.observability).await?;

    info!(
        environment = %config.environment,
        addr = %config.server_addr(),
        "Starting order-service"
    );

    let metrics: Arc<dyn MetricsSink> = if config.observability.metrics_enabled {
        Arc::new(PrometheusMetrics)
    } else {
        Arc::new(NoopMetrics)
    };
    let coordinator = ShutdownCoordinator::new(config.shutdown.timeout());

    // 数据库
    let db = Database::connect(&config.database)
        .await
        .context("连接数据库失败")?;
    coordinator.register(Arc::new(db.clone()));

    if config.database.init_schema {
        schema::create_tables(db.pool())
            .await
            .context("初始化表结构失败")?;
    }

    // 缓存与服务
    let repo = Arc::new(PgOrderRepository::new(db.pool().clone()));
    let cache = Arc::new(InMemoryOrderCache::new(
        config.cache.ttl(),
        config.cache.sweep_batch_size,
        metrics.clone(),
    ));
    coordinator.register(Arc::new(
        cache.start_sweeper(config.cache.sweep_interval()),
    ));

    let service = Arc::new(OrderService::new(repo, cache, metrics.clone()));

    // 预热失败不阻止启动，缓存会在读取时逐步填充
    match service.warm_up_cache().await {
        Ok(count) => info!(count, "缓存预热成功"),
        Err(e) => warn!(error = %e, "缓存预热失败，继续启动"),
    }

    // Kafka 消费循环
    let kafka = Arc::new(KafkaConsumer::new(&config.kafka).context("创建 Kafka 消费者失败")?);
    kafka
        .subscribe(&[config.kafka.topic.as_str()])
        .context("订阅 topic 失败")?;
    coordinator.register(kafka.clone());

    let consumer = IngestionConsumer::new(
        kafka,
        service.clone(),
        &config.consumer,
        &config.kafka.topic,
        metrics.clone(),
    );
    let consumer_shutdown = coordinator.subscribe();
    let consumer_task = tokio::spawn(async move { consumer.run(consumer_shutdown).await });
    coordinator.register(TaskCloser::new("order-consumer", consumer_task));

    // HTTP 服务
    let app = routes::build_router(AppState::new(service, metrics));
    let listener = TcpListener::bind(config.server_addr())
        .await
        .with_context(|| format!("监听 {} 失败", config.server_addr()))?;
    info!("Listening on {}", config.server_addr());

    let mut http_shutdown = coordinator.subscribe();
    let server_task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancelled(&mut http_shutdown).await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "HTTP 服务异常退出");
        }
    });
    coordinator.register(TaskCloser::new("http-server", server_task));

    shutdown_signal().await;

    if let Err(e) = coordinator.close_all().await {
        error!(error = %e, "优雅关闭未完全成功");
    }
    info!("order-service shutdown complete");

    Ok(())
}
