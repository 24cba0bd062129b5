//! Prometheus 指标模块
//!
//! 业务组件通过 [`MetricsSink`] 记录指标，不依赖进程级全局注册表：
//! 生产环境注入 [`PrometheusMetrics`]（基于 metrics crate 门面），
//! 单元测试注入 [`NoopMetrics`] 或 [`RecordingMetrics`]。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use std::collections::HashMap;
use std::net::SocketAddr;

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

// ============================================================================
// MetricsSink
// ============================================================================

/// 指标记录接口
pub trait MetricsSink: Send + Sync {
    /// 当前缓存中的订单数
    fn set_cache_size(&self, size: usize);

    /// 成功创建一个订单
    fn order_created(&self);

    /// 单次订单持久化耗时
    fn order_processing_duration(&self, status: &str, duration_secs: f64);

    /// Kafka 消息处理结果
    fn kafka_message(&self, topic: &str, status: &str, error_type: &str);

    /// 单条消息的持久化尝试次数
    fn kafka_processing_attempts(&self, topic: &str, status: &str, attempts: u32);

    /// 单条消息从接收到处理结束的耗时
    fn kafka_message_duration(&self, topic: &str, status: &str, duration_secs: f64);

    /// HTTP 请求
    fn http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64);
}

// ============================================================================
// PrometheusMetrics
// ============================================================================

/// 基于 metrics 门面的实现，由已安装的 Prometheus recorder 收集
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusMetrics;

impl MetricsSink for PrometheusMetrics {
    fn set_cache_size(&self, size: usize) {
        metrics::gauge!("orders_in_cache").set(size as f64);
    }

    fn order_created(&self) {
        metrics::counter!("orders_created_total").increment(1);
    }

    fn order_processing_duration(&self, status: &str, duration_secs: f64) {
        metrics::histogram!(
            "order_processing_duration_seconds",
            "status" => status.to_string()
        )
        .record(duration_secs);
    }

    fn kafka_message(&self, topic: &str, status: &str, error_type: &str) {
        metrics::counter!(
            "kafka_messages_total",
            "topic" => topic.to_string(),
            "status" => status.to_string(),
            "error_type" => error_type.to_string()
        )
        .increment(1);
    }

    fn kafka_processing_attempts(&self, topic: &str, status: &str, attempts: u32) {
        metrics::histogram!(
            "kafka_processing_attempts",
            "topic" => topic.to_string(),
            "status" => status.to_string()
        )
        .record(f64::from(attempts));
    }

    fn kafka_message_duration(&self, topic: &str, status: &str, duration_secs: f64) {
        metrics::histogram!(
            "kafka_message_processing_duration_seconds",
            "topic" => topic.to_string(),
            "status" => status.to_string()
        )
        .record(duration_secs);
    }

    fn http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        metrics::counter!(
            "http_requests_total",
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status" => status_str.clone()
        )
        .increment(1);

        metrics::histogram!(
            "http_request_duration_seconds",
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status" => status_str
        )
        .record(duration_secs);
    }
}

// ============================================================================
// NoopMetrics / RecordingMetrics
// ============================================================================

/// 丢弃所有指标
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn set_cache_size(&self, _size: usize) {}
    fn order_created(&self) {}
    fn order_processing_duration(&self, _status: &str, _duration_secs: f64) {}
    fn kafka_message(&self, _topic: &str, _status: &str, _error_type: &str) {}
    fn kafka_processing_attempts(&self, _topic: &str, _status: &str, _attempts: u32) {}
    fn kafka_message_duration(&self, _topic: &str, _status: &str, _duration_secs: f64) {}
    fn http_request(&self, _method: &str, _path: &str, _status: u16, _duration_secs: f64) {}
}

/// 记录指标调用的内存实现，便于在测试中断言
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    inner: Mutex<Recorded>,
}

#[derive(Debug, Default, Clone)]
pub struct Recorded {
    pub cache_size: Option<usize>,
    pub orders_created: u64,
    /// (status, error_type) -> count
    pub kafka_messages: HashMap<(String, String), u64>,
    /// (status, attempts)
    pub attempts: Vec<(String, u32)>,
    /// (method, path, status)
    pub http_requests: Vec<(String, String, u16)>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Recorded {
        self.inner.lock().clone()
    }

    pub fn cache_size(&self) -> Option<usize> {
        self.inner.lock().cache_size
    }

    pub fn kafka_count(&self, status: &str, error_type: &str) -> u64 {
        self.inner
            .lock()
            .kafka_messages
            .get(&(status.to_string(), error_type.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

impl MetricsSink for RecordingMetrics {
    fn set_cache_size(&self, size: usize) {
        self.inner.lock().cache_size = Some(size);
    }

    fn order_created(&self) {
        self.inner.lock().orders_created += 1;
    }

    fn order_processing_duration(&self, _status: &str, _duration_secs: f64) {}

    fn kafka_message(&self, _topic: &str, status: &str, error_type: &str) {
        *self
            .inner
            .lock()
            .kafka_messages
            .entry((status.to_string(), error_type.to_string()))
            .or_insert(0) += 1;
    }

    fn kafka_processing_attempts(&self, _topic: &str, status: &str, attempts: u32) {
        self.inner
            .lock()
            .attempts
            .push((status.to_string(), attempts));
    }

    fn kafka_message_duration(&self, _topic: &str, _status: &str, _duration_secs: f64) {}

    fn http_request(&self, method: &str, path: &str, status: u16, _duration_secs: f64) {
        self.inner
            .lock()
            .http_requests
            .push((method.to_string(), path.to_string(), status));
    }
}

// ============================================================================
// Prometheus 导出
// ============================================================================

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 安装全局 recorder，并启动一个独立的 HTTP 服务器暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        server_handle,
    })
}

/// 注册指标描述，出现在 /metrics 端点的 HELP 注释中
fn describe_metrics(service_name: &str) {
    metrics::describe_counter!("orders_created_total", "Total number of orders created");
    metrics::describe_histogram!(
        "order_processing_duration_seconds",
        "Time spent persisting a single order"
    );
    metrics::describe_gauge!("orders_in_cache", "Number of orders currently cached");

    metrics::describe_counter!(
        "kafka_messages_total",
        "Kafka messages by processing status and error type"
    );
    metrics::describe_histogram!(
        "kafka_processing_attempts",
        "Persist attempts per Kafka message"
    );
    metrics::describe_histogram!(
        "kafka_message_processing_duration_seconds",
        "Kafka message processing duration in seconds"
    );

    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_sink_without_recorder_does_not_panic() {
        let sink = PrometheusMetrics;
        sink.set_cache_size(3);
        sink.order_created();
        sink.order_processing_duration("success", 0.01);
        sink.kafka_message("orders", "error", "validation");
        sink.kafka_processing_attempts("orders", "success", 1);
        sink.kafka_message_duration("orders", "success", 0.2);
        sink.http_request("GET", "/order/{order_uid}", 200, 0.003);
    }

    #[test]
    fn test_recording_metrics() {
        let sink = RecordingMetrics::new();
        sink.set_cache_size(2);
        sink.set_cache_size(5);
        sink.kafka_message("orders", "error", "parse");
        sink.kafka_message("orders", "error", "parse");
        sink.kafka_processing_attempts("orders", "error", 3);

        assert_eq!(sink.cache_size(), Some(5));
        assert_eq!(sink.kafka_count("error", "parse"), 2);
        assert_eq!(sink.kafka_count("success", "none"), 0);
        assert_eq!(sink.snapshot().attempts, vec![("error".to_string(), 3)]);
    }
}
