//! 可观测性模块集成测试
//!
//! 覆盖指标接收端的各个实现、配置默认值与资源守卫。

// ============================================================================
// 指标记录测试
// ============================================================================

mod metrics_tests {
    use std::sync::Arc;

    use order_shared::observability::metrics::{
        MetricsSink, NoopMetrics, PrometheusMetrics, RecordingMetrics,
    };

    /// 按消费者与 HTTP 层的真实调用顺序记录一遍
    fn record_pipeline(sink: &dyn MetricsSink) {
        sink.kafka_message("orders", "received", "none");
        sink.kafka_processing_attempts("orders", "success", 2);
        sink.order_processing_duration("success", 0.012);
        sink.order_created();
        sink.kafka_message("orders", "success", "none");
        sink.kafka_message_duration("orders", "success", 0.015);
        sink.set_cache_size(1);
        sink.http_request("GET", "/order/{order_uid}", 200, 0.002);
    }

    #[test]
    fn test_prometheus_sink_without_recorder() {
        // 未安装 recorder 时 metrics 门面为空操作
        record_pipeline(&PrometheusMetrics);
    }

    #[test]
    fn test_noop_sink() {
        record_pipeline(&NoopMetrics);
    }

    #[test]
    fn test_recording_sink_aggregates_calls() {
        let sink = RecordingMetrics::new();
        record_pipeline(&sink);
        sink.kafka_message("orders", "error", "parse");
        sink.kafka_message("orders", "error", "parse");

        let recorded = sink.snapshot();
        assert_eq!(recorded.orders_created, 1);
        assert_eq!(recorded.cache_size, Some(1));
        assert_eq!(recorded.attempts, vec![("success".to_string(), 2)]);
        assert_eq!(
            recorded.http_requests,
            vec![("GET".to_string(), "/order/{order_uid}".to_string(), 200)]
        );

        assert_eq!(sink.kafka_count("received", "none"), 1);
        assert_eq!(sink.kafka_count("error", "parse"), 2);
        assert_eq!(sink.kafka_count("error", "validation"), 0);
    }

    #[test]
    fn test_recording_sink_keeps_latest_cache_size() {
        let sink = RecordingMetrics::new();
        assert_eq!(sink.cache_size(), None);

        sink.set_cache_size(10);
        sink.set_cache_size(3);
        assert_eq!(sink.cache_size(), Some(3));
    }

    #[test]
    fn test_sinks_are_object_safe() {
        let sinks: Vec<Arc<dyn MetricsSink>> = vec![
            Arc::new(PrometheusMetrics),
            Arc::new(NoopMetrics),
            Arc::new(RecordingMetrics::new()),
        ];
        for sink in &sinks {
            // 空标签与极端耗时不应 panic
            sink.http_request("", "", 0, 0.0);
            sink.kafka_message_duration("orders", "error", 999.99);
        }
    }
}

// ============================================================================
// 配置测试
// ============================================================================

mod config_tests {
    use order_shared::observability::ObservabilityConfig;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.service_name, "order-service");
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, "pretty");
        assert!(config.metrics_enabled);
        assert!(config.otlp_endpoint.is_none());
    }

    #[test]
    fn test_custom_config() {
        let config = ObservabilityConfig {
            service_name: "order-producer".to_string(),
            log_level: "debug".to_string(),
            log_format: "json".to_string(),
            metrics_enabled: false,
            metrics_port: 9091,
            otlp_endpoint: Some("http://localhost:4317".to_string()),
        };

        assert_eq!(config.service_name, "order-producer");
        assert_eq!(config.otlp_endpoint.as_deref(), Some("http://localhost:4317"));
        assert!(!config.metrics_enabled);
    }
}

// ============================================================================
// Guard 测试
// ============================================================================

mod guard_tests {
    use order_shared::observability::ObservabilityGuard;

    #[test]
    fn test_empty_guard() {
        let guard = ObservabilityGuard::empty();
        drop(guard);
    }

    #[test]
    fn test_guard_drop() {
        for _ in 0..10 {
            let guard = ObservabilityGuard::empty();
            drop(guard);
        }
    }
}
