use super::*;

fn create_test_registry() -> Registry {
    let registry = Registry::new_custom(Some("svchub".to_string()), None).unwrap();
    register_custom_metrics(&registry);
    registry
}

#[test]
fn test_custom_registry() {
    let registry = create_test_registry();

    ADD_OBSERVER_GAUGE.with_label_values(&["default.service1"]).inc();
    let metrics = registry.gather();
    assert!(!metrics.is_empty());

    let metric_names: Vec<_> = metrics.iter().map(|m| m.get_name()).collect();
    assert!(
        metric_names.contains(&"svchub_infra_svchub_add_observer_gauge"),
        "Missing add_observer_gauge"
    );
}

#[test]
fn test_counter_increment() {
    REPORT_LOAD_COUNTS.reset();

    REPORT_LOAD_COUNTS.with_label_values(&["default.service1"]).inc();
    REPORT_LOAD_COUNTS.with_label_values(&["default.service1"]).inc();

    let value = REPORT_LOAD_COUNTS.with_label_values(&["default.service1"]).get();
    assert_eq!(value, 2, "Counter should increment correctly");
}

#[test]
fn test_queue_usage_histogram() {
    NOTIFY_CHAN_USAGE_HISTOGRAM.observe(0.25);
    NOTIFY_CHAN_USAGE_HISTOGRAM.observe(0.85);
    assert!(NOTIFY_CHAN_USAGE_HISTOGRAM.get_sample_count() >= 2);
}
