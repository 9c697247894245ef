//! Per-thread dynamic charts over several collection cycles.

use std::collections::BTreeMap;
use std::sync::Arc;

use mgmt_query::testing::StaticEndpoint;
use mgmt_query::updater::{LoadResult, THREAD_VALUE_MISSING, THREADING_OBJECT_NAME, thread_queries};
use mgmt_query::{
    Chart, ChartHandle, Dimension, DimensionAlgorithm, DimensionHandle, DimensionUpdater, DynamicDimensionUpdater,
    InstanceKey, Value,
};
use parking_lot::Mutex;

type CpuTimes = Arc<Mutex<BTreeMap<i64, i64>>>;

/// Threading object whose live threads and CPU times come from `times`.
fn threading(times: &CpuTimes) -> StaticEndpoint {
    let endpoint = StaticEndpoint::new();
    endpoint.set_attribute(THREADING_OBJECT_NAME, "ThreadCpuTimeSupported", true);
    endpoint.set_attribute(THREADING_OBJECT_NAME, "ThreadCpuTimeEnabled", true);
    endpoint.set_attribute(THREADING_OBJECT_NAME, "ThreadContentionMonitoringSupported", false);
    endpoint.set_attribute(THREADING_OBJECT_NAME, "AllThreadIds", Value::List(vec![]));

    let cpu = Arc::clone(times);
    endpoint.set_operation(THREADING_OBJECT_NAME, "getThreadCpuTime", &["long"], "long", move |args| {
        let id = args[0].as_i64().unwrap_or_default();
        Ok(Value::Long(cpu.lock().get(&id).copied().unwrap_or(THREAD_VALUE_MISSING)))
    });
    endpoint.set_operation(
        THREADING_OBJECT_NAME,
        "getThreadInfo",
        &["long"],
        "javax.management.openmbean.CompositeData",
        |args| {
            let id = args[0].as_i64().unwrap_or_default();
            Ok([("threadName".to_string(), Value::String(format!("worker-{id}")))]
                .into_iter()
                .collect())
        },
    );
    endpoint
}

fn run_cycle(endpoint: &StaticEndpoint, times: &CpuTimes, updater: &mut DynamicDimensionUpdater, threads: &[(i64, i64)]) {
    *times.lock() = threads.iter().copied().collect();
    let ids: Vec<Value> = threads.iter().map(|(id, _)| Value::Long(*id)).collect();
    endpoint.set_attribute(THREADING_OBJECT_NAME, "AllThreadIds", Value::List(ids));
    updater.update_dimension_values(endpoint).unwrap();
}

fn per_thread_updater(endpoint: &StaticEndpoint, chart: &ChartHandle) -> DynamicDimensionUpdater {
    let queries = thread_queries(endpoint, "ThreadCpuTime").unwrap();
    let chart = chart.clone();
    let loader = move |_: &InstanceKey, name: &str| -> LoadResult {
        let mut chart = chart.write();
        if let Some(dimension) = chart.dimension(name) {
            return Ok(Some(dimension));
        }
        let dimension = DimensionHandle::new(Dimension::new(name).with_algorithm(DimensionAlgorithm::Incremental));
        chart.add_dimension(dimension.clone()).map_err(|e| e.to_string())?;
        Ok(Some(dimension))
    };
    DynamicDimensionUpdater::new(queries.parameters, Some(queries.name_query), queries.value_query, loader)
        .unwrap()
        .with_missing_value(THREAD_VALUE_MISSING)
}

fn current(chart: &ChartHandle, id: &str) -> Option<i64> {
    chart.read().dimension(id).and_then(|d| d.current_value())
}

#[test]
fn increments_follow_live_threads() {
    let times = CpuTimes::default();
    let endpoint = threading(&times);
    let chart = ChartHandle::new(Chart::new("mgmt_local", "threads_cpu"));
    let mut updater = per_thread_updater(&endpoint, &chart);

    run_cycle(&endpoint, &times, &mut updater, &[(1, 10), (2, 10)]);
    assert_eq!(updater.increment("worker-1"), Some(10));
    assert_eq!(updater.increment("worker-2"), Some(10));

    run_cycle(&endpoint, &times, &mut updater, &[(1, 15), (2, 12)]);
    assert_eq!(updater.increment("worker-1"), Some(5));
    assert_eq!(updater.increment("worker-2"), Some(2));
    assert_eq!(current(&chart, "worker-1"), Some(15));
    assert_eq!(current(&chart, "worker-2"), Some(12));

    run_cycle(&endpoint, &times, &mut updater, &[(2, 14)]);
    assert_eq!(current(&chart, "worker-1"), None);
    assert_eq!(updater.increment("worker-1"), None);
    assert_eq!(updater.increment("worker-2"), Some(2));
    assert!(!updater.arena().contains(&InstanceKey::Long(1)));
    assert_eq!(chart.read().dimensions().len(), 2);
}

#[test]
fn dead_thread_between_enumeration_and_sample() {
    let times = CpuTimes::default();
    let endpoint = threading(&times);
    let chart = ChartHandle::new(Chart::new("mgmt_local", "threads_cpu"));
    let mut updater = per_thread_updater(&endpoint, &chart);

    run_cycle(&endpoint, &times, &mut updater, &[(1, 10)]);

    // thread 1 is still listed but its CPU time is gone
    times.lock().clear();
    updater.update_dimension_values(&endpoint).unwrap();
    assert_eq!(current(&chart, "worker-1"), None);

    // when it reports again, the delta is against the last real sample
    times.lock().insert(1, 13);
    updater.update_dimension_values(&endpoint).unwrap();
    assert_eq!(updater.increment("worker-1"), Some(3));
}

#[test]
fn thread_names_are_resolved_once() {
    let times = CpuTimes::default();
    let endpoint = threading(&times);
    let chart = ChartHandle::new(Chart::new("mgmt_local", "threads_cpu"));
    let mut updater = per_thread_updater(&endpoint, &chart);

    run_cycle(&endpoint, &times, &mut updater, &[(1, 10)]);
    let after_first = endpoint.call_count();
    run_cycle(&endpoint, &times, &mut updater, &[(1, 11)]);

    // AllThreadIds and getThreadCpuTime only
    assert_eq!(endpoint.call_count() - after_first, 2);
    assert_eq!(updater.arena().name(&InstanceKey::Long(1)), Some("worker-1"));
}
