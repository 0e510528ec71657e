use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use std::time::Duration;

/// OpenTelemetry instruments of the timeout guard.
///
/// Built from the global meter, so they record nothing until a meter
/// provider is installed (see [`crate::telemetry::init_tracing`]).
#[derive(Clone)]
pub struct GuardMetrics {
    outcomes: Counter<u64>,
    race_duration: Histogram<f64>,
}

impl GuardMetrics {
    pub fn new() -> Self {
        Self::from_meter(&opentelemetry::global::meter("service-timeout-guard"))
    }

    /// Builds the instruments from a specific meter instead of the global one.
    pub fn from_meter(meter: &Meter) -> Self {
        let outcomes = meter
            .u64_counter("timeout_guard_outcomes_total")
            .with_description("Guarded requests by outcome")
            .build();
        let race_duration = meter
            .f64_histogram("timeout_guard_race_duration_seconds")
            .with_description("Time until the race between handler and deadline was decided")
            .with_unit("s")
            .build();
        Self {
            outcomes,
            race_duration,
        }
    }

    pub(crate) fn record_outcome(&self, outcome: &'static str, elapsed: Duration) {
        let attributes = [KeyValue::new("outcome", outcome)];
        self.outcomes.add(1, &attributes);
        self.race_duration
            .record(elapsed.as_secs_f64(), &attributes);
    }

    pub(crate) fn record_bypass(&self) {
        self.outcomes.add(1, &[KeyValue::new("outcome", "bypassed")]);
    }

    pub(crate) fn record_late_panic(&self) {
        self.outcomes
            .add(1, &[KeyValue::new("outcome", "late_panic")]);
    }
}

impl Default for GuardMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeout::TimeoutLayer;
    use bytes::Bytes;
    use http::{Request, Response, StatusCode};
    use http_body_util::Full;
    use opentelemetry::metrics::MeterProvider;
    use opentelemetry_sdk::metrics::data::{ResourceMetrics, Sum};
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};
    use std::collections::HashMap;
    use std::convert::Infallible;
    use tower::{Layer, ServiceExt, service_fn};

    fn outcome_counts(finished: &ResourceMetrics) -> HashMap<String, u64> {
        let mut counts = HashMap::new();
        for metric in finished.scope_metrics.iter().flat_map(|sm| &sm.metrics) {
            if metric.name != "timeout_guard_outcomes_total" {
                continue;
            }
            let Some(sum) = metric.data.as_any().downcast_ref::<Sum<u64>>() else {
                continue;
            };
            for point in &sum.data_points {
                for kv in point.attributes.iter().filter(|kv| kv.key.as_str() == "outcome") {
                    *counts.entry(kv.value.to_string()).or_insert(0) += point.value;
                }
            }
        }
        counts
    }

    fn request(path: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_are_counted() {
        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder()
            .with_reader(PeriodicReader::builder(exporter.clone()).build())
            .build();
        let metrics = GuardMetrics::from_meter(&provider.meter("service-timeout-guard"));
        let svc = TimeoutLayer::default()
            .with_metrics(metrics)
            .layer(service_fn(|req: Request<Full<Bytes>>| async move {
                let secs: u64 = req.uri().path().trim_start_matches('/').parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_secs(secs)).await;
                if secs > 5 {
                    panic!("handler bug after the deadline");
                }
                Ok::<_, Infallible>(Response::new(Full::new(Bytes::new())))
            }));

        let res = svc.clone().oneshot(request("/7")).await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        // let the orphaned handler reach its panic
        tokio::time::sleep(Duration::from_secs(5)).await;

        let res = svc.oneshot(request("/1")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        provider.force_flush().unwrap();
        let finished = exporter.get_finished_metrics().unwrap();
        let counts = outcome_counts(finished.last().unwrap());
        assert_eq!(counts.get("timed_out"), Some(&1));
        assert_eq!(counts.get("late_panic"), Some(&1));
        assert_eq!(counts.get("completed"), Some(&1));
        assert_eq!(counts.get("panicked"), None);
    }
}
