use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::collections::HashSet;

pub struct Metrics {
    request_counter: IntCounterVec,
    request_duration: HistogramVec,
    prediction_counter: IntCounterVec,
    prediction_duration: HistogramVec,
    vessel_coverage: HistogramVec,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("vessel_segmentation".to_string()), None)?;

        let request_counter = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["route", "status"],
        )?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_ms",
                "Duration of HTTP requests in milliseconds",
            )
            .buckets(generate_boundaries((5, 25, 50, 250, 1000))),
            &["route"],
        )?;

        let prediction_counter = IntCounterVec::new(
            Opts::new("predictions_total", "Total number of segmentation requests"),
            &["outcome"],
        )?;

        let prediction_duration = HistogramVec::new(
            HistogramOpts::new(
                "prediction_duration_ms",
                "Duration of segmentation pipelines in milliseconds",
            )
            .buckets(generate_boundaries((20, 100, 200, 1000, 5000))),
            &["route"],
        )?;

        let vessel_coverage = HistogramVec::new(
            HistogramOpts::new(
                "vessel_coverage_percent",
                "Share of the image classified as vessel",
            )
            .buckets(vec![1.0, 2.0, 5.0, 10.0, 15.0, 20.0, 30.0, 50.0, 75.0, 100.0]),
            &["route"],
        )?;

        registry.register(Box::new(request_counter.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(prediction_counter.clone()))?;
        registry.register(Box::new(prediction_duration.clone()))?;
        registry.register(Box::new(vessel_coverage.clone()))?;

        Ok(Metrics {
            request_counter,
            request_duration,
            prediction_counter,
            prediction_duration,
            vessel_coverage,
            registry,
        })
    }

    pub fn record_request(&self, route: &str, status: u16, duration_ms: f64) {
        self.request_counter
            .with_label_values(&[route, &status.to_string()])
            .inc();
        self.request_duration
            .with_label_values(&[route])
            .observe(duration_ms);
    }

    pub fn record_prediction(&self, outcome: &str) {
        self.prediction_counter.with_label_values(&[outcome]).inc();
    }

    pub fn record_prediction_duration(&self, duration_ms: f64, route: &str) {
        self.prediction_duration
            .with_label_values(&[route])
            .observe(duration_ms);
    }

    pub fn record_vessel_coverage(&self, percentage: f64, route: &str) {
        self.vessel_coverage
            .with_label_values(&[route])
            .observe(percentage);
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 10;
    let middle_step: usize = 25;
    let end_step: usize = 250;
    let tail_step: usize = 1000;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
