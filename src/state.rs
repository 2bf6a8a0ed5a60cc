//! # Application State Management
//!
//! Shared state accessed by every HTTP request handler. The split is
//! deliberate:
//!
//! - **Immutable after startup**: the feature extractor and the emotion
//!   predictor are plain `Arc`s - built once, read concurrently, never locked.
//! - **Mutable**: configuration and metrics sit behind `Arc<RwLock<T>>` so
//!   many requests can read simultaneously while updates stay exclusive.
//!
//! Lock scopes are kept tiny - snapshot-and-release, never held across I/O.

use crate::config::AppConfig;
use crate::features::FeatureExtractor;
use crate::inference::EmotionPredictor;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (the upload section can change at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// The feature extraction pipeline (stateless per call, shared read-only)
    pub extractor: Arc<FeatureExtractor>,

    /// The loaded scaler + model + label table (read-only after startup)
    pub predictor: Arc<EmotionPredictor>,

    /// Request and prediction metrics, updated by middleware and handlers
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (never changes, safe to read without a lock)
    pub start_time: Instant,
}

/// Metrics collected across all HTTP requests and predictions.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Total number of successful predictions served
    pub prediction_count: u64,

    /// How often each emotion label has been predicted
    /// Key: label (e.g., "Happy"), Value: prediction count
    pub emotion_counts: HashMap<String, u64>,

    /// Detailed metrics per API endpoint
    /// Key: endpoint name (e.g., "POST /predict")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for a single API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

impl AppState {
    /// Assemble the shared state from the startup-built components.
    pub fn new(
        config: AppConfig,
        extractor: FeatureExtractor,
        predictor: EmotionPredictor,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            extractor: Arc::new(extractor),
            predictor: Arc::new(predictor),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning under the read lock keeps the critical section short; AppConfig
    /// is cheap to clone.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Increment the total request counter (called by middleware).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    /// Increment the total error counter (called for 4xx/5xx responses).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record a served prediction and the label it produced.
    pub fn record_prediction(&self, emotion: &str) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.prediction_count += 1;
        *metrics.emotion_counts.entry(emotion.to_string()).or_default() += 1;
    }

    /// Record per-endpoint timing and error metrics.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Get a consistent snapshot of current metrics.
    ///
    /// Clones under the read lock so serialization happens lock-free.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            prediction_count: metrics.prediction_count,
            emotion_counts: metrics.emotion_counts.clone(),
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time in milliseconds for this endpoint.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{EmotionPredictor, StandardScaler};
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    fn test_state() -> AppState {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model =
            crate::inference::model::EmotionClassifier::new(vb, 120, 8, 4, 4).unwrap();
        let scaler = StandardScaler::from_parts(vec![0.0; 120], vec![1.0; 120]).unwrap();
        let labels = vec![
            "Angry".to_string(),
            "Happy".to_string(),
            "Sad".to_string(),
            "Disgust".to_string(),
        ];
        let predictor = EmotionPredictor::from_parts(scaler, model, labels, device);
        AppState::new(AppConfig::default(), FeatureExtractor::new(), predictor)
    }

    #[test]
    fn test_metrics_counting() {
        let state = test_state();

        state.increment_request_count();
        state.increment_request_count();
        state.increment_error_count();
        state.record_prediction("Happy");
        state.record_prediction("Happy");
        state.record_prediction("Sad");

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.prediction_count, 3);
        assert_eq!(snapshot.emotion_counts["Happy"], 2);
        assert_eq!(snapshot.emotion_counts["Sad"], 1);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = test_state();

        state.record_endpoint_request("POST /predict", 100, false);
        state.record_endpoint_request("POST /predict", 300, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["POST /predict"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 200.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn test_update_config_validates() {
        let state = test_state();

        let mut bad = AppConfig::default();
        bad.server.port = 0;
        assert!(state.update_config(bad).is_err());

        // Original config untouched after the failed update
        assert_eq!(state.get_config().server.port, 5000);
    }
}
