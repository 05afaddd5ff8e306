//! On-device heartbeat biometric authentication engine: waveform
//! preprocessing, beat segmentation, feature extraction, GMM enrollment
//! training, and security-level-aware match decisions.
//!
//! The pipeline is pure, synchronous numeric computation; capture and
//! persistence are injected collaborators at the crate boundary.
pub mod capture;
pub mod enroll;
pub mod error;
pub mod features;
pub mod gmm;
pub mod matcher;
pub mod policy;
pub mod preprocess;
pub mod store;
pub mod tuning;
pub mod types;

pub use capture::{CaptureSession, HeartSensor, ScriptedSensor};
pub use enroll::{train, EnrolledModel, RichModel};
pub use error::{EngineError, StoreError};
pub use features::{
    extract_features, BeatFeatures, FeaturePolicy, LightweightFeatures, FEATURE_VERSION,
    RICH_DIM,
};
pub use gmm::{Gmm, GmmConfig};
pub use matcher::match_features;
pub use policy::{policy_for, SecurityLevel, SecurityPolicy};
pub use preprocess::{PreprocessConfig, Preprocessor};
pub use store::{load_model, save_model, FileStore, MemoryStore, ModelStore};
pub use tuning::{Tuning, DEFAULT_TUNING};
pub use types::{
    Beat, DenyReason, FailureKind, FeatureVector, MatchDecision, MatchOutcome, RawSample,
    SampleWindow, BEAT_LEN,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Scenario: a 3-sample capture never produces a model or a stored
    /// enrollment.
    #[test]
    fn insufficient_capture_never_persists_a_model() {
        let tuning = Tuning::default();
        let preprocessor = Preprocessor::new(PreprocessConfig::default());
        let samples: Vec<RawSample> = [71.0f32, 72.0, 73.0]
            .iter()
            .enumerate()
            .map(|(i, v)| RawSample::new(*v, Duration::from_millis(i as u64 * 500), 1.0))
            .collect();
        let window = SampleWindow::new(Duration::from_secs(2), samples, false);

        let store = MemoryStore::new();
        let result = extract_features(
            &window,
            FeaturePolicy::Lightweight,
            &preprocessor,
            &tuning,
        );
        match result {
            Err(EngineError::InsufficientSamples { needed, got }) => {
                assert_eq!(needed, 8);
                assert_eq!(got, 3);
            }
            other => panic!("expected insufficient samples, got {other:?}"),
        }
        assert!(store.is_empty());
        assert!(load_model(&store, "wearer").unwrap().is_none());
    }

    /// Capture, enroll, persist, reload, and authenticate end to end with
    /// injected collaborators only.
    #[test]
    fn full_cycle_with_injected_sensor_and_store() {
        let _ = env_logger::builder().is_test(true).try_init();
        let tuning = Tuning::default();
        let preprocessor = Preprocessor::new(PreprocessConfig::default());
        let script: Vec<RawSample> = [72.0f32, 74.0, 73.0, 75.0, 71.0, 76.0, 74.0, 72.0, 73.0]
            .iter()
            .enumerate()
            .map(|(i, v)| RawSample::new(*v, Duration::from_millis(i as u64 * 700), 1.0))
            .collect();

        let mut session = CaptureSession::new(ScriptedSensor::new(script));
        session.start(Duration::from_secs(5)).unwrap();
        let window = session.pump().unwrap().expect("scripted sensor drains");

        let features = extract_features(
            &window,
            FeaturePolicy::Lightweight,
            &preprocessor,
            &tuning,
        )
        .unwrap();
        let model = train(std::slice::from_ref(&features), &tuning).unwrap();

        let mut store = MemoryStore::new();
        save_model(&mut store, "wearer", &model).unwrap();
        let reloaded = load_model(&store, "wearer").unwrap().unwrap();

        let decision = match_features(
            &features,
            &reloaded,
            SecurityLevel::Medium,
            0,
            &tuning,
        );
        assert!(decision.outcome.is_accepted());
    }
}
