use std::collections::VecDeque;
use std::time::Duration;

use log::{debug, warn};

use crate::error::EngineError;
use crate::types::{RawSample, SampleWindow};

/// Trait representing the sensor collaborator: samples arrive incrementally
/// while a time-bounded capture is active.
pub trait HeartSensor {
    fn begin(&mut self, duration: Duration) -> Result<(), EngineError>;
    /// Next pending sample, or `None` when nothing has arrived yet.
    fn poll(&mut self) -> Result<Option<RawSample>, EngineError>;
    fn end(&mut self);
    fn is_active(&self) -> bool;
}

/// In-memory sensor that replays a fixed script; used for tests and
/// deterministic playback.
pub struct ScriptedSensor {
    queue: VecDeque<RawSample>,
    active: bool,
}

impl ScriptedSensor {
    pub fn new(samples: impl IntoIterator<Item = RawSample>) -> Self {
        Self {
            queue: samples.into_iter().collect(),
            active: false,
        }
    }
}

impl HeartSensor for ScriptedSensor {
    fn begin(&mut self, _duration: Duration) -> Result<(), EngineError> {
        self.active = true;
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<RawSample>, EngineError> {
        if !self.active {
            return Ok(None);
        }
        let sample = self.queue.pop_front();
        if self.queue.is_empty() {
            self.active = false;
        }
        Ok(sample)
    }

    fn end(&mut self) {
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

struct PendingWindow {
    requested: Duration,
    samples: Vec<RawSample>,
}

/// Drains one capture window at a time from a sensor. A new capture cannot
/// start until the previous window has fully drained, and cancellation hands
/// back whatever partial window exists rather than padding it.
pub struct CaptureSession<S: HeartSensor> {
    sensor: S,
    pending: Option<PendingWindow>,
}

impl<S: HeartSensor> CaptureSession<S> {
    pub fn new(sensor: S) -> Self {
        Self {
            sensor,
            pending: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.pending.is_some()
    }

    pub fn start(&mut self, duration: Duration) -> Result<(), EngineError> {
        if self.pending.is_some() {
            return Err(EngineError::CaptureActive);
        }
        self.sensor.begin(duration)?;
        debug!("capture started for {duration:?}");
        self.pending = Some(PendingWindow {
            requested: duration,
            samples: Vec::new(),
        });
        Ok(())
    }

    /// Pull pending samples from the sensor. Returns the finished window once
    /// the requested duration is covered or the sensor stops on its own;
    /// `Ok(None)` means the capture is still filling.
    pub fn pump(&mut self) -> Result<Option<SampleWindow>, EngineError> {
        let pending = self.pending.as_mut().ok_or(EngineError::CaptureIdle)?;
        while let Some(sample) = self.sensor.poll()? {
            pending.samples.push(sample);
            if sample.elapsed >= pending.requested {
                break;
            }
        }
        let covered = pending
            .samples
            .last()
            .map(|s| s.elapsed >= pending.requested)
            .unwrap_or(false);
        if covered || !self.sensor.is_active() {
            self.sensor.end();
            if let Some(done) = self.pending.take() {
                let window = SampleWindow::new(done.requested, done.samples, covered);
                debug!(
                    "capture drained: {} samples, complete={}",
                    window.len(),
                    window.complete
                );
                return Ok(Some(window));
            }
        }
        Ok(None)
    }

    /// User-initiated stop: ends the sensor and hands back the partial
    /// window, flagged incomplete so downstream fails with insufficient data.
    pub fn cancel(&mut self) -> Result<SampleWindow, EngineError> {
        let pending = self.pending.take().ok_or(EngineError::CaptureIdle)?;
        self.sensor.end();
        let window = SampleWindow::new(pending.requested, pending.samples, false);
        warn!("capture cancelled with {} samples", window.len());
        Ok(window)
    }
}
