//! Shake detection: turns raw accelerometer samples into a debounced move count.

use std::{
    future,
    sync::{Arc, Mutex},
};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::MotionError;

/// Minimum acceleration change (m/s²) counted as a shake.
pub const DEFAULT_SENSITIVITY: f64 = 15.0;
/// Minimum spacing between two accepted shakes, in milliseconds.
pub const DEFAULT_MIN_INTERVAL_MS: i64 = 300;

/// One accelerometer reading including gravity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Capture time in epoch milliseconds.
    pub at_ms: i64,
}

/// Tunables of the debouncer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionConfig {
    pub sensitivity: f64,
    pub min_interval_ms: i64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            sensitivity: DEFAULT_SENSITIVITY,
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
        }
    }
}

/// Answer to a motion permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
}

/// What the detector knows about its permission to listen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionStatus {
    #[default]
    Unknown,
    Granted,
    Denied,
    /// The permission prompt itself errored; the next start asks again.
    Failed,
    Unsupported,
}

/// Platform source of accelerometer samples.
pub trait MotionSensor: Send + Sync {
    fn is_supported(&self) -> bool;
    /// Whether the platform requires an explicit permission prompt.
    fn needs_permission(&self) -> bool;
    fn request_permission(&self) -> BoxFuture<'_, Result<PermissionState, String>>;
    /// Start delivering samples into `sink`, replacing any previous sink.
    fn attach(&self, sink: mpsc::UnboundedSender<MotionSample>);
    fn detach(&self);
}

/// How a [`ChannelMotionSensor`] answers permission requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionPolicy {
    NotRequired,
    Grant,
    Deny,
    Fail(String),
}

type SharedSink = Arc<Mutex<Option<mpsc::UnboundedSender<MotionSample>>>>;

/// Sensor fed from outside the process (stdin bridge, tests) through a [`MotionFeed`].
pub struct ChannelMotionSensor {
    sink: SharedSink,
    supported: bool,
    permission: PermissionPolicy,
}

impl ChannelMotionSensor {
    pub fn new(permission: PermissionPolicy) -> (Self, MotionFeed) {
        Self::build(true, permission)
    }

    /// Sensor reporting that the device has no accelerometer.
    pub fn unsupported() -> (Self, MotionFeed) {
        Self::build(false, PermissionPolicy::NotRequired)
    }

    fn build(supported: bool, permission: PermissionPolicy) -> (Self, MotionFeed) {
        let sink: SharedSink = Arc::new(Mutex::new(None));
        let feed = MotionFeed { sink: sink.clone() };
        (
            Self {
                sink,
                supported,
                permission,
            },
            feed,
        )
    }
}

impl MotionSensor for ChannelMotionSensor {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn needs_permission(&self) -> bool {
        self.permission != PermissionPolicy::NotRequired
    }

    fn request_permission(&self) -> BoxFuture<'_, Result<PermissionState, String>> {
        Box::pin(async move {
            match &self.permission {
                PermissionPolicy::NotRequired | PermissionPolicy::Grant => {
                    Ok(PermissionState::Granted)
                }
                PermissionPolicy::Deny => Ok(PermissionState::Denied),
                PermissionPolicy::Fail(reason) => Err(reason.clone()),
            }
        })
    }

    fn attach(&self, sink: mpsc::UnboundedSender<MotionSample>) {
        *lock(&self.sink) = Some(sink);
    }

    fn detach(&self) {
        lock(&self.sink).take();
    }
}

/// Producer half of a [`ChannelMotionSensor`].
#[derive(Clone)]
pub struct MotionFeed {
    sink: SharedSink,
}

impl MotionFeed {
    /// Deliver a sample; returns `false` when nobody is listening.
    pub fn push(&self, sample: MotionSample) -> bool {
        lock(&self.sink)
            .as_ref()
            .is_some_and(|sink| sink.send(sample).is_ok())
    }
}

fn lock(sink: &SharedSink) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<MotionSample>>> {
    sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Debounced shake counter owning one sensor listener at a time.
pub struct MotionDetector {
    sensor: Arc<dyn MotionSensor>,
    config: MotionConfig,
    permission: PermissionStatus,
    samples: Option<mpsc::UnboundedReceiver<MotionSample>>,
    last_vector: Option<(f64, f64, f64)>,
    last_accepted_ms: Option<i64>,
    count: watch::Sender<u32>,
}

impl MotionDetector {
    pub fn new(sensor: Arc<dyn MotionSensor>, config: MotionConfig) -> Self {
        let (count, _) = watch::channel(0);
        Self {
            sensor,
            config,
            permission: PermissionStatus::Unknown,
            samples: None,
            last_vector: None,
            last_accepted_ms: None,
            count,
        }
    }

    pub fn configure(&mut self, config: MotionConfig) {
        self.config = config;
    }

    pub fn config(&self) -> MotionConfig {
        self.config
    }

    pub fn permission(&self) -> PermissionStatus {
        self.permission
    }

    pub fn is_listening(&self) -> bool {
        self.samples.is_some()
    }

    /// Negotiate permission if needed and attach the sensor listener.
    ///
    /// Calling this while already listening is a no-op.
    pub async fn request_start(&mut self) -> Result<(), MotionError> {
        if self.is_listening() {
            return Ok(());
        }

        if !self.sensor.is_supported() {
            self.permission = PermissionStatus::Unsupported;
            warn!("motion sensing not supported; shakes will not be counted");
            return Err(MotionError::UnsupportedDevice);
        }

        if self.sensor.needs_permission() && self.permission != PermissionStatus::Granted {
            match self.sensor.request_permission().await {
                Ok(PermissionState::Granted) => {
                    self.permission = PermissionStatus::Granted;
                }
                Ok(PermissionState::Denied) => {
                    self.permission = PermissionStatus::Denied;
                    warn!("motion permission denied");
                    return Err(MotionError::PermissionDenied);
                }
                Err(reason) => {
                    self.permission = PermissionStatus::Failed;
                    warn!(%reason, "motion permission request failed");
                    return Err(MotionError::PermissionRequestFailed(reason));
                }
            }
        } else if !self.sensor.needs_permission() {
            self.permission = PermissionStatus::Granted;
        }

        let (sink, samples) = mpsc::unbounded_channel();
        self.sensor.attach(sink);
        self.samples = Some(samples);
        self.last_vector = None;
        info!(
            sensitivity = self.config.sensitivity,
            min_interval_ms = self.config.min_interval_ms,
            "motion listening started"
        );
        Ok(())
    }

    /// Detach the listener. Idempotent.
    pub fn stop(&mut self) {
        if self.samples.take().is_some() {
            self.sensor.detach();
            self.last_vector = None;
            info!(count = self.current_count(), "motion listening stopped");
        }
    }

    pub fn current_count(&self) -> u32 {
        *self.count.borrow()
    }

    /// Zero the count and forget the baseline.
    pub fn reset(&mut self) {
        self.count.send_replace(0);
        self.last_vector = None;
        self.last_accepted_ms = None;
    }

    /// Resume from a recovered count.
    pub fn set_count(&mut self, count: u32) {
        self.count.send_replace(count);
    }

    /// Observe the count as it changes.
    pub fn subscribe_count(&self) -> watch::Receiver<u32> {
        self.count.subscribe()
    }

    /// Run one sample through the debouncer, returning the new count when accepted.
    ///
    /// The first sample after start or reset only establishes the baseline.
    pub fn handle_sample(&mut self, sample: MotionSample) -> Option<u32> {
        let current = (sample.x, sample.y, sample.z);
        let Some((lx, ly, lz)) = self.last_vector.replace(current) else {
            return None;
        };

        let delta = ((sample.x - lx).powi(2) + (sample.y - ly).powi(2) + (sample.z - lz).powi(2))
            .sqrt();
        if delta <= self.config.sensitivity {
            return None;
        }

        let spaced = self
            .last_accepted_ms
            .is_none_or(|last| sample.at_ms - last > self.config.min_interval_ms);
        if !spaced {
            debug!(delta, "shake ignored inside debounce window");
            return None;
        }

        self.last_accepted_ms = Some(sample.at_ms);
        let next = self.current_count().saturating_add(1);
        self.count.send_replace(next);
        debug!(delta, count = next, "shake accepted");
        Some(next)
    }

    /// Wait for the next accepted shake.
    ///
    /// Pends forever while not listening. Cancel safe.
    pub async fn next_increment(&mut self) -> u32 {
        loop {
            let Some(samples) = self.samples.as_mut() else {
                return future::pending().await;
            };
            let Some(sample) = samples.recv().await else {
                debug!("motion sensor closed its sample stream");
                self.samples = None;
                continue;
            };
            if let Some(count) = self.handle_sample(sample) {
                return count;
            }
        }
    }
}

impl Drop for MotionDetector {
    fn drop(&mut self) {
        self.stop();
    }
}
