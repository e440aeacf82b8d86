use std::collections::VecDeque;
use std::sync::Weak;
use std::time::Duration;

use casa::command::DeviceData;
use casa::device::DeviceId;

use chrono::{DateTime, Utc};

use serde::Serialize;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use tokio_util::sync::CancellationToken;

use tracing::{debug, error};

use crate::entity::{Entity, SharedEntity};

/// How many samples a device retains.
///
/// Once the history is full, the oldest sample is evicted first.
pub const MAX_SAMPLES: usize = 100;

/// A single metrics capture: the capture time plus the data payload the
/// device reported at that instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// Capture time.
    pub time: DateTime<Utc>,
    /// Data payload at capture time.
    #[serde(flatten)]
    pub data: DeviceData,
}

/// The bounded metrics history of one device, oldest sample first.
#[derive(Debug, Default)]
pub(crate) struct MetricsHistory {
    samples: VecDeque<Sample>,
}

impl MetricsHistory {
    /// Appends a capture of `data`, evicting the oldest sample when the
    /// history is full.
    pub(crate) fn record(&mut self, data: &DeviceData) {
        if self.samples.len() == MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample {
            time: Utc::now(),
            data: data.clone(),
        });
    }

    /// Returns a copy of the stored samples, oldest first.
    pub(crate) fn snapshot(&self) -> Vec<Sample> {
        self.samples.iter().cloned().collect()
    }
}

/// The metrics body returned for a device or a pool.
#[derive(Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Metrics {
    /// The samples of a plain device, oldest first.
    Device(Vec<Sample>),
    /// One entry per pool member, in member order.
    Pool(Vec<PoolMetricsEntry>),
}

impl Metrics {
    /// Returns the device samples, if the target was a plain device.
    #[must_use]
    pub fn as_samples(&self) -> Option<&[Sample]> {
        match self {
            Self::Device(samples) => Some(samples),
            Self::Pool(_) => None,
        }
    }

    /// Returns the per-member entries, if the target was a pool.
    #[must_use]
    pub fn as_pool(&self) -> Option<&[PoolMetricsEntry]> {
        match self {
            Self::Device(_) => None,
            Self::Pool(entries) => Some(entries),
        }
    }
}

/// The metrics block of one pool member.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolMetricsEntry {
    /// Member identifier.
    pub id: DeviceId,
    /// The member's samples, oldest first.
    pub metrics: Vec<Sample>,
}

/// The cancellable periodic task sampling one device.
///
/// Dropping the handle cancels the task, so re-arming a device replaces the
/// previous cadence without further ceremony; [`Sampler::stop`] additionally
/// awaits the task for a clean shutdown.
#[derive(Debug)]
pub(crate) struct Sampler {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Sampler {
    /// Spawns a sampler for `entity`, capturing a sample every
    /// `update_time` seconds.
    ///
    /// Returns [`None`] when `update_time` is `0` (sampling disabled).
    pub(crate) fn arm(entity: &SharedEntity, update_time: u32) -> Option<Self> {
        if update_time == 0 {
            return None;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run(
            std::sync::Arc::downgrade(entity),
            Duration::from_secs(u64::from(update_time)),
            token.clone(),
        ));

        Some(Self {
            token,
            handle: Some(handle),
        })
    }

    /// Stops the task and awaits its termination.
    pub(crate) async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Failed to await the sampler task: {e}");
            }
        }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        // Stop the infinite loop; the detached task exits on its own.
        self.token.cancel();
    }
}

async fn run(entity: Weak<Mutex<Entity>>, period: Duration, token: CancellationToken) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of a tokio interval completes immediately; consume it
    // so the first sample lands one full period after arming.
    interval.tick().await;

    loop {
        tokio::select! {
            // Use the cancellation token to stop the loop
            () = token.cancelled() => { break; }
            _ = interval.tick() => {
                let Some(entity) = entity.upgrade() else { break };
                let mut entity = entity.lock().await;
                // A re-arm may have been raced while waiting for the entity
                // lock; the replacement task owns the cadence from here.
                if token.is_cancelled() {
                    break;
                }
                entity.record_sample();
            }
        }
    }
    debug!("sampler task stopped");
}
