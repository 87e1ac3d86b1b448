// Brewtemp - Fermentation temperature publisher for InfluxDB
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::metrics::CycleMetrics;
use crate::publish::{PublishError, Publisher};
use crate::sensor::{Reading, SensorError, SensorErrorKind, Simulator, W1Sensor};
use crate::settings::{SensorMode, SettingsReceiver};
use std::future::Future;
use std::time::Duration;
use tokio::task;
use tokio::time::{self, MissedTickBehavior};
use tracing::{Instrument, Level};

pub const DEFAULT_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 2;

/// Outcome of a single cycle: the reading that was produced and whether it was written.
#[derive(Debug)]
pub struct CycleReport {
    pub reading: Reading,
    pub publish: Result<(), PublishError>,
}

/// Periodically read a temperature (or simulate one) and publish it.
///
/// Each cycle produces exactly one reading. Failing to read the probe results in a
/// simulated reading and failing to publish is logged and counted. Neither stops the
/// loop and nothing is carried from one cycle to the next.
pub struct SensorPublishLoop<P> {
    sensor: W1Sensor,
    simulator: Simulator,
    publisher: P,
    settings: SettingsReceiver,
    metrics: CycleMetrics,
    probe_timeout: Duration,
    publish_timeout: Duration,
}

impl<P> SensorPublishLoop<P>
where
    P: Publisher,
{
    pub fn new(sensor: W1Sensor, publisher: P, settings: SettingsReceiver, metrics: CycleMetrics) -> Self {
        Self {
            sensor,
            simulator: Simulator::new(),
            publisher,
            settings,
            metrics,
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            publish_timeout: Duration::from_secs(DEFAULT_PUBLISH_TIMEOUT_SECS),
        }
    }

    pub fn with_simulator(mut self, simulator: Simulator) -> Self {
        self.simulator = simulator;
        self
    }

    /// Give up waiting on the probe after `timeout` and use a simulated value. The
    /// blocking read itself can't be cancelled and is left to finish on its own.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Produce a reading from the probe or, if the probe can't be read or simulated
    /// mode is enabled, from the simulator.
    async fn acquire(&mut self) -> Reading {
        let mode = self.settings.borrow().mode;
        if mode == SensorMode::Simulated {
            tracing::debug!(message = "simulated mode enabled, skipping probe");
            return Reading::simulated(self.simulator.sample());
        }

        let sensor = self.sensor.clone();
        let read = task::spawn_blocking(move || sensor.read()).instrument(tracing::span!(Level::DEBUG, "sensor_read"));

        let res = match time::timeout(self.probe_timeout, read).await {
            Ok(Ok(res)) => res,
            Ok(Err(e)) => Err(SensorError::KindMsgCause(
                SensorErrorKind::Unavailable,
                "probe read task failed",
                Box::new(e),
            )),
            Err(e) => Err(SensorError::KindMsgCause(
                SensorErrorKind::Unavailable,
                "probe read timed out",
                Box::new(e),
            )),
        };

        match res {
            Ok(temp) => Reading::real(temp),
            Err(e) => {
                tracing::debug!(
                    message = "unable to read probe, using simulated value",
                    root = %self.sensor.root().display(),
                    kind = e.kind().as_label(),
                    error = %e,
                );

                self.metrics.sensor_error(&e);
                Reading::simulated(self.simulator.sample())
            }
        }
    }

    /// Write a reading, giving up after the publish timeout.
    async fn publish(&self, reading: &Reading) -> Result<(), PublishError> {
        match time::timeout(self.publish_timeout, self.publisher.publish(reading)).await {
            Ok(res) => res,
            Err(_) => Err(PublishError::Timeout(self.publish_timeout)),
        }
    }

    /// Acquire a single reading and publish it, returning what happened.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let reading = self.acquire().await;
        let publish = self.publish(&reading).await;
        self.metrics.publish_result(&reading, &publish);

        match &publish {
            Ok(_) => tracing::info!(
                message = "published reading",
                source = %reading.source(),
                temperature = %reading.value(),
            ),
            Err(e) => tracing::warn!(
                message = "failed to publish reading",
                source = %reading.source(),
                temperature = %reading.value(),
                kind = e.kind().as_label(),
                error = %e,
            ),
        }

        CycleReport { reading, publish }
    }

    /// Run a cycle every `interval` until `shutdown` completes. A cycle in progress
    /// when `shutdown` completes is abandoned.
    pub async fn run<F>(mut self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = time::interval(interval);
        // An overrunning cycle pushes back the schedule instead of causing a burst.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            message = "starting publish loop",
            interval_secs = interval.as_secs_f64(),
            probe_timeout_secs = self.probe_timeout.as_secs_f64(),
            publish_timeout_secs = self.publish_timeout.as_secs_f64(),
            root = %self.sensor.root().display(),
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(message = "abandoning cycle in progress");
                    break;
                }
                _ = self.run_cycle() => {}
            }
        }

        tracing::info!(message = "publish loop stopped");
    }
}
