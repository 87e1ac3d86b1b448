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

use crate::publish::PublishError;
use crate::sensor::{Reading, SensorError};
use prometheus::{Counter, CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use std::time::UNIX_EPOCH;

/// Collection of Prometheus metrics updated by each cycle of the publish loop.
///
/// The last published temperature is emitted as a gauge per source (`real` or
/// `simulated`) along with counts of cycles, sensor fallbacks and publish failures.
#[derive(Clone)]
pub struct CycleMetrics {
    temperature: GaugeVec,
    last_publish: Gauge,
    cycles: Counter,
    sensor_errors: CounterVec,
    publish_errors: CounterVec,
}

impl CycleMetrics {
    pub fn new(reg: &Registry) -> Result<Self, prometheus::Error> {
        let temperature = GaugeVec::new(
            Opts::new("brewtemp_temperature_degrees", "Last published temperature in celsius"),
            &["source"],
        )?;
        let last_publish = Gauge::new(
            "brewtemp_last_publish_timestamp",
            "Timestamp of last successful publish",
        )?;
        let cycles = Counter::new("brewtemp_cycles_total", "Number of read and publish cycles")?;
        let sensor_errors = CounterVec::new(
            Opts::new("brewtemp_sensor_errors_total", "Number of failed probe reads by type"),
            &["kind"],
        )?;
        let publish_errors = CounterVec::new(
            Opts::new("brewtemp_publish_errors_total", "Number of failed publishes by type"),
            &["kind"],
        )?;

        reg.register(Box::new(temperature.clone()))?;
        reg.register(Box::new(last_publish.clone()))?;
        reg.register(Box::new(cycles.clone()))?;
        reg.register(Box::new(sensor_errors.clone()))?;
        reg.register(Box::new(publish_errors.clone()))?;

        Ok(Self {
            temperature,
            last_publish,
            cycles,
            sensor_errors,
            publish_errors,
        })
    }

    pub fn sensor_error(&self, e: &SensorError) {
        self.sensor_errors.with_label_values(&[e.kind().as_label()]).inc();
    }

    pub fn publish_result(&self, reading: &Reading, result: &Result<(), PublishError>) {
        self.cycles.inc();

        match result {
            Ok(_) => {
                self.temperature
                    .with_label_values(&[reading.source().as_label()])
                    .set(reading.value().into());

                // If we can't get the number of seconds since the epoch, skip the update
                let _ = reading
                    .timestamp()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| self.last_publish.set(d.as_secs_f64()));
            }
            Err(e) => {
                self.publish_errors.with_label_values(&[e.kind().as_label()]).inc();
            }
        }
    }
}

/// Render all metrics in a registry in the Prometheus text exposition format.
pub fn encode_text(reg: &Registry) -> Result<Vec<u8>, prometheus::Error> {
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    encoder.encode(&reg.gather(), &mut buf)?;
    Ok(buf)
}
