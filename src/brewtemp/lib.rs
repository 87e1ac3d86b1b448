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

//! Publish DS18B20 fermentation temperature readings to InfluxDB.
//!
//! ## Features
//!
//! Brewtemp reads the temperature from a [DS18B20 one-wire probe](https://www.analog.com/en/products/ds18b20.html)
//! exposed by the Linux `w1-therm` driver and writes it to an InfluxDB database on a fixed
//! interval. It is best run on a Raspberry PI sitting next to your fermenter.
//!
//! When no probe is attached (or the probe returns garbage) a simulated reading between
//! 20 and 30 degrees celsius is written instead. Real and simulated readings are written
//! to different measurements so that dashboards can tell them apart:
//!
//! * `real_data temperature=<celsius>` - Reading from an attached probe.
//! * `simulated_data temperature=<celsius>` - Synthesized reading.
//!
//! Failing to write a reading never stops the loop. The failure is logged and counted and
//! the next reading is written at the next interval as usual.
//!
//! ## Build
//!
//! `brewtemp` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/)
//! . Since it's meant to be run on a Raspberry PI, you will also likely need to cross-compile it.
//! If you are on Ubuntu GNU/Linux, you'll need the following packages installed for this.
//!
//! ```text
//! apt-get install gcc-arm-linux-gnueabihf musl-tools
//! ```
//!
//! Next, make sure you have a Rust toolchain for ARMv7, assuming you are using the `rustup` tool.
//!
//! ```text
//! rustup target add armv7-unknown-linux-musleabihf
//! ```
//!
//! Next, you'll need to build `brewtemp` itself for ARMv7.
//!
//! ```text
//! cargo build --release --target armv7-unknown-linux-musleabihf
//! ```
//!
//! ## Install
//!
//! ### One-wire
//!
//! The DS18B20 data line is read through the kernel one-wire bus. Enable it by adding
//! `dtoverlay=w1-gpio` to `/boot/config.txt` and rebooting. Once the probe is detected, it
//! shows up under `/sys/bus/w1/devices/28-*`.
//!
//! ### Run
//!
//! All options can be given as flags or environment variables, which makes it easy to
//! run `brewtemp` from a Systemd unit with an `EnvironmentFile`.
//!
//! ```text
//! INFLUX_URL=http://localhost:8086
//! INFLUX_DB=sensor_db
//! POLL_INTERVAL=10
//! ```
//!
//! ### Control
//!
//! A small HTTP server is started on `127.0.0.1:9781` by default.
//!
//! * `GET /metrics` - Prometheus metrics about reads and writes.
//! * `GET /settings` - Current sensor mode as JSON.
//! * `PUT /settings` - Change the sensor mode, e.g. `{"mode": "simulated"}`.
//!
//! The mode takes effect on the next reading. In `auto` mode the probe is used when it
//! is available, in `simulated` mode the probe is ignored.
//!

pub mod cycle;
pub mod http;
pub mod metrics;
pub mod publish;
pub mod sensor;
pub mod settings;
