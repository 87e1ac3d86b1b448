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

use serde::{Deserialize, Serialize};
use std::fmt::{self, Formatter};
use tokio::sync::watch;

/// How each cycle should obtain a temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorMode {
    /// Read the probe, falling back to a simulated value when it can't be read.
    #[default]
    Auto,
    /// Never touch the probe, always use a simulated value.
    Simulated,
}

impl fmt::Display for SensorMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SensorMode::Auto => f.write_str("auto"),
            SensorMode::Simulated => f.write_str("simulated"),
        }
    }
}

/// Settings that may be changed while running. Read at the start of every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Settings {
    pub mode: SensorMode,
}

impl Settings {
    pub fn new(mode: SensorMode) -> Self {
        Self { mode }
    }
}

/// Sending half of the settings channel, held by whatever changes settings.
pub type SettingsSender = watch::Sender<Settings>;

/// Receiving half of the settings channel, held by the publish loop.
pub type SettingsReceiver = watch::Receiver<Settings>;

/// Create a channel for swapping settings at runtime. Receivers always see the
/// most recently sent value.
pub fn channel(initial: Settings) -> (SettingsSender, SettingsReceiver) {
    watch::channel(initial)
}
