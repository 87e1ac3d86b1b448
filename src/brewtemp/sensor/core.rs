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

use std::error::Error;
use std::fmt::{self, Formatter};
use std::time::SystemTime;

/// Temperature, in degrees celsius
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct TemperatureCelsius(f64);

impl From<TemperatureCelsius> for f64 {
    fn from(v: TemperatureCelsius) -> Self {
        v.0
    }
}

impl From<f64> for TemperatureCelsius {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for TemperatureCelsius {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}c", self.0)
    }
}

/// Where the value of a reading came from.
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum Source {
    Real,
    Simulated,
}

impl Source {
    pub fn as_label(&self) -> &'static str {
        match self {
            Source::Real => "real",
            Source::Simulated => "simulated",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// A single temperature value produced by one poll cycle.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Reading {
    value: TemperatureCelsius,
    source: Source,
    timestamp: SystemTime,
}

impl Reading {
    pub fn new(value: TemperatureCelsius, source: Source, timestamp: SystemTime) -> Self {
        Self {
            value,
            source,
            timestamp,
        }
    }

    /// Create a reading from a probe, timestamped now.
    pub fn real(value: TemperatureCelsius) -> Self {
        Self::new(value, Source::Real, SystemTime::now())
    }

    /// Create a synthesized reading, timestamped now.
    pub fn simulated(value: TemperatureCelsius) -> Self {
        Self::new(value, Source::Simulated, SystemTime::now())
    }

    pub fn value(&self) -> TemperatureCelsius {
        self.value
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}

/// Potential kinds of errors that can be encountered reading from a one-wire probe
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum SensorErrorKind {
    Unavailable,
    Malformed,
}

impl SensorErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            SensorErrorKind::Unavailable => "unavailable",
            SensorErrorKind::Malformed => "malformed",
        }
    }
}

/// Error locating or reading a one-wire probe via sysfs
#[derive(Debug)]
pub enum SensorError {
    KindMsg(SensorErrorKind, &'static str),
    KindMsgCause(SensorErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl SensorError {
    pub fn kind(&self) -> SensorErrorKind {
        match self {
            SensorError::KindMsg(kind, _) => *kind,
            SensorError::KindMsgCause(kind, _, _) => *kind,
        }
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::KindMsg(_, msg) => f.write_str(msg),
            SensorError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for SensorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SensorError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}
