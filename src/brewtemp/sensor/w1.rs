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

use crate::sensor::core::{SensorError, SensorErrorKind, TemperatureCelsius};
use std::fs;
use std::path::{Path, PathBuf};

/// Default location of one-wire devices exposed by the kernel.
pub const DEFAULT_DEVICE_ROOT: &str = "/sys/bus/w1/devices";

/// Family code prefix of DS18B20 (and compatible) temperature probes.
const DS18B20_FAMILY_PREFIX: &str = "28-";
const DATA_FILE: &str = "w1_slave";
const TEMPERATURE_TOKEN: &str = "t=";
const CRC_TOKEN: &str = "crc=";
const CRC_VALID: &str = "YES";

/// Read temperature in degrees celsius from a DS18B20 probe via the `w1-therm`
/// sysfs interface.
///
/// The probe is located again on every read since it may be attached or detached
/// while we're running. When more than one probe is attached, the first by device
/// ID is used.
#[derive(Debug, Clone)]
pub struct W1Sensor {
    root: PathBuf,
}

impl W1Sensor {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find the data file of the first DS18B20 probe under the device root.
    pub fn discover(&self) -> Result<PathBuf, SensorError> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            SensorError::KindMsgCause(
                SensorErrorKind::Unavailable,
                "unable to list one-wire devices",
                Box::new(e),
            )
        })?;

        let mut devices: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(DS18B20_FAMILY_PREFIX))
            .map(|e| e.path())
            .collect();

        devices.sort();
        tracing::trace!(message = "discovered one-wire devices", devices = ?devices);

        devices
            .into_iter()
            .next()
            .map(|d| d.join(DATA_FILE))
            .ok_or(SensorError::KindMsg(
                SensorErrorKind::Unavailable,
                "no DS18B20 probe found",
            ))
    }

    /// Read the temperature from the probe or return an error if it is missing
    /// or the data it returned could not be parsed.
    ///
    /// This performs blocking file I/O. The kernel driver starts a conversion when
    /// the data file is read which takes up to 750ms.
    pub fn read(&self) -> Result<TemperatureCelsius, SensorError> {
        let path = self.discover()?;
        let content = fs::read_to_string(&path).map_err(|e| {
            SensorError::KindMsgCause(SensorErrorKind::Unavailable, "unable to read probe data", Box::new(e))
        })?;

        tracing::debug!(message = "read probe data", path = %path.display(), content = %content.trim_end());
        parse_w1_slave(&content)
    }
}

/// Parse the contents of a `w1_slave` file into a temperature.
///
/// The driver emits two lines, the first ending in the result of the CRC check and
/// the second ending with the temperature in millidegrees:
///
/// ```text
/// 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
/// 72 01 4b 46 7f ff 0e 10 57 t=23125
/// ```
pub(crate) fn parse_w1_slave(content: &str) -> Result<TemperatureCelsius, SensorError> {
    let crc_failed = content
        .lines()
        .filter(|l| l.contains(CRC_TOKEN))
        .any(|l| !l.trim_end().ends_with(CRC_VALID));

    if crc_failed {
        return Err(SensorError::KindMsg(
            SensorErrorKind::Malformed,
            "probe data failed CRC check",
        ));
    }

    let raw = content
        .lines()
        .find_map(|l| l.find(TEMPERATURE_TOKEN).map(|i| &l[i + TEMPERATURE_TOKEN.len()..]))
        .and_then(|rest| rest.split_whitespace().next())
        .ok_or(SensorError::KindMsg(
            SensorErrorKind::Malformed,
            "probe data missing temperature",
        ))?;

    let millis: i64 = raw.parse().map_err(|e| {
        SensorError::KindMsgCause(
            SensorErrorKind::Malformed,
            "unable to parse probe temperature",
            Box::new(e),
        )
    })?;

    Ok(TemperatureCelsius::from(millis as f64 / 1000.0))
}

#[cfg(test)]
mod test {
    use super::{parse_w1_slave, W1Sensor};
    use crate::sensor::core::{SensorErrorKind, TemperatureCelsius};
    use crate::sensor::test::{FakeDeviceTree, VALID_W1_SLAVE};

    #[test]
    fn test_parse_valid() {
        let res = parse_w1_slave(VALID_W1_SLAVE).unwrap();
        assert_eq!(TemperatureCelsius::from(23.125), res);
    }

    #[test]
    fn test_parse_token_only() {
        let res = parse_w1_slave("t=21875").unwrap();
        assert_eq!(TemperatureCelsius::from(21.875), res);
    }

    #[test]
    fn test_parse_negative() {
        let content = "5e ff 4b 46 7f ff 02 10 b3 : crc=b3 YES\n5e ff 4b 46 7f ff 02 10 b3 t=-10125\n";
        let res = parse_w1_slave(content).unwrap();
        assert_eq!(TemperatureCelsius::from(-10.125), res);
    }

    #[test]
    fn test_parse_crc_failure() {
        let content = "72 01 4b 46 7f ff 0e 10 57 : crc=00 NO\n72 01 4b 46 7f ff 0e 10 57 t=23125\n";
        let res = parse_w1_slave(content);
        assert_eq!(SensorErrorKind::Malformed, res.unwrap_err().kind());
    }

    #[test]
    fn test_parse_missing_token() {
        let content = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n";
        let res = parse_w1_slave(content);
        assert_eq!(SensorErrorKind::Malformed, res.unwrap_err().kind());
    }

    #[test]
    fn test_parse_garbage_value() {
        let res = parse_w1_slave("t=warm");
        assert_eq!(SensorErrorKind::Malformed, res.unwrap_err().kind());
    }

    #[test]
    fn test_parse_empty_value() {
        let res = parse_w1_slave("72 01 4b t=\n");
        assert_eq!(SensorErrorKind::Malformed, res.unwrap_err().kind());
    }

    #[test]
    fn test_read_valid() {
        let tree = FakeDeviceTree::new();
        tree.add_device("28-0316a2797aff", Some(VALID_W1_SLAVE));

        let sensor = W1Sensor::new(tree.path());
        assert_eq!(TemperatureCelsius::from(23.125), sensor.read().unwrap());
    }

    #[test]
    fn test_read_picks_first_device() {
        let tree = FakeDeviceTree::new();
        tree.add_device("28-0316a2797bbb", Some("t=19000"));
        tree.add_device("28-0316a2797aaa", Some("t=18000"));

        let sensor = W1Sensor::new(tree.path());
        assert_eq!(TemperatureCelsius::from(18.0), sensor.read().unwrap());
    }

    #[test]
    fn test_read_ignores_other_families() {
        let tree = FakeDeviceTree::new();
        tree.add_device("w1_bus_master1", None);
        tree.add_device("10-000802b4ba0e", Some("t=30000"));

        let sensor = W1Sensor::new(tree.path());
        let res = sensor.read();
        assert_eq!(SensorErrorKind::Unavailable, res.unwrap_err().kind());
    }

    #[test]
    fn test_read_missing_data_file() {
        let tree = FakeDeviceTree::new();
        tree.add_device("28-0316a2797aff", None);

        let sensor = W1Sensor::new(tree.path());
        let res = sensor.read();
        assert_eq!(SensorErrorKind::Unavailable, res.unwrap_err().kind());
    }

    #[test]
    fn test_read_missing_root() {
        let tree = FakeDeviceTree::new();
        let sensor = W1Sensor::new(tree.path().join("does-not-exist"));
        let res = sensor.read();
        assert_eq!(SensorErrorKind::Unavailable, res.unwrap_err().kind());
    }
}
