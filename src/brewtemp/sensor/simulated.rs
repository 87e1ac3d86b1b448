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

use crate::sensor::core::TemperatureCelsius;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Lower bound (inclusive) of simulated temperatures, in degrees celsius.
pub const SIMULATED_MIN: f64 = 20.0;
/// Upper bound (exclusive) of simulated temperatures, in degrees celsius.
pub const SIMULATED_MAX: f64 = 30.0;

/// Source of synthesized temperatures used when no probe can be read.
///
/// Values are uniformly distributed in `[SIMULATED_MIN, SIMULATED_MAX)`, a plausible
/// range for an ale fermenting at room temperature.
#[derive(Debug)]
pub struct Simulator {
    rng: StdRng,
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a simulator that produces the same sequence of values for a given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn sample(&mut self) -> TemperatureCelsius {
        TemperatureCelsius::from(self.rng.gen_range(SIMULATED_MIN..SIMULATED_MAX))
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}
