//! Simulated sensors: stand-ins for the field hardware on development
//! hosts. Each sensor produces the readings it would contribute to the
//! wire payload slots.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub trait Sensor: Send {
    fn name(&self) -> &str;
    /// Take one sample and return the current readings.
    fn sample(&mut self) -> Vec<f32>;
}

/// Water level gauge: bounded random walk in centimeters.
pub struct WaterLevelSensor {
    level_cm: f32,
    rng: StdRng,
}

impl WaterLevelSensor {
    pub fn new(initial_cm: f32) -> WaterLevelSensor {
        WaterLevelSensor {
            level_cm: initial_cm,
            rng: StdRng::from_entropy(),
        }
    }
}

impl Sensor for WaterLevelSensor {
    fn name(&self) -> &str {
        "WaterLevel"
    }

    fn sample(&mut self) -> Vec<f32> {
        self.level_cm += self.rng.gen_range(-0.8..0.8);
        self.level_cm = self.level_cm.clamp(0.0, 120.0);
        vec![self.level_cm]
    }
}

/// Air temperature and humidity, drifting around typical indoor values.
pub struct AirSensor {
    temperature_c: f32,
    humidity_pct: f32,
    rng: StdRng,
}

impl AirSensor {
    pub fn new() -> AirSensor {
        AirSensor {
            temperature_c: 21.0,
            humidity_pct: 55.0,
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for AirSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl Sensor for AirSensor {
    fn name(&self) -> &str {
        "Air"
    }

    fn sample(&mut self) -> Vec<f32> {
        self.temperature_c += self.rng.gen_range(-0.2..0.2);
        self.temperature_c = self.temperature_c.clamp(-10.0, 50.0);
        self.humidity_pct += self.rng.gen_range(-1.0..1.0);
        self.humidity_pct = self.humidity_pct.clamp(0.0, 100.0);
        vec![self.temperature_c, self.humidity_pct]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn water_level_stays_in_range() {
        let mut sensor = WaterLevelSensor::new(5.0);
        for _ in 0..1_000 {
            let values = sensor.sample();
            assert_eq!(values.len(), 1);
            assert!((0.0..=120.0).contains(&values[0]));
        }
    }

    #[test]
    fn air_readings_stay_in_range() {
        let mut sensor = AirSensor::new();
        for _ in 0..1_000 {
            let values = sensor.sample();
            assert_eq!(values.len(), 2);
            assert!((-10.0..=50.0).contains(&values[0]));
            assert!((0.0..=100.0).contains(&values[1]));
        }
    }

    #[test]
    fn sensor_names() {
        assert_eq!(WaterLevelSensor::new(0.0).name(), "WaterLevel");
        assert_eq!(AirSensor::new().name(), "Air");
    }
}
