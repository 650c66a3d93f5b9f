//! Severity thresholds for gas, temperature and humidity.
//!
//! Each dimension is classified on its own and the most severe tier wins.
//! A dimension whose sensor reported a fault (`None`) never trips a tier.

use crate::model::{AlertSnapshot, SensorReading, Severity};

pub const GAS_PPM_SIAGA: i64 = 1000;
pub const GAS_PPM_DARURAT: i64 = 1500;
pub const TEMP_SIAGA: f64 = 35.0;
pub const TEMP_DARURAT: f64 = 40.0;
/// Humidity is inverted: low values are dangerous.
pub const HUMIDITY_SIAGA: f64 = 50.0;
pub const HUMIDITY_DARURAT: f64 = 35.0;

pub fn classify(reading: &SensorReading) -> Severity {
    classify_snapshot(&AlertSnapshot::from(reading))
}

pub fn classify_snapshot(snapshot: &AlertSnapshot) -> Severity {
    let gas = rising(snapshot.gas_ppm, GAS_PPM_SIAGA, GAS_PPM_DARURAT);
    let temperature = snapshot
        .temperature
        .map_or(Severity::Normal, |t| rising(t, TEMP_SIAGA, TEMP_DARURAT));
    let humidity = snapshot
        .humidity
        .map_or(Severity::Normal, |h| falling(h, HUMIDITY_SIAGA, HUMIDITY_DARURAT));

    gas.max(temperature).max(humidity)
}

fn rising<T: PartialOrd>(value: T, siaga: T, darurat: T) -> Severity {
    if value >= darurat {
        Severity::Darurat
    } else if value >= siaga {
        Severity::Siaga
    } else {
        Severity::Normal
    }
}

fn falling<T: PartialOrd>(value: T, siaga: T, darurat: T) -> Severity {
    if value <= darurat {
        Severity::Darurat
    } else if value <= siaga {
        Severity::Siaga
    } else {
        Severity::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(gas_ppm: i64, temperature: Option<f64>, humidity: Option<f64>) -> AlertSnapshot {
        AlertSnapshot {
            temperature,
            humidity,
            gas_ppm,
        }
    }

    #[test]
    fn normal_when_every_dimension_is_calm() {
        for gas in [0, 500, 999] {
            for temp in [-10.0, 20.0, 34.9] {
                for hum in [50.1, 70.0, 100.0] {
                    assert_eq!(
                        classify_snapshot(&snapshot(gas, Some(temp), Some(hum))),
                        Severity::Normal
                    );
                }
            }
        }
    }

    #[test]
    fn gas_tiers() {
        assert_eq!(classify_snapshot(&snapshot(1000, Some(30.0), Some(60.0))), Severity::Siaga);
        assert_eq!(classify_snapshot(&snapshot(1100, Some(30.0), Some(60.0))), Severity::Siaga);
        assert_eq!(classify_snapshot(&snapshot(1499, Some(30.0), Some(60.0))), Severity::Siaga);
        assert_eq!(classify_snapshot(&snapshot(1500, Some(30.0), Some(60.0))), Severity::Darurat);
        assert_eq!(classify_snapshot(&snapshot(1600, Some(30.0), Some(60.0))), Severity::Darurat);
    }

    #[test]
    fn gas_darurat_wins_regardless_of_other_dimensions() {
        assert_eq!(classify_snapshot(&snapshot(1500, None, None)), Severity::Darurat);
        assert_eq!(classify_snapshot(&snapshot(2000, Some(36.0), Some(45.0))), Severity::Darurat);
    }

    #[test]
    fn temperature_tiers() {
        assert_eq!(classify_snapshot(&snapshot(0, Some(35.0), Some(60.0))), Severity::Siaga);
        assert_eq!(classify_snapshot(&snapshot(0, Some(39.9), Some(60.0))), Severity::Siaga);
        assert_eq!(classify_snapshot(&snapshot(0, Some(40.0), Some(60.0))), Severity::Darurat);
    }

    #[test]
    fn humidity_is_inverted() {
        assert_eq!(classify_snapshot(&snapshot(0, Some(25.0), Some(50.0))), Severity::Siaga);
        assert_eq!(classify_snapshot(&snapshot(0, Some(25.0), Some(35.1))), Severity::Siaga);
        assert_eq!(classify_snapshot(&snapshot(0, Some(25.0), Some(35.0))), Severity::Darurat);
        assert_eq!(classify_snapshot(&snapshot(0, Some(25.0), Some(0.0))), Severity::Darurat);
    }

    #[test]
    fn higher_tier_on_one_dimension_beats_lower_on_another() {
        // gas SIAGA, temperature DARURAT
        assert_eq!(classify_snapshot(&snapshot(1200, Some(41.0), Some(60.0))), Severity::Darurat);
        // gas NORMAL, humidity DARURAT, temperature SIAGA
        assert_eq!(classify_snapshot(&snapshot(100, Some(36.0), Some(30.0))), Severity::Darurat);
    }

    #[test]
    fn faulted_sensors_do_not_trip() {
        assert_eq!(classify_snapshot(&snapshot(200, None, None)), Severity::Normal);
        assert_eq!(classify_snapshot(&snapshot(200, None, Some(40.0))), Severity::Siaga);
    }

    #[test]
    fn classification_is_pure() {
        let s = snapshot(1100, Some(30.0), Some(60.0));
        let first = classify_snapshot(&s);
        for _ in 0..10 {
            assert_eq!(classify_snapshot(&s), first);
        }
    }
}
