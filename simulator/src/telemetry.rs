use rand::Rng;
use serde::{Deserialize, Serialize};

/// What the field firmware publishes on the Relawand topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorPayload {
    pub device_id: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub gas_adc: i64,
    pub gas_ppm: i64,
    pub voltage: f64,
    pub alarm: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Normal,
    Siaga,
    Darurat,
}

/// Random reading source with tunable spike and fault rates.
#[derive(Debug, Clone, Copy)]
pub struct ReadingGenerator {
    pub siaga_rate: f64,
    pub darurat_rate: f64,
    pub fault_rate: f64,
}

impl ReadingGenerator {
    pub fn pick_profile(&self, rng: &mut impl Rng) -> Profile {
        let roll: f64 = rng.gen();
        if roll < self.darurat_rate {
            Profile::Darurat
        } else if roll < self.darurat_rate + self.siaga_rate {
            Profile::Siaga
        } else {
            Profile::Normal
        }
    }

    pub fn generate(&self, rng: &mut impl Rng, device_id: String) -> SensorPayload {
        let profile = self.pick_profile(rng);
        let mut payload = reading_for(rng, profile, device_id);

        if rng.gen_bool(self.fault_rate.clamp(0.0, 1.0)) {
            // DHT read failure: the firmware sends nulls.
            payload.temperature = None;
            payload.humidity = None;
        }
        payload
    }
}

pub fn reading_for(rng: &mut impl Rng, profile: Profile, device_id: String) -> SensorPayload {
    let mut temperature: f64 = rng.gen_range(24.0..33.0);
    let humidity: f64 = rng.gen_range(55.0..85.0);
    let gas_ppm = match profile {
        Profile::Normal => rng.gen_range(150..900),
        Profile::Siaga => rng.gen_range(1000..1500),
        Profile::Darurat => {
            if rng.gen_bool(0.5) {
                rng.gen_range(1500..3000)
            } else {
                temperature = rng.gen_range(40.0..55.0);
                rng.gen_range(150..900)
            }
        }
    };

    SensorPayload {
        device_id,
        temperature: Some(round1(temperature)),
        humidity: Some(round1(humidity)),
        gas_adc: adc_for_ppm(gas_ppm),
        gas_ppm,
        voltage: (rng.gen_range(3.1..3.4_f64) * 100.0).round() / 100.0,
        alarm: gas_ppm >= 1000,
    }
}

/// 12-bit ADC reading for a 0..10000 ppm sensor span.
fn adc_for_ppm(ppm: i64) -> i64 {
    (ppm * 4095 / 10_000).clamp(0, 4095)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_normal_profile_stays_below_thresholds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let p = reading_for(&mut rng, Profile::Normal, "dev".to_string());
            assert!(p.gas_ppm < 1000);
            assert!(p.temperature.unwrap() < 35.0);
            assert!(p.humidity.unwrap() > 50.0);
            assert!(!p.alarm);
        }
    }

    #[test]
    fn test_spike_profiles() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let siaga = reading_for(&mut rng, Profile::Siaga, "dev".to_string());
            assert!((1000..1500).contains(&siaga.gas_ppm));
            assert!(siaga.alarm);

            let darurat = reading_for(&mut rng, Profile::Darurat, "dev".to_string());
            assert!(darurat.gas_ppm >= 1500 || darurat.temperature.unwrap() >= 40.0);
        }
    }

    #[test]
    fn test_fault_rate_one_nulls_dht_fields() {
        let generator = ReadingGenerator {
            siaga_rate: 0.0,
            darurat_rate: 0.0,
            fault_rate: 1.0,
        };
        let mut rng = StdRng::seed_from_u64(3);
        let p = generator.generate(&mut rng, "dev".to_string());
        assert!(p.temperature.is_none());
        assert!(p.humidity.is_none());

        let json = serde_json::to_value(&p).unwrap();
        assert!(json["temperature"].is_null());
    }

    #[test]
    fn test_profile_rates() {
        let mut rng = StdRng::seed_from_u64(5);
        let always = ReadingGenerator {
            siaga_rate: 0.0,
            darurat_rate: 1.0,
            fault_rate: 0.0,
        };
        assert_eq!(always.pick_profile(&mut rng), Profile::Darurat);

        let never = ReadingGenerator {
            siaga_rate: 0.0,
            darurat_rate: 0.0,
            fault_rate: 0.0,
        };
        assert!((0..100).all(|_| never.pick_profile(&mut rng) == Profile::Normal));
    }

    #[test]
    fn test_adc_scaling() {
        assert_eq!(adc_for_ppm(0), 0);
        assert_eq!(adc_for_ppm(10_000), 4095);
        assert_eq!(adc_for_ppm(50_000), 4095);
    }
}
