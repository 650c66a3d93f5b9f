use crate::model::SensorReading;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Wire shape of a device payload.
#[derive(Debug, Deserialize)]
struct WirePayload {
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    humidity: Option<f64>,
    gas_adc: f64,
    gas_ppm: f64,
    voltage: f64,
    alarm: bool,
}

/// A payload that could not become a [`SensorReading`].
#[derive(Debug, Error)]
pub enum RejectedPayload {
    #[error("empty payload")]
    Empty,

    #[error("undecodable payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decodes a raw payload into a reading stamped with `received_at`.
///
/// Numeric values are taken as-is; no range checks are applied. The gas
/// fields accept any JSON number and are rounded to the nearest integer. An
/// absent or empty `device_id` falls back to `default_device_id`.
pub fn parse_payload(
    payload: &[u8],
    default_device_id: &str,
    received_at: DateTime<Utc>,
) -> Result<SensorReading, RejectedPayload> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(RejectedPayload::Empty);
    }

    let wire: WirePayload = serde_json::from_slice(payload)?;

    let device_id = wire
        .device_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| default_device_id.to_string());

    Ok(SensorReading {
        device_id,
        timestamp: received_at,
        temperature: wire.temperature,
        humidity: wire.humidity,
        gas_adc: whole(wire.gas_adc),
        gas_ppm: whole(wire.gas_ppm),
        voltage: wire.voltage,
        alarm: wire.alarm,
    })
}

/// Half-way values round away from zero, so 1499.5 ppm counts as 1500.
fn whole(value: f64) -> i64 {
    value.round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: &str = "STM32-001";

    #[test]
    fn test_full_payload() {
        let payload = br#"{"device_id":"dev-7","temperature":28.5,"humidity":61.0,"gas_adc":812,"gas_ppm":430,"voltage":3.31,"alarm":false}"#;
        let now = Utc::now();
        let reading = parse_payload(payload, DEFAULT, now).unwrap();

        assert_eq!(reading.device_id, "dev-7");
        assert_eq!(reading.timestamp, now);
        assert_eq!(reading.temperature, Some(28.5));
        assert_eq!(reading.humidity, Some(61.0));
        assert_eq!(reading.gas_adc, 812);
        assert_eq!(reading.gas_ppm, 430);
        assert!(!reading.alarm);
    }

    #[test]
    fn test_missing_device_id_uses_default() {
        let payload = br#"{"temperature":28.5,"humidity":61.0,"gas_adc":812,"gas_ppm":430,"voltage":3.31,"alarm":false}"#;
        let reading = parse_payload(payload, DEFAULT, Utc::now()).unwrap();
        assert_eq!(reading.device_id, DEFAULT);

        let payload = br#"{"device_id":"","temperature":28.5,"humidity":61.0,"gas_adc":812,"gas_ppm":430,"voltage":3.31,"alarm":false}"#;
        let reading = parse_payload(payload, DEFAULT, Utc::now()).unwrap();
        assert_eq!(reading.device_id, DEFAULT);
    }

    #[test]
    fn test_null_temperature_and_humidity() {
        let payload = br#"{"device_id":"dev-1","temperature":null,"humidity":null,"gas_adc":100,"gas_ppm":50,"voltage":3.3,"alarm":false}"#;
        let reading = parse_payload(payload, DEFAULT, Utc::now()).unwrap();
        assert_eq!(reading.temperature, None);
        assert_eq!(reading.humidity, None);
    }

    #[test]
    fn test_implausible_values_pass_through() {
        let payload = br#"{"device_id":"dev-1","temperature":-400.0,"humidity":250.0,"gas_adc":-3,"gas_ppm":-1,"voltage":-9.0,"alarm":true}"#;
        let reading = parse_payload(payload, DEFAULT, Utc::now()).unwrap();
        assert_eq!(reading.temperature, Some(-400.0));
        assert_eq!(reading.gas_ppm, -1);
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        let err = parse_payload(b"{not json", DEFAULT, Utc::now()).unwrap_err();
        assert!(matches!(err, RejectedPayload::Malformed(_)));
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let payload = br#"{"device_id":"dev-1","temperature":20.0,"humidity":50.0,"gas_adc":100,"voltage":3.3,"alarm":false}"#;
        assert!(matches!(
            parse_payload(payload, DEFAULT, Utc::now()),
            Err(RejectedPayload::Malformed(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        assert!(parse_payload(&[0xff, 0xfe, 0x7b], DEFAULT, Utc::now()).is_err());
    }

    #[test]
    fn test_empty_payload() {
        assert!(matches!(
            parse_payload(b"  ", DEFAULT, Utc::now()),
            Err(RejectedPayload::Empty)
        ));
    }

    #[test]
    fn test_float_gas_fields_are_accepted() {
        let payload = br#"{"device_id":"dev-1","temperature":30.0,"humidity":60.0,"gas_adc":812.0,"gas_ppm":1600.0,"voltage":3.3,"alarm":true}"#;
        let reading = parse_payload(payload, DEFAULT, Utc::now()).unwrap();
        assert_eq!(reading.gas_adc, 812);
        assert_eq!(reading.gas_ppm, 1600);

        let payload = br#"{"device_id":"dev-1","temperature":30.0,"humidity":60.0,"gas_adc":700.4,"gas_ppm":1234.5,"voltage":3.3,"alarm":true}"#;
        let reading = parse_payload(payload, DEFAULT, Utc::now()).unwrap();
        assert_eq!(reading.gas_adc, 700);
        assert_eq!(reading.gas_ppm, 1235);
    }

    #[test]
    fn test_fractional_ppm_near_threshold() {
        let payload = br#"{"temperature":25,"humidity":60,"gas_adc":900,"gas_ppm":1499.5,"voltage":3.3,"alarm":false}"#;
        assert_eq!(parse_payload(payload, DEFAULT, Utc::now()).unwrap().gas_ppm, 1500);

        let payload = br#"{"temperature":25,"humidity":60,"gas_adc":900,"gas_ppm":999.4,"voltage":3.3,"alarm":false}"#;
        assert_eq!(parse_payload(payload, DEFAULT, Utc::now()).unwrap().gas_ppm, 999);
    }

    #[test]
    fn test_string_gas_value_is_rejected() {
        let payload = br#"{"temperature":25,"humidity":60,"gas_adc":"900","gas_ppm":100,"voltage":3.3,"alarm":false}"#;
        assert!(matches!(
            parse_payload(payload, DEFAULT, Utc::now()),
            Err(RejectedPayload::Malformed(_))
        ));
    }
}
