//! Decides which incoming alerts are shown to the operator.
//!
//! Every non-NORMAL alert is a candidate. A candidate surfaces only when no
//! alert has surfaced yet in its cooldown scope, or the cooldown has fully
//! elapsed since the last one. In the default global scope a single timer is
//! shared by all devices, so an alert from one device can hide a more severe
//! alert from another for the rest of the window.

use crate::directory::DeviceDirectory;
use crate::events::{Alert, Level};
use clap::ValueEnum;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CooldownScope {
    /// One timer for every device.
    Global,
    /// One timer per device id.
    PerDevice,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurfacedAlert {
    pub device_name: String,
    pub alert: Alert,
}

#[derive(Debug)]
pub struct AlertGate {
    cooldown: Duration,
    scope: CooldownScope,
    last_global: Option<Instant>,
    last_by_device: HashMap<String, Instant>,
}

impl AlertGate {
    pub fn new(cooldown: Duration, scope: CooldownScope) -> Self {
        Self {
            cooldown,
            scope,
            last_global: None,
            last_by_device: HashMap::new(),
        }
    }

    pub fn offer(
        &mut self,
        alert: Alert,
        directory: &DeviceDirectory,
        now: Instant,
    ) -> Option<SurfacedAlert> {
        if alert.level == Level::Normal {
            return None;
        }

        let last = match self.scope {
            CooldownScope::Global => self.last_global,
            CooldownScope::PerDevice => self.last_by_device.get(&alert.device_id).copied(),
        };
        let open = last.map_or(true, |at| now.saturating_duration_since(at) >= self.cooldown);
        if !open {
            return None;
        }

        match self.scope {
            CooldownScope::Global => self.last_global = Some(now),
            CooldownScope::PerDevice => {
                self.last_by_device.insert(alert.device_id.clone(), now);
            }
        }

        Some(SurfacedAlert {
            device_name: directory.name_of(&alert.device_id),
            alert,
        })
    }
}

impl Default for AlertGate {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN, CooldownScope::Global)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Device, Snapshot};
    use chrono::Utc;

    fn alert(device_id: &str, level: Level) -> Alert {
        Alert {
            id: format!("{}-{:?}", device_id, level),
            device_id: device_id.to_string(),
            level,
            snapshot: Snapshot {
                temperature: Some(30.0),
                humidity: Some(60.0),
                gas_ppm: 1200,
            },
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_first_alert_surfaces_with_display_name() {
        let mut gate = AlertGate::default();
        let mut directory = DeviceDirectory::new();
        directory.learn(&Device {
            device_id: "F01".to_string(),
            device_name: "Gudang Utara".to_string(),
            status: "online".to_string(),
            last_seen: Utc::now(),
        });

        let surfaced = gate
            .offer(alert("F01", Level::Siaga), &directory, Instant::now())
            .unwrap();
        assert_eq!(surfaced.device_name, "Gudang Utara");
    }

    #[test]
    fn test_higher_severity_suppressed_within_cooldown() {
        let mut gate = AlertGate::default();
        let directory = DeviceDirectory::new();
        let t0 = Instant::now();

        assert!(gate.offer(alert("A", Level::Siaga), &directory, t0).is_some());
        assert!(gate
            .offer(alert("A", Level::Darurat), &directory, t0 + Duration::from_secs(10))
            .is_none());
    }

    #[test]
    fn test_global_scope_spans_devices() {
        let mut gate = AlertGate::default();
        let directory = DeviceDirectory::new();
        let t0 = Instant::now();

        assert!(gate.offer(alert("A", Level::Siaga), &directory, t0).is_some());
        assert!(gate
            .offer(alert("B", Level::Darurat), &directory, t0 + Duration::from_secs(30))
            .is_none());
    }

    #[test]
    fn test_cooldown_boundary_is_inclusive() {
        let mut gate = AlertGate::default();
        let directory = DeviceDirectory::new();
        let t0 = Instant::now();

        assert!(gate.offer(alert("A", Level::Siaga), &directory, t0).is_some());
        assert!(gate
            .offer(alert("A", Level::Siaga), &directory, t0 + Duration::from_millis(59_999))
            .is_none());
        assert!(gate
            .offer(alert("A", Level::Siaga), &directory, t0 + DEFAULT_COOLDOWN)
            .is_some());
    }

    #[test]
    fn test_suppressed_alert_does_not_restart_window() {
        let mut gate = AlertGate::default();
        let directory = DeviceDirectory::new();
        let t0 = Instant::now();

        gate.offer(alert("A", Level::Siaga), &directory, t0);
        gate.offer(alert("A", Level::Siaga), &directory, t0 + Duration::from_secs(50));
        assert!(gate
            .offer(alert("A", Level::Siaga), &directory, t0 + Duration::from_secs(61))
            .is_some());
    }

    #[test]
    fn test_per_device_scope() {
        let mut gate = AlertGate::new(DEFAULT_COOLDOWN, CooldownScope::PerDevice);
        let directory = DeviceDirectory::new();
        let t0 = Instant::now();

        assert!(gate.offer(alert("A", Level::Siaga), &directory, t0).is_some());
        assert!(gate
            .offer(alert("B", Level::Darurat), &directory, t0 + Duration::from_secs(5))
            .is_some());
        assert!(gate
            .offer(alert("A", Level::Darurat), &directory, t0 + Duration::from_secs(5))
            .is_none());
    }

    #[test]
    fn test_normal_never_surfaces() {
        let mut gate = AlertGate::default();
        let directory = DeviceDirectory::new();
        assert!(gate
            .offer(alert("A", Level::Normal), &directory, Instant::now())
            .is_none());
        // The ignored NORMAL did not start a window.
        assert!(gate
            .offer(alert("A", Level::Siaga), &directory, Instant::now())
            .is_some());
    }
}
