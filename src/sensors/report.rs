use core::fmt::{self, Write};

use heapless::String;

use super::registry::{SensorRegistry, NUM_OF_SENSORS};
use super::{SensorError, SensorType};
use crate::clock::Timestamp;

/// Room for a full report with every sensor active
pub const REPORT_JSON_CAPACITY: usize = 1536;

pub type ReportJson = String<REPORT_JSON_CAPACITY>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReport {
    pub value: f32,
    pub active: bool,
    pub sensor_type: SensorType,
}

impl SensorReport {
    pub const fn inactive(sensor_type: SensorType) -> Self {
        Self {
            value: 0.0,
            active: false,
            sensor_type,
        }
    }
}

/// Snapshot of every sensor taken during one acquisition cycle
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReport {
    pub timestamp: Timestamp,
    pub sensors: [SensorReport; NUM_OF_SENSORS],
    pub channel_count: usize,
}

impl DeviceReport {
    /// All entries inactive, typed after the registry
    pub fn new(timestamp: Timestamp, registry: &SensorRegistry) -> Self {
        Self {
            timestamp,
            sensors: core::array::from_fn(|i| SensorReport::inactive(registry.get_type(i))),
            channel_count: registry.len(),
        }
    }

    pub fn set(&mut self, index: usize, value: f32) {
        if let Some(entry) = self.sensors.get_mut(index) {
            entry.value = value;
            entry.active = true;
        }
    }

    pub fn active_count(&self) -> usize {
        self.sensors.iter().filter(|s| s.active).count()
    }

    /// `{"timestamp":"..","sensors":[{"value":1.23,"active":true},..],"channel_count":N}`
    pub fn write_json<W: Write>(&self, out: &mut W) -> fmt::Result {
        write!(out, "{{\"timestamp\":\"{}\",\"sensors\":[", self.timestamp)?;
        for (i, sensor) in self.sensors.iter().take(self.channel_count).enumerate() {
            if i > 0 {
                out.write_char(',')?;
            }
            out.write_str("{\"value\":")?;
            write_number(out, sensor.value)?;
            write!(out, ",\"active\":{}}}", sensor.active)?;
        }
        write!(out, "],\"channel_count\":{}}}", self.channel_count)
    }

    pub fn to_json(&self) -> Result<ReportJson, SensorError> {
        let mut out = ReportJson::new();
        self.write_json(&mut out).map_err(|_| SensorError::EncodeFailure)?;
        Ok(out)
    }
}

/// Two decimals; JSON has no representation for NaN or infinities
pub(crate) fn write_number<W: Write>(out: &mut W, value: f32) -> fmt::Result {
    if value.is_finite() {
        write!(out, "{:.2}", value)
    } else {
        out.write_str("null")
    }
}
