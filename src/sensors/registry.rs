//! Sensor records and their calibration.
//!
//! Each logical sensor owns one lock guarding gain, offset and state together,
//! so a reader never observes a gain from one calibration and an offset from
//! another. Every lock wait is bounded; readers fall back to defaults instead
//! of blocking acquisition.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{with_timeout, Duration};
use log::{info, warn};

use super::power::PowerSlot;
use super::{SensorError, SensorState, SensorType};
use crate::hardware::channel_map::{self, ChannelHw};

pub const NUM_OF_SENSORS: usize = 26;

pub const READ_LOCK_TIMEOUT: Duration = Duration::from_millis(10);
pub const WRITE_LOCK_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SensorIndex(u8);

impl SensorIndex {
    pub fn new(index: usize) -> Option<Self> {
        (index < NUM_OF_SENSORS).then(|| SensorIndex(index as u8))
    }

    pub fn get(self) -> usize {
        self.0 as usize
    }
}

/// How a sensor turns hardware readings into a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Ntc,
    Pressure,
    /// Polls the meter and fills every slot
    PowerMeter,
    /// Filled by the meter read of the first slot
    PowerMeterSlot(PowerSlot),
    Unsupported,
}

impl Conversion {
    pub fn for_type(sensor_type: SensorType) -> Self {
        match sensor_type {
            SensorType::Temperature => Conversion::Ntc,
            SensorType::Pressure => Conversion::Pressure,
            SensorType::Voltage => Conversion::PowerMeter,
            SensorType::Current => Conversion::PowerMeterSlot(PowerSlot::Current),
            SensorType::Power => Conversion::PowerMeterSlot(PowerSlot::Power),
            SensorType::PowerFactor => Conversion::PowerMeterSlot(PowerSlot::PowerFactor),
            SensorType::Undefined => Conversion::Unsupported,
        }
    }

    pub fn is_supported(self) -> bool {
        self != Conversion::Unsupported
    }
}

/// `value = raw * gain + offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub gain: f32,
    pub offset: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self { gain: 1.0, offset: 0.0 }
    }
}

impl Calibration {
    pub fn apply(&self, raw: f32) -> f32 {
        raw * self.gain + self.offset
    }
}

#[derive(Debug, Clone, Copy)]
struct CalibrationState {
    calibration: Calibration,
    state: SensorState,
}

/// Declarative description of one sensor
#[derive(Debug, Clone, Copy)]
pub struct SensorLayout {
    pub sensor_type: SensorType,
    pub channel: usize,
}

const fn layout(sensor_type: SensorType, channel: usize) -> SensorLayout {
    SensorLayout { sensor_type, channel }
}

const fn thermistor(channel: usize) -> SensorLayout {
    layout(SensorType::Temperature, channel)
}

/// Meter values must stay consecutive, in [`PowerSlot`] order
pub static SENSOR_LAYOUT: [SensorLayout; NUM_OF_SENSORS] = [
    thermistor(0),
    thermistor(1),
    thermistor(2),
    thermistor(3),
    thermistor(4),
    thermistor(5),
    thermistor(6),
    thermistor(7),
    thermistor(8),
    thermistor(9),
    thermistor(10),
    thermistor(11),
    thermistor(12),
    thermistor(13),
    thermistor(14),
    thermistor(15),
    thermistor(16),
    thermistor(17),
    thermistor(18),
    thermistor(19),
    layout(SensorType::Pressure, 20),
    layout(SensorType::Pressure, 21),
    layout(SensorType::Voltage, 22),
    layout(SensorType::Current, 22),
    layout(SensorType::Power, 22),
    layout(SensorType::PowerFactor, 22),
];

pub struct SensorRecord {
    index: SensorIndex,
    sensor_type: SensorType,
    hw: Option<&'static ChannelHw>,
    conversion: Conversion,
    calibration: Mutex<CriticalSectionRawMutex, CalibrationState>,
}

impl SensorRecord {
    fn new(index: SensorIndex, layout: &SensorLayout) -> Self {
        Self {
            index,
            sensor_type: layout.sensor_type,
            hw: channel_map::channel(layout.channel),
            conversion: Conversion::for_type(layout.sensor_type),
            calibration: Mutex::new(CalibrationState {
                calibration: Calibration::default(),
                state: SensorState::Disabled,
            }),
        }
    }

    pub fn index(&self) -> SensorIndex {
        self.index
    }

    pub fn sensor_type(&self) -> SensorType {
        self.sensor_type
    }

    pub fn hw(&self) -> Option<&'static ChannelHw> {
        self.hw
    }

    pub fn conversion(&self) -> Conversion {
        self.conversion
    }
}

/// Arena of sensor records, indexed by [`SensorIndex`]
pub struct SensorRegistry {
    records: [SensorRecord; NUM_OF_SENSORS],
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::with_layout(&SENSOR_LAYOUT)
    }

    pub fn with_layout(layout: &[SensorLayout; NUM_OF_SENSORS]) -> Self {
        Self {
            records: core::array::from_fn(|i| SensorRecord::new(SensorIndex(i as u8), &layout[i])),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, index: usize) -> Option<&SensorRecord> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorRecord> {
        self.records.iter()
    }

    /// Type never changes, so no lock is taken
    pub fn get_type(&self, index: usize) -> SensorType {
        self.record(index).map_or(SensorType::Undefined, |r| r.sensor_type)
    }

    pub async fn get_gain(&self, index: usize) -> f32 {
        self.calibration(index).await.gain
    }

    pub async fn get_offset(&self, index: usize) -> f32 {
        self.calibration(index).await.offset
    }

    /// Gain and offset committed by the same calibration
    pub async fn calibration(&self, index: usize) -> Calibration {
        self.snapshot(index)
            .await
            .map_or(Calibration::default(), |s| s.calibration)
    }

    pub async fn get_state(&self, index: usize) -> SensorState {
        self.snapshot(index)
            .await
            .map_or(SensorState::Disabled, |s| s.state)
    }

    pub async fn calibrate(&self, index: usize, offset: f32, gain: f32) -> Result<(), SensorError> {
        let record = self.record(index).ok_or_else(|| {
            warn!("[REGISTRY] Calibration for unknown sensor {}", index);
            SensorError::InvalidArgument
        })?;

        let mut guard = with_timeout(WRITE_LOCK_TIMEOUT, record.calibration.lock())
            .await
            .map_err(|_| {
                warn!("[REGISTRY] Sensor {} busy, calibration not applied", index);
                SensorError::Timeout
            })?;
        guard.calibration = Calibration { gain, offset };

        info!("[REGISTRY] Sensor {} calibrated: gain {}, offset {}", index, gain, offset);
        Ok(())
    }

    pub async fn set_state(&self, index: usize, state: SensorState) -> Result<(), SensorError> {
        let record = self.record(index).ok_or(SensorError::InvalidArgument)?;
        let mut guard = with_timeout(WRITE_LOCK_TIMEOUT, record.calibration.lock())
            .await
            .map_err(|_| SensorError::Timeout)?;
        guard.state = state;
        Ok(())
    }

    async fn snapshot(&self, index: usize) -> Option<CalibrationState> {
        let record = self.record(index)?;
        match with_timeout(READ_LOCK_TIMEOUT, record.calibration.lock()).await {
            Ok(guard) => Some(*guard),
            Err(_) => {
                warn!("[REGISTRY] Sensor {} lock timed out, using defaults", index);
                None
            }
        }
    }
}

impl Default for SensorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn test_calibration_round_trip() {
        let registry = SensorRegistry::new();

        block_on(async {
            registry.calibrate(3, -0.5, 1.25).await.unwrap();
            assert_eq!(registry.get_gain(3).await, 1.25);
            assert_eq!(registry.get_offset(3).await, -0.5);
            assert_eq!(registry.calibration(3).await.apply(10.0), 12.0);
        });
    }

    #[test]
    fn test_out_of_range_index_uses_defaults() {
        let registry = SensorRegistry::new();

        block_on(async {
            assert_eq!(registry.get_type(NUM_OF_SENSORS), SensorType::Undefined);
            assert_eq!(registry.get_gain(NUM_OF_SENSORS).await, 1.0);
            assert_eq!(registry.get_offset(usize::MAX).await, 0.0);
            assert_eq!(registry.get_state(NUM_OF_SENSORS).await, SensorState::Disabled);
            assert_eq!(
                registry.calibrate(NUM_OF_SENSORS, 0.0, 2.0).await,
                Err(SensorError::InvalidArgument)
            );
        });
    }

    #[test]
    fn test_layout() {
        let registry = SensorRegistry::new();

        assert_eq!(registry.len(), NUM_OF_SENSORS);
        assert_eq!(registry.get_type(0), SensorType::Temperature);
        assert_eq!(registry.get_type(21), SensorType::Pressure);
        assert_eq!(registry.get_type(25), SensorType::PowerFactor);
        assert_eq!(
            registry.record(23).map(|r| r.conversion()),
            Some(Conversion::PowerMeterSlot(PowerSlot::Current))
        );
        assert!(registry.record(22).and_then(|r| r.hw()).is_some());
        assert_eq!(block_on(registry.get_state(0)), SensorState::Disabled);
    }

    #[test]
    fn test_meter_slots_follow_base() {
        let base = SENSOR_LAYOUT
            .iter()
            .position(|l| Conversion::for_type(l.sensor_type) == Conversion::PowerMeter)
            .unwrap();

        for slot in PowerSlot::ALL {
            assert_eq!(SENSOR_LAYOUT[base + slot.offset()].sensor_type, slot.sensor_type());
        }
    }

    #[test]
    fn test_busy_lock_falls_back_and_times_out() {
        let registry = SensorRegistry::new();
        block_on(registry.calibrate(0, 5.0, 2.0)).unwrap();

        let record = registry.record(0).unwrap();
        let _guard = block_on(record.calibration.lock());

        assert_eq!(block_on(registry.get_gain(0)), 1.0);
        assert_eq!(block_on(registry.calibrate(0, 0.0, 3.0)), Err(SensorError::Timeout));
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_calibration() {
        let registry = SensorRegistry::new();

        std::thread::scope(|s| {
            s.spawn(|| {
                for k in 0..2000 {
                    let gain = k as f32;
                    let _ = block_on(registry.calibrate(7, 1.0 - gain, gain));
                }
            });

            s.spawn(|| {
                for _ in 0..2000 {
                    let calibration = block_on(registry.calibration(7));
                    assert_eq!(calibration.gain + calibration.offset, 1.0);
                }
            });
        });
    }

    #[test]
    fn test_set_state() {
        let registry = SensorRegistry::new();

        block_on(async {
            registry.set_state(4, SensorState::Enabled).await.unwrap();
            assert_eq!(registry.get_state(4).await, SensorState::Enabled);
            assert_eq!(registry.get_state(5).await, SensorState::Disabled);
        });
    }
}
