use embassy_time::Duration;

use crate::sensors::ntc::NtcConfig;
use crate::sensors::pressure::PressureRange;

/// Timing and conversion parameters of the acquisition loop
#[derive(Debug, Clone, Copy)]
pub struct AcquisitionConfig {
    /// Time between the start of two cycles
    pub cycle_period: Duration,
    /// Pause after each sensor
    pub channel_settle: Duration,
    /// Pause between selecting a mux channel and sampling it
    pub mux_settle: Duration,
    /// Longest wait for room in the report queue before a report is dropped
    pub publish_timeout: Duration,
    /// Longest wait for the analog front end before a sensor is skipped
    pub bus_timeout: Duration,
    /// Bridge parameters for the thermistor channels
    pub ntc: NtcConfig,
    /// Transducer output range for the pressure channels
    pub pressure: PressureRange,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            cycle_period: Duration::from_secs(5),
            channel_settle: Duration::from_millis(100),
            mux_settle: Duration::from_millis(10),
            publish_timeout: Duration::from_millis(100),
            bus_timeout: Duration::from_millis(1000),
            ntc: NtcConfig::default(),
            pressure: PressureRange::default(),
        }
    }
}
