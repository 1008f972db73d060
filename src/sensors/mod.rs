pub mod manager;
pub mod ntc;
pub mod power;
pub mod pressure;
pub mod registry;
pub mod report;

/// Measurement domain of a logical sensor.
/// Also carried in every report entry so consumers know how to read the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorType {
    /// NTC thermistor, °C
    Temperature,
    /// Pressure transducer, Pa
    Pressure,
    /// Energy meter line voltage, V
    Voltage,
    /// Energy meter current, A
    Current,
    /// Energy meter active power, W
    Power,
    /// Energy meter power factor, 0..1
    PowerFactor,
    /// Unknown or unsupported sensor
    Undefined,
}

/// Operational state of a sensor record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    Enabled,
    Disabled,
}

/// Unified error type for the acquisition engine
/// Every layer (bus drivers, conversions, calibration store) reports through it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// Bad sensor index, channel index or branch configuration
    InvalidArgument,

    /// Bus transaction failed (I2C, UART, reset GPIO)
    HardwareIo,

    /// Conversion never became ready, no response, queue or lock wait expired
    Timeout,

    /// Controller or branch used before being set up
    NotInitialized,

    /// Outgoing protocol frame could not be built
    EncodeFailure,

    /// Incoming protocol frame was malformed
    DecodeFailure,

    /// Physical quantity could not be derived from the measured values
    OutOfRange,
}

impl SensorType {
    /// Get human-readable name for this sensor type
    pub fn name(&self) -> &'static str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Pressure => "pressure",
            SensorType::Voltage => "voltage",
            SensorType::Current => "current",
            SensorType::Power => "power",
            SensorType::PowerFactor => "power_factor",
            SensorType::Undefined => "undefined",
        }
    }

    /// Unit the calibrated value is expressed in
    pub fn unit(&self) -> &'static str {
        match self {
            SensorType::Temperature => "°C",
            SensorType::Pressure => "Pa",
            SensorType::Voltage => "V",
            SensorType::Current => "A",
            SensorType::Power => "W",
            SensorType::PowerFactor => "",
            SensorType::Undefined => "",
        }
    }
}

impl core::fmt::Display for SensorError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SensorError::InvalidArgument => write!(f, "Invalid argument"),
            SensorError::HardwareIo => write!(f, "Hardware I/O error"),
            SensorError::Timeout => write!(f, "Operation timed out"),
            SensorError::NotInitialized => write!(f, "Not initialized"),
            SensorError::EncodeFailure => write!(f, "Failed to encode frame"),
            SensorError::DecodeFailure => write!(f, "Failed to decode frame"),
            SensorError::OutOfRange => write!(f, "Value out of range"),
        }
    }
}

impl core::fmt::Display for SensorType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.name())
    }
}
