use embassy_time::{with_timeout, Duration, Instant};
use embedded_io_async::{Read, Write};
use log::{debug, error};

use super::{SensorError, SensorType};
use crate::modbus::{self, Registers};

/// Receive buffer size for one response frame
pub const RX_BUFFER_SIZE: usize = 256;

/// Registers the readings are decoded from; a shorter response is rejected
const MIN_REGISTERS: usize = 9;

/// Order of the two 16-bit halves of a 32-bit value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordOrder {
    HighWordFirst,
    LowWordFirst,
}

impl WordOrder {
    fn combine(self, first: u16, second: u16) -> u32 {
        let (high, low) = match self {
            WordOrder::HighWordFirst => (first, second),
            WordOrder::LowWordFirst => (second, first),
        };
        (high as u32) << 16 | low as u32
    }
}

/// Link and register layout of the energy meter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerMeterConfig {
    /// Modbus slave address
    pub slave: u8,
    /// First input register of the block
    pub start_register: u16,
    /// Number of registers requested per read
    pub quantity: u16,
    /// Longest wait for the request to leave the UART
    pub transmit_timeout: Duration,
    /// Longest wait for a complete response frame
    pub receive_timeout: Duration,
    /// Layout of the 32-bit current and power values
    pub word_order: WordOrder,
    /// Raw register value per volt
    pub voltage_scale: f32,
    /// Raw register value per ampere
    pub current_scale: f32,
    /// Raw register value per watt
    pub power_scale: f32,
    /// Raw register value per unit of power factor
    pub power_factor_scale: f32,
}

impl Default for PowerMeterConfig {
    fn default() -> Self {
        Self {
            slave: 0x01,
            start_register: 0,
            quantity: 10,
            transmit_timeout: Duration::from_millis(100),
            receive_timeout: Duration::from_millis(2000),
            word_order: WordOrder::HighWordFirst,
            voltage_scale: 10.0,
            current_scale: 1000.0,
            power_scale: 10.0,
            power_factor_scale: 100.0,
        }
    }
}

/// One decoded meter sample in physical units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerReadings {
    /// Line voltage in V
    pub voltage: f32,
    /// Line current in A
    pub current: f32,
    /// Active power in W
    pub power: f32,
    pub power_factor: f32,
}

impl PowerReadings {
    /// Scale a register block laid out as voltage, current (2 words),
    /// power (2 words), three unused words, power factor
    pub fn from_registers(registers: &[u16], config: &PowerMeterConfig) -> Result<Self, SensorError> {
        if registers.len() < MIN_REGISTERS {
            error!("[POWER] Expected {} registers, got {}", MIN_REGISTERS, registers.len());
            return Err(SensorError::DecodeFailure);
        }

        let current = config.word_order.combine(registers[1], registers[2]);
        let power = config.word_order.combine(registers[3], registers[4]);

        Ok(Self {
            voltage: registers[0] as f32 / config.voltage_scale,
            current: current as f32 / config.current_scale,
            power: power as f32 / config.power_scale,
            power_factor: registers[8] as f32 / config.power_factor_scale,
        })
    }

    /// Reading that belongs to `slot`
    pub fn value(&self, slot: PowerSlot) -> f32 {
        match slot {
            PowerSlot::Voltage => self.voltage,
            PowerSlot::Current => self.current,
            PowerSlot::Power => self.power,
            PowerSlot::PowerFactor => self.power_factor,
        }
    }
}

/// Position of a derived value relative to the meter's first sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSlot {
    Voltage = 0,
    Current = 1,
    Power = 2,
    PowerFactor = 3,
}

impl PowerSlot {
    /// Every slot in register order
    pub const ALL: [PowerSlot; 4] = [
        PowerSlot::Voltage,
        PowerSlot::Current,
        PowerSlot::Power,
        PowerSlot::PowerFactor,
    ];

    /// Distance from the meter's first sensor index
    pub fn offset(self) -> usize {
        self as usize
    }

    pub fn sensor_type(self) -> SensorType {
        match self {
            PowerSlot::Voltage => SensorType::Voltage,
            PowerSlot::Current => SensorType::Current,
            PowerSlot::Power => SensorType::Power,
            PowerSlot::PowerFactor => SensorType::PowerFactor,
        }
    }
}

/// Energy meter polled over Modbus RTU
pub struct PowerMeter<S> {
    serial: S,
    config: PowerMeterConfig,
}

impl<S: Read + Write> PowerMeter<S> {
    pub fn new(serial: S, config: PowerMeterConfig) -> Self {
        Self { serial, config }
    }

    /// Parameters the meter was created with
    pub fn config(&self) -> &PowerMeterConfig {
        &self.config
    }

    /// Request the register block and decode it. Fails with `Timeout` when
    /// the meter stays silent and `DecodeFailure` on a bad frame.
    pub async fn read(&mut self) -> Result<PowerReadings, SensorError> {
        self.request().await?;
        let registers = self.receive().await?;
        let readings = PowerReadings::from_registers(&registers, &self.config)?;

        debug!(
            "[POWER] {:.1} V, {:.3} A, {:.1} W, PF {:.2}",
            readings.voltage, readings.current, readings.power, readings.power_factor
        );
        Ok(readings)
    }

    async fn request(&mut self) -> Result<(), SensorError> {
        let mut frame = [0u8; modbus::REQUEST_LEN];
        let len = modbus::encode_read_input_registers(
            self.config.slave,
            self.config.start_register,
            self.config.quantity,
            &mut frame,
        )
        .map_err(|e| {
            error!("[POWER] Failed to encode request: {}", e);
            SensorError::EncodeFailure
        })?;

        let timeout = self.config.transmit_timeout;
        let serial = &mut self.serial;
        let send = async {
            serial.write_all(&frame[..len]).await?;
            serial.flush().await
        };
        match with_timeout(timeout, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("[POWER] Failed to send request: {:?}", e);
                Err(SensorError::HardwareIo)
            }
            Err(_) => {
                error!("[POWER] Request not sent within {} ms", timeout.as_millis());
                Err(SensorError::Timeout)
            }
        }
    }

    async fn receive(&mut self) -> Result<Registers, SensorError> {
        let mut buffer = [0u8; RX_BUFFER_SIZE];
        let mut len = 0;
        let deadline = Instant::now() + self.config.receive_timeout;

        loop {
            let remaining = deadline.checked_duration_since(Instant::now()).unwrap_or(Duration::from_ticks(0));
            let received = match with_timeout(remaining, self.serial.read(&mut buffer[len..])).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    error!("[POWER] Serial read failed: {:?}", e);
                    return Err(SensorError::HardwareIo);
                }
                Err(_) => 0,
            };

            if received == 0 {
                return if len == 0 {
                    error!("[POWER] No response from slave 0x{:02x}", self.config.slave);
                    Err(SensorError::Timeout)
                } else {
                    error!("[POWER] Incomplete response, {} bytes", len);
                    Err(SensorError::DecodeFailure)
                };
            }
            len += received;

            match modbus::decode_read_response(self.config.slave, &buffer[..len]) {
                Ok(registers) => return Ok(registers),
                Err(nb::Error::WouldBlock) if len < buffer.len() => continue,
                Err(nb::Error::WouldBlock) => {
                    error!("[POWER] Response exceeds {} bytes", RX_BUFFER_SIZE);
                    return Err(SensorError::DecodeFailure);
                }
                Err(nb::Error::Other(e)) => {
                    error!("[POWER] Malformed response: {}", e);
                    return Err(SensorError::DecodeFailure);
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::tests::response_frame;
    use crate::testing::MockSerial;
    use embassy_futures::block_on;

    const METER_REGISTERS: [u16; 10] = [2300, 0, 1500, 0, 5000, 0, 0, 0, 95, 0];

    fn test_config() -> PowerMeterConfig {
        PowerMeterConfig {
            receive_timeout: Duration::from_millis(50),
            ..PowerMeterConfig::default()
        }
    }

    #[test]
    fn test_decode_registers() {
        let readings = PowerReadings::from_registers(&METER_REGISTERS, &PowerMeterConfig::default()).unwrap();

        assert_eq!(readings.voltage, 230.0);
        assert_eq!(readings.current, 1.5);
        assert_eq!(readings.power, 500.0);
        assert_eq!(readings.power_factor, 0.95);
    }

    #[test]
    fn test_word_order() {
        assert_eq!(WordOrder::HighWordFirst.combine(0x0001, 0x0002), 0x0001_0002);
        assert_eq!(WordOrder::LowWordFirst.combine(0x0001, 0x0002), 0x0002_0001);
    }

    #[test]
    fn test_short_register_block() {
        assert_eq!(
            PowerReadings::from_registers(&METER_REGISTERS[..8], &PowerMeterConfig::default()),
            Err(SensorError::DecodeFailure)
        );
    }

    #[test]
    fn test_read_over_serial() {
        let mut serial = MockSerial::new();
        let frame = response_frame(0x01, &METER_REGISTERS);
        // Response trickles in across several reads
        serial.queue_rx(&frame[..4]);
        serial.queue_rx(&frame[4..15]);
        serial.queue_rx(&frame[15..]);
        let mut meter = PowerMeter::new(serial, test_config());

        let readings = block_on(meter.read()).unwrap();

        assert_eq!(readings.voltage, 230.0);
        assert_eq!(readings.power_factor, 0.95);
        assert_eq!(meter.serial_mut().written(), &[0x01, 0x04, 0x00, 0x00, 0x00, 0x0A, 0x70, 0x0D]);
    }

    #[test]
    fn test_silent_meter_times_out() {
        let mut meter = PowerMeter::new(MockSerial::new(), test_config());
        assert_eq!(block_on(meter.read()), Err(SensorError::Timeout));
    }

    #[test]
    fn test_truncated_response() {
        let mut serial = MockSerial::new();
        let frame = response_frame(0x01, &METER_REGISTERS);
        serial.queue_rx(&frame[..10]);
        let mut meter = PowerMeter::new(serial, test_config());

        assert_eq!(block_on(meter.read()), Err(SensorError::DecodeFailure));
    }

    #[test]
    fn test_corrupted_response() {
        let mut serial = MockSerial::new();
        let mut frame = response_frame(0x01, &METER_REGISTERS);
        frame[5] ^= 0x01;
        serial.queue_rx(&frame);
        let mut meter = PowerMeter::new(serial, test_config());

        assert_eq!(block_on(meter.read()), Err(SensorError::DecodeFailure));
    }

    #[test]
    fn test_write_failure() {
        let mut serial = MockSerial::new();
        serial.set_write_error(true);
        let mut meter = PowerMeter::new(serial, test_config());

        assert_eq!(block_on(meter.read()), Err(SensorError::HardwareIo));
    }
}
