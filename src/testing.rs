//! Simulated peripherals for host tests.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
use embedded_hal_async::i2c::{ErrorType, I2c, Operation};

use crate::clock::Clock;
use crate::hardware::ads1115::{Config, InputMux, DEFAULT_ADDRESS};
use crate::hardware::mux::{MuxAddress, MuxRoute};

const OS_BIT: u16 = 1 << 15;
const POWER_ON_CONFIG: u16 = 0x8583;

/// I2C bus with two TCA9548A multiplexers and one ADS1115 behind them.
///
/// Conversion results are keyed by the multiplexer port that is enabled at the
/// time of the read and the ADC input selected in the config register.
pub struct MockBus {
    masks: HashMap<u8, u8>,
    mux_writes: usize,
    failing_route: Option<MuxRoute>,
    failing_disable: Option<u8>,
    adc_present: bool,
    pointer: u8,
    config: Option<u16>,
    conversion_stuck: bool,
    ready_polls: usize,
    default_raw: i16,
    raws: HashMap<(MuxRoute, InputMux), i16>,
}

impl MockBus {
    pub fn new() -> Self {
        let mut masks = HashMap::new();
        masks.insert(MuxAddress::Primary.address(), 0);
        masks.insert(MuxAddress::Secondary.address(), 0);

        Self {
            masks,
            mux_writes: 0,
            failing_route: None,
            failing_disable: None,
            adc_present: true,
            pointer: 0,
            config: None,
            conversion_stuck: false,
            ready_polls: 0,
            default_raw: 0,
            raws: HashMap::new(),
        }
    }

    pub fn set_default_raw(&mut self, raw: i16) {
        self.default_raw = raw;
    }

    pub fn set_raw(&mut self, route: MuxRoute, input: InputMux, raw: i16) {
        self.raws.insert((route, input), raw);
    }

    pub fn set_adc_present(&mut self, present: bool) {
        self.adc_present = present;
    }

    pub fn set_conversion_stuck(&mut self, stuck: bool) {
        self.conversion_stuck = stuck;
    }

    /// Writes enabling `route` are not acknowledged
    pub fn fail_mux_route(&mut self, route: MuxRoute) {
        self.failing_route = Some(route);
    }

    /// The next write disabling every channel of `mux` is not acknowledged
    pub fn fail_next_disable(&mut self, mux: MuxAddress) {
        self.failing_disable = Some(mux.address());
    }

    pub fn mux_mask(&self, mux: MuxAddress) -> u8 {
        self.masks.get(&mux.address()).copied().unwrap_or(0)
    }

    pub fn mux_writes(&self) -> usize {
        self.mux_writes
    }

    /// Config register polls since the last config write
    pub fn ready_polls(&self) -> usize {
        self.ready_polls
    }

    pub fn adc_config(&self) -> Option<Config> {
        self.config.map(Config::from_register)
    }

    fn active_route(&self) -> Option<MuxRoute> {
        MuxAddress::ALL
            .into_iter()
            .find_map(|mux| match self.mux_mask(mux) {
                0 => None,
                mask => Some(MuxRoute::new(mux, mask.trailing_zeros() as u8)),
            })
    }

    fn write_mux(&mut self, address: u8, bytes: &[u8]) -> Result<(), ErrorKind> {
        let [mask] = bytes else {
            return Err(ErrorKind::Other);
        };
        if *mask == 0 && self.failing_disable == Some(address) {
            self.failing_disable = None;
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data));
        }
        if let Some(route) = self.failing_route {
            if route.mux.address() == address && *mask == 1 << route.channel {
                return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data));
            }
        }
        self.mux_writes += 1;
        self.masks.insert(address, *mask);
        Ok(())
    }

    fn write_adc(&mut self, bytes: &[u8]) -> Result<(), ErrorKind> {
        match bytes {
            [pointer] => self.pointer = *pointer,
            [pointer, hi, lo] => {
                self.pointer = *pointer;
                if *pointer == 0x01 {
                    self.config = Some(u16::from_be_bytes([*hi, *lo]));
                    self.ready_polls = 0;
                }
            }
            _ => return Err(ErrorKind::Other),
        }
        Ok(())
    }

    fn read_adc(&mut self, buffer: &mut [u8]) -> Result<(), ErrorKind> {
        let value = match self.pointer {
            0x01 => {
                self.ready_polls += 1;
                let config = self.config.unwrap_or(POWER_ON_CONFIG);
                if self.conversion_stuck {
                    config & !OS_BIT
                } else {
                    config | OS_BIT
                }
            }
            0x00 => {
                let input = self
                    .adc_config()
                    .map(|c| c.input)
                    .unwrap_or(InputMux::DiffA0A1);
                let raw = self
                    .active_route()
                    .and_then(|route| self.raws.get(&(route, input)).copied())
                    .unwrap_or(self.default_raw);
                raw as u16
            }
            _ => return Err(ErrorKind::Other),
        };

        let bytes = value.to_be_bytes();
        buffer.iter_mut().zip(bytes).for_each(|(b, v)| *b = v);
        Ok(())
    }
}

impl ErrorType for MockBus {
    type Error = ErrorKind;
}

impl I2c for MockBus {
    async fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
        let is_mux = self.masks.contains_key(&address);
        if !is_mux && (address != DEFAULT_ADDRESS || !self.adc_present) {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }

        for operation in operations.iter_mut() {
            match operation {
                Operation::Write(bytes) if is_mux => self.write_mux(address, bytes)?,
                Operation::Write(bytes) => self.write_adc(bytes)?,
                Operation::Read(buffer) if is_mux => {
                    let mask = self.masks.get(&address).copied().unwrap_or(0);
                    buffer.iter_mut().for_each(|b| *b = mask);
                }
                Operation::Read(buffer) => self.read_adc(buffer)?,
            }
        }
        Ok(())
    }
}

/// Output pin that records every level it is driven to
#[derive(Default)]
pub struct MockPin {
    transitions: Vec<bool>,
}

impl MockPin {
    pub fn transitions(&self) -> &[bool] {
        &self.transitions
    }
}

impl embedded_hal::digital::ErrorType for MockPin {
    type Error = Infallible;
}

impl embedded_hal::digital::OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.transitions.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.transitions.push(true);
        Ok(())
    }
}

/// Serial port replaying queued chunks. A read with nothing queued never
/// completes, the way a silent line behaves.
#[derive(Default)]
pub struct MockSerial {
    rx: VecDeque<Vec<u8>>,
    tx: Vec<u8>,
    write_error: bool,
}

impl MockSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes to be handed out by a single read
    pub fn queue_rx(&mut self, chunk: &[u8]) {
        self.rx.push_back(chunk.to_vec());
    }

    pub fn written(&self) -> &[u8] {
        &self.tx
    }

    pub fn set_write_error(&mut self, fail: bool) {
        self.write_error = fail;
    }
}

impl embedded_io_async::ErrorType for MockSerial {
    type Error = embedded_io_async::ErrorKind;
}

impl embedded_io_async::Read for MockSerial {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let Some(mut chunk) = self.rx.pop_front() else {
            return core::future::pending().await;
        };

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.rx.push_front(chunk.split_off(n));
        }
        Ok(n)
    }
}

impl embedded_io_async::Write for MockSerial {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.write_error {
            return Err(embedded_io_async::ErrorKind::BrokenPipe);
        }
        self.tx.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Clock pinned to one instant
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn unix_time(&self) -> u64 {
        self.0
    }
}
