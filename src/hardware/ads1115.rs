//! Register-level access to the ADS1115 16-bit delta-sigma ADC.
//!
//! Config register layout (MSB first):
//!   [15]    OS        write 1 to start a single-shot conversion, reads 1 when idle
//!   [14:12] MUX       input multiplexer
//!   [11:9]  PGA       programmable gain amplifier
//!   [8]     MODE      0 = continuous, 1 = single-shot
//!   [7:5]   DR        data rate
//!   [4:0]   COMP_*    comparator, kept disabled (COMP_QUE = 11)

use embassy_time::Duration;
use embedded_hal_async::i2c::I2c;

/// Default 7-bit address (ADDR pin tied to GND)
pub const DEFAULT_ADDRESS: u8 = 0x48;

const REG_CONVERSION: u8 = 0x00;
const REG_CONFIG: u8 = 0x01;

const OS_BIT: u16 = 1 << 15;
const MUX_SHIFT: u16 = 12;
const PGA_SHIFT: u16 = 9;
const MODE_SHIFT: u16 = 8;
const DR_SHIFT: u16 = 5;
const COMPARATOR_DISABLED: u16 = 0b11;

/// Counts covering the positive half of the signed 16-bit range
pub const FULL_SCALE_COUNTS: f32 = 32768.0;

/// Programmable gain amplifier setting (full-scale input range)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Gain {
    Fs6_144V = 0b000,
    Fs4_096V = 0b001,
    Fs2_048V = 0b010,
    Fs1_024V = 0b011,
    Fs0_512V = 0b100,
    Fs0_256V = 0b101,
}

impl Gain {
    /// Full-scale range in millivolts
    pub const fn full_scale_mv(self) -> f32 {
        match self {
            Gain::Fs6_144V => 6144.0,
            Gain::Fs4_096V => 4096.0,
            Gain::Fs2_048V => 2048.0,
            Gain::Fs1_024V => 1024.0,
            Gain::Fs0_512V => 512.0,
            Gain::Fs0_256V => 256.0,
        }
    }

    /// Millivolts represented by one count at this gain
    pub fn lsb_mv(self) -> f32 {
        self.full_scale_mv() / FULL_SCALE_COUNTS
    }

    /// All gains, coarsest first
    pub const ALL: [Gain; 6] = [
        Gain::Fs6_144V,
        Gain::Fs4_096V,
        Gain::Fs2_048V,
        Gain::Fs1_024V,
        Gain::Fs0_512V,
        Gain::Fs0_256V,
    ];

    fn from_bits(bits: u16) -> Self {
        match bits & 0b111 {
            0b000 => Gain::Fs6_144V,
            0b001 => Gain::Fs4_096V,
            0b010 => Gain::Fs2_048V,
            0b011 => Gain::Fs1_024V,
            0b100 => Gain::Fs0_512V,
            // 0b101..=0b111 all select ±0.256 V
            _ => Gain::Fs0_256V,
        }
    }
}

/// Conversion rate in samples per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataRate {
    Sps8 = 0b000,
    Sps16 = 0b001,
    Sps32 = 0b010,
    Sps64 = 0b011,
    Sps128 = 0b100,
    Sps250 = 0b101,
    Sps475 = 0b110,
    Sps860 = 0b111,
}

impl DataRate {
    /// Time one conversion takes at this rate, rounded up to whole milliseconds
    pub const fn conversion_time(self) -> Duration {
        let ms = match self {
            DataRate::Sps8 => 125,
            DataRate::Sps16 => 63,
            DataRate::Sps32 => 32,
            DataRate::Sps64 => 16,
            DataRate::Sps128 => 8,
            DataRate::Sps250 => 4,
            DataRate::Sps475 => 3,
            DataRate::Sps860 => 2,
        };
        Duration::from_millis(ms)
    }

    fn from_bits(bits: u16) -> Self {
        match bits & 0b111 {
            0b000 => DataRate::Sps8,
            0b001 => DataRate::Sps16,
            0b010 => DataRate::Sps32,
            0b011 => DataRate::Sps64,
            0b100 => DataRate::Sps128,
            0b101 => DataRate::Sps250,
            0b110 => DataRate::Sps475,
            _ => DataRate::Sps860,
        }
    }
}

/// Input multiplexer selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InputMux {
    DiffA0A1 = 0b000,
    DiffA0A3 = 0b001,
    DiffA1A3 = 0b010,
    DiffA2A3 = 0b011,
    SingleA0 = 0b100,
    SingleA1 = 0b101,
    SingleA2 = 0b110,
    SingleA3 = 0b111,
}

impl InputMux {
    pub fn from_bits(bits: u16) -> Self {
        match bits & 0b111 {
            0b000 => InputMux::DiffA0A1,
            0b001 => InputMux::DiffA0A3,
            0b010 => InputMux::DiffA1A3,
            0b011 => InputMux::DiffA2A3,
            0b100 => InputMux::SingleA0,
            0b101 => InputMux::SingleA1,
            0b110 => InputMux::SingleA2,
            _ => InputMux::SingleA3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Continuous,
    SingleShot,
}

/// Decoded contents of the config register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub input: InputMux,
    pub gain: Gain,
    pub data_rate: DataRate,
    pub mode: Mode,
}

impl Config {
    /// Encode for a register write. Single-shot configs set OS so the write
    /// also starts a conversion.
    pub const fn to_register(self) -> u16 {
        let (mode, os) = match self.mode {
            Mode::Continuous => (0, 0),
            Mode::SingleShot => (1, OS_BIT),
        };
        os | ((self.input as u16) << MUX_SHIFT)
            | ((self.gain as u16) << PGA_SHIFT)
            | (mode << MODE_SHIFT)
            | ((self.data_rate as u16) << DR_SHIFT)
            | COMPARATOR_DISABLED
    }

    pub fn from_register(value: u16) -> Self {
        Self {
            input: InputMux::from_bits(value >> MUX_SHIFT),
            gain: Gain::from_bits(value >> PGA_SHIFT),
            data_rate: DataRate::from_bits(value >> DR_SHIFT),
            mode: if value & (1 << MODE_SHIFT) != 0 {
                Mode::SingleShot
            } else {
                Mode::Continuous
            },
        }
    }
}

/// ADS1115 on a shared I2C bus. Holds no bus handle; every call borrows one.
#[derive(Debug, Clone, Copy)]
pub struct Ads1115 {
    address: u8,
}

impl Ads1115 {
    pub const fn new(address: u8) -> Self {
        Self { address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub async fn write_config<I: I2c>(&self, i2c: &mut I, config: Config) -> Result<(), I::Error> {
        let [hi, lo] = config.to_register().to_be_bytes();
        i2c.write(self.address, &[REG_CONFIG, hi, lo]).await
    }

    pub async fn read_config<I: I2c>(&self, i2c: &mut I) -> Result<u16, I::Error> {
        self.read_register(i2c, REG_CONFIG).await
    }

    /// OS reads back as 1 once the device is idle with a result latched
    pub async fn is_conversion_ready<I: I2c>(&self, i2c: &mut I) -> Result<bool, I::Error> {
        Ok(self.read_config(i2c).await? & OS_BIT != 0)
    }

    pub async fn read_conversion<I: I2c>(&self, i2c: &mut I) -> Result<i16, I::Error> {
        let value = self.read_register(i2c, REG_CONVERSION).await?;
        Ok(value as i16)
    }

    async fn read_register<I: I2c>(&self, i2c: &mut I, register: u8) -> Result<u16, I::Error> {
        let mut buffer = [0u8; 2];
        i2c.write_read(self.address, &[register], &mut buffer).await?;
        Ok(u16::from_be_bytes(buffer))
    }
}
