use embassy_time::Timer;
use embedded_hal_async::i2c::I2c;
use log::{debug, error};

use super::ads1115::{Ads1115, Config, DataRate, Gain, InputMux, Mode};
use crate::sensors::SensorError;

/// Upper bound on ready-flag polls per conversion
pub const MAX_READY_POLLS: u8 = 10;

/// Readings above this share of a range are pushed to the next coarser gain
const CLIPPING_PERCENT: f32 = 95.0;

/// One leg of a channel as seen by the ADC: which input, at which range and rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcBranch {
    /// Full-scale range of the PGA
    pub gain: Gain,
    /// Samples per second, sets the conversion time
    pub data_rate: DataRate,
    /// Input pin, or pin pair for differential readings
    pub input: InputMux,
}

impl AdcBranch {
    pub const fn new(gain: Gain, data_rate: DataRate, input: InputMux) -> Self {
        Self { gain, data_rate, input }
    }

    fn device_config(&self) -> Config {
        Config {
            input: self.input,
            gain: self.gain,
            data_rate: self.data_rate,
            mode: Mode::SingleShot,
        }
    }
}

/// Sequencing on top of the raw ADS1115 driver: remembers the active branch
/// and turns a configured branch into a sample.
pub struct AdcController {
    device: Ads1115,
    active: Option<AdcBranch>,
    initialized: bool,
}

impl AdcController {
    pub const fn new(address: u8) -> Self {
        Self {
            device: Ads1115::new(address),
            active: None,
            initialized: false,
        }
    }

    /// True once the device answered in [`init`](Self::init)
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Check the device is present by reading back its config register
    pub async fn init<I: I2c>(&mut self, i2c: &mut I) -> Result<(), SensorError> {
        if self.initialized {
            return Ok(());
        }

        let register = self.device.read_config(i2c).await.map_err(|e| {
            error!("[ADC] No response from 0x{:02x}: {:?}", self.device.address(), e);
            SensorError::HardwareIo
        })?;

        debug!("[ADC] Found device, config register 0x{:04x}", register);
        self.initialized = true;
        Ok(())
    }

    /// Start a single-shot conversion of `branch`
    pub async fn configure<I: I2c>(&mut self, i2c: &mut I, branch: &AdcBranch) -> Result<(), SensorError> {
        if !self.initialized {
            return Err(SensorError::NotInitialized);
        }

        // A failed write leaves the device state unknown
        self.active = None;
        self.device
            .write_config(i2c, branch.device_config())
            .await
            .map_err(|e| {
                error!("[ADC] Failed to configure {:?}: {:?}", branch, e);
                SensorError::HardwareIo
            })?;

        self.active = Some(*branch);
        Ok(())
    }

    /// Wait for the conversion started by [`configure`](Self::configure) and return its raw count.
    pub async fn read<I: I2c>(&mut self, i2c: &mut I, branch: &AdcBranch) -> Result<i16, SensorError> {
        match self.active {
            None => return Err(SensorError::NotInitialized),
            Some(active) if active != *branch => {
                error!("[ADC] Configuration mismatch: active {:?}, requested {:?}", active, branch);
                return Err(SensorError::InvalidArgument);
            }
            Some(_) => {}
        }

        let mut ready = false;
        for attempt in 0..MAX_READY_POLLS {
            ready = self.device.is_conversion_ready(i2c).await.map_err(|e| {
                error!("[ADC] Failed to poll conversion state: {:?}", e);
                SensorError::HardwareIo
            })?;
            if ready {
                break;
            }
            if attempt + 1 < MAX_READY_POLLS {
                Timer::after(branch.data_rate.conversion_time()).await;
            }
        }

        if !ready {
            error!("[ADC] Conversion timed out on {:?}", branch.input);
            return Err(SensorError::Timeout);
        }

        self.device.read_conversion(i2c).await.map_err(|e| {
            error!("[ADC] Failed to read conversion: {:?}", e);
            SensorError::HardwareIo
        })
    }

    /// Millivolts per count for a gain
    pub fn lsb_size(gain: Gain) -> f32 {
        gain.lsb_mv()
    }

    /// Signed raw count to millivolts at `gain`
    pub fn to_millivolts(raw: i16, gain: Gain) -> f32 {
        raw as f32 * Self::lsb_size(gain)
    }

    /// Finest gain whose range still covers `coarse_mv` with headroom.
    pub fn suggest_gain(coarse_mv: f32) -> Gain {
        let clipped = libm::fabsf(coarse_mv) * CLIPPING_PERCENT / 100.0;

        Gain::ALL
            .iter()
            .rev()
            .copied()
            .find(|gain| clipped <= gain.full_scale_mv())
            .unwrap_or(Gain::Fs6_144V)
    }
}
