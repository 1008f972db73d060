pub mod adc;
pub mod ads1115;
pub mod channel_map;
pub mod mux;
pub mod tca9548a;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::i2c::I2c;

use crate::sensors::SensorError;
use adc::{AdcBranch, AdcController};
use mux::{MuxController, MuxRoute};

/// Front end shared by every analog channel. Callers hold the lock for a whole
/// select, configure, read sequence.
pub type SharedFrontend<I2C, RST> = Mutex<CriticalSectionRawMutex, AnalogFrontend<I2C, RST>>;

/// The I2C bus together with the multiplexers and the ADC hanging off it
pub struct AnalogFrontend<I2C, RST> {
    bus: I2C,
    mux: MuxController<RST>,
    adc: AdcController,
}

impl<I2C: I2c, RST: OutputPin> AnalogFrontend<I2C, RST> {
    pub fn new(bus: I2C, reset_pin: RST, adc_address: u8) -> Self {
        Self {
            bus,
            mux: MuxController::new(reset_pin),
            adc: AdcController::new(adc_address),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.adc.is_initialized() && self.mux.is_initialized()
    }

    /// Check the ADC answers, then reset the multiplexers
    pub async fn init(&mut self) -> Result<(), SensorError> {
        self.adc.init(&mut self.bus).await?;
        self.mux.reset().await
    }

    pub async fn select(&mut self, route: &MuxRoute) -> Result<(), SensorError> {
        self.mux.select_channel(&mut self.bus, route).await
    }

    /// Configure `branch`, wait for the conversion and return millivolts
    pub async fn sample(&mut self, branch: &AdcBranch) -> Result<f32, SensorError> {
        self.adc.configure(&mut self.bus, branch).await?;
        let raw = self.adc.read(&mut self.bus, branch).await?;
        Ok(AdcController::to_millivolts(raw, branch.gain))
    }
}
