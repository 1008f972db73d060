use embassy_time::{Duration, Timer};
use embedded_hal::digital::OutputPin;
use embedded_hal_async::i2c::I2c;
use log::warn;

use super::SensorError;
use crate::hardware::channel_map::ChannelHw;
use crate::hardware::AnalogFrontend;

/// Linear transducer: `min_mv` is zero pressure, `max_mv` is full scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureRange {
    pub min_mv: f32,
    pub max_mv: f32,
    pub max_pa: f32,
}

impl Default for PressureRange {
    fn default() -> Self {
        Self {
            min_mv: 600.0,
            max_mv: 3000.0,
            max_pa: 2400.0,
        }
    }
}

impl PressureRange {
    /// Pressure in Pa, clamped to `0..=max_pa`
    pub fn pressure_pa(&self, millivolts: f32) -> f32 {
        if millivolts <= self.min_mv {
            if millivolts < self.min_mv {
                warn!("[PRESSURE] {:.1} mV below range, clamped to 0 Pa", millivolts);
            }
            return 0.0;
        }
        if millivolts >= self.max_mv {
            if millivolts > self.max_mv {
                warn!("[PRESSURE] {:.1} mV above range, clamped to {:.0} Pa", millivolts, self.max_pa);
            }
            return self.max_pa;
        }

        (millivolts - self.min_mv) * self.max_pa / (self.max_mv - self.min_mv)
    }
}

pub async fn read_pressure<I2C: I2c, RST: OutputPin>(
    frontend: &mut AnalogFrontend<I2C, RST>,
    hw: &ChannelHw,
    range: &PressureRange,
    mux_settle: Duration,
) -> Result<f32, SensorError> {
    let (Some(route), Some(sensor)) = (hw.route, hw.sensor) else {
        return Err(SensorError::InvalidArgument);
    };

    frontend.select(&route).await?;
    Timer::after(mux_settle).await;

    let millivolts = frontend.sample(&sensor).await?;
    Ok(range.pressure_pa(millivolts))
}
