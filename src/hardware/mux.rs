use embassy_time::{Duration, Timer};
use embedded_hal::digital::OutputPin;
use embedded_hal_async::i2c::I2c;
use log::{debug, error, info, warn};

use super::tca9548a::{Tca9548a, NUM_OF_CHANNELS};
use crate::sensors::SensorError;

/// Reset line is held low, then high, for this long
pub const RESET_PULSE: Duration = Duration::from_millis(100);

/// I2C addresses of the multiplexers on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MuxAddress {
    Primary = 0x70,
    Secondary = 0x71,
}

impl MuxAddress {
    /// Every multiplexer on the bus
    pub const ALL: [MuxAddress; 2] = [MuxAddress::Primary, MuxAddress::Secondary];

    pub const fn address(self) -> u8 {
        self as u8
    }
}

/// Path to one downstream channel: which multiplexer, which of its ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MuxRoute {
    pub mux: MuxAddress,
    pub channel: u8,
}

impl MuxRoute {
    pub const fn new(mux: MuxAddress, channel: u8) -> Self {
        Self { mux, channel }
    }
}

/// Keeps at most one multiplexer channel enabled across every mux sharing
/// the reset line.
pub struct MuxController<RST> {
    reset_pin: RST,
    reset_done: bool,
    /// Route enabled on the hardware, `None` once every channel is off
    active: Option<MuxRoute>,
    /// A write failed, so some channel may still be enabled
    stale: bool,
}

impl<RST: OutputPin> MuxController<RST> {
    pub fn new(reset_pin: RST) -> Self {
        Self {
            reset_pin,
            reset_done: false,
            active: None,
            stale: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.reset_done
    }

    /// Route known to be the only enabled channel
    pub fn active_route(&self) -> Option<MuxRoute> {
        if self.stale {
            None
        } else {
            self.active
        }
    }

    /// Pulse the shared reset line once per session. After the pulse every
    /// channel of every multiplexer is disconnected.
    pub async fn reset(&mut self) -> Result<(), SensorError> {
        if self.reset_done {
            return Ok(());
        }

        self.reset_pin.set_low().map_err(|e| {
            error!("[MUX] Failed to drive reset low: {:?}", e);
            SensorError::HardwareIo
        })?;
        Timer::after(RESET_PULSE).await;

        self.reset_pin.set_high().map_err(|e| {
            error!("[MUX] Failed to release reset: {:?}", e);
            SensorError::HardwareIo
        })?;
        Timer::after(RESET_PULSE).await;

        self.active = None;
        self.stale = false;
        self.reset_done = true;
        info!("[MUX] Multiplexers reset");
        Ok(())
    }

    /// Enable `route` and make sure no other channel on any multiplexer
    /// stays enabled. After a failed write every multiplexer is cleared
    /// before the next channel is enabled.
    pub async fn select_channel<I: I2c>(&mut self, i2c: &mut I, route: &MuxRoute) -> Result<(), SensorError> {
        if route.channel >= NUM_OF_CHANNELS {
            error!("[MUX] Channel {} out of range on 0x{:02x}", route.channel, route.mux.address());
            return Err(SensorError::InvalidArgument);
        }

        self.reset().await?;

        if self.active_route() == Some(*route) {
            return Ok(());
        }

        if self.stale {
            warn!("[MUX] Channel state unknown, disabling every multiplexer");
            for mux in MuxAddress::ALL {
                self.disable_all(i2c, mux).await?;
            }
        } else if let Some(previous) = self.active {
            self.disable_all(i2c, previous.mux).await?;
        }
        self.active = None;
        self.stale = false;

        if let Err(e) = Tca9548a::new(route.mux.address()).enable_channel(i2c, route.channel).await {
            error!(
                "[MUX] Failed to enable channel {} on 0x{:02x}: {:?}",
                route.channel,
                route.mux.address(),
                e
            );
            self.stale = true;
            return Err(SensorError::HardwareIo);
        }

        debug!("[MUX] Selected channel {} on 0x{:02x}", route.channel, route.mux.address());
        self.active = Some(*route);
        Ok(())
    }

    async fn disable_all<I: I2c>(&mut self, i2c: &mut I, mux: MuxAddress) -> Result<(), SensorError> {
        if let Err(e) = Tca9548a::new(mux.address()).disable_all_channels(i2c).await {
            error!("[MUX] Failed to disable channels on 0x{:02x}: {:?}", mux.address(), e);
            self.stale = true;
            return Err(SensorError::HardwareIo);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBus, MockPin};
    use embassy_futures::block_on;

    #[test]
    fn test_reset_is_idempotent() {
        let mut mux = MuxController::new(MockPin::default());

        block_on(async {
            mux.reset().await.unwrap();
            mux.reset().await.unwrap();
        });

        assert!(mux.is_initialized());
        assert_eq!(mux.reset_pin.transitions(), &[false, true]);
    }

    #[test]
    fn test_select_enables_exactly_one_channel() {
        let mut bus = MockBus::new();
        let mut mux = MuxController::new(MockPin::default());

        block_on(async {
            mux.select_channel(&mut bus, &MuxRoute::new(MuxAddress::Primary, 4)).await.unwrap();
            assert_eq!(bus.mux_mask(MuxAddress::Primary), 0b0001_0000);

            mux.select_channel(&mut bus, &MuxRoute::new(MuxAddress::Secondary, 6)).await.unwrap();
        });

        assert_eq!(bus.mux_mask(MuxAddress::Primary), 0);
        assert_eq!(bus.mux_mask(MuxAddress::Secondary), 0b0100_0000);
        assert_eq!(mux.active_route(), Some(MuxRoute::new(MuxAddress::Secondary, 6)));
    }

    #[test]
    fn test_reselecting_active_route_skips_bus() {
        let mut bus = MockBus::new();
        let mut mux = MuxController::new(MockPin::default());
        let route = MuxRoute::new(MuxAddress::Primary, 2);

        block_on(async {
            mux.select_channel(&mut bus, &route).await.unwrap();
            let writes = bus.mux_writes();
            mux.select_channel(&mut bus, &route).await.unwrap();
            assert_eq!(bus.mux_writes(), writes);
        });
    }

    #[test]
    fn test_channel_out_of_range() {
        let mut bus = MockBus::new();
        let mut mux = MuxController::new(MockPin::default());

        let result = block_on(mux.select_channel(&mut bus, &MuxRoute::new(MuxAddress::Primary, 8)));

        assert_eq!(result, Err(SensorError::InvalidArgument));
        assert_eq!(bus.mux_writes(), 0);
    }

    #[test]
    fn test_bus_failure_clears_active_route() {
        let mut bus = MockBus::new();
        let mut mux = MuxController::new(MockPin::default());
        let failing = MuxRoute::new(MuxAddress::Primary, 3);
        bus.fail_mux_route(failing);

        block_on(async {
            mux.select_channel(&mut bus, &MuxRoute::new(MuxAddress::Primary, 1)).await.unwrap();
            assert_eq!(
                mux.select_channel(&mut bus, &failing).await,
                Err(SensorError::HardwareIo)
            );
        });

        assert_eq!(mux.active_route(), None);
    }

    #[test]
    fn test_failed_disable_is_cleared_on_next_select() {
        let mut bus = MockBus::new();
        let mut mux = MuxController::new(MockPin::default());
        let secondary = MuxRoute::new(MuxAddress::Secondary, 0);

        block_on(async {
            mux.select_channel(&mut bus, &MuxRoute::new(MuxAddress::Primary, 4)).await.unwrap();
            bus.fail_next_disable(MuxAddress::Primary);

            assert_eq!(mux.select_channel(&mut bus, &secondary).await, Err(SensorError::HardwareIo));
            assert_eq!(bus.mux_mask(MuxAddress::Secondary), 0);
            assert_eq!(mux.active_route(), None);

            mux.select_channel(&mut bus, &secondary).await.unwrap();
        });

        assert_eq!(bus.mux_mask(MuxAddress::Primary), 0);
        assert_eq!(bus.mux_mask(MuxAddress::Secondary), 0b0000_0001);
        assert_eq!(mux.active_route(), Some(secondary));
    }

    #[test]
    fn test_failed_enable_is_not_treated_as_selected() {
        let mut bus = MockBus::new();
        let mut mux = MuxController::new(MockPin::default());
        let route = MuxRoute::new(MuxAddress::Primary, 3);

        block_on(async {
            mux.select_channel(&mut bus, &MuxRoute::new(MuxAddress::Secondary, 2)).await.unwrap();
            bus.fail_mux_route(route);
            assert_eq!(mux.select_channel(&mut bus, &route).await, Err(SensorError::HardwareIo));

            // Both multiplexers are cleared again before the next channel
            let writes = bus.mux_writes();
            mux.select_channel(&mut bus, &MuxRoute::new(MuxAddress::Primary, 1)).await.unwrap();
            assert_eq!(bus.mux_writes(), writes + 3);
        });

        assert_eq!(bus.mux_mask(MuxAddress::Primary), 0b0000_0010);
        assert_eq!(bus.mux_mask(MuxAddress::Secondary), 0);
    }
}
