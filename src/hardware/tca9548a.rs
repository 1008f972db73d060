//! TCA9548A 8-channel I2C multiplexer.
//!
//! The device has a single control register: each bit enables the
//! corresponding downstream channel. Writing 0 disconnects everything.

use embedded_hal_async::i2c::I2c;

pub const NUM_OF_CHANNELS: u8 = 8;

const DISABLE_ALL: u8 = 0x00;

#[derive(Debug, Clone, Copy)]
pub struct Tca9548a {
    address: u8,
}

impl Tca9548a {
    pub const fn new(address: u8) -> Self {
        Self { address }
    }

    /// Enable exactly one channel. `channel` must be below [`NUM_OF_CHANNELS`].
    pub async fn enable_channel<I: I2c>(&self, i2c: &mut I, channel: u8) -> Result<(), I::Error> {
        debug_assert!(channel < NUM_OF_CHANNELS);
        self.write_mask(i2c, 1 << channel).await
    }

    pub async fn disable_all_channels<I: I2c>(&self, i2c: &mut I) -> Result<(), I::Error> {
        self.write_mask(i2c, DISABLE_ALL).await
    }

    async fn write_mask<I: I2c>(&self, i2c: &mut I, mask: u8) -> Result<(), I::Error> {
        i2c.write(self.address, &[mask]).await
    }
}
