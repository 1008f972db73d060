//! Board wiring: which multiplexer port and which ADC inputs serve each channel.

use super::adc::AdcBranch;
use super::ads1115::{DataRate, Gain, InputMux};
use super::mux::{MuxAddress, MuxRoute};

pub const NUM_OF_CHANNELS: usize = 23;

/// Hardware binding of one physical channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelHw {
    /// Excitation measurement of a bridge, if the channel has one
    pub reference: Option<AdcBranch>,
    pub sensor: Option<AdcBranch>,
    /// `None` for channels that are not behind a multiplexer
    pub route: Option<MuxRoute>,
}

const REF_GAIN: Gain = Gain::Fs2_048V;
const SENSOR_GAIN: Gain = Gain::Fs4_096V;
const RATE: DataRate = DataRate::Sps128;

/// Bridge wired to A2 (reference) and A3 (thermistor)
const fn ntc_upper(mux: MuxAddress, channel: u8) -> ChannelHw {
    ChannelHw {
        reference: Some(AdcBranch::new(REF_GAIN, RATE, InputMux::SingleA2)),
        sensor: Some(AdcBranch::new(SENSOR_GAIN, RATE, InputMux::SingleA3)),
        route: Some(MuxRoute::new(mux, channel)),
    }
}

/// Bridge wired to A0 (reference) and A1 (thermistor)
const fn ntc_lower(mux: MuxAddress, channel: u8) -> ChannelHw {
    ChannelHw {
        reference: Some(AdcBranch::new(REF_GAIN, RATE, InputMux::SingleA0)),
        sensor: Some(AdcBranch::new(SENSOR_GAIN, RATE, InputMux::SingleA1)),
        route: Some(MuxRoute::new(mux, channel)),
    }
}

const fn transducer(input: InputMux, mux: MuxAddress, channel: u8) -> ChannelHw {
    ChannelHw {
        reference: None,
        sensor: Some(AdcBranch::new(SENSOR_GAIN, RATE, input)),
        route: Some(MuxRoute::new(mux, channel)),
    }
}

const SERIAL: ChannelHw = ChannelHw {
    reference: None,
    sensor: None,
    route: None,
};

use MuxAddress::{Primary, Secondary};

pub static CHANNEL_MAP: [ChannelHw; NUM_OF_CHANNELS] = [
    // 0..=11: one mux port carries two bridges
    ntc_upper(Primary, 4),
    ntc_lower(Primary, 4),
    ntc_upper(Primary, 5),
    ntc_lower(Primary, 5),
    ntc_upper(Primary, 6),
    ntc_lower(Primary, 6),
    ntc_upper(Primary, 7),
    ntc_lower(Primary, 7),
    ntc_upper(Secondary, 6),
    ntc_lower(Secondary, 6),
    ntc_upper(Secondary, 7),
    ntc_lower(Secondary, 7),
    // 12..=19: same sharing, inputs swapped on the connector
    ntc_lower(Primary, 3),
    ntc_upper(Primary, 3),
    ntc_lower(Primary, 2),
    ntc_upper(Primary, 2),
    ntc_lower(Primary, 1),
    ntc_upper(Primary, 1),
    ntc_lower(Primary, 0),
    ntc_upper(Primary, 0),
    // 20, 21: pressure transducers
    transducer(InputMux::SingleA1, Secondary, 0),
    transducer(InputMux::SingleA0, Secondary, 0),
    // 22: energy meter on the serial bus
    SERIAL,
];

/// Binding for `channel`, `None` if the board has no such channel
pub fn channel(channel: usize) -> Option<&'static ChannelHw> {
    CHANNEL_MAP.get(channel)
}
