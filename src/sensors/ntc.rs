//! NTC thermistor channels.
//!
//! Each channel is a bridge: the reference leg divides the excitation by two
//! matched resistors, the sensor leg puts the thermistor below a fixed
//! resistor. Measuring both legs makes the result independent of the actual
//! supply voltage.

use embassy_time::{Duration, Timer};
use embedded_hal::digital::OutputPin;
use embedded_hal_async::i2c::I2c;
use log::{debug, warn};

use super::SensorError;
use crate::hardware::adc::AdcController;
use crate::hardware::channel_map::ChannelHw;
use crate::hardware::AnalogFrontend;

/// Resistance/temperature lookup in (kΩ, °C) pairs, strictly monotonic in
/// resistance. Either direction is accepted.
#[derive(Debug, Clone, Copy)]
pub struct ResistanceTable<'a> {
    entries: &'a [(f32, f32)],
    ascending: bool,
}

impl<'a> ResistanceTable<'a> {
    pub fn new(entries: &'a [(f32, f32)]) -> Result<Self, SensorError> {
        if entries.len() < 2 {
            return Err(SensorError::InvalidArgument);
        }

        let ascending = entries[0].0 < entries[1].0;
        let monotonic = entries
            .windows(2)
            .all(|w| if ascending { w[0].0 < w[1].0 } else { w[0].0 > w[1].0 });
        if !monotonic {
            return Err(SensorError::InvalidArgument);
        }

        Ok(Self { entries, ascending })
    }

    pub fn entries(&self) -> &'a [(f32, f32)] {
        self.entries
    }

    /// Interpolated temperature for `resistance_kohm`. Values beyond the table
    /// are clamped to its first or last temperature.
    pub fn temperature(&self, resistance_kohm: f32) -> f32 {
        let (low, high) = if self.ascending {
            (self.entries[0], self.entries[self.entries.len() - 1])
        } else {
            (self.entries[self.entries.len() - 1], self.entries[0])
        };

        // NaN falls through to the low end
        if !(resistance_kohm > low.0) {
            if resistance_kohm < low.0 {
                warn!("[NTC] Resistance {:.3} kΩ below table, clamped to {:.1} °C", resistance_kohm, low.1);
            }
            return low.1;
        }
        if resistance_kohm >= high.0 {
            if resistance_kohm > high.0 {
                warn!("[NTC] Resistance {:.3} kΩ above table, clamped to {:.1} °C", resistance_kohm, high.1);
            }
            return high.1;
        }

        let upper = if self.ascending {
            self.entries.partition_point(|&(r, _)| r <= resistance_kohm)
        } else {
            self.entries.partition_point(|&(r, _)| r >= resistance_kohm)
        };
        let (r1, t1) = self.entries[upper - 1];
        let (r2, t2) = self.entries[upper];

        t1 + (resistance_kohm - r1) * (t2 - t1) / (r2 - r1)
    }
}

impl ResistanceTable<'static> {
    /// 100 kΩ (25 °C) thermistor, -55 °C to 150 °C in 1 °C steps
    pub fn ntc_100k() -> Self {
        Self {
            entries: &NTC_100K_TABLE,
            ascending: true,
        }
    }
}

/// One band of a resistance correction: `a·r² + b·r + c` applied to
/// resistances in `(r_low, r_high]` kΩ.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionRegion {
    pub r_high: f32,
    pub r_low: f32,
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

impl CorrectionRegion {
    pub const fn new(r_high: f32, r_low: f32, a: f32, b: f32, c: f32) -> Self {
        Self { r_high, r_low, a, b, c }
    }

    fn apply(&self, r: f32) -> f32 {
        self.a * r * r + self.b * r + self.c
    }
}

/// Piecewise quadratic fit from the bridge resistance to the resistance
/// measured on the board. Regions run from high to low resistance without
/// gaps. Values above the first region or below the last one use that
/// region's polynomial.
#[derive(Debug, Clone, Copy)]
pub struct ResistanceCorrection<'a> {
    regions: &'a [CorrectionRegion],
}

impl<'a> ResistanceCorrection<'a> {
    pub fn new(regions: &'a [CorrectionRegion]) -> Result<Self, SensorError> {
        if regions.is_empty() || regions.iter().any(|r| !(r.r_high > r.r_low)) {
            return Err(SensorError::InvalidArgument);
        }
        if !regions.windows(2).all(|w| w[0].r_low == w[1].r_high) {
            return Err(SensorError::InvalidArgument);
        }

        Ok(Self { regions })
    }

    pub fn regions(&self) -> &'a [CorrectionRegion] {
        self.regions
    }

    /// Corrected resistance in kΩ. Infinite and NaN inputs pass through.
    pub fn correct(&self, resistance_kohm: f32) -> f32 {
        if !resistance_kohm.is_finite() {
            return resistance_kohm;
        }

        let last = self.regions.len() - 1;
        self.regions
            .iter()
            .enumerate()
            .find(|&(i, region)| {
                (resistance_kohm <= region.r_high && resistance_kohm > region.r_low)
                    || (i == 0 && resistance_kohm > region.r_high)
                    || (i == last && resistance_kohm <= region.r_low)
            })
            .map_or(resistance_kohm, |(_, region)| region.apply(resistance_kohm))
    }
}

impl ResistanceCorrection<'static> {
    /// Fit for the 100 kΩ bridge on the acquisition board, 3361.887 kΩ down
    /// to 2.232 kΩ
    pub fn ntc_100k_board() -> Self {
        Self {
            regions: &NTC_100K_CORRECTION,
        }
    }
}

static NTC_100K_CORRECTION: [CorrectionRegion; 5] = [
    CorrectionRegion::new(3361.887, 329.300, 3.050603e-06, 9.680608e-01, 1.101766e+01),
    CorrectionRegion::new(329.300, 87.474, 3.750742e-04, 8.410913e-01, 1.230265e+01),
    CorrectionRegion::new(87.474, 22.259, -4.009059e-05, 9.984124e-01, -2.474721e-01),
    CorrectionRegion::new(22.259, 6.731, -3.474550e-04, 1.032403e+00, -1.619189e-01),
    CorrectionRegion::new(6.731, 2.232, -2.576672e-03, 1.038778e+00, -1.142167e-01),
];

/// Thermistor resistance in kΩ from the two bridge legs.
///
/// `reference_ratio` is the fraction of the excitation seen on the reference
/// leg. An open thermistor reads as infinite resistance, a shorted one as zero.
pub fn thermistor_resistance_kohm(
    reference_mv: f32,
    sensor_mv: f32,
    fixed_resistor_kohm: f32,
    reference_ratio: f32,
) -> Result<f32, SensorError> {
    if reference_ratio <= 0.0 || fixed_resistor_kohm <= 0.0 {
        return Err(SensorError::InvalidArgument);
    }
    if !(reference_mv > 0.0) {
        return Err(SensorError::OutOfRange);
    }

    let supply_mv = reference_mv / reference_ratio;
    if !(sensor_mv > 0.0) {
        return Ok(0.0);
    }
    if sensor_mv >= supply_mv {
        return Ok(f32::INFINITY);
    }

    Ok(fixed_resistor_kohm * sensor_mv / (supply_mv - sensor_mv))
}

/// Bridge parameters and curves for the NTC channels
#[derive(Debug, Clone, Copy)]
pub struct NtcConfig {
    /// Resistor above the thermistor in the sensor leg
    pub fixed_resistor_kohm: f32,
    /// Share of the excitation seen on the reference leg
    pub reference_ratio: f32,
    /// Applied to the bridge resistance before the table lookup, `None` on
    /// boards without a fitted correction
    pub correction: Option<ResistanceCorrection<'static>>,
    pub table: ResistanceTable<'static>,
}

impl Default for NtcConfig {
    fn default() -> Self {
        Self {
            fixed_resistor_kohm: 100.0,
            reference_ratio: 0.5,
            correction: Some(ResistanceCorrection::ntc_100k_board()),
            table: ResistanceTable::ntc_100k(),
        }
    }
}

/// Uncalibrated temperature in °C. The caller holds the front end for the
/// whole sequence.
pub async fn read_temperature<I2C: I2c, RST: OutputPin>(
    frontend: &mut AnalogFrontend<I2C, RST>,
    hw: &ChannelHw,
    config: &NtcConfig,
    mux_settle: Duration,
) -> Result<f32, SensorError> {
    let (Some(route), Some(reference), Some(sensor)) = (hw.route, hw.reference, hw.sensor) else {
        return Err(SensorError::InvalidArgument);
    };

    frontend.select(&route).await?;
    Timer::after(mux_settle).await;

    let reference_mv = frontend.sample(&reference).await?;
    let sensor_mv = frontend.sample(&sensor).await?;

    let suggested = AdcController::suggest_gain(sensor_mv);
    if suggested != sensor.gain {
        debug!("[NTC] {:.1} mV would resolve better at {:?}", sensor_mv, suggested);
    }

    let resistance = thermistor_resistance_kohm(
        reference_mv,
        sensor_mv,
        config.fixed_resistor_kohm,
        config.reference_ratio,
    )?;
    let corrected = config
        .correction
        .map_or(resistance, |correction| correction.correct(resistance));
    debug!(
        "[NTC] ref {:.1} mV, ntc {:.1} mV, {:.3} kΩ, corrected {:.3} kΩ",
        reference_mv, sensor_mv, resistance, corrected
    );

    Ok(config.table.temperature(corrected))
}

#[rustfmt::skip]
static NTC_100K_TABLE: [(f32, f32); 206] = [
    (1.51, 150.0), (1.55, 149.0), (1.59, 148.0), (1.63, 147.0), (1.67, 146.0),
    (1.71, 145.0), (1.76, 144.0), (1.80, 143.0), (1.85, 142.0), (1.90, 141.0),
    (1.95, 140.0), (2.00, 139.0), (2.06, 138.0), (2.11, 137.0), (2.17, 136.0),
    (2.23, 135.0), (2.29, 134.0), (2.35, 133.0), (2.42, 132.0), (2.48, 131.0),
    (2.55, 130.0), (2.62, 129.0), (2.70, 128.0), (2.77, 127.0), (2.85, 126.0),
    (2.93, 125.0), (3.01, 124.0), (3.10, 123.0), (3.19, 122.0), (3.28, 121.0),
    (3.38, 120.0), (3.47, 119.0), (3.58, 118.0), (3.68, 117.0), (3.79, 116.0),
    (3.90, 115.0), (4.02, 114.0), (4.14, 113.0), (4.26, 112.0), (4.39, 111.0),
    (4.53, 110.0), (4.67, 109.0), (4.81, 108.0), (4.96, 107.0), (5.11, 106.0),
    (5.27, 105.0), (5.44, 104.0), (5.61, 103.0), (5.78, 102.0), (5.97, 101.0),
    (6.17, 100.0), (6.35, 99.0), (6.56, 98.0), (6.77, 97.0), (6.99, 96.0),
    (7.22, 95.0), (7.45, 94.0), (7.70, 93.0), (7.96, 92.0), (8.22, 91.0),
    (8.50, 90.0), (8.78, 89.0), (9.08, 88.0), (9.38, 87.0), (9.70, 86.0),
    (10.04, 85.0), (10.38, 84.0), (10.74, 83.0), (11.11, 82.0), (11.50, 81.0),
    (11.90, 80.0), (12.32, 79.0), (12.75, 78.0), (13.20, 77.0), (13.67, 76.0),
    (14.16, 75.0), (14.67, 74.0), (15.20, 73.0), (15.75, 72.0), (16.32, 71.0),
    (16.92, 70.0), (17.54, 69.0), (18.19, 68.0), (18.86, 67.0), (19.56, 66.0),
    (20.30, 65.0), (21.06, 64.0), (21.85, 63.0), (22.68, 62.0), (23.54, 61.0),
    (24.44, 60.0), (25.37, 59.0), (26.35, 58.0), (27.37, 57.0), (28.43, 56.0),
    (29.54, 55.0), (30.69, 54.0), (31.90, 53.0), (33.16, 52.0), (34.47, 51.0),
    (35.84, 50.0), (37.27, 49.0), (38.76, 48.0), (40.32, 47.0), (41.95, 46.0),
    (43.65, 45.0), (45.43, 44.0), (47.29, 43.0), (49.23, 42.0), (51.26, 41.0),
    (53.38, 40.0), (55.60, 39.0), (57.92, 38.0), (60.34, 37.0), (62.88, 36.0),
    (65.53, 35.0), (68.31, 34.0), (71.22, 33.0), (74.26, 32.0), (77.44, 31.0),
    (80.78, 30.0), (84.27, 29.0), (87.93, 28.0), (91.77, 27.0), (95.79, 26.0),
    (100.00, 25.0), (104.42, 24.0), (109.05, 23.0), (113.91, 22.0), (119.01, 21.0),
    (124.36, 20.0), (129.98, 19.0), (135.87, 18.0), (142.07, 17.0), (148.58, 16.0),
    (155.42, 15.0), (162.61, 14.0), (170.17, 13.0), (178.12, 12.0), (186.48, 11.0),
    (195.29, 10.0), (204.56, 9.0), (214.33, 8.0), (224.61, 7.0), (235.46, 6.0),
    (246.89, 5.0), (258.95, 4.0), (271.67, 3.0), (285.10, 2.0), (299.28, 1.0),
    (315.68, 0.0), (330.10, -1.0), (346.84, -2.0), (364.55, -3.0), (383.29, -4.0),
    (403.12, -5.0), (424.13, -6.0), (446.40, -7.0), (469.99, -8.0), (495.02, -9.0),
    (521.58, -10.0), (549.77, -11.0), (579.70, -12.0), (611.51, -13.0), (645.31, -14.0),
    (681.26, -15.0), (719.50, -16.0), (760.19, -17.0), (803.51, -18.0), (849.66, -19.0),
    (898.82, -20.0), (951.22, -21.0), (1007.07, -22.0), (1066.65, -23.0), (1130.19, -24.0),
    (1198.00, -25.0), (1270.35, -26.0), (1347.57, -27.0), (1430.00, -28.0), (1517.98, -29.0),
    (1611.90, -30.0), (1712.14, -31.0), (1819.11, -32.0), (1933.24, -33.0), (2054.98, -34.0),
    (2184.77, -35.0), (2323.09, -36.0), (2470.40, -37.0), (2627.18, -38.0), (2793.89, -39.0),
    (2971.00, -40.0), (3158.93, -41.0), (3358.10, -42.0), (3568.88, -43.0), (3791.58, -44.0),
    (4026.43, -45.0), (4273.61, -46.0), (4533.16, -47.0), (4805.02, -48.0), (5088.98, -49.0),
    (5384.66, -50.0), (5691.51, -51.0), (6008.77, -52.0), (6335.44, -53.0), (6670.29, -54.0),
    (7011.86, -55.0),
];
