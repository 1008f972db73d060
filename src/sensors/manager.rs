use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_sync::mutex::MutexGuard;
use embassy_time::{with_timeout, Ticker, Timer};
use embedded_hal::digital::OutputPin;
use embedded_hal_async::i2c::I2c;
use embedded_io_async::{Read, Write};
use log::{debug, error, info, warn};

use super::ntc;
use super::power::{PowerMeter, PowerSlot};
use super::pressure;
use super::registry::{Conversion, SensorRecord, SensorRegistry};
use super::report::DeviceReport;
use super::{SensorError, SensorState};
use crate::clock::{format_timestamp, Clock};
use crate::config::AcquisitionConfig;
use crate::hardware::{AnalogFrontend, SharedFrontend};

/// Reports the publisher may fall behind by before new ones are dropped
pub const REPORT_QUEUE_DEPTH: usize = 4;

/// Reports waiting for the publisher
pub static REPORT_CHANNEL: Channel<CriticalSectionRawMutex, DeviceReport, REPORT_QUEUE_DEPTH> = Channel::new();

/// Get a sender for the report channel
pub fn get_report_sender() -> Sender<'static, CriticalSectionRawMutex, DeviceReport, REPORT_QUEUE_DEPTH> {
    REPORT_CHANNEL.sender()
}

/// Get a receiver for the report channel
pub fn get_report_receiver() -> Receiver<'static, CriticalSectionRawMutex, DeviceReport, REPORT_QUEUE_DEPTH> {
    REPORT_CHANNEL.receiver()
}

/// Lifecycle of the acquisition loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    /// Not started, or initialization failed
    Uninitialized,
    Initializing,
    /// Last cycle read every enabled sensor
    Running,
    /// At least one sensor failed during the current cycle
    ReadError,
}

/// Runs the acquisition cycle: reads every enabled sensor, applies its
/// calibration and hands the resulting report to the publisher.
pub struct SensorManager<'a, I2C, RST, S, C> {
    registry: &'a SensorRegistry,
    frontend: &'a SharedFrontend<I2C, RST>,
    meter: PowerMeter<S>,
    clock: &'a C,
    config: AcquisitionConfig,
    state: AcquisitionState,
}

impl<'a, I2C, RST, S, C> SensorManager<'a, I2C, RST, S, C>
where
    I2C: I2c,
    RST: OutputPin,
    S: Read + Write,
    C: Clock,
{
    pub fn new(
        registry: &'a SensorRegistry,
        frontend: &'a SharedFrontend<I2C, RST>,
        meter: PowerMeter<S>,
        clock: &'a C,
        config: AcquisitionConfig,
    ) -> Self {
        Self {
            registry,
            frontend,
            meter,
            clock,
            config,
            state: AcquisitionState::Uninitialized,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Bring up the analog front end and enable every sensor that can be read.
    /// A failure here is final; the caller is expected to stop.
    pub async fn initialize(&mut self) -> Result<(), SensorError> {
        self.state = AcquisitionState::Initializing;
        info!("[SENSOR MANAGER] Initializing {} sensors", self.registry.len());

        {
            let mut frontend = self.lock_frontend().await?;
            if let Err(e) = frontend.init().await {
                error!("[SENSOR MANAGER] Analog front end init failed: {}", e);
                self.state = AcquisitionState::Uninitialized;
                return Err(e);
            }
        }

        for record in self.registry.iter() {
            let index = record.index().get();
            if !record.conversion().is_supported() {
                warn!(
                    "[SENSOR MANAGER] Sensor {} has unsupported type {}, leaving it disabled",
                    index,
                    record.sensor_type()
                );
                continue;
            }
            self.registry.set_state(index, SensorState::Enabled).await?;
        }

        self.state = AcquisitionState::Running;
        info!("[SENSOR MANAGER] Running");
        Ok(())
    }

    /// One pass over all sensors. Failed sensors stay inactive in the report.
    pub async fn run_cycle(&mut self) -> DeviceReport {
        let registry = self.registry;
        let mut report = DeviceReport::new(format_timestamp(self.clock.unix_time()), registry);
        self.state = AcquisitionState::Running;

        for record in registry.iter() {
            let index = record.index().get();

            // Meter slots are filled together with the first one
            if let Conversion::PowerMeterSlot(_) = record.conversion() {
                continue;
            }
            if registry.get_state(index).await != SensorState::Enabled {
                continue;
            }

            if let Err(e) = self.read_sensor(record, &mut report).await {
                error!(
                    "[SENSOR MANAGER] Sensor {} ({}) read failed: {}",
                    index,
                    record.sensor_type(),
                    e
                );
                self.state = AcquisitionState::ReadError;
            }

            Timer::after(self.config.channel_settle).await;
        }

        debug!(
            "[SENSOR MANAGER] Cycle done, {}/{} sensors active",
            report.active_count(),
            report.channel_count
        );
        report
    }

    /// Queue a report, dropping it if the queue stays full
    pub async fn publish<const N: usize>(
        &self,
        sender: &Sender<'_, CriticalSectionRawMutex, DeviceReport, N>,
        report: DeviceReport,
    ) -> Result<(), SensorError> {
        with_timeout(self.config.publish_timeout, sender.send(report))
            .await
            .map_err(|_| {
                warn!("[SENSOR MANAGER] Report queue full, dropping report");
                SensorError::Timeout
            })
    }

    /// Initialize, then run a cycle every period. Only returns if
    /// initialization fails.
    pub async fn run<const N: usize>(
        &mut self,
        sender: Sender<'_, CriticalSectionRawMutex, DeviceReport, N>,
    ) -> Result<(), SensorError> {
        self.initialize().await?;

        let mut ticker = Ticker::every(self.config.cycle_period);
        loop {
            let report = self.run_cycle().await;
            let _ = self.publish(&sender, report).await;
            ticker.next().await;
        }
    }

    async fn read_sensor(&mut self, record: &SensorRecord, report: &mut DeviceReport) -> Result<(), SensorError> {
        let index = record.index().get();

        let raw = match record.conversion() {
            Conversion::Ntc => {
                let hw = record.hw().ok_or(SensorError::InvalidArgument)?;
                let mut frontend = self.lock_frontend().await?;
                ntc::read_temperature(&mut *frontend, hw, &self.config.ntc, self.config.mux_settle).await?
            }
            Conversion::Pressure => {
                let hw = record.hw().ok_or(SensorError::InvalidArgument)?;
                let mut frontend = self.lock_frontend().await?;
                pressure::read_pressure(&mut *frontend, hw, &self.config.pressure, self.config.mux_settle).await?
            }
            Conversion::PowerMeter => {
                let readings = self.meter.read().await?;
                for slot in PowerSlot::ALL {
                    let slot_index = index + slot.offset();
                    if self.registry.get_state(slot_index).await != SensorState::Enabled {
                        continue;
                    }
                    let calibration = self.registry.calibration(slot_index).await;
                    let value = calibration.apply(readings.value(slot));
                    debug!(
                        "[SENSOR MANAGER] Sensor {}: {:.2} {}",
                        slot_index,
                        value,
                        slot.sensor_type().unit()
                    );
                    report.set(slot_index, value);
                }
                return Ok(());
            }
            Conversion::PowerMeterSlot(_) => return Ok(()),
            Conversion::Unsupported => return Err(SensorError::InvalidArgument),
        };

        let calibration = self.registry.calibration(index).await;
        let value = calibration.apply(raw);
        debug!(
            "[SENSOR MANAGER] Sensor {}: {:.2} {}",
            index,
            value,
            record.sensor_type().unit()
        );
        report.set(index, value);
        Ok(())
    }

    async fn lock_frontend(&self) -> Result<MutexGuard<'a, CriticalSectionRawMutex, AnalogFrontend<I2C, RST>>, SensorError> {
        with_timeout(self.config.bus_timeout, self.frontend.lock())
            .await
            .map_err(|_| {
                error!("[SENSOR MANAGER] Analog front end busy");
                SensorError::Timeout
            })
    }
}
