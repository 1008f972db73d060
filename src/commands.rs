//! Remote commands. Parsing happens in the transport; this module applies a
//! decoded command and builds the response.

use core::fmt::{self, Write};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_time::{with_timeout, Duration};
use heapless::String;
use log::{info, warn};

use crate::sensors::registry::SensorRegistry;
use crate::sensors::report::write_number;
use crate::sensors::{SensorError, SensorType};

pub const COMMAND_QUEUE_DEPTH: usize = 4;

/// How long a response may wait for room in the response queue
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(100);

pub static COMMAND_CHANNEL: Channel<CriticalSectionRawMutex, Command, COMMAND_QUEUE_DEPTH> = Channel::new();
pub static RESPONSE_CHANNEL: Channel<CriticalSectionRawMutex, CommandResponse, COMMAND_QUEUE_DEPTH> =
    Channel::new();

pub type ResponseJson = String<192>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    SetCalibration { sensor_index: usize, gain: f32, offset: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    CalibrationFail,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Success => "success",
            CommandStatus::CalibrationFail => "calibration_fail",
        }
    }
}

/// Outcome of a calibration, carrying the values now in effect
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationResponse {
    pub status: CommandStatus,
    pub sensor_index: usize,
    pub sensor_type: SensorType,
    pub gain: f32,
    pub offset: f32,
}

impl CalibrationResponse {
    pub fn write_json<W: Write>(&self, out: &mut W) -> fmt::Result {
        write!(
            out,
            "{{\"status\":\"{}\",\"sensor_index\":{},\"sensor_type\":\"{}\",\"gain\":",
            self.status.as_str(),
            self.sensor_index,
            self.sensor_type
        )?;
        write_number(out, self.gain)?;
        out.write_str(",\"offset\":")?;
        write_number(out, self.offset)?;
        out.write_char('}')
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandResponse {
    SetCalibration(CalibrationResponse),
}

impl CommandResponse {
    pub fn to_json(&self) -> Result<ResponseJson, SensorError> {
        let mut out = ResponseJson::new();
        let written = match self {
            CommandResponse::SetCalibration(response) => response.write_json(&mut out),
        };
        written.map_err(|_| SensorError::EncodeFailure)?;
        Ok(out)
    }
}

pub async fn process_command(registry: &SensorRegistry, command: Command) -> CommandResponse {
    match command {
        Command::SetCalibration {
            sensor_index,
            gain,
            offset,
        } => {
            let status = match registry.calibrate(sensor_index, offset, gain).await {
                Ok(()) => CommandStatus::Success,
                Err(e) => {
                    warn!("[COMMANDS] Calibration of sensor {} rejected: {}", sensor_index, e);
                    CommandStatus::CalibrationFail
                }
            };
            let applied = registry.calibration(sensor_index).await;

            CommandResponse::SetCalibration(CalibrationResponse {
                status,
                sensor_index,
                sensor_type: registry.get_type(sensor_index),
                gain: applied.gain,
                offset: applied.offset,
            })
        }
    }
}

/// Wait for one command, apply it and queue the response
pub async fn handle_next<const N: usize, const M: usize>(
    registry: &SensorRegistry,
    commands: &Receiver<'_, CriticalSectionRawMutex, Command, N>,
    responses: &Sender<'_, CriticalSectionRawMutex, CommandResponse, M>,
) -> Result<(), SensorError> {
    let command = commands.receive().await;
    info!("[COMMANDS] Received {:?}", command);

    let response = process_command(registry, command).await;
    with_timeout(RESPONSE_TIMEOUT, responses.send(response))
        .await
        .map_err(|_| {
            warn!("[COMMANDS] Response queue full, dropping response");
            SensorError::Timeout
        })
}

pub async fn handle_commands<const N: usize, const M: usize>(
    registry: &SensorRegistry,
    commands: Receiver<'_, CriticalSectionRawMutex, Command, N>,
    responses: Sender<'_, CriticalSectionRawMutex, CommandResponse, M>,
) -> ! {
    loop {
        let _ = handle_next(registry, &commands, &responses).await;
    }
}
