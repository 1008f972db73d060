#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_sync::mutex::Mutex;
use esp_backtrace as _;
use esp_hal::{
    gpio::{Io, Level, Output},
    i2c::I2c,
    peripherals::{I2C0, UART1},
    prelude::*,
    timer::timg::TimerGroup,
    uart::{config::Config as UartConfig, Uart},
    Async,
};
use log::{error, info, warn};
use static_cell::StaticCell;

use titanium_daq::clock::SystemClock;
use titanium_daq::commands::{self, COMMAND_CHANNEL, RESPONSE_CHANNEL};
use titanium_daq::config::AcquisitionConfig;
use titanium_daq::hardware::ads1115::DEFAULT_ADDRESS;
use titanium_daq::hardware::{AnalogFrontend, SharedFrontend};
use titanium_daq::sensors::manager::{get_report_receiver, get_report_sender, SensorManager};
use titanium_daq::sensors::power::{PowerMeter, PowerMeterConfig};
use titanium_daq::sensors::registry::SensorRegistry;

type Bus = I2c<'static, I2C0, Async>;
type ResetPin = Output<'static>;
type Serial = Uart<'static, UART1, Async>;

const METER_BAUD_RATE: u32 = 9600;

static REGISTRY: StaticCell<SensorRegistry> = StaticCell::new();
static FRONTEND: StaticCell<SharedFrontend<Bus, ResetPin>> = StaticCell::new();
static CLOCK: SystemClock = SystemClock::new();

#[esp_hal_embassy::main]
async fn main(spawner: Spawner) {
    esp_println::logger::init_logger(log::LevelFilter::Info);
    info!("[MAIN] Titanium DAQ starting");

    let peripherals = esp_hal::init(esp_hal::Config::default());

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_hal_embassy::init(timg0.timer0);

    let io = Io::new(peripherals.GPIO, peripherals.IO_MUX);

    let i2c = I2c::new_async(peripherals.I2C0, io.pins.gpio6, io.pins.gpio7, 100.kHz());
    let mux_reset = Output::new(io.pins.gpio3, Level::High);

    let uart_config = UartConfig::default().baudrate(METER_BAUD_RATE);
    let serial = match Uart::new_async_with_config(peripherals.UART1, uart_config, io.pins.gpio5, io.pins.gpio4) {
        Ok(serial) => serial,
        Err(e) => {
            error!("[MAIN] Failed to open meter UART: {:?}", e);
            return;
        }
    };

    let registry: &'static SensorRegistry = REGISTRY.init(SensorRegistry::new());
    let frontend: &'static SharedFrontend<Bus, ResetPin> =
        FRONTEND.init(Mutex::new(AnalogFrontend::new(i2c, mux_reset, DEFAULT_ADDRESS)));
    let meter = PowerMeter::new(serial, PowerMeterConfig::default());
    info!(
        "[MAIN] Energy meter at slave 0x{:02x}, {} baud",
        meter.config().slave,
        METER_BAUD_RATE
    );

    if let Err(e) = spawner.spawn(acquisition_task(registry, frontend, meter)) {
        error!("[MAIN] Failed to spawn acquisition task: {:?}", e);
    }
    if let Err(e) = spawner.spawn(command_task(registry)) {
        error!("[MAIN] Failed to spawn command task: {:?}", e);
    }
    if let Err(e) = spawner.spawn(report_task()) {
        error!("[MAIN] Failed to spawn report task: {:?}", e);
    }
    if let Err(e) = spawner.spawn(response_task()) {
        error!("[MAIN] Failed to spawn response task: {:?}", e);
    }

    info!("[MAIN] Tasks started");
}

#[embassy_executor::task]
async fn acquisition_task(
    registry: &'static SensorRegistry,
    frontend: &'static SharedFrontend<Bus, ResetPin>,
    meter: PowerMeter<Serial>,
) {
    let mut manager = SensorManager::new(registry, frontend, meter, &CLOCK, AcquisitionConfig::default());

    if let Err(e) = manager.run(get_report_sender()).await {
        error!("[SENSOR MANAGER] Stopped: {}", e);
    }
}

#[embassy_executor::task]
async fn command_task(registry: &'static SensorRegistry) {
    commands::handle_commands(registry, COMMAND_CHANNEL.receiver(), RESPONSE_CHANNEL.sender()).await
}

/// Stand-in for the network publisher: renders each report and logs it
#[embassy_executor::task]
async fn report_task() {
    let receiver = get_report_receiver();

    loop {
        let report = receiver.receive().await;
        match report.to_json() {
            Ok(json) => info!("[REPORT] {}", json),
            Err(e) => warn!("[REPORT] Dropped report: {}", e),
        }
    }
}

#[embassy_executor::task]
async fn response_task() {
    let receiver = RESPONSE_CHANNEL.receiver();

    loop {
        let response = receiver.receive().await;
        match response.to_json() {
            Ok(json) => info!("[COMMANDS] {}", json),
            Err(e) => warn!("[COMMANDS] Dropped response: {}", e),
        }
    }
}
