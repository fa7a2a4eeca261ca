use std::{
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::Utc;
use chrono_tz::Tz;
use embedded_svc::{
    mqtt::client::{EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::gpio::{AnyInputPin, AnyOutputPin, Input, Output, PinDriver, Pull};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    log::EspLogger,
    mqtt::client::{EspMqttClient, EspMqttConnection, LwtConfiguration, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs},
    sntp::EspSntp,
    wifi::{BlockingWifi, EspWifi},
};
use log::{error, info, warn};

use boiler_common::{
    config::{HardwareConfig, NetworkConfig},
    telemetry::log_payload,
    EventCode, LinkMonitor, RelayOutput, RuntimeConfig, SharedEventLog, StatePayload, Tick,
    TickDriver, WallTime, STATUS_OFFLINE, STATUS_ONLINE, TOPIC_LOG, TOPIC_STATE, TOPIC_STATUS,
};

const NVS_NAMESPACE: &str = "boiler";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const WATCHDOG_TIMEOUT_SEC: u32 = 5;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;

/// Boiler relay on a push-pull GPIO, high = energized.
struct GpioRelay {
    pin: PinDriver<'static, AnyOutputPin, Output>,
}

impl RelayOutput for GpioRelay {
    fn set_energized(&mut self, energized: bool) {
        let result = if energized {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };

        match result {
            Ok(()) => info!(
                "boiler relay {}",
                if energized { "energized" } else { "de-energized" }
            ),
            Err(err) => error!("failed to drive boiler relay: {err}"),
        }
    }
}

struct ThermostatInput {
    pin: PinDriver<'static, AnyInputPin, Input>,
    active_low: bool,
}

impl ThermostatInput {
    fn is_asserted(&self) -> bool {
        self.pin.is_high() != self.active_low
    }
}

#[derive(Clone)]
struct SharedState {
    driver: Arc<Mutex<TickDriver<GpioRelay>>>,
    link: Arc<Mutex<LinkMonitor>>,
    log: SharedEventLog,
    timezone: Tz,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let runtime = load_runtime_config(&nvs_partition)?;
    runtime.validate().context("invalid runtime config in NVS")?;
    let timezone: Tz = runtime
        .timezone
        .parse()
        .map_err(|_| anyhow!("invalid timezone `{}`", runtime.timezone))?;

    info!(
        "relay timing: delay={}ms max_on={}ms min_off={}ms debounce={}ms",
        runtime.relay.relay_delay_ms,
        runtime.relay.max_on_time_ms,
        runtime.relay.min_off_time_ms,
        runtime.relay.debounce_ms,
    );

    let Peripherals { modem, .. } = Peripherals::take()?;
    let (input, relay) = init_gpio(&runtime.hardware)?;

    let log = SharedEventLog::with_capacity(runtime.relay.log_capacity);
    let state = SharedState {
        driver: Arc::new(Mutex::new(TickDriver::new(
            &runtime.relay,
            relay,
            log.clone(),
            monotonic_ms(),
            wall_clock(),
        ))),
        link: Arc::new(Mutex::new(LinkMonitor::new(
            runtime.network.watchdog_interval_ms,
        ))),
        log,
        timezone,
    };

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    // Relay control must not wait on the network.
    spawn_tick_loop(state.clone(), input, runtime.relay.tick_interval_ms)?;

    let wifi = match connect_wifi(modem, sys_loop, nvs_partition, &runtime.network) {
        Ok(wifi) => Some(wifi),
        Err(err) => {
            warn!("network unavailable, running relay control offline: {err:#}");
            None
        }
    };

    let _sntp = match wifi {
        Some(_) => EspSntp::new_default()
            .map_err(|err| warn!("failed to start SNTP: {err}"))
            .ok(),
        None => None,
    };

    if wifi.is_some() {
        match create_mqtt_client(&runtime.network) {
            Ok((client, conn)) => {
                let client = Arc::new(Mutex::new(client));
                spawn_mqtt_receiver(state.clone(), conn, client.clone());
                spawn_publish_loop(state, client, runtime.network.publish_interval_ms);
            }
            Err(err) => {
                warn!("mqtt client setup failed: {err:#}");
                state.log.append(EventCode::MqttConnectError, wall_clock());
            }
        }
    }

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn load_runtime_config(partition: &EspDefaultNvsPartition) -> anyhow::Result<RuntimeConfig> {
    let nvs = EspNvs::new(partition.clone(), NVS_NAMESPACE, false)
        .context("failed to open NVS namespace")?;
    let mut buffer = vec![0_u8; 2048];

    match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
        Some(value) => {
            serde_json::from_str::<RuntimeConfig>(value).context("invalid runtime config JSON")
        }
        None => Err(anyhow!(
            "no runtime config in NVS; relay.min_off_time_ms must be provisioned"
        )),
    }
}

fn init_gpio(hardware: &HardwareConfig) -> anyhow::Result<(ThermostatInput, GpioRelay)> {
    let mut relay_pin = PinDriver::output(unsafe { AnyOutputPin::new(hardware.relay_pin) })
        .with_context(|| format!("relay output unavailable on GPIO{}", hardware.relay_pin))?;
    relay_pin.set_low()?;

    let mut input_pin = PinDriver::input(unsafe { AnyInputPin::new(hardware.input_pin) })
        .with_context(|| format!("thermostat input unavailable on GPIO{}", hardware.input_pin))?;
    input_pin.set_pull(if hardware.input_active_low {
        Pull::Up
    } else {
        Pull::Down
    })?;

    info!(
        "relay output on GPIO{}, thermostat input on GPIO{} (active {})",
        hardware.relay_pin,
        hardware.input_pin,
        if hardware.input_active_low { "low" } else { "high" }
    );

    Ok((
        ThermostatInput {
            pin: input_pin,
            active_low: hardware.input_active_low,
        },
        GpioRelay { pin: relay_pin },
    ))
}

fn spawn_tick_loop(
    state: SharedState,
    input: ThermostatInput,
    tick_interval_ms: u32,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("relay-tick".into())
        .stack_size(8 * 1024)
        .spawn(move || {
            if let Err(err) = add_current_task_to_watchdog() {
                warn!("failed to register tick loop with watchdog: {err:#}");
            }

            let period = Duration::from_millis(u64::from(tick_interval_ms));
            loop {
                feed_watchdog();

                let raw_level = input.is_asserted();
                let transition =
                    lock(&state.driver).tick(raw_level, monotonic_ms(), wall_clock());
                if let Some(transition) = transition {
                    info!(
                        "relay state {} -> {}",
                        transition.from.as_str(),
                        transition.to.as_str()
                    );
                }

                thread::sleep(period);
            }
        })
        .context("failed to spawn relay tick thread")?;

    Ok(())
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    if network.wifi_ssid.trim().is_empty() {
        return Err(anyhow!("wifi credentials missing"));
    }

    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    let mut last_err = None;
    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected on attempt {attempt}");
                last_err = None;
                break;
            }
            Err(err) => {
                warn!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS} failed: {err:#}");
                last_err = Some(err);
            }
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    if let Some(err) = last_err {
        let _ = wifi.stop();
        return Err(err).context("wifi connect failed");
    }

    Ok(esp_wifi)
}

fn create_mqtt_client(
    network: &NetworkConfig,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let url = format!("mqtt://{}:{}", network.mqtt_host, network.mqtt_port);

    let conf = MqttClientConfiguration {
        client_id: Some(network.hostname.as_str()),
        username: if network.mqtt_user.is_empty() {
            None
        } else {
            Some(network.mqtt_user.as_str())
        },
        password: if network.mqtt_pass.is_empty() {
            None
        } else {
            Some(network.mqtt_pass.as_str())
        },
        keep_alive_interval: Some(Duration::from_secs(network.keep_alive_sec)),
        lwt: Some(LwtConfiguration {
            topic: TOPIC_STATUS,
            payload: STATUS_OFFLINE.as_bytes(),
            qos: QoS::AtLeastOnce,
            retain: true,
        }),
        ..Default::default()
    };

    Ok(EspMqttClient::new(url.as_str(), &conf)?)
}

fn spawn_mqtt_receiver(
    state: SharedState,
    mut conn: EspMqttConnection,
    mqtt: Arc<Mutex<EspMqttClient<'static>>>,
) {
    thread::Builder::new()
        .name("mqtt-rx".into())
        .stack_size(6 * 1024)
        .spawn(move || loop {
            let event = match conn.next() {
                Ok(event) => event,
                Err(err) => {
                    warn!("mqtt connection closed: {err:?}");
                    return;
                }
            };

            let observed = match event.payload() {
                EventPayload::Connected(_) => {
                    info!("mqtt connected");
                    if let Err(err) = lock(&mqtt).publish(
                        TOPIC_STATUS,
                        QoS::AtLeastOnce,
                        true,
                        STATUS_ONLINE.as_bytes(),
                    ) {
                        warn!("mqtt online status publish failed: {err}");
                    }
                    lock(&state.link).on_connected()
                }
                EventPayload::Disconnected => {
                    warn!("mqtt disconnected");
                    lock(&state.link).on_connection_error(monotonic_ms())
                }
                EventPayload::Error(err) => {
                    warn!("mqtt error: {err:?}");
                    lock(&state.link).on_connection_error(monotonic_ms())
                }
                _ => None,
            };

            if let Some(code) = observed {
                state.log.append(code, wall_clock());
            }
        })
        .map_err(|err| error!("failed to spawn mqtt receiver thread: {err}"))
        .ok();
}

fn spawn_publish_loop(
    state: SharedState,
    mqtt: Arc<Mutex<EspMqttClient<'static>>>,
    publish_interval_ms: u64,
) {
    thread::Builder::new()
        .name("mqtt-tx".into())
        .stack_size(12 * 1024)
        .spawn(move || loop {
            thread::sleep(Duration::from_millis(publish_interval_ms));

            if !lock(&state.link).is_connected() {
                continue;
            }

            if let Err(err) = publish_telemetry(&state, &mqtt) {
                warn!("telemetry publish failed: {err:#}");
                state.log.append(EventCode::MqttPublishError, wall_clock());
            }
        })
        .map_err(|err| error!("failed to spawn mqtt publish thread: {err}"))
        .ok();
}

fn publish_telemetry(
    state: &SharedState,
    mqtt: &Arc<Mutex<EspMqttClient<'static>>>,
) -> anyhow::Result<()> {
    let mqtt_connected = lock(&state.link).is_connected();
    let payload = {
        let driver = lock(&state.driver);
        StatePayload::new(
            driver.status(monotonic_ms()),
            driver.in_short_cycle_hold(),
            mqtt_connected,
            wall_clock(),
        )
    };
    let body = serde_json::to_vec(&payload)?;
    lock(mqtt).publish(TOPIC_STATE, QoS::AtLeastOnce, true, &body)?;

    let records = state.log.snapshot();
    let body = serde_json::to_vec(&log_payload(&records, state.timezone))?;
    lock(mqtt).publish(TOPIC_LOG, QoS::AtLeastOnce, true, &body)?;

    Ok(())
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn wall_clock() -> WallTime {
    Utc::now().timestamp()
}

fn monotonic_ms() -> Tick {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as Tick
}
