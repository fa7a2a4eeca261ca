use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex, time::MissedTickBehavior};
use tracing::{info, warn};

use boiler_common::{
    telemetry::log_payload, EventCode, LinkMonitor, RelayConfig, RelayOutput, RuntimeConfig,
    SharedEventLog, StatePayload, Tick, TickDriver, WallTime, STATUS_OFFLINE, STATUS_ONLINE,
    TOPIC_LOG, TOPIC_STATE, TOPIC_STATUS,
};

/// Stands in for the boiler relay when running off-target.
#[derive(Debug, Default)]
struct SimulatedRelay {
    energized: bool,
}

impl RelayOutput for SimulatedRelay {
    fn set_energized(&mut self, energized: bool) {
        let previous = std::mem::replace(&mut self.energized, energized);
        if previous == energized {
            return;
        }
        if energized {
            info!("boiler relay energized");
        } else {
            info!("boiler relay de-energized");
        }
    }
}

#[derive(Clone)]
struct AppState {
    driver: Arc<Mutex<TickDriver<SimulatedRelay>>>,
    link: Arc<Mutex<LinkMonitor>>,
    log: SharedEventLog,
    // Raw thermostat contact, set through the simulation endpoint.
    input: Arc<AtomicBool>,
    timezone: Tz,
    mqtt: AsyncClient,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let runtime = load_runtime_config().await?;
    let timezone: Tz = runtime
        .timezone
        .parse()
        .map_err(|_| anyhow!("invalid timezone `{}`", runtime.timezone))?;

    info!(
        "relay timing: delay={}ms max_on={}ms min_off={}ms debounce={}ms tick={}ms",
        runtime.relay.relay_delay_ms,
        runtime.relay.max_on_time_ms,
        runtime.relay.min_off_time_ms,
        runtime.relay.debounce_ms,
        runtime.relay.tick_interval_ms,
    );

    let log = SharedEventLog::with_capacity(runtime.relay.log_capacity);
    let driver = TickDriver::new(
        &runtime.relay,
        SimulatedRelay::default(),
        log.clone(),
        monotonic_ms(),
        wall_clock(),
    );

    let initial_input = std::env::var("BOILER_SIM_INPUT")
        .ok()
        .and_then(|value| parse_level(&value))
        .unwrap_or(false);

    let mut mqtt_options = MqttOptions::new(
        runtime.network.hostname.clone(),
        runtime.network.mqtt_host.clone(),
        runtime.network.mqtt_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(runtime.network.keep_alive_sec));
    mqtt_options.set_last_will(LastWill::new(
        TOPIC_STATUS,
        STATUS_OFFLINE,
        QoS::AtLeastOnce,
        true,
    ));
    if !runtime.network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(
            runtime.network.mqtt_user.clone(),
            runtime.network.mqtt_pass.clone(),
        );
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        driver: Arc::new(Mutex::new(driver)),
        link: Arc::new(Mutex::new(LinkMonitor::new(
            runtime.network.watchdog_interval_ms,
        ))),
        log,
        input: Arc::new(AtomicBool::new(initial_input)),
        timezone,
        mqtt,
    };

    spawn_control_loop(app_state.clone(), runtime.relay.clone());
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_publish_loop(app_state.clone(), runtime.network.publish_interval_ms);

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/log", get(handle_get_log))
        .route("/api/input", post(handle_set_input))
        .with_state(app_state);

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let path = std::env::var("BOILER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./boiler.json"));
    let min_off_override = std::env::var("BOILER_MIN_OFF_TIME_MS")
        .ok()
        .map(|value| value.parse::<u32>())
        .transpose()
        .context("BOILER_MIN_OFF_TIME_MS must be a number of milliseconds")?;

    let mut runtime = read_config_file(&path, min_off_override).await?;

    if let Some(min_off_time_ms) = min_off_override {
        runtime.relay.min_off_time_ms = min_off_time_ms;
    }
    if let Ok(host) = std::env::var("MQTT_HOST") {
        runtime.network.mqtt_host = host;
    }
    if let Some(port) = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        runtime.network.mqtt_port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        runtime.network.mqtt_user = user;
        runtime.network.mqtt_pass = std::env::var("MQTT_PASS").unwrap_or_default();
    }

    runtime.validate().context("invalid runtime config")?;
    Ok(runtime)
}

/// A missing file falls back to defaults only when a min off-time is supplied.
async fn read_config_file(
    path: &Path,
    min_off_override: Option<u32>,
) -> anyhow::Result<RuntimeConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("invalid config file {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            let min_off_time_ms = min_off_override.ok_or_else(|| {
                anyhow!(
                    "no config file at {} and BOILER_MIN_OFF_TIME_MS is unset; \
                     the short-cycle threshold has no default",
                    path.display()
                )
            })?;
            warn!("config file {} not found, using defaults", path.display());
            Ok(RuntimeConfig::new(RelayConfig::with_min_off_time(
                min_off_time_ms,
            )))
        }
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn spawn_control_loop(app_state: AppState, relay: RelayConfig) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_millis(u64::from(relay.tick_interval_ms)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            let raw_level = app_state.input.load(Ordering::Relaxed);
            let transition = {
                let mut driver = app_state.driver.lock().await;
                driver.tick(raw_level, monotonic_ms(), wall_clock())
            };

            if let Some(transition) = transition {
                info!(
                    "relay state {} -> {}",
                    transition.from.as_str(),
                    transition.to.as_str()
                );
            }
        }
    });
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    record_link_event(&app_state, |link| link.on_connected()).await;

                    if let Err(err) = app_state.mqtt.try_publish(
                        TOPIC_STATUS,
                        QoS::AtLeastOnce,
                        true,
                        STATUS_ONLINE,
                    ) {
                        warn!("mqtt online status publish failed: {err}");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    let now = monotonic_ms();
                    record_link_event(&app_state, |link| link.on_connection_error(now)).await;
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_publish_loop(app_state: AppState, publish_interval_ms: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(publish_interval_ms));
        loop {
            interval.tick().await;

            if !app_state.link.lock().await.is_connected() {
                continue;
            }

            if let Err(err) = publish_telemetry(&app_state).await {
                warn!("telemetry publish failed: {err:#}");
                app_state
                    .log
                    .append(EventCode::MqttPublishError, wall_clock());
            }
        }
    });
}

async fn publish_telemetry(app_state: &AppState) -> anyhow::Result<()> {
    let state = serde_json::to_vec(&build_state_payload(app_state).await)
        .context("state serialization failed")?;
    app_state
        .mqtt
        .try_publish(TOPIC_STATE, QoS::AtLeastOnce, true, state)
        .context("state publish failed")?;

    let records = app_state.log.snapshot();
    let log = serde_json::to_vec(&log_payload(&records, app_state.timezone))
        .context("log serialization failed")?;
    app_state
        .mqtt
        .try_publish(TOPIC_LOG, QoS::AtLeastOnce, true, log)
        .context("log publish failed")?;

    Ok(())
}

async fn record_link_event<F>(app_state: &AppState, observe: F)
where
    F: FnOnce(&mut LinkMonitor) -> Option<EventCode>,
{
    let event = {
        let mut link = app_state.link.lock().await;
        observe(&mut *link)
    };
    if let Some(code) = event {
        app_state.log.append(code, wall_clock());
    }
}

async fn build_state_payload(app_state: &AppState) -> StatePayload {
    let mqtt_connected = app_state.link.lock().await.is_connected();
    let driver = app_state.driver.lock().await;
    StatePayload::new(
        driver.status(monotonic_ms()),
        driver.in_short_cycle_hold(),
        mqtt_connected,
        wall_clock(),
    )
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(build_state_payload(&state).await)
}

async fn handle_get_log(State(state): State<AppState>) -> impl IntoResponse {
    let records = state.log.snapshot();
    Json(log_payload(&records, state.timezone))
}

async fn handle_set_input(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Some(level) = parse_level(value) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid input. Use 'on' or 'off'");
    };

    state.input.store(level, Ordering::Relaxed);
    info!("simulated thermostat input set {}", if level { "on" } else { "off" });

    handle_get_status(State(state)).await.into_response()
}

fn parse_level(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => Some(true),
        "off" | "0" | "false" => Some(false),
        _ => None,
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn wall_clock() -> WallTime {
    Utc::now().timestamp()
}

// Truncating to 32 bits is the counter wrap the core is built for.
fn monotonic_ms() -> Tick {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as Tick
}
