//! ==============================================================================
//! node.rs - the sensor/automation control loop
//! ==============================================================================
//!
//! purpose:
//!     owns the automation state, the actuator output and the link to the
//!     realtime database. everything that can change the ac happens in this
//!     one task, so nothing else ever touches the output pin.
//!
//! cadences (multiplexed in one tokio::select!):
//!
//!     ┌───────────────┐   ┌────────────────┐   ┌──────────────────┐
//!     │ ac poll (1s)  │   │ sampling (5s)  │   │ api commands     │
//!     └───────┬───────┘   └───────┬────────┘   └────────┬─────────┘
//!             └───────────────────┼─────────────────────┘
//!                                 ▼
//!                     SensorNode (serialized)
//!                       - AutomationState
//!                       - ac output pin
//!                       - RemoteStore
//!
//!     a slow remote call blocks the whole loop, including the auto-off
//!     check. there is no timeout beyond the http client's own. branches are
//!     polled in priority order (shutdown, sampling, commands, ac poll), so
//!     a poll that keeps overrunning its period delays sampling but never
//!     starves it. while the store is offline the poll re-probes at most
//!     once per `database.reconnect_interval_ms`.
//!
//! remote writes per sampling cycle:
//!     /devices/{id}/latest               always (when ready)
//!     /devices/{id}/history/{ts}         only after latest succeeded
//!     /events/{id}                       on motion onset, auto-off, alarm
//!     /labs/{id}/ac                      on auto-off
//!
//! ==============================================================================

use crate::automation::{AutomationState, TemperatureAlarm};
use crate::clock::Clock;
use crate::config::NodeConfig;
use crate::domain::{NodeEvent, NodeStatus, SensorReading};
use crate::hal::HardwareProvider;
use crate::paths::DevicePaths;
use crate::sensors;
use crate::store::{RemoteStore, StoreError};

use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// events are listed oldest first by this child field
const EVENT_ORDER: &str = "timestamp";

/// requests from outside the control task, each answered on `reply`
#[derive(Debug)]
pub enum Command {
    SetAc {
        on: bool,
        source: String,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    ListEvents {
        limit: usize,
        reply: oneshot::Sender<Result<Vec<(String, Value)>, StoreError>>,
    },
}

pub type SharedStatus = Arc<RwLock<NodeStatus>>;

pub struct SensorNode<H, S, C> {
    config: NodeConfig,
    paths: DevicePaths,
    hal: H,
    store: S,
    clock: C,
    state: AutomationState,
    alarm: TemperatureAlarm,
    status: SharedStatus,
    /// uptime before which an offline store is not probed again
    next_probe_ms: u64,
}

impl<H, S, C> SensorNode<H, S, C>
where
    H: HardwareProvider,
    S: RemoteStore,
    C: Clock,
{
    pub fn new(config: NodeConfig, hal: H, store: S, clock: C, status: SharedStatus) -> anyhow::Result<Self> {
        let paths = DevicePaths::new(&config.device.id)
            .with_context(|| format!("invalid device id {:?}", config.device.id))?;
        Ok(Self {
            config,
            paths,
            hal,
            store,
            clock,
            state: AutomationState::new(),
            alarm: TemperatureAlarm::default(),
            status,
            next_probe_ms: 0,
        })
    }

    /// boot: ac output off until the first poll resynchronizes it
    pub async fn start(&mut self) {
        self.drive_ac(false);
        self.refresh_status(None).await;
        info!("[NODE] {} ready, AC off", self.config.device.id);
    }

    /// runs until `shutdown` resolves, then drives the ac output off
    pub async fn run(&mut self, mut commands: mpsc::Receiver<Command>, shutdown: impl Future<Output = ()>) {
        let mut ac_poll = tokio::time::interval(Duration::from_millis(self.config.polling.ac_poll_interval_ms.max(1)));
        ac_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sampling = tokio::time::interval(Duration::from_millis(self.config.polling.sample_interval_ms.max(1)));
        sampling.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = sampling.tick() => self.sample_cycle().await,
                Some(command) = commands.recv() => self.handle_command(command).await,
                _ = ac_poll.tick() => self.poll_remote_ac().await,
            }
        }

        info!("[NODE] shutting down, AC off");
        self.drive_ac(false);
    }

    /// read the desired ac state and adopt it if it differs
    pub async fn poll_remote_ac(&mut self) {
        if !self.ensure_ready().await {
            return;
        }
        match self.store.get_bool(self.paths.ac()).await {
            Ok(Some(desired)) => {
                let now = self.clock.uptime_ms();
                if self.state.set_ac(desired, now) {
                    info!("[AC] Status changed to: {}", on_off(desired));
                    self.drive_ac(desired);
                    self.refresh_status(None).await;
                }
            }
            Ok(None) => debug!("[AC] no desired state at {}", self.paths.ac()),
            Err(e) => warn!("[AC] poll failed: {}", e),
        }
    }

    /// one sampling pass: read, decide, actuate, publish
    pub async fn sample_cycle(&mut self) {
        let now = self.clock.uptime_ms();
        let timestamp = self.clock.epoch_secs();
        let automation = self.config.automation.clone();

        let sample = sensors::sample(&self.hal, &self.config.pins);
        if self.config.logging.show_sensor_data {
            if sample.climate_ok {
                info!("[SENSOR] Temperature: {:.2} °C | Humidity: {:.2} %", sample.temperature, sample.humidity);
            }
            info!("[SENSOR] Gas Level: {:.0} ppm", sample.gas_ppm);
        }

        let motion = self.state.observe_motion(sample.motion, now, automation.motion_hold());
        if motion.onset {
            info!("[MOTION] Triggered! Holding occupancy for {}s", automation.motion_hold_secs);
            self.push_event(NodeEvent::motion_detected(timestamp)).await;
        }
        if motion.hold_ended {
            info!("[MOTION] Hold ended, inactivity timer running");
        }

        if let Some(idle) = self.state.check_auto_off(now, automation.inactivity_timeout()) {
            info!("[AC] Auto-off after {}s without motion", idle.as_secs());
            self.drive_ac(false);
            if let Err(e) = self.write_ac(false).await {
                warn!("[AC] Remote sync failed: {}", e);
            }
            self.push_event(NodeEvent::auto_off(idle.as_secs(), timestamp)).await;
        }

        if self.config.logging.show_sensor_data {
            info!("[SENSOR] Occupancy: {}", if motion.occupied { "Detected" } else { "None" });
            info!("[SENSOR] Avg Temp (1h): {:.2} °C | Avg Hum (1h): {:.2} %", sample.avg_temp, sample.avg_hum);
        }

        if sample.climate_ok
            && self.alarm.check(
                sample.temperature,
                automation.critical_temp_c,
                automation.critical_alert_cooldown(),
                now,
            )
        {
            warn!("[SENSOR] Critical temperature {:.1} °C", sample.temperature);
            self.push_event(NodeEvent::critical_temperature(sample.temperature, timestamp)).await;
        }

        let reading = SensorReading {
            timestamp,
            temperature: sample.temperature,
            humidity: sample.humidity,
            gas_ppm: sample.gas_ppm,
            motion_detected: motion.occupied,
            avg_temp: sample.avg_temp,
            avg_hum: sample.avg_hum,
            device_id: self.config.device.id.clone(),
        };
        self.publish(&reading).await;
        self.refresh_status(Some(reading)).await;
    }

    pub async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetAc { on, source, reply } => {
                let result = self.apply_override(on, &source).await;
                // the api may have stopped waiting
                let _ = reply.send(result);
            }
            Command::ListEvents { limit, reply } => {
                let result = if self.store.is_ready() {
                    self.store.last_children(self.paths.events(), EVENT_ORDER, limit).await
                } else {
                    Err(StoreError::NotReady)
                };
                let _ = reply.send(result);
            }
        }
    }

    /// manual override from the local api.
    ///
    /// the remote desired state is written first: the next poll reads it back,
    /// so a local-only change would be reverted within a second. nothing is
    /// switched or audited unless that write landed.
    async fn apply_override(&mut self, on: bool, source: &str) -> Result<(), StoreError> {
        if let Err(e) = self.write_ac(on).await {
            warn!("[AC] Override to {} by {} rejected: {}", on_off(on), source, e);
            return Err(e);
        }
        let now = self.clock.uptime_ms();
        if self.state.set_ac(on, now) {
            info!("[AC] Turned {} by {}", on_off(on), source);
            self.drive_ac(on);
        }
        self.push_event(NodeEvent::manual_override(on, source, self.clock.epoch_secs())).await;
        self.refresh_status(None).await;
        Ok(())
    }

    /// latest is a full overwrite; history is only written once latest landed.
    /// the pair is not atomic: a failed history write leaves them disagreeing.
    async fn publish(&self, reading: &SensorReading) {
        if !self.store.is_ready() {
            warn!("[STORE] Cannot send data - store not ready");
            return;
        }
        let Some(value) = to_json(reading) else { return };

        match self.store.set(&self.paths.latest(), &value).await {
            Ok(()) => {
                debug!("[STORE] Data sent");
                let history = self.paths.history(reading.timestamp);
                if let Err(e) = self.store.set(&history, &value).await {
                    warn!("[STORE] History write to {} failed: {}", history, e);
                }
            }
            Err(e) => warn!("[STORE] Failed to send data. Reason: {}", e),
        }
    }

    async fn push_event(&self, event: NodeEvent) {
        if !self.store.is_ready() {
            debug!("[STORE] store not ready, dropping {:?} event", event.kind);
            return;
        }
        let Some(value) = to_json(&event) else { return };
        match self.store.push(self.paths.events(), &value).await {
            Ok(key) => info!("[STORE] {:?} event logged as {}", event.kind, key),
            Err(e) => warn!("[STORE] Event push failed: {}", e),
        }
    }

    /// never retried
    async fn write_ac(&self, on: bool) -> Result<(), StoreError> {
        if !self.store.is_ready() {
            return Err(StoreError::NotReady);
        }
        self.store.set(self.paths.ac(), &Value::Bool(on)).await
    }

    async fn ensure_ready(&mut self) -> bool {
        if self.store.is_ready() {
            return true;
        }
        let now = self.clock.uptime_ms();
        if now < self.next_probe_ms {
            return false;
        }
        match self.store.connect().await {
            Ok(()) => {
                info!("[STORE] Reconnected");
                true
            }
            Err(e) => {
                self.next_probe_ms = now.saturating_add(self.config.database.reconnect_interval_ms);
                debug!("[STORE] still offline: {}", e);
                false
            }
        }
    }

    fn drive_ac(&self, on: bool) {
        if let Err(e) = self.hal.write_gpio(self.config.pins.ac_led, on) {
            warn!("[AC] GPIO {} write failed: {:#}", self.config.pins.ac_led, e);
        }
    }

    async fn refresh_status(&self, reading: Option<SensorReading>) {
        let mut status = self.status.write().await;
        status.device_id.clone_from(&self.config.device.id);
        status.ac_on = self.state.ac_on();
        status.simulating_motion = self.state.is_simulating_motion();
        status.seconds_since_motion = self.clock.uptime_ms().saturating_sub(self.state.last_motion_ms()) / 1000;
        status.store_ready = self.store.is_ready();
        if let Some(reading) = reading {
            status.occupied = reading.motion_detected;
            status.last_update = reading.timestamp;
            status.last_reading = Some(reading);
        }
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "ON" } else { "OFF" }
}

fn to_json<T: Serialize>(record: &T) -> Option<Value> {
    serde_json::to_value(record)
        .map_err(|e| warn!("[STORE] could not encode record: {}", e))
        .ok()
}
