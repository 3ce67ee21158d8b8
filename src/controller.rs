use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::client::DeviceClient;
use crate::config::Config;
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{command_for, decode_snapshot, echoed_default};
use crate::reconciler::{Intent, Reconciler, SnapshotOutcome};
use crate::timer::Timers;
use crate::types::*;
use crate::{Error, Result};

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;

const GESTURE_QUEUE: usize = 64;

/// User gestures pushed by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gesture {
    /// Pointer or touch went down on a slider.
    StartInteract(FieldId),
    /// Slider moved; displayed locally, nothing is sent.
    Input { field: FieldId, value: f64 },
    /// Slider value committed; sent immediately.
    Commit { field: FieldId, value: f64 },
    /// Pointer or touch released.
    EndInteract(FieldId),
    /// Stepped +/- press, coalesced over the debounce window.
    Adjust { field: FieldId, delta: f64 },
    /// Discrete switch; sent immediately.
    Toggle { field: FieldId, value: f64 },
}

enum Completion {
    Poll {
        device: Device,
        result: Result<Value>,
    },
    Dispatch {
        id: Uuid,
        field: FieldId,
        result: Result<Value>,
    },
    OffsetMap(Result<AutoOffsetMap>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollReason {
    Tick,
    Confirm,
}

/// Sending side of a running [`Controller`]. The controller stops once
/// every handle is dropped.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Gesture>,
}

impl ControllerHandle {
    pub async fn send(&self, gesture: Gesture) -> Result<()> {
        self.tx.send(gesture).await.map_err(|_| Error::Closed)
    }

    pub async fn start_interact(&self, field: FieldId) -> Result<()> {
        self.send(Gesture::StartInteract(field)).await
    }

    pub async fn input(&self, field: FieldId, value: f64) -> Result<()> {
        self.send(Gesture::Input { field, value }).await
    }

    pub async fn commit(&self, field: FieldId, value: f64) -> Result<()> {
        self.send(Gesture::Commit { field, value }).await
    }

    pub async fn end_interact(&self, field: FieldId) -> Result<()> {
        self.send(Gesture::EndInteract(field)).await
    }

    pub async fn adjust(&self, field: FieldId, delta: f64) -> Result<()> {
        self.send(Gesture::Adjust { field, delta }).await
    }

    pub async fn toggle(&self, field: FieldId, value: f64) -> Result<()> {
        self.send(Gesture::Toggle { field, value }).await
    }

    pub async fn set_power(&self, on: bool) -> Result<()> {
        self.toggle(FieldId::Power, if on { 1.0 } else { 0.0 }).await
    }

    pub async fn set_lg_mode(&self, mode: LgMode) -> Result<()> {
        self.toggle(FieldId::LgMode, mode.code() as f64).await
    }

    pub async fn set_thermostat_mode(&self, mode: ThermostatMode) -> Result<()> {
        self.toggle(FieldId::ThermostatMode, mode.index()).await
    }

    pub async fn set_ai_mode(&self, enabled: bool) -> Result<()> {
        self.toggle(FieldId::AiMode, if enabled { 1.0 } else { 0.0 }).await
    }
}

pub struct ControllerBuilder {
    config: Config,
    event_callbacks: Vec<EventCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl ControllerBuilder {
    pub fn new(config: Config) -> Self {
        let (log_mode, log_path) = match &config.message_log {
            Some(log) => (Some(log.mode), Some(log.path.clone())),
            None => (None, None),
        };
        Self {
            config,
            event_callbacks: Vec::new(),
            log_mode,
            log_path,
        }
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Controller> {
        self.config.validate()?;
        let timing = &self.config.timing;

        let client = DeviceClient::new(
            self.config.heat_pump.url.clone(),
            self.config.thermostat.url.clone(),
            timing.request_timeout(),
        )?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(MessageLogger::new(mode, &path)?),
            _ => None,
        };

        let reconciler = Reconciler::new(self.config.fields.specs(), timing.reconciler());
        let (gesture_tx, gesture_rx) = mpsc::channel(GESTURE_QUEUE);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        Ok(Controller {
            client,
            reconciler,
            poll_intervals: vec![
                (
                    Device::HeatPump,
                    Duration::from_millis(self.config.heat_pump.poll_interval_ms),
                ),
                (
                    Device::Thermostat,
                    Duration::from_millis(self.config.thermostat.poll_interval_ms),
                ),
            ],
            confirm_delay: timing.confirm_poll(),
            confirm_polls: Timers::new(),
            commands_in_flight: HashMap::new(),
            offset_map: None,
            polls_in_flight: HashSet::new(),
            repoll_requested: HashSet::new(),
            online: HashMap::new(),
            rendered: HashMap::new(),
            event_callbacks: self.event_callbacks,
            logger,
            gesture_tx: Some(gesture_tx),
            gesture_rx,
            completion_tx,
            completion_rx,
        })
    }
}

/// Single task that owns every field and runs each handler to completion.
/// Network I/O is spawned and reported back as completions.
pub struct Controller {
    client: DeviceClient,
    reconciler: Reconciler,
    poll_intervals: Vec<(Device, Duration)>,
    confirm_delay: Duration,
    /// One confirm poll per acknowledged command.
    confirm_polls: Timers<(Device, Uuid)>,
    /// Latest command sent per field. Completions of older commands are stale.
    commands_in_flight: HashMap<FieldId, Uuid>,
    offset_map: Option<AutoOffsetMap>,
    polls_in_flight: HashSet<Device>,
    repoll_requested: HashSet<Device>,
    online: HashMap<Device, bool>,
    rendered: HashMap<FieldId, (Option<f64>, FieldState)>,
    event_callbacks: Vec<EventCallback>,
    logger: Option<MessageLogger>,
    gesture_tx: Option<mpsc::Sender<Gesture>>,
    gesture_rx: mpsc::Receiver<Gesture>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
}

impl Controller {
    pub fn builder(config: Config) -> ControllerBuilder {
        ControllerBuilder::new(config)
    }

    /// Handles must be taken before [`Controller::run`].
    pub fn handle(&self) -> ControllerHandle {
        let tx = self
            .gesture_tx
            .clone()
            .unwrap_or_else(|| mpsc::channel(1).0);
        ControllerHandle { tx }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub async fn run(mut self) {
        self.gesture_tx = None;

        let mut heat_pump_tick = self.ticker(Device::HeatPump);
        let mut thermostat_tick = self.ticker(Device::Thermostat);
        self.load_offset_map();
        info!("controller started");

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                _ = heat_pump_tick.tick() => self.start_poll(Device::HeatPump, PollReason::Tick),
                _ = thermostat_tick.tick() => self.start_poll(Device::Thermostat, PollReason::Tick),
                gesture = self.gesture_rx.recv() => match gesture {
                    Some(gesture) => self.handle_gesture(gesture),
                    None => break,
                },
                Some(done) = self.completion_rx.recv() => self.handle_completion(done),
                _ = sleep_until_deadline(deadline) => self.fire_timers(),
            }
            self.publish_renders();
        }

        info!("all handles dropped, controller stopped");
    }

    fn ticker(&self, device: Device) -> tokio::time::Interval {
        let period = self
            .poll_intervals
            .iter()
            .find(|(d, _)| *d == device)
            .map(|(_, p)| *p)
            .unwrap_or(Duration::from_secs(10));
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.reconciler.next_deadline(), self.confirm_polls.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn handle_gesture(&mut self, gesture: Gesture) {
        let now = Instant::now();
        trace!(?gesture, "gesture");
        let result = match gesture {
            Gesture::StartInteract(field) => self.reconciler.begin_interaction(field),
            Gesture::Input { field, value } => self.reconciler.preview(field, value).map(|_| ()),
            Gesture::Commit { field, value } => self
                .reconciler
                .record_intent(field, value, true, now)
                .map(|value| self.dispatch(Intent { field, value })),
            Gesture::EndInteract(field) => {
                self.reconciler.release_interaction_lock(field, now).map(|_| ())
            }
            Gesture::Adjust { field, delta } => {
                self.reconciler.adjust(field, delta, now).map(|_| ())
            }
            Gesture::Toggle { field, value } => self
                .reconciler
                .record_intent(field, value, false, now)
                .map(|value| self.dispatch(Intent { field, value })),
        };

        if let Err(e) = result {
            let field = match gesture {
                Gesture::StartInteract(f) | Gesture::EndInteract(f) => f,
                Gesture::Input { field, .. }
                | Gesture::Commit { field, .. }
                | Gesture::Adjust { field, .. }
                | Gesture::Toggle { field, .. } => field,
            };
            debug!(field = %field, "gesture rejected: {e}");
            self.emit(&Event::Notice(Notice {
                field,
                kind: NoticeKind::ValidationRejected,
                message: e.to_string(),
            }));
        }
    }

    fn dispatch(&mut self, intent: Intent) {
        let command = match command_for(intent) {
            Ok(command) => command,
            Err(e) => {
                let mut notice = self.reconciler.on_dispatch_failure(intent.field, &e.to_string());
                notice.kind = NoticeKind::ValidationRejected;
                self.emit(&Event::Notice(notice));
                return;
            }
        };

        let id = Uuid::new_v4();
        if let Some(ref mut logger) = self.logger {
            logger.log_command(id, &command);
        }
        self.commands_in_flight.insert(command.field, id);

        let client = self.client.clone();
        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = client.dispatch(&command).await;
            let _ = tx.send(Completion::Dispatch {
                id,
                field: command.field,
                result,
            });
        });
    }

    fn load_offset_map(&self) {
        let client = self.client.clone();
        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = client.fetch_auto_offset_map().await;
            let _ = tx.send(Completion::OffsetMap(result));
        });
    }

    fn start_poll(&mut self, device: Device, reason: PollReason) {
        if self.polls_in_flight.contains(&device) {
            if reason == PollReason::Confirm {
                self.repoll_requested.insert(device);
            }
            trace!(device = device.name(), ?reason, "poll already in flight");
            return;
        }
        self.polls_in_flight.insert(device);

        let client = self.client.clone();
        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = client.fetch_status(device).await;
            let _ = tx.send(Completion::Poll { device, result });
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        let now = Instant::now();
        match completion {
            Completion::Poll { device, result } => {
                self.polls_in_flight.remove(&device);
                let decoded = result.and_then(|raw| {
                    let snapshot = decode_snapshot(device, raw.clone())?;
                    Ok((raw, snapshot))
                });
                match decoded {
                    Ok((raw, snapshot)) => {
                        if let Some(ref mut logger) = self.logger {
                            logger.log_poll(device, &raw);
                        }
                        self.set_online(device, true);
                        let mut mode_confirmed = false;
                        for (field, outcome) in self.reconciler.apply_snapshot(&snapshot, now) {
                            if field == FieldId::ThermostatMode && outcome == SnapshotOutcome::CaughtUp {
                                mode_confirmed = true;
                            }
                            if outcome == SnapshotOutcome::Expired {
                                self.emit(&Event::Notice(Notice {
                                    field,
                                    kind: NoticeKind::Unconfirmed,
                                    message: format!(
                                        "{} did not confirm the requested {}",
                                        device.name(),
                                        field.name()
                                    ),
                                }));
                            }
                        }
                        self.emit(&Event::Snapshot(snapshot));
                        if mode_confirmed {
                            self.follow_thermostat_mode(now);
                        }
                    }
                    Err(e) => {
                        warn!(device = device.name(), "poll failed: {e}");
                        if let Some(ref mut logger) = self.logger {
                            logger.log_poll_failure(device, &e.to_string());
                        }
                        self.set_online(device, false);
                    }
                }
                if self.repoll_requested.remove(&device) {
                    self.start_poll(device, PollReason::Confirm);
                }
            }
            Completion::Dispatch { id, field, result } => {
                let latest = self.commands_in_flight.get(&field) == Some(&id);
                if latest {
                    self.commands_in_flight.remove(&field);
                }
                match result {
                    Ok(ack) => {
                        if let Some(ref mut logger) = self.logger {
                            logger.log_ack(id, &ack);
                        }
                        debug!(field = %field, %id, latest, "command acknowledged");
                        if latest
                            && let Some((target, value)) = echoed_default(field, &ack)
                            && let Err(e) = self.reconciler.adopt_server_value(target, value, now)
                        {
                            warn!(field = %target, "ignoring echoed default: {e}");
                        }
                        self.confirm_polls
                            .schedule((field.device(), id), now + self.confirm_delay);
                    }
                    Err(e) => {
                        if let Some(ref mut logger) = self.logger {
                            logger.log_failure(id, &e.to_string());
                        }
                        if latest {
                            let notice = self.reconciler.on_dispatch_failure(field, &e.to_string());
                            self.emit(&Event::Notice(notice));
                        } else {
                            debug!(field = %field, %id, "superseded command failed: {e}");
                        }
                    }
                }
            }
            Completion::OffsetMap(result) => match result {
                Ok(map) => {
                    debug!(enabled = map.enabled, "loaded LG auto offset map");
                    self.offset_map = Some(map);
                }
                Err(e) => debug!("no LG auto offset map: {e}"),
            },
        }
    }

    fn fire_timers(&mut self) {
        let now = Instant::now();
        for intent in self.reconciler.fire_due(now) {
            self.dispatch(intent);
        }
        for ((device, _), _) in self.confirm_polls.take_due(now) {
            self.start_poll(device, PollReason::Confirm);
        }
    }

    /// Move the LG Auto offset to the value mapped to a newly confirmed
    /// thermostat mode. Only applies while the heat pump runs in LG Auto and
    /// nobody is adjusting the offset.
    fn follow_thermostat_mode(&mut self, now: Instant) {
        let Some(mode) = self
            .reconciler
            .field(FieldId::ThermostatMode)
            .and_then(|f| f.confirmed_value)
            .and_then(ThermostatMode::from_index)
        else {
            return;
        };
        let Some(offset) = self.offset_map.as_ref().and_then(|m| m.offset_for(mode)) else {
            return;
        };
        let lg_auto = self
            .reconciler
            .field(FieldId::LgMode)
            .and_then(|f| f.confirmed_value)
            == Some(LgMode::Auto.code() as f64);
        if !lg_auto
            || self.reconciler.state(FieldId::AutoOffset) != FieldState::Idle
            || self.reconciler.render_value(FieldId::AutoOffset) == Some(offset)
        {
            return;
        }

        match self.reconciler.record_intent(FieldId::AutoOffset, offset, false, now) {
            Ok(value) => {
                info!(mode = mode.as_api_str(), offset = value, "following thermostat mode");
                self.dispatch(Intent {
                    field: FieldId::AutoOffset,
                    value,
                });
            }
            Err(e) => warn!("mapped offset rejected: {e}"),
        }
    }

    fn set_online(&mut self, device: Device, online: bool) {
        let previous = self.online.insert(device, online);
        if previous != Some(online) {
            if online {
                info!(device = device.name(), "device reachable");
            } else {
                warn!(device = device.name(), "device unreachable");
            }
            self.emit(&Event::Connection { device, online });
        }
    }

    fn publish_renders(&mut self) {
        let mut events = Vec::new();
        for field in self.reconciler.fields() {
            let current = (field.render_value(), field.state());
            match self.rendered.insert(field.id, current) {
                None => {
                    if current.0.is_some() {
                        events.push(Event::Render {
                            field: field.id,
                            value: current.0,
                        });
                    }
                }
                Some((value, state)) => {
                    if value != current.0 {
                        events.push(Event::Render {
                            field: field.id,
                            value: current.0,
                        });
                    }
                    if state != current.1 {
                        events.push(Event::StateChanged {
                            field: field.id,
                            state: current.1,
                        });
                    }
                }
            }
        }
        for event in &events {
            self.emit(event);
        }
    }

    fn emit(&self, event: &Event) {
        for cb in &self.event_callbacks {
            cb(event);
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
