use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::field::{ControlField, DebounceSession, FieldKind, FieldSpec};
use crate::timer::{TimerId, Timers};
use crate::types::{FieldId, FieldState, Notice, NoticeKind, Snapshot};
use crate::{Error, Result};

pub const DEFAULT_GRACE: Duration = Duration::from_millis(100);
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);
pub const DEFAULT_PENDING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcilerTiming {
    pub grace: Duration,
    pub debounce: Duration,
    pub pending_timeout: Duration,
}

impl Default for ReconcilerTiming {
    fn default() -> Self {
        Self {
            grace: DEFAULT_GRACE,
            debounce: DEFAULT_DEBOUNCE,
            pending_timeout: DEFAULT_PENDING_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    Grace(FieldId),
    Debounce(FieldId),
}

/// A normalised value ready to be sent to the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intent {
    pub field: FieldId,
    pub value: f64,
}

/// What a poll value did to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// No intent or gesture outstanding; the polled value is displayed.
    Rendered,
    /// The device reached the pending value.
    CaughtUp,
    /// The device has not reached the pending value yet.
    Applying,
    /// A gesture or debounce session owns the display.
    Held,
    /// The pending value was never confirmed and has been dropped.
    Expired,
}

pub struct Reconciler {
    fields: BTreeMap<FieldId, ControlField>,
    timers: Timers<TimerKey>,
    timing: ReconcilerTiming,
}

impl Reconciler {
    pub fn new(
        specs: impl IntoIterator<Item = (FieldId, FieldSpec)>,
        timing: ReconcilerTiming,
    ) -> Self {
        let fields = specs
            .into_iter()
            .map(|(id, spec)| (id, ControlField::new(id, spec)))
            .collect();
        Self {
            fields,
            timers: Timers::new(),
            timing,
        }
    }

    pub fn timing(&self) -> ReconcilerTiming {
        self.timing
    }

    pub fn field(&self, id: FieldId) -> Option<&ControlField> {
        self.fields.get(&id)
    }

    pub fn fields(&self) -> impl Iterator<Item = &ControlField> {
        self.fields.values()
    }

    pub fn render_value(&self, id: FieldId) -> Option<f64> {
        self.fields.get(&id).and_then(|f| f.render_value())
    }

    pub fn state(&self, id: FieldId) -> FieldState {
        self.fields.get(&id).map(|f| f.state()).unwrap_or_default()
    }

    /// Record a user-requested value. `lock` marks slider-style gestures that
    /// hold the display until the gesture ends.
    pub fn record_intent(
        &mut self,
        id: FieldId,
        value: f64,
        lock: bool,
        now: Instant,
    ) -> Result<f64> {
        let field = field_mut(&mut self.fields, id)?;
        let normalized = field.spec.normalize(id, value)?;

        field.pending_value = Some(normalized);
        field.pending_since = Some(now);
        field.local_value = Some(normalized);
        field.session = None;
        if lock {
            field.interaction_lock = true;
            self.timers.cancel(TimerKey::Grace(id));
        }
        self.timers.cancel(TimerKey::Debounce(id));

        debug!(field = %id, requested = value, pending = normalized, lock, "intent recorded");
        Ok(normalized)
    }

    /// Adopt a value chosen by the device service (e.g. the default flow
    /// temperature echoed by a mode switch) as pending intent.
    pub fn adopt_server_value(&mut self, id: FieldId, value: f64, now: Instant) -> Result<f64> {
        let field = field_mut(&mut self.fields, id)?;
        let normalized = field.spec.normalize(id, value)?;
        field.pending_value = Some(normalized);
        field.pending_since = Some(now);
        if !field.interaction_lock && field.session.is_none() {
            field.local_value = Some(normalized);
        }
        debug!(field = %id, pending = normalized, "adopted server value");
        Ok(normalized)
    }

    /// Display a value under the interaction lock without recording intent.
    pub fn preview(&mut self, id: FieldId, value: f64) -> Result<f64> {
        let field = field_mut(&mut self.fields, id)?;
        let normalized = field.spec.normalize(id, value)?;
        field.local_value = Some(normalized);
        field.interaction_lock = true;
        self.timers.cancel(TimerKey::Grace(id));
        Ok(normalized)
    }

    pub fn begin_interaction(&mut self, id: FieldId) -> Result<()> {
        let field = field_mut(&mut self.fields, id)?;
        if field.local_value.is_none() {
            field.local_value = field.render_value();
        }
        field.interaction_lock = true;
        self.timers.cancel(TimerKey::Grace(id));
        trace!(field = %id, "interaction started");
        Ok(())
    }

    /// Schedule the lock release after the grace delay. The pending value
    /// is left untouched.
    pub fn release_interaction_lock(&mut self, id: FieldId, now: Instant) -> Result<Option<TimerId>> {
        let field = field_mut(&mut self.fields, id)?;
        if !field.interaction_lock {
            return Ok(None);
        }
        let timer = self
            .timers
            .schedule(TimerKey::Grace(id), now + self.timing.grace);
        trace!(field = %id, "interaction lock release scheduled");
        Ok(Some(timer))
    }

    pub fn on_poll_snapshot(
        &mut self,
        id: FieldId,
        polled: f64,
        now: Instant,
    ) -> Result<SnapshotOutcome> {
        let pending_timeout = self.timing.pending_timeout;
        let field = field_mut(&mut self.fields, id)?;
        field.confirmed_value = Some(polled);
        // a slider grabbed before the first poll holds the first value seen
        if field.interaction_lock && field.local_value.is_none() {
            field.local_value = Some(polled);
        }

        let outcome = match field.pending_value {
            Some(pending) if field.spec.tolerance.caught_up(polled, pending) => {
                field.clear_intent();
                debug!(field = %id, value = polled, "device confirmed pending value");
                SnapshotOutcome::CaughtUp
            }
            Some(pending) => {
                if expire_stale(field, now, pending_timeout) {
                    SnapshotOutcome::Expired
                } else {
                    trace!(field = %id, pending, polled, "device still applying");
                    SnapshotOutcome::Applying
                }
            }
            None if field.interaction_lock || field.session.is_some() => SnapshotOutcome::Held,
            None => SnapshotOutcome::Rendered,
        };
        Ok(outcome)
    }

    /// Feed every reconciled value of a snapshot. Fields that are not
    /// configured are skipped. Fields of the polled device that the
    /// snapshot does not carry still have their pending value expired.
    pub fn apply_snapshot(
        &mut self,
        snapshot: &Snapshot,
        now: Instant,
    ) -> Vec<(FieldId, SnapshotOutcome)> {
        let values = snapshot.field_values();
        let mut outcomes: Vec<(FieldId, SnapshotOutcome)> = values
            .iter()
            .filter_map(|&(id, value)| {
                self.on_poll_snapshot(id, value, now)
                    .ok()
                    .map(|outcome| (id, outcome))
            })
            .collect();

        let device = snapshot.device();
        let pending_timeout = self.timing.pending_timeout;
        for (id, field) in self.fields.iter_mut() {
            if id.device() != device || values.iter().any(|(f, _)| f == id) {
                continue;
            }
            if field.pending_value.is_some() && expire_stale(field, now, pending_timeout) {
                outcomes.push((*id, SnapshotOutcome::Expired));
            }
        }
        outcomes
    }

    /// Roll the field back to ground truth. Always leaves the field with no
    /// pending value and no interaction lock.
    pub fn on_dispatch_failure(&mut self, id: FieldId, reason: &str) -> Notice {
        self.timers.cancel(TimerKey::Grace(id));
        self.timers.cancel(TimerKey::Debounce(id));
        if let Some(field) = self.fields.get_mut(&id) {
            field.reset();
        }
        warn!(field = %id, reason, "command failed, reverting to device state");
        Notice {
            field: id,
            kind: NoticeKind::DispatchFailed,
            message: format!("Failed to change {}: {reason}", id.name()),
        }
    }

    /// Stepped adjustment. Renders immediately; the accumulated value is only
    /// handed out by [`Reconciler::fire_due`] once the window passes quietly.
    pub fn adjust(&mut self, id: FieldId, delta: f64, now: Instant) -> Result<f64> {
        let field = field_mut(&mut self.fields, id)?;
        let (min, max, step) = match field.spec.kind {
            FieldKind::Continuous { min, max, step } => (min, max, step),
            FieldKind::Discrete { .. } => {
                return Err(Error::Validation {
                    field: id,
                    reason: "discrete controls cannot be stepped".to_string(),
                });
            }
        };
        if !delta.is_finite() {
            return Err(Error::Validation {
                field: id,
                reason: format!("not a finite step: {delta}"),
            });
        }

        let (seed, adjustments) = match field.session {
            Some(session) => (session.target, session.adjustments),
            None => {
                let seed = field
                    .pending_value
                    .or(field.confirmed_value)
                    .ok_or(Error::NoBaseline(id))?;
                (seed, 0)
            }
        };

        let target = crate::field::clamp_to_grid(seed + delta, min, max, step);
        field.session = Some(DebounceSession {
            target,
            adjustments: adjustments + 1,
        });
        self.timers
            .schedule(TimerKey::Debounce(id), now + self.timing.debounce);

        trace!(field = %id, delta, target, "adjustment coalesced");
        Ok(target)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Run expired timers. Returns the intents whose debounce window closed.
    pub fn fire_due(&mut self, now: Instant) -> Vec<Intent> {
        let mut intents = Vec::new();
        for (key, _) in self.timers.take_due(now) {
            match key {
                TimerKey::Grace(id) => {
                    if let Some(field) = self.fields.get_mut(&id) {
                        field.interaction_lock = false;
                        if field.pending_value.is_none() {
                            field.local_value = None;
                        }
                        trace!(field = %id, "interaction lock released");
                    }
                }
                TimerKey::Debounce(id) => {
                    let session = self.fields.get_mut(&id).and_then(|f| f.session.take());
                    let Some(session) = session else { continue };
                    match self.record_intent(id, session.target, false, now) {
                        Ok(value) => {
                            debug!(field = %id, value, adjustments = session.adjustments, "debounce window closed");
                            intents.push(Intent { field: id, value });
                        }
                        Err(e) => warn!(field = %id, "dropping coalesced adjustment: {e}"),
                    }
                }
            }
        }
        intents
    }
}

/// Drop a pending value older than `timeout`. Returns whether it expired.
fn expire_stale(field: &mut ControlField, now: Instant, timeout: Duration) -> bool {
    let expired = field
        .pending_since
        .is_some_and(|since| now.duration_since(since) >= timeout);
    if expired {
        warn!(
            field = %field.id,
            pending = ?field.pending_value,
            confirmed = ?field.confirmed_value,
            "device never confirmed pending value, dropping it"
        );
        field.clear_intent();
    }
    expired
}

fn field_mut(fields: &mut BTreeMap<FieldId, ControlField>, id: FieldId) -> Result<&mut ControlField> {
    fields.get_mut(&id).ok_or_else(|| Error::Validation {
        field: id,
        reason: "field is not configured".to_string(),
    })
}
