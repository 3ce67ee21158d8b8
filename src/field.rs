use tokio::time::Instant;

use crate::types::{FieldId, FieldState};
use crate::{Error, Result};

/// Rounding noise allowed when comparing values on a step grid.
const GRID_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tolerance {
    Within(f64),
    Exact,
}

impl Tolerance {
    pub fn caught_up(&self, polled: f64, pending: f64) -> bool {
        match self {
            Tolerance::Within(eps) => (polled - pending).abs() <= eps + GRID_EPSILON,
            Tolerance::Exact => polled == pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Continuous { min: f64, max: f64, step: f64 },
    Discrete { options: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub kind: FieldKind,
    pub tolerance: Tolerance,
}

impl FieldSpec {
    pub fn continuous(min: f64, max: f64, step: f64, tolerance: Tolerance) -> Self {
        Self {
            kind: FieldKind::Continuous { min, max, step },
            tolerance,
        }
    }

    pub fn discrete(options: impl Into<Vec<f64>>) -> Self {
        Self {
            kind: FieldKind::Discrete {
                options: options.into(),
            },
            tolerance: Tolerance::Exact,
        }
    }

    /// Clamp to range and round to the step grid (continuous), or check
    /// membership of the option set (discrete).
    pub fn normalize(&self, field: FieldId, value: f64) -> Result<f64> {
        if !value.is_finite() {
            return Err(Error::Validation {
                field,
                reason: format!("not a finite number: {value}"),
            });
        }
        match &self.kind {
            FieldKind::Continuous { min, max, step } => Ok(clamp_to_grid(value, *min, *max, *step)),
            FieldKind::Discrete { options } => {
                if options.contains(&value) {
                    Ok(value)
                } else {
                    Err(Error::Validation {
                        field,
                        reason: format!("{value} is not one of {options:?}"),
                    })
                }
            }
        }
    }
}

pub(crate) fn clamp_to_grid(value: f64, min: f64, max: f64, step: f64) -> f64 {
    let clamped = value.clamp(min, max);
    if step <= 0.0 {
        return clamped;
    }
    let steps = ((clamped - min) / step).round();
    let snapped = min + steps * step;
    // drop float noise such as 22.499999999999996
    let snapped = (snapped * 1e9).round() / 1e9;
    snapped.clamp(min, max)
}

/// Per-field reconciliation state, owned by the [`crate::Reconciler`].
#[derive(Debug, Clone)]
pub struct ControlField {
    pub id: FieldId,
    pub spec: FieldSpec,
    pub confirmed_value: Option<f64>,
    pub pending_value: Option<f64>,
    pub interaction_lock: bool,
    pub(crate) local_value: Option<f64>,
    pub(crate) pending_since: Option<Instant>,
    pub(crate) session: Option<DebounceSession>,
}

/// Accumulated target of a run of stepped adjustments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebounceSession {
    pub target: f64,
    pub adjustments: u32,
}

impl ControlField {
    pub fn new(id: FieldId, spec: FieldSpec) -> Self {
        Self {
            id,
            spec,
            confirmed_value: None,
            pending_value: None,
            interaction_lock: false,
            local_value: None,
            pending_since: None,
            session: None,
        }
    }

    pub fn state(&self) -> FieldState {
        let interacting = self.interaction_lock || self.session.is_some();
        match (interacting, self.pending_value.is_some()) {
            (false, false) => FieldState::Idle,
            (true, false) => FieldState::Interacting,
            (false, true) => FieldState::Pending,
            (true, true) => FieldState::InteractingPending,
        }
    }

    pub fn render_value(&self) -> Option<f64> {
        if let Some(session) = self.session {
            return Some(session.target);
        }
        if self.interaction_lock || self.pending_value.is_some() {
            return self
                .local_value
                .or(self.pending_value)
                .or(self.confirmed_value);
        }
        self.confirmed_value
    }

    pub fn debounce_session(&self) -> Option<DebounceSession> {
        self.session
    }

    pub(crate) fn clear_intent(&mut self) {
        self.pending_value = None;
        self.pending_since = None;
        if !self.interaction_lock {
            self.local_value = None;
        }
    }

    pub(crate) fn reset(&mut self) {
        self.pending_value = None;
        self.pending_since = None;
        self.interaction_lock = false;
        self.local_value = None;
        self.session = None;
    }
}
