use std::cell::RefCell;
use std::rc::Weak;

use crate::location::{LayerId, Location, Point};
use crate::object::ActionId;

use super::Instance;

#[derive(Debug, Clone)]
pub(crate) enum Motion {
    Stationary,
    Target {
        target: Location,
        speed: f64,
    },
    Follow {
        leader: Weak<RefCell<Instance>>,
        target: Location,
        speed: f64,
    },
}

/// Runtime state of the bound action.
#[derive(Debug, Clone)]
pub(crate) struct ActionInfo {
    pub(crate) action: ActionId,
    pub(crate) motion: Motion,
    pub(crate) repeating: bool,
    pub(crate) runtime_ms: f64,
    prev_ticks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ActionOutcome {
    Running,
    Repeated,
    Finished,
    LeaderLost,
}

impl ActionInfo {
    pub(crate) fn new(action: ActionId, motion: Motion, repeating: bool, start_ticks: u32) -> Self {
        Self {
            action,
            motion,
            repeating,
            runtime_ms: 0.0,
            prev_ticks: start_ticks,
        }
    }

    /// Accumulates scaled time since the previous call and returns it.
    pub(crate) fn advance_clock(&mut self, curticks: u32, total_multiplier: f32) -> f64 {
        let real_ms = curticks.saturating_sub(self.prev_ticks);
        self.prev_ticks = curticks;
        let scaled_ms = f64::from(real_ms) * f64::from(total_multiplier);
        self.runtime_ms += scaled_ms;
        scaled_ms
    }

    pub(crate) fn target(&self) -> Option<&Location> {
        match &self.motion {
            Motion::Stationary => None,
            Motion::Target { target, .. } | Motion::Follow { target, .. } => Some(target),
        }
    }

    pub(crate) fn speed(&self) -> f64 {
        match &self.motion {
            Motion::Stationary => 0.0,
            Motion::Target { speed, .. } | Motion::Follow { speed, .. } => *speed,
        }
    }

    /// Timed completion for actions without a movement target.
    pub(crate) fn check_duration(&mut self, duration_ms: u32) -> ActionOutcome {
        let duration = f64::from(duration_ms);
        if self.runtime_ms < duration {
            return ActionOutcome::Running;
        }
        if !self.repeating {
            return ActionOutcome::Finished;
        }
        // Carry the overshoot into the next cycle.
        self.runtime_ms = if duration_ms > 0 {
            self.runtime_ms % duration
        } else {
            0.0
        };
        ActionOutcome::Repeated
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum LeaderState {
    At(Location),
    /// Mutably borrowed elsewhere; its location cannot be read this round.
    Busy,
    /// Dropped, removed from its container or on another layer.
    Lost,
}

pub(crate) fn resolve_leader(leader: &Weak<RefCell<Instance>>, layer: LayerId) -> LeaderState {
    let Some(leader) = leader.upgrade() else {
        return LeaderState::Lost;
    };
    let Ok(leader) = leader.try_borrow() else {
        return LeaderState::Busy;
    };
    if leader.is_removed() {
        return LeaderState::Lost;
    }
    let location = leader.location();
    if location.layer() == layer {
        LeaderState::At(location)
    } else {
        LeaderState::Lost
    }
}

/// Moves at most `max_step` toward `target`, never past it.
pub(crate) fn step_toward(current: Point, target: Point, max_step: f64) -> (Point, bool) {
    let dx = target.x - current.x;
    let dy = target.y - current.y;
    let distance = (dx * dx + dy * dy).sqrt();
    if distance == 0.0 || max_step >= distance {
        return (target, true);
    }
    if max_step <= 0.0 || !max_step.is_finite() {
        return (current, false);
    }

    let scale = max_step / distance;
    (
        Point {
            x: current.x + dx * scale,
            y: current.y + dy * scale,
        },
        false,
    )
}
