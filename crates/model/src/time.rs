use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use tracing::warn;

use crate::location::Location;

/// Scaled clock node. Multipliers compose multiplicatively up the master
/// chain (instance -> map -> model); the root owns the tick counter.
#[derive(Debug)]
pub struct TimeProvider {
    master: Option<Rc<TimeProvider>>,
    multiplier: Cell<f32>,
    ticks: Cell<u32>,
}

impl Default for TimeProvider {
    fn default() -> Self {
        Self::root()
    }
}

impl TimeProvider {
    pub fn root() -> Self {
        Self {
            master: None,
            multiplier: Cell::new(1.0),
            ticks: Cell::new(0),
        }
    }

    pub fn with_master(master: Option<Rc<TimeProvider>>) -> Self {
        Self {
            master,
            multiplier: Cell::new(1.0),
            ticks: Cell::new(0),
        }
    }

    pub fn master(&self) -> Option<&Rc<TimeProvider>> {
        self.master.as_ref()
    }

    pub fn rebind(&mut self, master: Option<Rc<TimeProvider>>) {
        self.master = master;
    }

    /// Negative and non-finite values are rejected and leave the multiplier
    /// unchanged.
    pub fn set_multiplier(&self, multiplier: f32) {
        if !multiplier.is_finite() || multiplier < 0.0 {
            warn!(multiplier, "time_multiplier_rejected");
            return;
        }
        self.multiplier.set(multiplier);
    }

    pub fn multiplier(&self) -> f32 {
        self.multiplier.get()
    }

    /// Walks the chain on every call; parents can change independently.
    pub fn total_multiplier(&self) -> f32 {
        let master = self
            .master
            .as_ref()
            .map_or(1.0, |master| master.total_multiplier());
        self.multiplier.get() * master
    }

    /// Current tick count of the root clock.
    pub fn ticks(&self) -> u32 {
        match &self.master {
            Some(master) => master.ticks(),
            None => self.ticks.get(),
        }
    }

    pub fn advance_to(&self, ticks: u32) {
        match &self.master {
            Some(master) => master.advance_to(ticks),
            None => self.ticks.set(ticks),
        }
    }
}

/// Resolves the clock governing a location. The container implements this;
/// tests substitute their own.
pub trait TimeHierarchy {
    fn provider_for(&self, location: &Location) -> Option<Rc<TimeProvider>>;
}

impl fmt::Debug for dyn TimeHierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TimeHierarchy")
    }
}

/// Hierarchy that hands the same provider to every location.
#[derive(Debug, Clone)]
pub struct FixedTimeHierarchy {
    provider: Rc<TimeProvider>,
}

impl FixedTimeHierarchy {
    pub fn new(provider: Rc<TimeProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Rc<TimeProvider> {
        &self.provider
    }
}

impl TimeHierarchy for FixedTimeHierarchy {
    fn provider_for(&self, _location: &Location) -> Option<Rc<TimeProvider>> {
        Some(Rc::clone(&self.provider))
    }
}
