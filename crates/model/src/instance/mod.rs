//! Placed, simulated entities.
//!
//! An [`Instance`] keeps its authoritative state (location, facing, object)
//! inline and everything related to activity in a lazily allocated cache, so
//! inert instances such as floor tiles pay nothing for the action machinery.

mod action;
mod change;
mod listener;

use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::location::Location;
use crate::object::{Action, ActionId, Object};
use crate::time::{TimeHierarchy, TimeProvider};

use action::{resolve_leader, step_toward, ActionInfo, ActionOutcome, LeaderState, Motion};
use change::{ActivityCache, SayInfo};

pub use change::InstanceChangeInfo;
pub use listener::{InstanceActionListener, InstanceChangeListener};

pub type InstanceRef = Rc<RefCell<Instance>>;

const ID_FIELD: &str = "id";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstanceError {
    #[error("object '{object}' has no action named '{action}'")]
    UnknownAction { object: String, action: String },
}

#[derive(Debug)]
pub struct Instance {
    identifier: String,
    object: Rc<Object>,
    location: Location,
    facing_location: Option<Box<Location>>,
    visual: Option<Box<dyn Any>>,
    activity: Option<Box<ActivityCache>>,
    time: Rc<dyn TimeHierarchy>,
    attributes: BTreeMap<String, String>,
    removed: bool,
}

impl Instance {
    /// Instances are created by their container; tests may build them
    /// directly against a substitute time hierarchy.
    pub(crate) fn new(
        object: Rc<Object>,
        location: Location,
        identifier: impl Into<String>,
        time: Rc<dyn TimeHierarchy>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            object,
            location,
            facing_location: None,
            visual: None,
            activity: None,
            time,
            attributes: BTreeMap::new(),
            removed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.identifier
    }

    pub fn set_id(&mut self, identifier: impl Into<String>) {
        self.identifier = identifier.into();
    }

    /// True once the container has destroyed this instance. Followers treat
    /// a removed leader as gone even while other references keep it alive.
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub(crate) fn mark_removed(&mut self) {
        self.removed = true;
    }

    pub fn object(&self) -> &Rc<Object> {
        &self.object
    }

    pub fn location(&self) -> Location {
        self.location
    }

    /// Mutating through this reference bypasses change tracking; call
    /// [`Instance::refresh`] afterwards.
    pub fn location_mut(&mut self) -> &mut Location {
        &mut self.location
    }

    pub fn set_location(&mut self, location: Location) {
        self.activity_mut();
        self.location = location;
        self.bind_time_provider();
    }

    /// Movement destination while moving, the current location otherwise.
    pub fn target_location(&self) -> Location {
        self.action_info()
            .and_then(ActionInfo::target)
            .copied()
            .unwrap_or(self.location)
    }

    pub fn set_facing_location(&mut self, location: Location) {
        self.activity_mut();
        self.facing_location = Some(Box::new(location));
    }

    /// Explicit facing if one was ever set, the movement heading otherwise.
    pub fn facing_location(&self) -> Location {
        match &self.facing_location {
            Some(facing) => **facing,
            None => self.target_location(),
        }
    }

    /// Materializes the facing location; it stays materialized afterwards.
    pub fn facing_location_mut(&mut self) -> &mut Location {
        let heading = self.facing_location();
        &mut **self
            .facing_location
            .get_or_insert_with(|| Box::new(heading))
    }

    pub fn has_activity(&self) -> bool {
        self.activity.is_some()
    }

    /// Changes detected by the most recent `update`.
    pub fn change_info(&self) -> InstanceChangeInfo {
        self.activity
            .as_deref()
            .map_or(InstanceChangeInfo::empty(), ActivityCache::change_info)
    }

    /// Registering the same listener twice yields two notifications per event.
    pub fn add_action_listener(&mut self, listener: Rc<dyn InstanceActionListener>) {
        self.activity_mut().action_listeners.push(listener);
    }

    pub fn remove_action_listener(&mut self, listener: &Rc<dyn InstanceActionListener>) {
        let Some(cache) = self.activity.as_deref_mut() else {
            return;
        };
        if let Some(index) = cache
            .action_listeners
            .iter()
            .position(|registered| Rc::ptr_eq(registered, listener))
        {
            cache.action_listeners.remove(index);
        }
    }

    pub fn add_change_listener(&mut self, listener: Rc<dyn InstanceChangeListener>) {
        self.activity_mut().change_listeners.push(listener);
    }

    pub fn remove_change_listener(&mut self, listener: &Rc<dyn InstanceChangeListener>) {
        let Some(cache) = self.activity.as_deref_mut() else {
            return;
        };
        if let Some(index) = cache
            .change_listeners
            .iter()
            .position(|registered| Rc::ptr_eq(registered, listener))
        {
            cache.change_listeners.remove(index);
        }
    }

    pub fn current_action(&self) -> Option<&Action> {
        self.action_info()
            .and_then(|info| self.object.action(info.action))
    }

    /// Layer units per second while moving, `0.0` otherwise.
    pub fn movement_speed(&self) -> f64 {
        self.action_info().map_or(0.0, ActionInfo::speed)
    }

    /// Scaled milliseconds spent in the current action, `-1` when idle.
    pub fn action_runtime(&self) -> i32 {
        self.action_info()
            .map_or(-1, |info| info.runtime_ms.floor() as i32)
    }

    /// Performs `action_name` while moving to `target`. A non-positive speed,
    /// or an action that cannot move, keeps the instance in place while the
    /// action still runs. Any action in progress is replaced silently.
    pub fn move_to(
        &mut self,
        action_name: &str,
        target: Location,
        speed: f64,
    ) -> Result<(), InstanceError> {
        let action = self.resolve_action(action_name)?;
        let speed = if !(speed.is_finite() && speed > 0.0) {
            warn!(
                instance = %self.identifier,
                action = action_name,
                speed,
                "move_speed_invalid"
            );
            0.0
        } else if !self.object.action(action).is_some_and(|def| def.moves) {
            warn!(
                instance = %self.identifier,
                action = action_name,
                "move_with_stationary_action"
            );
            0.0
        } else {
            speed
        };
        self.bind_action(action_name, action, Motion::Target { target, speed }, false);
        Ok(())
    }

    /// Performs `action_name` in place, facing `direction`.
    pub fn act(
        &mut self,
        action_name: &str,
        direction: Location,
        repeating: bool,
    ) -> Result<(), InstanceError> {
        let action = self.resolve_action(action_name)?;
        self.set_facing_location(direction);
        self.bind_action(action_name, action, Motion::Stationary, repeating);
        Ok(())
    }

    /// Performs `action_name` while chasing `leader`. The leader is re-read on
    /// every update; once it is gone the instance goes idle.
    pub fn follow(
        &mut self,
        action_name: &str,
        leader: &InstanceRef,
        speed: f64,
    ) -> Result<(), InstanceError> {
        let action = self.resolve_action(action_name)?;
        let speed = if speed.is_finite() && speed > 0.0 {
            speed
        } else {
            warn!(
                instance = %self.identifier,
                action = action_name,
                speed,
                "follow_speed_invalid"
            );
            0.0
        };
        let target = match resolve_leader(&Rc::downgrade(leader), self.location.layer()) {
            LeaderState::At(location) => location,
            LeaderState::Busy | LeaderState::Lost => self.location,
        };
        let motion = Motion::Follow {
            leader: Rc::downgrade(leader),
            target,
            speed,
        };
        self.bind_action(action_name, action, motion, false);
        Ok(())
    }

    /// Shows `text` for `duration_ms` milliseconds, or until cleared when the
    /// duration is zero. An empty string clears the text.
    pub fn say(&mut self, text: &str, duration_ms: u32) {
        let start_ticks = self.current_ticks();
        let cache = self.activity_mut();
        cache.say = if text.is_empty() {
            None
        } else {
            Some(SayInfo {
                text: text.to_string(),
                duration_ms,
                start_ticks,
            })
        };
    }

    pub fn say_text(&self) -> Option<&str> {
        self.activity.as_deref().and_then(ActivityCache::say_text)
    }

    /// Advances the bound action, diffs tracked attributes against the
    /// previous round and notifies listeners. Call once per tick.
    pub fn update(&mut self, curticks: u32) -> InstanceChangeInfo {
        if self.activity.is_none() {
            return InstanceChangeInfo::empty();
        }

        let completed = self.process_action(curticks);
        self.process_say(curticks);

        let location = self.location;
        let facing_location = self.facing_location();
        let speed = self.movement_speed();
        let Some(cache) = self.activity.as_deref_mut() else {
            return InstanceChangeInfo::empty();
        };
        let info = cache.refresh(location, facing_location, speed);

        let action_listeners = match completed {
            Some(_) => cache.action_listeners.clone(),
            None => Vec::new(),
        };
        let change_listeners = if info.is_empty() {
            Vec::new()
        } else {
            cache.change_listeners.clone()
        };

        if let Some(action_id) = completed {
            let object = Rc::clone(&self.object);
            if let Some(action) = object.action(action_id) {
                for listener in &action_listeners {
                    listener.on_instance_action_finished(self, action);
                }
            }
        }
        for listener in &change_listeners {
            listener.on_instance_changed(self, info);
        }

        info
    }

    /// Transfers ownership of a renderer-side representation.
    pub fn set_visual<V: Any>(&mut self, visual: V) {
        self.visual = Some(Box::new(visual));
    }

    pub fn visual<T: Any>(&self) -> Option<&T> {
        self.visual.as_deref()?.downcast_ref::<T>()
    }

    pub fn visual_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.visual.as_deref_mut()?.downcast_mut::<T>()
    }

    pub fn take_visual(&mut self) -> Option<Box<dyn Any>> {
        self.visual.take()
    }

    pub fn set_time_multiplier(&mut self, multiplier: f32) {
        self.activity_mut().time_provider.set_multiplier(multiplier);
    }

    pub fn time_multiplier(&self) -> f32 {
        self.activity
            .as_deref()
            .map_or(1.0, |cache| cache.time_provider.multiplier())
    }

    /// Instance, map and model multipliers combined, read fresh on each call.
    pub fn total_time_multiplier(&self) -> f32 {
        match self.activity.as_deref() {
            Some(cache) => cache.time_provider.total_multiplier(),
            None => self
                .time
                .provider_for(&self.location)
                .map_or(1.0, |provider| provider.total_multiplier()),
        }
    }

    /// Re-derives location-dependent state after the location was changed
    /// without going through `set_location`.
    pub fn refresh(&mut self) {
        self.activity_mut();
        self.bind_time_provider();
    }

    /// Field names: the identifier plus instance and object attributes.
    pub fn list_fields(&self) -> Vec<String> {
        let mut fields = BTreeSet::new();
        fields.insert(ID_FIELD);
        fields.extend(self.attributes.keys().map(String::as_str));
        fields.extend(self.object.attribute_names());
        fields.into_iter().map(str::to_string).collect()
    }

    /// Instance attributes shadow object attributes.
    pub fn get(&self, field: &str) -> Option<&str> {
        if field == ID_FIELD {
            return Some(self.identifier.as_str());
        }
        self.attributes
            .get(field)
            .map(String::as_str)
            .or_else(|| self.object.attribute(field))
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        let field = field.into();
        if field == ID_FIELD {
            self.identifier = value.into();
            return;
        }
        self.attributes.insert(field, value.into());
    }

    fn action_info(&self) -> Option<&ActionInfo> {
        self.activity.as_deref()?.action.as_ref()
    }

    fn activity_mut(&mut self) -> &mut ActivityCache {
        let cache = match self.activity.take() {
            Some(cache) => cache,
            None => {
                debug!(instance = %self.identifier, "instance_activity_allocated");
                let master = self.time.provider_for(&self.location);
                Box::new(ActivityCache::new(
                    self.location,
                    self.facing_location(),
                    TimeProvider::with_master(master),
                ))
            }
        };
        self.activity.insert(cache)
    }

    fn bind_time_provider(&mut self) {
        let master = self.time.provider_for(&self.location);
        if let Some(cache) = self.activity.as_deref_mut() {
            cache.time_provider.rebind(master);
        }
    }

    fn current_ticks(&self) -> u32 {
        match self.activity.as_deref() {
            Some(cache) => cache.time_provider.ticks(),
            None => self
                .time
                .provider_for(&self.location)
                .map_or(0, |provider| provider.ticks()),
        }
    }

    fn resolve_action(&self, action_name: &str) -> Result<ActionId, InstanceError> {
        self.object
            .action_id_by_name(action_name)
            .ok_or_else(|| InstanceError::UnknownAction {
                object: self.object.def_name().to_string(),
                action: action_name.to_string(),
            })
    }

    fn bind_action(&mut self, action_name: &str, action: ActionId, motion: Motion, repeating: bool) {
        let start_ticks = self.current_ticks();
        let cache = self.activity_mut();
        cache.action = Some(ActionInfo::new(action, motion, repeating, start_ticks));
        debug!(
            instance = %self.identifier,
            action = action_name,
            repeating,
            start_ticks,
            "action_bound"
        );
    }

    /// Returns the action that completed a cycle during this call, if any.
    fn process_action(&mut self, curticks: u32) -> Option<ActionId> {
        let total_multiplier = self.total_time_multiplier();
        let mut info = self.activity.as_deref_mut()?.action.take()?;
        let elapsed_ms = info.advance_clock(curticks, total_multiplier);

        let outcome = match info.motion {
            Motion::Stationary => {
                let duration_ms = self
                    .object
                    .action(info.action)
                    .map_or(0, |action| action.duration_ms);
                info.check_duration(duration_ms)
            }
            Motion::Target { target, speed } => {
                if self.advance_position(target, speed, elapsed_ms) {
                    ActionOutcome::Finished
                } else {
                    ActionOutcome::Running
                }
            }
            Motion::Follow { .. } => self.advance_follow(&mut info, elapsed_ms),
        };

        match outcome {
            ActionOutcome::Running => {
                self.restore_action(info);
                None
            }
            ActionOutcome::Repeated => {
                let action = info.action;
                self.restore_action(info);
                Some(action)
            }
            ActionOutcome::Finished => {
                debug!(
                    instance = %self.identifier,
                    runtime_ms = info.runtime_ms,
                    "action_finished"
                );
                Some(info.action)
            }
            ActionOutcome::LeaderLost => {
                debug!(instance = %self.identifier, "follow_leader_lost");
                None
            }
        }
    }

    fn restore_action(&mut self, info: ActionInfo) {
        if let Some(cache) = self.activity.as_deref_mut() {
            cache.action = Some(info);
        }
    }

    fn advance_follow(&mut self, info: &mut ActionInfo, elapsed_ms: f64) -> ActionOutcome {
        let Motion::Follow {
            leader,
            target,
            speed,
        } = &mut info.motion
        else {
            return ActionOutcome::Running;
        };
        match resolve_leader(leader, self.location.layer()) {
            LeaderState::At(location) => *target = location,
            LeaderState::Busy => {}
            LeaderState::Lost => return ActionOutcome::LeaderLost,
        }
        let (target, speed) = (*target, *speed);
        self.advance_position(target, speed, elapsed_ms);
        ActionOutcome::Running
    }

    /// Returns true once the instance stands on `target`.
    fn advance_position(&mut self, target: Location, speed: f64, elapsed_ms: f64) -> bool {
        if let Some(facing) = self.facing_location.as_deref_mut() {
            *facing = target;
        }

        let max_step = speed * elapsed_ms / 1000.0;
        let (position, arrived) =
            step_toward(self.location.position(), target.position(), max_step);
        if !arrived {
            self.location.set_position(position);
            return false;
        }

        let layer_changed = self.location.layer() != target.layer();
        self.location = target;
        if layer_changed {
            self.bind_time_provider();
        }
        true
    }

    fn process_say(&mut self, curticks: u32) {
        if let Some(cache) = self.activity.as_deref_mut() {
            if cache.say.as_ref().is_some_and(|say| say.expired(curticks)) {
                cache.say = None;
            }
        }
    }
}
