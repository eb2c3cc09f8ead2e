use std::rc::Rc;

use bitflags::bitflags;

use crate::location::Location;
use crate::object::ActionId;
use crate::time::TimeProvider;

use super::action::ActionInfo;
use super::listener::{InstanceActionListener, InstanceChangeListener};

bitflags! {
    /// Attributes found to differ from the previous snapshot during the most
    /// recent update. Flags are independent and combine freely.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InstanceChangeInfo: u32 {
        const LOCATION = 0x0001;
        const FACING_LOCATION = 0x0002;
        const SPEED = 0x0004;
        const ACTION = 0x0008;
        const TIME_MULTIPLIER = 0x0010;
        const SAY_TEXT = 0x0020;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SayInfo {
    pub(crate) text: String,
    pub(crate) duration_ms: u32,
    pub(crate) start_ticks: u32,
}

impl SayInfo {
    /// A zero duration never expires.
    pub(crate) fn expired(&self, curticks: u32) -> bool {
        self.duration_ms > 0 && curticks >= self.start_ticks.saturating_add(self.duration_ms)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Snapshot {
    location: Location,
    facing_location: Location,
    // Identity only; resolved through the object when needed.
    action: Option<ActionId>,
    speed: f64,
    time_multiplier: f32,
    say_text: Option<String>,
}

/// State kept only for instances that have shown any activity.
#[derive(Debug)]
pub(crate) struct ActivityCache {
    snapshot: Snapshot,
    change_info: InstanceChangeInfo,
    pub(crate) action_listeners: Vec<Rc<dyn InstanceActionListener>>,
    pub(crate) change_listeners: Vec<Rc<dyn InstanceChangeListener>>,
    pub(crate) action: Option<ActionInfo>,
    pub(crate) say: Option<SayInfo>,
    pub(crate) time_provider: TimeProvider,
}

impl ActivityCache {
    pub(crate) fn new(
        location: Location,
        facing_location: Location,
        time_provider: TimeProvider,
    ) -> Self {
        Self {
            snapshot: Snapshot {
                location,
                facing_location,
                action: None,
                speed: 0.0,
                time_multiplier: time_provider.multiplier(),
                say_text: None,
            },
            change_info: InstanceChangeInfo::empty(),
            action_listeners: Vec::new(),
            change_listeners: Vec::new(),
            action: None,
            say: None,
            time_provider,
        }
    }

    pub(crate) fn change_info(&self) -> InstanceChangeInfo {
        self.change_info
    }

    pub(crate) fn say_text(&self) -> Option<&str> {
        self.say.as_ref().map(|say| say.text.as_str())
    }

    /// Diffs the current state against the snapshot, stores the result as the
    /// change info for this round and replaces the snapshot.
    pub(crate) fn refresh(
        &mut self,
        location: Location,
        facing_location: Location,
        speed: f64,
    ) -> InstanceChangeInfo {
        let mut info = InstanceChangeInfo::empty();

        if self.snapshot.location != location {
            info |= InstanceChangeInfo::LOCATION;
            self.snapshot.location = location;
        }
        if self.snapshot.facing_location != facing_location {
            info |= InstanceChangeInfo::FACING_LOCATION;
            self.snapshot.facing_location = facing_location;
        }
        if self.snapshot.speed != speed {
            info |= InstanceChangeInfo::SPEED;
            self.snapshot.speed = speed;
        }

        let action = self.action.as_ref().map(|info| info.action);
        if self.snapshot.action != action {
            info |= InstanceChangeInfo::ACTION;
            self.snapshot.action = action;
        }

        let time_multiplier = self.time_provider.multiplier();
        if self.snapshot.time_multiplier != time_multiplier {
            info |= InstanceChangeInfo::TIME_MULTIPLIER;
            self.snapshot.time_multiplier = time_multiplier;
        }

        let say_text = self.say.as_ref().map(|say| say.text.as_str());
        if self.snapshot.say_text.as_deref() != say_text {
            info |= InstanceChangeInfo::SAY_TEXT;
            self.snapshot.say_text = say_text.map(str::to_string);
        }

        self.change_info = info;
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{LayerId, Point};

    fn at(x: f64) -> Location {
        Location::new(LayerId(0), Point::new(x, 0.0))
    }

    #[test]
    fn refresh_reports_each_differing_field_once() {
        let mut cache = ActivityCache::new(at(0.0), at(0.0), TimeProvider::root());
        assert!(cache.refresh(at(0.0), at(0.0), 0.0).is_empty());

        cache.say = Some(SayInfo {
            text: "hello".to_string(),
            duration_ms: 0,
            start_ticks: 0,
        });
        cache.time_provider.set_multiplier(2.0);
        let info = cache.refresh(at(1.0), at(0.0), 0.0);
        assert_eq!(
            info,
            InstanceChangeInfo::LOCATION
                | InstanceChangeInfo::SAY_TEXT
                | InstanceChangeInfo::TIME_MULTIPLIER
        );
        assert_eq!(cache.change_info(), info);

        assert!(cache.refresh(at(1.0), at(0.0), 0.0).is_empty());
        assert!(cache.change_info().is_empty());
    }

    #[test]
    fn say_without_duration_never_expires() {
        let say = SayInfo {
            text: "hi".to_string(),
            duration_ms: 0,
            start_ticks: 100,
        };
        assert!(!say.expired(u32::MAX));

        let timed = SayInfo {
            duration_ms: 50,
            ..say
        };
        assert!(!timed.expired(149));
        assert!(timed.expired(150));
    }
}
