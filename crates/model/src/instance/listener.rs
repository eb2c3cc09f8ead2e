use std::fmt;

use crate::object::Action;

use super::{Instance, InstanceChangeInfo};

/// Notified when a non-repeating action finishes or a repeating action
/// crosses a duration boundary.
pub trait InstanceActionListener {
    fn on_instance_action_finished(&self, instance: &Instance, action: &Action);
}

/// Notified from `Instance::update` whenever the change info is non-empty.
pub trait InstanceChangeListener {
    fn on_instance_changed(&self, instance: &Instance, info: InstanceChangeInfo);
}

impl fmt::Debug for dyn InstanceActionListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InstanceActionListener")
    }
}

impl fmt::Debug for dyn InstanceChangeListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InstanceChangeListener")
    }
}
