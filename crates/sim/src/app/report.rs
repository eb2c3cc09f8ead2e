use std::cell::Cell;

use model::{Action, Instance, InstanceActionListener, InstanceChangeInfo, InstanceChangeListener};
use serde::Serialize;
use tracing::{debug, info};

use super::world::HeadlessVisual;

/// Listener attached to every scripted instance.
#[derive(Debug, Default)]
pub(crate) struct ActivityLog {
    actions_finished: Cell<u32>,
}

impl ActivityLog {
    pub(crate) fn actions_finished(&self) -> u32 {
        self.actions_finished.get()
    }
}

impl InstanceActionListener for ActivityLog {
    fn on_instance_action_finished(&self, instance: &Instance, action: &Action) {
        self.actions_finished
            .set(self.actions_finished.get().saturating_add(1));
        let position = instance.location().position();
        info!(
            instance = %instance.id(),
            action = %action.name,
            x = position.x,
            y = position.y,
            "action_finished"
        );
    }
}

impl InstanceChangeListener for ActivityLog {
    fn on_instance_changed(&self, instance: &Instance, info: InstanceChangeInfo) {
        debug!(instance = %instance.id(), changes = ?info, "instance_changed");
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct SimSummary {
    pub(crate) updates: u32,
    pub(crate) final_ticks: u32,
    pub(crate) actions_finished: u32,
    pub(crate) change_reports: u32,
    pub(crate) instances: Vec<InstanceSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct InstanceSummary {
    pub(crate) id: String,
    pub(crate) object: String,
    pub(crate) layer: String,
    pub(crate) x: f64,
    pub(crate) y: f64,
    pub(crate) action: Option<String>,
    pub(crate) say: Option<String>,
    pub(crate) sprite: Option<String>,
    pub(crate) active: bool,
}

impl InstanceSummary {
    pub(crate) fn capture(instance: &Instance, layer: &str) -> Self {
        let position = instance.location().position();
        Self {
            id: instance.id().to_string(),
            object: instance.object().def_name().to_string(),
            layer: layer.to_string(),
            x: position.x,
            y: position.y,
            action: instance.current_action().map(|action| action.name.clone()),
            say: instance.say_text().map(str::to_string),
            sprite: instance
                .visual::<HeadlessVisual>()
                .and_then(|visual| visual.sprite.clone()),
            active: instance.has_activity(),
        }
    }
}
