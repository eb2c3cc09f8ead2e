use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use model::{LayerId, Location, Model, ObjectRegistry, Point, RenderableKind};
use tracing::{debug, warn};

use super::loop_runner::SimError;
use super::report::{ActivityLog, InstanceSummary};
use super::scenario::{CommandOp, PointSpec, Scenario, ScenarioCommand};

/// Stand-in for a renderer handle; the sim only remembers the sprite key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HeadlessVisual {
    pub(crate) sprite: Option<String>,
}

pub(crate) struct SimWorld {
    model: Model,
    layers_by_name: HashMap<String, LayerId>,
    layer_names: HashMap<LayerId, String>,
}

pub(crate) fn build_world(
    scenario: &Scenario,
    objects: ObjectRegistry,
    log: &Rc<ActivityLog>,
) -> Result<SimWorld, SimError> {
    let mut model = Model::new(objects);
    model.set_time_multiplier(scenario.model_time_multiplier);

    let mut layers_by_name = HashMap::new();
    let mut layer_names = HashMap::new();
    for map_spec in &scenario.maps {
        let map = model.create_map(map_spec.name.as_str());
        if let Some(map) = model.map(map) {
            map.set_time_multiplier(map_spec.time_multiplier);
        }
        for layer_name in &map_spec.layers {
            let layer = model.create_layer(map, layer_name.as_str())?;
            layers_by_name.insert(layer_name.clone(), layer);
            layer_names.insert(layer, layer_name.clone());
        }
    }

    let scripted = scenario
        .commands
        .iter()
        .map(|command| command.instance.as_str())
        .collect::<HashSet<_>>();
    for spec in &scenario.instances {
        let layer = layers_by_name
            .get(&spec.layer)
            .copied()
            .ok_or_else(|| SimError::Scenario(format!("unknown layer '{}'", spec.layer)))?;
        let instance = model.create_instance(
            layer,
            &spec.object,
            Point::new(spec.x, spec.y),
            spec.id.as_str(),
        )?;

        let mut instance = instance.borrow_mut();
        let sprite = match instance.object().renderable() {
            RenderableKind::Sprite(key) => Some(key.clone()),
            RenderableKind::Placeholder => None,
        };
        instance.set_visual(HeadlessVisual { sprite });
        for (field, value) in &spec.attributes {
            instance.set(field.as_str(), value.as_str());
        }
        if let Some(multiplier) = spec.time_multiplier {
            instance.set_time_multiplier(multiplier);
        }
        if scripted.contains(spec.id.as_str()) {
            instance.add_action_listener(log.clone());
            instance.add_change_listener(log.clone());
        }
    }

    Ok(SimWorld {
        model,
        layers_by_name,
        layer_names,
    })
}

impl SimWorld {
    pub(crate) fn model(&self) -> &Model {
        &self.model
    }

    /// Commands addressed to instances that were already removed are skipped.
    pub(crate) fn apply_command(&mut self, command: &ScenarioCommand) -> Result<(), SimError> {
        let op = command.op.name();
        let Some(instance) = self.model.find_instance(&command.instance) else {
            warn!(
                instance = %command.instance,
                op,
                at_ms = command.at_ms,
                "command_target_missing"
            );
            return Ok(());
        };
        let current = instance.borrow().location();

        let result = match &command.op {
            CommandOp::Move { action, to, speed } => {
                let target = self.resolve_point(to, current);
                instance.borrow_mut().move_to(action, target, *speed)
            }
            CommandOp::Act {
                action,
                toward,
                repeating,
            } => {
                let direction = self.resolve_point(toward, current);
                instance.borrow_mut().act(action, direction, *repeating)
            }
            CommandOp::Follow {
                action,
                leader,
                speed,
            } => match self.model.find_instance(leader) {
                Some(leader) => instance.borrow_mut().follow(action, &leader, *speed),
                None => {
                    warn!(instance = %command.instance, leader = %leader, "follow_leader_missing");
                    Ok(())
                }
            },
            CommandOp::Say { text, duration_ms } => {
                instance.borrow_mut().say(text, *duration_ms);
                Ok(())
            }
            CommandOp::SetLocation { to } => {
                let location = self.resolve_point(to, current);
                instance.borrow_mut().set_location(location);
                Ok(())
            }
            CommandOp::SetFacing { to } => {
                let location = self.resolve_point(to, current);
                instance.borrow_mut().set_facing_location(location);
                Ok(())
            }
            CommandOp::SetTimeMultiplier { multiplier } => {
                instance.borrow_mut().set_time_multiplier(*multiplier);
                Ok(())
            }
            CommandOp::Remove => {
                self.model.remove_instance(&instance);
                Ok(())
            }
        };

        result.map_err(|source| SimError::Command {
            op,
            at_ms: command.at_ms,
            instance: command.instance.clone(),
            source,
        })?;
        debug!(instance = %command.instance, op, at_ms = command.at_ms, "command_applied");
        Ok(())
    }

    pub(crate) fn summarize_instances(&self) -> Vec<InstanceSummary> {
        self.model
            .instances()
            .filter_map(|instance| {
                let instance = instance.try_borrow().ok()?;
                let layer = self.layer_name(instance.location().layer());
                Some(InstanceSummary::capture(&instance, layer))
            })
            .collect()
    }

    fn layer_name(&self, layer: LayerId) -> &str {
        self.layer_names
            .get(&layer)
            .map_or("<unknown>", String::as_str)
    }

    fn resolve_point(&self, spec: &PointSpec, current: Location) -> Location {
        let layer = spec
            .layer
            .as_ref()
            .and_then(|name| self.layers_by_name.get(name).copied())
            .unwrap_or(current.layer());
        Location::new(layer, Point::new(spec.x, spec.y))
    }
}
