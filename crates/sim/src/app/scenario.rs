use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Display;

use serde::Deserialize;

pub(crate) type ScenarioResult<T> = Result<T, String>;

fn one() -> f32 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Scenario {
    #[serde(default)]
    pub(crate) tick_ms: Option<u32>,
    #[serde(default)]
    pub(crate) ticks: Option<u32>,
    #[serde(default = "one")]
    pub(crate) model_time_multiplier: f32,
    pub(crate) maps: Vec<ScenarioMap>,
    #[serde(default)]
    pub(crate) instances: Vec<ScenarioInstance>,
    #[serde(default)]
    pub(crate) commands: Vec<ScenarioCommand>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ScenarioMap {
    pub(crate) name: String,
    #[serde(default = "one")]
    pub(crate) time_multiplier: f32,
    pub(crate) layers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ScenarioInstance {
    pub(crate) id: String,
    pub(crate) object: String,
    pub(crate) layer: String,
    pub(crate) x: f64,
    pub(crate) y: f64,
    #[serde(default)]
    pub(crate) time_multiplier: Option<f32>,
    #[serde(default)]
    pub(crate) attributes: BTreeMap<String, String>,
}

/// A point; without a layer it stays on the instance's current layer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct PointSpec {
    pub(crate) x: f64,
    pub(crate) y: f64,
    #[serde(default)]
    pub(crate) layer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ScenarioCommand {
    pub(crate) at_ms: u32,
    pub(crate) instance: String,
    pub(crate) op: CommandOp,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum CommandOp {
    Move {
        action: String,
        to: PointSpec,
        speed: f64,
    },
    Act {
        action: String,
        toward: PointSpec,
        #[serde(default)]
        repeating: bool,
    },
    Follow {
        action: String,
        leader: String,
        speed: f64,
    },
    Say {
        text: String,
        #[serde(default)]
        duration_ms: u32,
    },
    SetLocation {
        to: PointSpec,
    },
    SetFacing {
        to: PointSpec,
    },
    SetTimeMultiplier {
        multiplier: f32,
    },
    Remove,
}

impl CommandOp {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::Act { .. } => "act",
            Self::Follow { .. } => "follow",
            Self::Say { .. } => "say",
            Self::SetLocation { .. } => "set_location",
            Self::SetFacing { .. } => "set_facing",
            Self::SetTimeMultiplier { .. } => "set_time_multiplier",
            Self::Remove => "remove",
        }
    }
}

/// Parses and validates a scenario. Commands come back ordered by `at_ms`,
/// keeping file order for equal times.
pub(crate) fn parse_scenario_json(raw: &str) -> ScenarioResult<Scenario> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    let mut scenario = match serde_path_to_error::deserialize::<_, Scenario>(&mut deserializer) {
        Ok(scenario) => scenario,
        Err(error) => {
            let path = error.path().to_string();
            let source = error.into_inner();
            return if path.is_empty() || path == "." {
                Err(format!("parse scenario json: {source}"))
            } else {
                Err(format!("parse scenario json at {path}: {source}"))
            };
        }
    };
    validate_scenario(&scenario)?;
    scenario.commands.sort_by_key(|command| command.at_ms);
    Ok(scenario)
}

fn validation_err(path: &str, message: impl Into<String>) -> String {
    format!("validation failed at {path}: {}", message.into())
}

fn expected_actual(path: &str, expected: impl Display, actual: impl Display) -> String {
    validation_err(path, format!("expected {expected}, got {actual}"))
}

fn check_multiplier(path: &str, multiplier: f32) -> ScenarioResult<()> {
    if !multiplier.is_finite() || multiplier < 0.0 {
        return Err(expected_actual(path, "finite number >= 0", multiplier));
    }
    Ok(())
}

fn check_coordinate(path: &str, value: f64) -> ScenarioResult<()> {
    if !value.is_finite() {
        return Err(expected_actual(path, "finite number", value));
    }
    Ok(())
}

fn check_point(path: &str, point: &PointSpec, layers: &HashSet<&str>) -> ScenarioResult<()> {
    check_coordinate(&format!("{path}.x"), point.x)?;
    check_coordinate(&format!("{path}.y"), point.y)?;
    if let Some(layer) = &point.layer {
        if !layers.contains(layer.as_str()) {
            return Err(validation_err(
                &format!("{path}.layer"),
                format!("unknown layer '{layer}'"),
            ));
        }
    }
    Ok(())
}

fn validate_scenario(scenario: &Scenario) -> ScenarioResult<()> {
    if scenario.tick_ms == Some(0) {
        return Err(expected_actual("tick_ms", "value > 0", 0));
    }
    check_multiplier("model_time_multiplier", scenario.model_time_multiplier)?;
    if scenario.maps.is_empty() {
        return Err(validation_err("maps", "at least one map is required"));
    }

    let mut map_names = HashSet::new();
    let mut layers = HashSet::<&str>::new();
    for (index, map) in scenario.maps.iter().enumerate() {
        if map.name.trim().is_empty() {
            return Err(validation_err(&format!("maps[{index}].name"), "must not be empty"));
        }
        if !map_names.insert(map.name.as_str()) {
            return Err(validation_err(
                &format!("maps[{index}].name"),
                format!("duplicate map '{}'", map.name),
            ));
        }
        check_multiplier(&format!("maps[{index}].time_multiplier"), map.time_multiplier)?;
        for (layer_index, layer) in map.layers.iter().enumerate() {
            let path = format!("maps[{index}].layers[{layer_index}]");
            if layer.trim().is_empty() {
                return Err(validation_err(&path, "must not be empty"));
            }
            // Layers are addressed by name alone, so names are global.
            if !layers.insert(layer.as_str()) {
                return Err(validation_err(&path, format!("duplicate layer '{layer}'")));
            }
        }
    }

    let mut instance_indices = HashMap::<&str, usize>::new();
    for (index, instance) in scenario.instances.iter().enumerate() {
        let path = format!("instances[{index}]");
        if instance.id.trim().is_empty() {
            return Err(validation_err(&format!("{path}.id"), "must not be empty"));
        }
        if let Some(first_index) = instance_indices.insert(instance.id.as_str(), index) {
            return Err(validation_err(
                &format!("{path}.id"),
                format!(
                    "duplicate id '{}' (first seen at instances[{first_index}].id)",
                    instance.id
                ),
            ));
        }
        if !layers.contains(instance.layer.as_str()) {
            return Err(validation_err(
                &format!("{path}.layer"),
                format!("unknown layer '{}'", instance.layer),
            ));
        }
        check_coordinate(&format!("{path}.x"), instance.x)?;
        check_coordinate(&format!("{path}.y"), instance.y)?;
        if let Some(multiplier) = instance.time_multiplier {
            check_multiplier(&format!("{path}.time_multiplier"), multiplier)?;
        }
        if instance.attributes.contains_key("id") {
            return Err(validation_err(
                &format!("{path}.attributes.id"),
                "'id' is reserved for the instance identifier",
            ));
        }
    }

    for (index, command) in scenario.commands.iter().enumerate() {
        let path = format!("commands[{index}]");
        if !instance_indices.contains_key(command.instance.as_str()) {
            return Err(validation_err(
                &format!("{path}.instance"),
                format!("unknown instance '{}'", command.instance),
            ));
        }
        let op_path = format!("{path}.op.{}", command.op.name());
        match &command.op {
            CommandOp::Move { to, speed, .. } => {
                check_point(&format!("{op_path}.to"), to, &layers)?;
                check_coordinate(&format!("{op_path}.speed"), *speed)?;
            }
            CommandOp::Act { toward, .. } => {
                check_point(&format!("{op_path}.toward"), toward, &layers)?;
            }
            CommandOp::Follow { leader, speed, .. } => {
                if !instance_indices.contains_key(leader.as_str()) {
                    return Err(validation_err(
                        &format!("{op_path}.leader"),
                        format!("unknown instance '{leader}'"),
                    ));
                }
                if *leader == command.instance {
                    return Err(validation_err(
                        &format!("{op_path}.leader"),
                        "an instance cannot follow itself",
                    ));
                }
                check_coordinate(&format!("{op_path}.speed"), *speed)?;
            }
            CommandOp::SetLocation { to } | CommandOp::SetFacing { to } => {
                check_point(&format!("{op_path}.to"), to, &layers)?;
            }
            CommandOp::SetTimeMultiplier { multiplier } => {
                check_multiplier(&format!("{op_path}.multiplier"), *multiplier)?;
            }
            CommandOp::Say { .. } | CommandOp::Remove => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "maps": [{ "name": "town", "layers": ["ground"] }],
        "instances": [
            { "id": "hero", "object": "proto.villager", "layer": "ground", "x": 0, "y": 0 },
            { "id": "dog", "object": "proto.villager", "layer": "ground", "x": 1, "y": 1 }
        ],
        "commands": [
            { "at_ms": 500, "instance": "hero", "op": { "say": { "text": "later" } } },
            { "at_ms": 0, "instance": "hero", "op": { "move": { "action": "walk", "to": { "x": 5, "y": 0 }, "speed": 2 } } },
            { "at_ms": 0, "instance": "dog", "op": { "follow": { "action": "walk", "leader": "hero", "speed": 1 } } },
            { "at_ms": 900, "instance": "dog", "op": "remove" }
        ]
    }"#;

    #[test]
    fn minimal_scenario_parses_with_defaults() {
        let scenario = parse_scenario_json(MINIMAL).expect("parse");
        assert_eq!(scenario.tick_ms, None);
        assert_eq!(scenario.model_time_multiplier, 1.0);
        assert_eq!(scenario.maps[0].time_multiplier, 1.0);
        assert_eq!(scenario.instances.len(), 2);

        let order = scenario
            .commands
            .iter()
            .map(|command| (command.at_ms, command.op.name()))
            .collect::<Vec<_>>();
        assert_eq!(
            order,
            vec![(0, "move"), (0, "follow"), (500, "say"), (900, "remove")]
        );
    }

    #[test]
    fn parse_error_reports_json_path() {
        let err = parse_scenario_json(
            r#"{ "maps": [{ "name": "town", "layers": ["ground"] }],
                 "instances": [{ "id": "a", "object": "o", "layer": "ground", "x": "left", "y": 0 }] }"#,
        )
        .expect_err("err");
        assert!(err.starts_with("parse scenario json at instances[0].x"), "{err}");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = parse_scenario_json(r#"{ "maps": [], "weather": "rain" }"#).expect_err("err");
        assert!(err.contains("weather"), "{err}");
    }

    #[test]
    fn unknown_layer_fails_validation() {
        let err = parse_scenario_json(
            r#"{ "maps": [{ "name": "town", "layers": ["ground"] }],
                 "instances": [{ "id": "a", "object": "o", "layer": "roof", "x": 0, "y": 0 }] }"#,
        )
        .expect_err("err");
        assert_eq!(
            err,
            "validation failed at instances[0].layer: unknown layer 'roof'"
        );
    }

    #[test]
    fn duplicate_ids_and_layers_fail_validation() {
        let err = parse_scenario_json(
            r#"{ "maps": [{ "name": "a", "layers": ["ground"] }, { "name": "b", "layers": ["ground"] }] }"#,
        )
        .expect_err("layers");
        assert!(err.starts_with("validation failed at maps[1].layers[0]"), "{err}");

        let err = parse_scenario_json(
            r#"{ "maps": [{ "name": "a", "layers": ["ground"] }],
                 "instances": [
                    { "id": "x", "object": "o", "layer": "ground", "x": 0, "y": 0 },
                    { "id": "x", "object": "o", "layer": "ground", "x": 0, "y": 0 }
                 ] }"#,
        )
        .expect_err("ids");
        assert!(err.contains("first seen at instances[0].id"), "{err}");
    }

    #[test]
    fn negative_multiplier_fails_validation() {
        let err = parse_scenario_json(
            r#"{ "model_time_multiplier": -1, "maps": [{ "name": "a", "layers": ["g"] }] }"#,
        )
        .expect_err("err");
        assert_eq!(
            err,
            "validation failed at model_time_multiplier: expected finite number >= 0, got -1"
        );
    }

    #[test]
    fn commands_must_reference_known_instances() {
        let err = parse_scenario_json(
            r#"{ "maps": [{ "name": "a", "layers": ["g"] }],
                 "instances": [{ "id": "x", "object": "o", "layer": "g", "x": 0, "y": 0 }],
                 "commands": [{ "at_ms": 0, "instance": "x", "op": { "follow": { "action": "walk", "leader": "x", "speed": 1 } } }] }"#,
        )
        .expect_err("self follow");
        assert_eq!(
            err,
            "validation failed at commands[0].op.follow.leader: an instance cannot follow itself"
        );

        let err = parse_scenario_json(
            r#"{ "maps": [{ "name": "a", "layers": ["g"] }],
                 "commands": [{ "at_ms": 0, "instance": "ghost", "op": "remove" }] }"#,
        )
        .expect_err("unknown");
        assert!(err.contains("unknown instance 'ghost'"), "{err}");
    }
}
