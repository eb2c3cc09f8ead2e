use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use model::{load_object_registry, ContentLoadError, InstanceError, ModelError, ObjectRegistry};
use thiserror::Error;
use tracing::{error, info, warn};

use super::bootstrap::{AppWiring, SimConfig};
use super::report::{ActivityLog, SimSummary};
use super::scenario::{parse_scenario_json, Scenario};
use super::world::build_world;

#[derive(Debug, Error)]
pub(crate) enum SimError {
    #[error("failed to load object definitions: {0}")]
    Content(#[from] ContentLoadError),
    #[error("failed to read scenario {path}: {source}")]
    ReadScenario {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid scenario: {0}")]
    Scenario(String),
    #[error("failed to build model: {0}")]
    Model(#[from] ModelError),
    #[error("command {op} at {at_ms}ms for '{instance}' failed: {source}")]
    Command {
        op: &'static str,
        at_ms: u32,
        instance: String,
        #[source]
        source: InstanceError,
    },
}

pub(crate) fn run(app: AppWiring) -> ExitCode {
    let summary = match load_and_run(&app) {
        Ok(summary) => summary,
        Err(err) => {
            error!(error = %err, "sim_failed");
            return ExitCode::FAILURE;
        }
    };

    info!(
        updates = summary.updates,
        final_ticks = summary.final_ticks,
        actions_finished = summary.actions_finished,
        change_reports = summary.change_reports,
        instance_count = summary.instances.len(),
        "sim_finished"
    );
    match serde_json::to_string_pretty(&summary) {
        Ok(json) => println!("{json}"),
        Err(err) => warn!(error = %err, "summary_encode_failed"),
    }
    ExitCode::SUCCESS
}

fn load_and_run(app: &AppWiring) -> Result<SimSummary, SimError> {
    let objects = load_object_registry(&app.paths.objects_dir)?;
    info!(
        objects_dir = %app.paths.objects_dir.display(),
        object_count = objects.len(),
        "objects_loaded"
    );

    let raw = fs::read_to_string(&app.paths.scenario_path).map_err(|source| {
        SimError::ReadScenario {
            path: app.paths.scenario_path.clone(),
            source,
        }
    })?;
    let scenario = parse_scenario_json(&raw).map_err(SimError::Scenario)?;
    run_scenario(&app.config, &scenario, objects)
}

/// Runs `ticks + 1` updates. Each round advances the model clock, applies
/// the commands that have come due and then updates every instance.
pub(crate) fn run_scenario(
    config: &SimConfig,
    scenario: &Scenario,
    objects: ObjectRegistry,
) -> Result<SimSummary, SimError> {
    let tick_ms = scenario.tick_ms.unwrap_or(config.tick_ms);
    let ticks = scenario.ticks.unwrap_or(config.ticks);
    let log = Rc::new(ActivityLog::default());
    let mut world = build_world(scenario, objects, &log)?;
    info!(
        instance_count = world.model().instance_count(),
        command_count = scenario.commands.len(),
        tick_ms,
        ticks,
        "scenario_loaded"
    );

    let mut pending = scenario.commands.iter().peekable();
    let mut change_reports = 0u32;
    let mut updates = 0u32;
    for tick in 0..=ticks {
        let curticks = tick.saturating_mul(tick_ms);
        world.model().time_provider().advance_to(curticks);
        while let Some(command) = pending.next_if(|command| command.at_ms <= curticks) {
            world.apply_command(command)?;
        }

        let changes = world.model().update(curticks);
        updates = updates.saturating_add(1);
        change_reports = change_reports.saturating_add(changes.len() as u32);
        if config.report_interval_ticks > 0 && tick % config.report_interval_ticks == 0 {
            info!(
                tick,
                curticks,
                changed = changes.len(),
                instance_count = world.model().instance_count(),
                "sim_progress"
            );
        }
    }
    let remaining = pending.count();
    if remaining > 0 {
        warn!(remaining, "commands_after_last_tick");
    }

    Ok(SimSummary {
        updates,
        final_ticks: world.model().ticks(),
        actions_finished: log.actions_finished(),
        change_reports,
        instances: world.summarize_instances(),
    })
}
