use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use super::paths::{resolve_sim_paths, SimPaths, StartupError};

const TICK_MS_ENV_VAR: &str = "INSTANCE_SIM_TICK_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SimConfig {
    pub(crate) tick_ms: u32,
    pub(crate) ticks: u32,
    pub(crate) report_interval_ticks: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            ticks: 100,
            report_interval_ticks: 10,
        }
    }
}

pub(crate) struct AppWiring {
    pub(crate) config: SimConfig,
    pub(crate) paths: SimPaths,
}

pub(crate) fn build_app() -> Result<AppWiring, StartupError> {
    init_tracing();
    info!("=== Instance Sim Startup ===");

    let paths = resolve_sim_paths()?;
    let mut config = SimConfig::default();
    if let Some(tick_ms) = parse_tick_ms(std::env::var(TICK_MS_ENV_VAR).ok().as_deref()) {
        config.tick_ms = tick_ms;
    }
    info!(
        root = %paths.root.display(),
        scenario = %paths.scenario_path.display(),
        tick_ms = config.tick_ms,
        "sim_configured"
    );

    Ok(AppWiring { config, paths })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

fn parse_tick_ms(raw: Option<&str>) -> Option<u32> {
    let raw = raw?.trim();
    match raw.parse::<u32>() {
        Ok(tick_ms) if tick_ms > 0 => Some(tick_ms),
        _ => {
            warn!(var = TICK_MS_ENV_VAR, value = raw, "tick_ms_env_ignored");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_ms_env_accepts_positive_integers_only() {
        assert_eq!(parse_tick_ms(None), None);
        assert_eq!(parse_tick_ms(Some(" 250 ")), Some(250));
        assert_eq!(parse_tick_ms(Some("0")), None);
        assert_eq!(parse_tick_ms(Some("fast")), None);
    }
}
