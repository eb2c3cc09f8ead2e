mod bootstrap;
mod loop_runner;
mod paths;
mod report;
mod scenario;
mod world;

pub(crate) use bootstrap::build_app;
pub(crate) use loop_runner::run;
