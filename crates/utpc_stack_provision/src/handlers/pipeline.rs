//! Glue between files on disk and the core planner: stack definition,
//! layered configuration, asset stamping.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use utpc_stack_core::{build_plan, DeployPlan, EnvConfig, LayeredConfig, PlanError, StackDefinition};

use crate::adapters::assets::{AssetError, AssetPackager};
use crate::adapters::dotenv::load_dotenv;
use crate::adapters::state_file::StateError;
use crate::handlers::apply::ApplyError;
use crate::handlers::destroy::DestroyError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to read stack definition '{path}': {source}")]
    ReadStack {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to load environment file '{path}': {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    Destroy(#[from] DestroyError),
}

pub fn load_stack(path: &Path) -> Result<StackDefinition, PipelineError> {
    let raw = fs::read_to_string(path).map_err(|source| PipelineError::ReadStack {
        path: path.to_path_buf(),
        source,
    })?;
    let definition = StackDefinition::from_json_str(&raw)?;
    debug!(path = %path.display(), stack = %definition.name, "stack definition loaded");
    Ok(definition)
}

/// Process environment first, then the env file when it exists. A missing
/// env file is not an error.
pub fn load_config(env_file: Option<&Path>) -> Result<LayeredConfig, PipelineError> {
    let config = LayeredConfig::new().with_layer(EnvConfig::snapshot());
    let Some(path) = env_file.filter(|path| path.exists()) else {
        return Ok(config);
    };
    let file = load_dotenv(path).map_err(|source| PipelineError::EnvFile {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), keys = file.len(), "env file loaded");
    Ok(config.with_layer(file))
}

/// Expands the definition into descriptors, stamps code digests when a
/// packager is given, and orders the result.
pub fn synthesize(
    definition: &StackDefinition,
    packager: Option<&AssetPackager>,
) -> Result<DeployPlan, PipelineError> {
    let mut descriptors = definition.descriptors()?;
    if let Some(packager) = packager {
        descriptors = packager.stamp(descriptors)?;
    }
    let plan = build_plan(descriptors)?;
    info!(stack = %definition.name, resources = plan.len(), "deploy plan synthesized");
    Ok(plan)
}
