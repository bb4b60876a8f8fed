//! Subcommand handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use shopgraph_core::graph::describe;
use shopgraph_core::plan::FetchPlan;
use shopgraph_core::storage::{SledBackend, StorageConfig};
use shopgraph_core::{shop, Projector, ProjectorConfig, RequestContext};
use shopgraph_proto::ProjectionRequest;
use thiserror::Error;
use tracing::info;

use crate::formatter::Formatter;

/// Errors surfaced by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] shopgraph_core::Error),

    #[error(transparent)]
    Schema(#[from] shopgraph_core::SchemaError),

    #[error(transparent)]
    Storage(#[from] shopgraph_core::StorageError),

    #[error(transparent)]
    Plan(#[from] shopgraph_core::PlanError),

    #[error("invalid request: {0}")]
    Request(#[from] shopgraph_proto::Error),

    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("unknown preset '{name}', available: {available}")]
    UnknownPreset { name: String, available: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a projection request comes from.
#[derive(Debug, Clone)]
pub enum RequestSource {
    Preset(String),
    File(PathBuf),
}

/// Planner and executor overrides from the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub max_collections: Option<usize>,
    pub timeout_ms: Option<u64>,
}

/// Load a projection request.
pub fn load_request(source: &RequestSource) -> Result<ProjectionRequest, CliError> {
    match source {
        RequestSource::Preset(name) => {
            shop::preset(name).ok_or_else(|| CliError::UnknownPreset {
                name: name.clone(),
                available: shop::PRESETS.join(", "),
            })
        }
        RequestSource::File(path) => {
            let json = std::fs::read_to_string(path)?;
            Ok(shopgraph_proto::request_from_json(&json)?)
        }
    }
}

/// Build the projector configuration from a file and overrides.
pub fn load_config(overrides: &Overrides) -> Result<ProjectorConfig, CliError> {
    let mut config = match &overrides.config {
        Some(path) => ProjectorConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => ProjectorConfig::default(),
    };

    if let Some(batch_size) = overrides.batch_size {
        config.policy = config.policy.with_batch_size(batch_size);
    }
    if let Some(max) = overrides.max_collections {
        config.policy = config.policy.with_max_collection_steps(max);
    }
    if let Some(ms) = overrides.timeout_ms {
        config.executor = config
            .executor
            .with_default_timeout(Duration::from_millis(ms));
    }
    Ok(config)
}

/// Open the sled store, or a seeded temporary one.
fn open_store(data_path: Option<&Path>) -> Result<SledBackend, CliError> {
    match data_path {
        Some(path) => Ok(SledBackend::open(&StorageConfig::new(path))?),
        None => {
            let backend = SledBackend::open(&StorageConfig::temporary())?;
            shop::seed(&*shop::schema()?, &backend)?;
            Ok(backend)
        }
    }
}

/// Seed a store with the sample shop data.
pub fn seed(data_path: &Path) -> Result<String, CliError> {
    let schema = shop::schema()?;
    let backend = SledBackend::open(&StorageConfig::new(data_path))?;
    shop::seed(&schema, &backend)?;

    let mut counts = Vec::new();
    for name in schema.entity_names() {
        counts.push(format!("{}={}", name, backend.count(name)?));
    }
    info!(path = %data_path.display(), "store seeded");
    Ok(format!("seeded {}: {}", data_path.display(), counts.join(" ")))
}

/// Print the entity graph.
pub fn schema(formatter: &dyn Formatter) -> Result<String, CliError> {
    let schema = shop::schema()?;
    Ok(formatter.format_schema(&schema))
}

/// Select a plan without executing it.
pub fn plan(source: &RequestSource, overrides: &Overrides) -> Result<FetchPlan, CliError> {
    let request = load_request(source)?;
    let config = load_config(overrides)?;
    let graph = describe(shop::schema()?, &request.root)?;

    let selector = shopgraph_core::FetchPlanSelector::new(config.policy);
    Ok(selector.select(&graph, &request)?)
}

/// Run a projection and format the DTOs.
pub async fn project(
    data_path: Option<&Path>,
    source: &RequestSource,
    overrides: &Overrides,
    formatter: &dyn Formatter,
    stats: bool,
) -> Result<String, CliError> {
    let request = load_request(source)?;
    let config = load_config(overrides)?;
    let graph = describe(shop::schema()?, &request.root)?;

    let backend = open_store(data_path)?;
    let projector = Projector::new(Arc::new(backend), config);
    let dtos = projector
        .project(&graph, &request, &RequestContext::new())
        .await?;

    let mut output = formatter.format_dtos(&dtos);
    if stats {
        output.push_str("\n\n");
        output.push_str(&formatter.format_metrics(&projector.metrics().snapshot()));
    }
    Ok(output)
}
