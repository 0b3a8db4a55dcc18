use std::path::Path;
use std::sync::Once;

use ort::execution_providers;
use ort::session::builder::GraphOptimizationLevel;
pub use ort::session::Session;
use tracing::{info, warn};

use crate::error::{Error, Result};

static RUNTIME: Once = Once::new();

fn init_runtime() {
    RUNTIME.call_once(|| {
        let committed = ort::init()
            .with_execution_providers([execution_providers::XNNPACKExecutionProvider::default()
                .build()])
            .commit();
        if let Err(e) = committed {
            warn!("Falling back to default onnxruntime environment: {e}");
        }
    });
}

pub fn initialize_model(path: &Path, threads: usize) -> Result<Session> {
    init_runtime();

    let load = |e: ort::Error| Error::ModelLoad(format!("{}: {e}", path.display()));
    let model = Session::builder()
        .map_err(load)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(load)?
        .with_intra_threads(threads.max(1))
        .map_err(load)?
        .commit_from_file(path)
        .map_err(load)?;

    info!("Loaded model {}", path.display());

    Ok(model)
}

/// Name of the first input or output of a model, used to address tensors
/// without hardcoding export-specific names.
pub fn first_input_name(model: &Session) -> Result<String> {
    model
        .inputs
        .first()
        .map(|i| i.name.clone())
        .ok_or_else(|| Error::ModelLoad("model declares no inputs".into()))
}

pub fn first_output_name(model: &Session) -> Result<String> {
    model
        .outputs
        .first()
        .map(|o| o.name.clone())
        .ok_or_else(|| Error::ModelLoad("model declares no outputs".into()))
}
