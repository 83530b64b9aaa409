use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::task;

use crate::{
    config::{AppConfig, ModelBackend},
    error::{ModelError, ServiceError},
    model::{LanguageModel, MockModel},
};

/// Holds the process-wide model once it has finished loading.
#[derive(Default)]
pub struct ModelRegistry {
    model: OnceCell<Arc<dyn LanguageModel>>,
}

impl ModelRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_model(model: Arc<dyn LanguageModel>) -> Self {
        let registry = Self::empty();
        registry.install(model);
        registry
    }

    /// Installs `model` unless one is already present.
    pub fn install(&self, model: Arc<dyn LanguageModel>) -> bool {
        self.model.set(model).is_ok()
    }

    pub fn is_ready(&self) -> bool {
        self.model.get().is_some()
    }

    pub fn get(&self) -> Result<Arc<dyn LanguageModel>, ServiceError> {
        self.model.get().cloned().ok_or(ServiceError::ModelLoading)
    }

    /// Loads the configured backend on a blocking thread and installs it.
    /// Failures are logged and leave the registry empty.
    pub async fn load_in_background(self: Arc<Self>, config: Arc<AppConfig>) {
        let loaded = task::spawn_blocking(move || load_backend(&config)).await;
        match loaded {
            Ok(Ok(model)) => {
                let spec = *model.spec();
                self.install(model);
                tracing::info!(?spec, "model ready");
            }
            Ok(Err(err)) => tracing::error!(error = %err, "model failed to load"),
            Err(err) => tracing::error!(error = %err, "model loader task panicked"),
        }
    }
}

pub fn load_backend(config: &AppConfig) -> Result<Arc<dyn LanguageModel>, ModelError> {
    match config.backend {
        ModelBackend::Mock => {
            tracing::warn!("serving the deterministic mock model");
            Ok(Arc::new(MockModel::small()))
        }
        ModelBackend::Torch => load_torch(config),
    }
}

#[cfg(feature = "tch-backend")]
fn load_torch(config: &AppConfig) -> Result<Arc<dyn LanguageModel>, ModelError> {
    let model = crate::model::tch_backend::TorchModel::load(
        &config.checkpoint_path,
        &config.model_config_path,
        &config.device,
    )?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "tch-backend"))]
fn load_torch(_config: &AppConfig) -> Result<Arc<dyn LanguageModel>, ModelError> {
    Err(ModelError::Config(
        "built without the `tch-backend` feature; set MODEL_BACKEND=mock or rebuild".into(),
    ))
}
