//! Explicit model registry.
//!
//! Built once per process or calibration run and passed by dependency
//! injection; no global state. Registration order is meaningful: it breaks
//! information-criterion ties during model selection.

use std::sync::Arc;

use adaptest_core::error::CatError;

use crate::birnbaum::Birnbaum;
use crate::onepl::OneParamLogistic;
use crate::partial_credit::PartialCredit;
use crate::traits::PsychometricModel;

/// Name-keyed registry of installed psychometric models.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: Vec<Arc<dyn PsychometricModel>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in model installed, 1PL first.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OneParamLogistic));
        registry.register(Arc::new(Birnbaum::two_param()));
        registry.register(Arc::new(Birnbaum::three_param()));
        registry.register(Arc::new(PartialCredit));
        registry
    }

    /// Register a model under its own name. Re-registering a name replaces
    /// the earlier entry but keeps its position.
    pub fn register(&mut self, model: Arc<dyn PsychometricModel>) {
        if let Some(existing) = self
            .models
            .iter_mut()
            .find(|m| m.name() == model.name())
        {
            *existing = model;
        } else {
            self.models.push(model);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PsychometricModel>> {
        self.models.iter().find(|m| m.name() == name).cloned()
    }

    /// Like [`get`](Self::get), but an unknown name is a configuration
    /// fault.
    pub fn require(&self, name: &str) -> Result<Arc<dyn PsychometricModel>, CatError> {
        self.get(name)
            .ok_or_else(|| CatError::Configuration(format!("unknown model name: {name}")))
    }

    /// Installed models in registration order.
    pub fn enabled(&self) -> impl Iterator<Item = &Arc<dyn PsychometricModel>> {
        self.models.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Keep only the named models, preserving registration order. Unknown
    /// names are a configuration fault.
    pub fn restricted_to(&self, names: &[String]) -> Result<Self, CatError> {
        for name in names {
            self.require(name)?;
        }
        Ok(Self {
            models: self
                .models
                .iter()
                .filter(|m| names.iter().any(|n| n == m.name()))
                .cloned()
                .collect(),
        })
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.names())
            .finish()
    }
}
