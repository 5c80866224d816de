//! Detector provisioning
//!
//! Turns a generic model description (identifier, algorithm, untyped
//! parameter map) into a configured detector. Binding is all-or-nothing:
//! a missing or malformed map yields no detector, never a partially
//! configured one.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::anomaly::{
    AnomalyDetector, CusumDetector, DetectorKind, EwmaDetector, PewmaDetector,
};
use crate::error::{ParamsError, ProvisionError};
use crate::observability::{DetectorMetrics, StructuredLogger};

/// Generic description of a detector model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResource {
    pub uuid: Uuid,
    #[serde(rename = "type")]
    pub detector_type: DetectorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

impl ModelResource {
    pub fn new(uuid: Uuid, detector_type: DetectorKind, params: Map<String, Value>) -> Self {
        Self {
            uuid,
            detector_type,
            params: Some(params),
        }
    }
}

/// Bind the untyped parameter map of a model to a typed parameter set
pub fn extract_params<T: DeserializeOwned>(
    resource: Option<&ModelResource>,
) -> Result<T, ParamsError> {
    let params = resource
        .and_then(|r| r.params.as_ref())
        .ok_or(ParamsError::Missing)?;
    Ok(serde_json::from_value(Value::Object(params.clone()))?)
}

/// Construct the detector described by a model
pub fn build_detector(resource: &ModelResource) -> Result<Box<dyn AnomalyDetector>, ProvisionError> {
    let id = resource.uuid;
    let detector: Box<dyn AnomalyDetector> = match resource.detector_type {
        DetectorKind::Ewma => Box::new(EwmaDetector::new(id, extract_params(Some(resource))?)?),
        DetectorKind::Pewma => Box::new(PewmaDetector::new(id, extract_params(Some(resource))?)?),
        DetectorKind::Cusum => Box::new(CusumDetector::new(id, extract_params(Some(resource))?)?),
    };
    Ok(detector)
}

/// Source of configured detectors, keyed by model identifier
pub trait DetectorFactory {
    /// Provision a detector, reporting why none could be built
    fn try_create(&self, uuid: Uuid) -> Result<Box<dyn AnomalyDetector>, ProvisionError>;

    /// Provision a detector; `None` when not found or not buildable
    fn create(&self, uuid: Uuid) -> Option<Box<dyn AnomalyDetector>> {
        self.try_create(uuid).ok()
    }
}

/// In-memory registry of detector models
pub struct ModelRegistry {
    models: HashMap<Uuid, ModelResource>,
    metrics: DetectorMetrics,
    logger: StructuredLogger,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
            metrics: DetectorMetrics::new(),
            logger: StructuredLogger::new("model-registry"),
        }
    }

    /// Register a model, replacing any previous model with the same id
    pub fn register(&mut self, resource: ModelResource) -> Option<ModelResource> {
        self.models.insert(resource.uuid, resource)
    }

    /// Model registered under `uuid`
    pub fn get(&self, uuid: &Uuid) -> Option<&ModelResource> {
        self.models.get(uuid)
    }

    /// Registered models ordered by id
    pub fn models(&self) -> Vec<&ModelResource> {
        let mut models: Vec<_> = self.models.values().collect();
        models.sort_by_key(|m| m.uuid);
        models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl FromIterator<ModelResource> for ModelRegistry {
    fn from_iter<I: IntoIterator<Item = ModelResource>>(iter: I) -> Self {
        let mut registry = ModelRegistry::new();
        for resource in iter {
            registry.register(resource);
        }
        registry
    }
}

impl DetectorFactory for ModelRegistry {
    fn try_create(&self, uuid: Uuid) -> Result<Box<dyn AnomalyDetector>, ProvisionError> {
        let outcome = self
            .get(&uuid)
            .ok_or(ProvisionError::NotFound(uuid))
            .and_then(build_detector);

        match &outcome {
            Ok(detector) => {
                self.metrics.inc_detectors_provisioned();
                self.logger.log_detector_provisioned(uuid, detector.kind());
            }
            Err(e) => {
                self.metrics.inc_provisioning_failures();
                self.logger.log_provisioning_failed(uuid, e);
            }
        }
        outcome
    }
}
