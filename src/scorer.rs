//! Next-topic classifier inference.
//!
//! Scores a learner against a multinomial logistic regression exported by an
//! external trainer. The feature encoding below has to match the trainer's
//! byte for byte, otherwise the exported coefficients are meaningless.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ModelLoadError;
use crate::fields::{course_area_index, normalize_course_area, FieldId, COURSE_AREAS};
use crate::models::LearnerProfile;

pub const MODEL_TYPE: &str = "logistic_multinomial";
pub const FEATURE_COUNT: usize = COURSE_AREAS.len() + 4 + FieldId::ALL.len();

/// Upper bound on the artifact read from disk.
pub const MAX_MODEL_BYTES: u64 = 16 * 1024 * 1024;

const MIN_SCALE: f64 = 1e-8;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Scaler {
    #[serde(default)]
    pub mean: Vec<f64>,
    #[serde(default)]
    pub scale: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelExport {
    pub model_type: String,
    pub feature_names: Vec<String>,
    #[serde(default)]
    pub scaler: Scaler,
    pub coefficients: Vec<Vec<f64>>,
    pub intercept: Vec<f64>,
    /// Absent means the fixed field order.
    #[serde(default)]
    pub classes: Option<Vec<String>>,
}

impl ModelExport {
    pub fn from_json(raw: &str) -> Result<ModelExport, ModelLoadError> {
        let export: ModelExport = serde_json::from_str(raw)?;
        export.validate()?;
        Ok(export)
    }

    fn validate(&self) -> Result<(), ModelLoadError> {
        if self.model_type != MODEL_TYPE {
            return Err(ModelLoadError::UnsupportedModelType {
                expected: MODEL_TYPE,
                actual: self.model_type.clone(),
            });
        }
        if self.intercept.is_empty() {
            return Err(ModelLoadError::Malformed {
                reason: "no classes in intercept".to_string(),
            });
        }
        if self.coefficients.len() != self.intercept.len() {
            return Err(ModelLoadError::Malformed {
                reason: format!(
                    "{} coefficient rows for {} intercepts",
                    self.coefficients.len(),
                    self.intercept.len()
                ),
            });
        }
        Ok(())
    }

    /// `intercept_k + sum_i coef[k][i] * x_i`; missing coefficients count as 0.
    pub fn logits(&self, scaled: &[f64]) -> Vec<f64> {
        self.intercept
            .iter()
            .enumerate()
            .map(|(k, bias)| {
                let row = self.coefficients.get(k).map(Vec::as_slice).unwrap_or(&[]);
                scaled
                    .iter()
                    .enumerate()
                    .fold(*bias, |sum, (i, x)| sum + row.get(i).copied().unwrap_or(0.0) * x)
            })
            .collect()
    }

    fn class_at(&self, index: usize) -> Option<FieldId> {
        let Some(classes) = self.classes.as_ref() else {
            return FieldId::ALL.get(index).copied();
        };
        let label = classes.get(index)?;
        let field = FieldId::parse(label);
        if field.is_none() {
            warn!(class = %label, "model predicted an unknown field");
        }
        field
    }

    pub fn predict(&self, profile: &LearnerProfile) -> Option<FieldId> {
        let features = build_feature_vector(profile);
        if features.len() != self.feature_names.len() {
            warn!(
                expected = self.feature_names.len(),
                actual = features.len(),
                "feature vector length does not match model export"
            );
            return None;
        }

        let scaled = standardize(&features, &self.scaler.mean, &self.scaler.scale);
        let probabilities = softmax(&self.logits(&scaled));
        let field = self.class_at(argmax(&probabilities)?);
        debug!(field = ?field, "scored next topic");
        field
    }
}

/// Encodes a learner in the trainer's feature order: course area one-hot,
/// four capped counts, then one final score per field.
pub fn build_feature_vector(profile: &LearnerProfile) -> Vec<f64> {
    let area = normalize_course_area(profile.course_area.as_deref());
    let area_index = course_area_index(&area);

    let mut features = Vec::with_capacity(FEATURE_COUNT);
    features.extend((0..COURSE_AREAS.len()).map(|i| if i == area_index { 1.0 } else { 0.0 }));

    let stats = &profile.study_stats;
    features.push(profile.interests().len().min(20) as f64 / 20.0);
    features.push(profile.weak_topic_list().len().min(10) as f64 / 10.0);
    features.push(profile.strong_topic_list().len().min(10) as f64 / 10.0);
    // Capped at 200 but divided by 100; exported coefficients expect the 0..=2 range.
    features.push(stats.total_hours.min(200.0) / 100.0);

    features.extend(FieldId::ALL.into_iter().map(|field| {
        stats
            .final_score(field)
            .map(|score| score.clamp(0.0, 100.0) / 100.0)
            .unwrap_or(0.0)
    }));

    features
}

/// `(x_i - mean_i) / scale_i`, with near-zero or missing scales treated as 1.
pub fn standardize(features: &[f64], mean: &[f64], scale: &[f64]) -> Vec<f64> {
    features
        .iter()
        .enumerate()
        .map(|(i, x)| {
            let m = mean.get(i).copied().unwrap_or(0.0);
            let s = match scale.get(i) {
                Some(&s) if s > MIN_SCALE => s,
                _ => 1.0,
            };
            (x - m) / s
        })
        .collect()
}

pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|x| (x - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest value; the first occurrence wins ties.
pub fn argmax(values: &[f64]) -> Option<usize> {
    if values.is_empty() {
        return None;
    }
    let mut best = 0;
    for (i, value) in values.iter().enumerate().skip(1) {
        if *value > values[best] {
            best = i;
        }
    }
    Some(best)
}

/// Where the exported model lives. `Ok(None)` means no model has been exported.
pub trait ModelSource: Send + Sync {
    fn fetch(&self) -> Result<Option<String>, ModelLoadError>;

    fn describe(&self) -> String;
}

pub struct FileModelSource {
    path: PathBuf,
}

impl FileModelSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModelSource for FileModelSource {
    fn fetch(&self) -> Result<Option<String>, ModelLoadError> {
        let io_error = |source| ModelLoadError::Io {
            path: self.path.clone(),
            source,
        };

        let metadata = match std::fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(err)),
        };
        if metadata.len() > MAX_MODEL_BYTES {
            return Err(ModelLoadError::TooLarge {
                path: self.path.clone(),
                bytes: metadata.len(),
                limit: MAX_MODEL_BYTES,
            });
        }

        std::fs::read_to_string(&self.path).map(Some).map_err(io_error)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Lazily loads the model export on first use and keeps it for the life of
/// the scorer. A missing or unusable export is cached too, so every
/// prediction returns `None` until [`ModelScorer::reload`] is called.
pub struct ModelScorer {
    source: Box<dyn ModelSource>,
    cache: RwLock<Option<Option<Arc<ModelExport>>>>,
}

impl ModelScorer {
    pub fn new(source: impl ModelSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            cache: RwLock::new(None),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(FileModelSource::new(path))
    }

    /// Returns the cached export, reading it from the source on first call.
    pub fn load(&self) -> Option<Arc<ModelExport>> {
        if let Some(cached) = self.cache.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return cached.clone();
        }

        // Concurrent first loads may both read the source; the result is identical.
        let loaded = self.read_source();
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.get_or_insert(loaded).clone()
    }

    /// Drops the cached export so the next call re-reads the source.
    pub fn reload(&self) {
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = None;
        debug!(source = %self.source.describe(), "model cache cleared");
    }

    pub fn predict(&self, profile: &LearnerProfile) -> Option<FieldId> {
        self.load()?.predict(profile)
    }

    fn read_source(&self) -> Option<Arc<ModelExport>> {
        let raw = match self.source.fetch() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(source = %self.source.describe(), "no model export available");
                return None;
            }
            Err(err) => {
                warn!(source = %self.source.describe(), error = %err, "model export could not be read");
                return None;
            }
        };

        match ModelExport::from_json(&raw) {
            Ok(export) => {
                debug!(
                    source = %self.source.describe(),
                    classes = export.intercept.len(),
                    features = export.feature_names.len(),
                    "model export loaded"
                );
                Some(Arc::new(export))
            }
            Err(err) => {
                warn!(source = %self.source.describe(), error = %err, "model export rejected");
                None
            }
        }
    }
}
