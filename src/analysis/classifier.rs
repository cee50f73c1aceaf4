// SoundClassifier - fixed-shape inference over one audio frame
//
// Wraps a pretrained sound-event model behind the `InferenceModel` seam.
// Each call copies the frame into a fixed-width input buffer (zero-padded or
// truncated, never resampled), runs one inference, averages the per-patch
// score rows into a single score vector and keeps the classes that clear
// the fixed score floor and belong to a safety category.
//
// A classifier whose model failed to load is "closed": classify returns an
// empty list so monitoring keeps running in a degraded mode.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;
use crate::error::{log_classifier_error, ClassifierError};

use super::categories::{CategoryMapper, SoundCategory};

/// One category-mapped class score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Human label from the category table
    pub label: String,
    /// Mean model score in [0, 1]
    pub score: f32,
    pub category: SoundCategory,
    /// Model class index
    pub index: usize,
}

/// A loaded neural model.
///
/// `run` receives exactly `input_len()` samples and returns the flattened
/// score tensor: one or more rows of per-class scores.
pub trait InferenceModel: Send {
    fn input_len(&self) -> usize;

    fn run(&mut self, input: &[f32]) -> Result<Vec<f32>, ClassifierError>;
}

struct LoadedModel {
    model: Box<dyn InferenceModel>,
    input: Vec<f32>,
}

/// Category-filtering wrapper around an [`InferenceModel`].
pub struct SoundClassifier {
    loaded: Mutex<Option<LoadedModel>>,
    num_classes: usize,
    score_floor: f32,
}

impl SoundClassifier {
    /// Wrap an already loaded model.
    pub fn new(model: Box<dyn InferenceModel>, config: &ClassifierConfig) -> Self {
        let input = vec![0.0; model.input_len()];
        Self {
            loaded: Mutex::new(Some(LoadedModel { model, input })),
            num_classes: config.num_classes.max(1),
            score_floor: config.score_floor,
        }
    }

    /// A classifier with no model; every classify returns an empty list.
    pub fn closed(config: &ClassifierConfig) -> Self {
        Self {
            loaded: Mutex::new(None),
            num_classes: config.num_classes.max(1),
            score_floor: config.score_floor,
        }
    }

    /// Build from a load attempt, logging and closing on failure.
    pub fn from_load_result(
        result: Result<Box<dyn InferenceModel>, ClassifierError>,
        config: &ClassifierConfig,
    ) -> Self {
        match result {
            Ok(model) => {
                tracing::info!(
                    "[SoundClassifier] Model ready ({} input samples, {} classes)",
                    model.input_len(),
                    config.num_classes
                );
                Self::new(model, config)
            }
            Err(err) => {
                log_classifier_error(&err, "SoundClassifier::load");
                tracing::warn!("[SoundClassifier] Running without a model, no sounds will be detected");
                Self::closed(config)
            }
        }
    }

    /// Load the bundled model named in the config.
    pub fn load(config: &ClassifierConfig) -> Self {
        Self::from_load_result(load_model(config), config)
    }

    /// Fixed pre-filter applied before category mapping.
    pub fn score_floor(&self) -> f32 {
        self.score_floor
    }

    pub fn is_closed(&self) -> bool {
        self.loaded.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }

    /// Classify one frame, logging and swallowing inference errors.
    pub fn classify(&self, samples: &[f32]) -> Vec<ClassificationResult> {
        self.try_classify(samples).unwrap_or_else(|err| {
            log_classifier_error(&err, "SoundClassifier::classify");
            Vec::new()
        })
    }

    /// Classify one frame.
    ///
    /// A closed classifier yields `Ok(vec![])`; only a failed inference on a
    /// loaded model is an error.
    pub fn try_classify(&self, samples: &[f32]) -> Result<Vec<ClassificationResult>, ClassifierError> {
        let mut guard = self.loaded.lock().map_err(|_| ClassifierError::Inference {
            reason: "model lock poisoned".to_string(),
        })?;
        let Some(loaded) = guard.as_mut() else {
            return Ok(Vec::new());
        };

        fill_input(&mut loaded.input, samples);
        let raw = loaded.model.run(&loaded.input)?;
        let scores = average_rows(&raw, self.num_classes)?;
        Ok(rank(&scores, self.score_floor))
    }

    /// Release the model. Safe to call repeatedly.
    pub fn close(&self) {
        match self.loaded.lock() {
            Ok(mut guard) => {
                if guard.take().is_some() {
                    tracing::info!("[SoundClassifier] Model released");
                }
            }
            Err(_) => tracing::error!("[SoundClassifier] Model lock poisoned during close"),
        }
    }
}

#[cfg(feature = "tract")]
fn load_model(config: &ClassifierConfig) -> Result<Box<dyn InferenceModel>, ClassifierError> {
    let model = super::model_tract::TractModel::load(
        &config.model_path,
        crate::audio::FRAME_LEN,
    )?;
    Ok(Box::new(model))
}

#[cfg(not(feature = "tract"))]
fn load_model(config: &ClassifierConfig) -> Result<Box<dyn InferenceModel>, ClassifierError> {
    Err(ClassifierError::ModelLoad {
        reason: format!(
            "{}: built without an inference backend",
            config.model_path.display()
        ),
    })
}

/// Copy samples into the fixed-width buffer, zero-padding the tail.
fn fill_input(input: &mut [f32], samples: &[f32]) {
    let n = samples.len().min(input.len());
    input[..n].copy_from_slice(&samples[..n]);
    input[n..].fill(0.0);
}

/// Mean score per class over all output rows.
fn average_rows(raw: &[f32], num_classes: usize) -> Result<Vec<f32>, ClassifierError> {
    if raw.is_empty() || raw.len() % num_classes != 0 {
        return Err(ClassifierError::OutputShape {
            expected: num_classes,
            actual: raw.len(),
        });
    }
    let rows = raw.len() / num_classes;
    if rows == 1 {
        return Ok(raw.to_vec());
    }

    let mut mean = vec![0.0f32; num_classes];
    for row in raw.chunks_exact(num_classes) {
        for (acc, score) in mean.iter_mut().zip(row) {
            *acc += score;
        }
    }
    mean.iter_mut().for_each(|s| *s /= rows as f32);
    Ok(mean)
}

/// Keep mapped classes above the floor, best first, ties in index order.
fn rank(scores: &[f32], floor: f32) -> Vec<ClassificationResult> {
    let mut results: Vec<ClassificationResult> = scores
        .iter()
        .enumerate()
        .filter(|(_, &score)| score > floor)
        .filter_map(|(index, &score)| {
            CategoryMapper::category_for(index).map(|category| ClassificationResult {
                label: CategoryMapper::label_for(index),
                score,
                category,
                index,
            })
        })
        .collect();
    // sort_by is stable
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results
}

/// Build a score vector with the given class scores set.
pub fn score_vector(num_classes: usize, scores: &[(usize, f32)]) -> Vec<f32> {
    let mut out = vec![0.0; num_classes];
    for &(index, score) in scores {
        if let Some(slot) = out.get_mut(index) {
            *slot = score;
        }
    }
    out
}

type ScriptFn = dyn FnMut(&[f32]) -> Result<Vec<f32>, ClassifierError> + Send;

/// Observations recorded by a [`ScriptedModel`].
#[derive(Debug, Default)]
pub struct ModelProbe {
    calls: usize,
    last_input: Vec<f32>,
}

impl ModelProbe {
    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn last_input(&self) -> &[f32] {
        &self.last_input
    }
}

/// Deterministic stand-in for the neural model.
///
/// Used by the offline tools and the tests; output is computed by a closure
/// over the input buffer.
pub struct ScriptedModel {
    input_len: usize,
    script: Box<ScriptFn>,
    probe: Arc<Mutex<ModelProbe>>,
}

impl ScriptedModel {
    pub fn from_fn<F>(input_len: usize, script: F) -> Self
    where
        F: FnMut(&[f32]) -> Result<Vec<f32>, ClassifierError> + Send + 'static,
    {
        Self {
            input_len,
            script: Box::new(script),
            probe: Arc::new(Mutex::new(ModelProbe::default())),
        }
    }

    /// Always return the same scores.
    pub fn constant(input_len: usize, scores: Vec<f32>) -> Self {
        Self::from_fn(input_len, move |_| Ok(scores.clone()))
    }

    /// Return each output in turn, then keep repeating the last one.
    pub fn sequence(input_len: usize, outputs: Vec<Result<Vec<f32>, ClassifierError>>) -> Self {
        let mut queue = std::collections::VecDeque::from(outputs);
        let mut last: Result<Vec<f32>, ClassifierError> = Ok(Vec::new());
        Self::from_fn(input_len, move |_| {
            if let Some(next) = queue.pop_front() {
                last = next;
            }
            last.clone()
        })
    }

    pub fn probe(&self) -> Arc<Mutex<ModelProbe>> {
        Arc::clone(&self.probe)
    }
}

impl InferenceModel for ScriptedModel {
    fn input_len(&self) -> usize {
        self.input_len
    }

    fn run(&mut self, input: &[f32]) -> Result<Vec<f32>, ClassifierError> {
        if let Ok(mut probe) = self.probe.lock() {
            probe.calls += 1;
            probe.last_input.clear();
            probe.last_input.extend_from_slice(input);
        }
        (self.script)(input)
    }
}

#[cfg(test)]
#[path = "classifier_tests.rs"]
mod tests;
