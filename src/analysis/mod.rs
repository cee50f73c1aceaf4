// Analysis module - sound-event classification
//
// This module turns one audio frame into a ranked list of safety-relevant
// classes.
//
// Architecture:
// - InferenceModel: opaque neural model (tract ONNX backend, scripted stand-in)
// - SoundClassifier: fixed-width input, score floor, stable ranking
// - CategoryMapper: class index -> Critical/Warning/Info + human label

pub mod categories;
pub mod classifier;
#[cfg(feature = "tract")]
pub mod model_tract;

pub use categories::{CategoryMapper, SoundCategory};
pub use classifier::{
    score_vector, ClassificationResult, InferenceModel, ModelProbe, ScriptedModel, SoundClassifier,
};
#[cfg(feature = "tract")]
pub use model_tract::TractModel;
