pub mod config;
pub mod generation;
pub mod model;
pub mod net;
pub mod safetensors_util;
pub mod training;

pub use config::ModelConfig;
pub use generation::InferenceModel;
pub use model::{BatchInputs, CaptionModel};
pub use net::CaptionNet;
pub use training::TrainingModel;
