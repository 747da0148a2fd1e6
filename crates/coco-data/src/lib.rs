pub mod annotations;
pub mod encoder;
pub mod error;
pub mod sequence;
pub mod window;

pub use annotations::{load_annotations, AnnotationRecord};
pub use encoder::SampleEncoder;
pub use error::DatasetError;
pub use sequence::{CocoSequence, EncodedBatch, StreamingPass};
pub use window::BatchWindower;
