//! Vision: image captioning, its rate gate, and the image-question cache

pub mod cache;
pub mod describer;
pub mod rate_limit;

pub use cache::{AnswerCache, CacheKey};
pub use describer::{DESCRIBE_INSTRUCTION, ImageDescriber, ImageDescription};
pub use rate_limit::RateGate;
