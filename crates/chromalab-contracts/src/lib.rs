pub mod analysis;
pub mod chat;
pub mod error;
pub mod events;
pub mod identity;
pub mod photo;
pub mod plan;
pub mod validate;

pub use analysis::{HairAnalysis, Porosity};
pub use error::{PipelineError, ResponseFormatError};
pub use photo::{ClientPhoto, DisplayHandle, PhotoIngestor, MAX_PHOTO_BYTES};
pub use plan::{ColorPlan, FashionOverlay, PreLighten, TargetColor, Tone, DEFAULT_AUTO_TARGET};
