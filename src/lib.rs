pub mod host;
pub mod render;
pub mod transport;

pub use render::engine::{RenderPipeline, RenderRequest};
pub use render::error::{RenderError, RenderFailure};
pub use render::profiles::{PipelineKind, PipelineProfile};
