pub mod element_parser;
pub mod gradio_sse;
pub mod omniparser;
pub mod screenshot;
pub mod traits;
pub mod types;
