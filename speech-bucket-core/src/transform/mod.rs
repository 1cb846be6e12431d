//! Concrete [`Transform`](crate::contract::Transform) policies.
//!
//! - [`ssml::SsmlTransform`]: plain text → SSML with a pause after every sentence.
//! - [`fixed::FixedTransform`]: ignores its input and returns fixed bytes (stub backend).
//!
//! Markup → audio synthesis needs a network backend and lives in the binary crate.

pub mod fixed;
pub mod ssml;

pub use fixed::FixedTransform;
pub use ssml::{SsmlOptions, SsmlTransform};
