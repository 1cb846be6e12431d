use async_trait::async_trait;

use crate::contract::{Transform, TransformError};

/// Returns the same bytes for every input.
#[derive(Debug, Clone)]
pub struct FixedTransform {
    output: Vec<u8>,
}

impl FixedTransform {
    pub fn new(output: impl Into<Vec<u8>>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

#[async_trait]
impl Transform for FixedTransform {
    async fn transform(&self, _content: Vec<u8>) -> Result<Vec<u8>, TransformError> {
        Ok(self.output.clone())
    }
}
