use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::GatewayError;
use crate::prompt::Prompt;

/// Options controlling a single generation.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerateOptions {
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            max_tokens: 150,
            temperature: 0.8,
        }
    }
}

/// A language-model backend. Implementations apply their own provider-side
/// timeout; callers layer client-side timeout and retry on top.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
    ) -> Result<String, GatewayError>;
}

#[async_trait]
impl<T: LlmProvider + ?Sized> LlmProvider for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn model(&self) -> &str {
        (**self).model()
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        options: &GenerateOptions,
    ) -> Result<String, GatewayError> {
        (**self).generate(prompt, options).await
    }
}
