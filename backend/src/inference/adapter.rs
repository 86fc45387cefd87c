use super::InferenceError;
use super::extract::parse_classification;
use super::prompt::ChatPrompt;
use super::runtime::{ModelStatus, VisionBackend};
use crate::image_ref::ImageRef;
use shared::ScanResult;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Classifies an image with the local vision-language model.
pub struct InferenceAdapter {
    backend: Arc<dyn VisionBackend>,
    http: reqwest::Client,
    max_tokens: u32,
    time_budget: Duration,
}

impl InferenceAdapter {
    pub fn new(
        backend: Arc<dyn VisionBackend>,
        http: reqwest::Client,
        max_tokens: u32,
        time_budget: Duration,
    ) -> Self {
        Self {
            backend,
            http,
            max_tokens,
            time_budget,
        }
    }

    pub fn model_status(&self) -> ModelStatus {
        self.backend.status()
    }

    pub async fn infer(&self, image: &ImageRef) -> Result<ScanResult, InferenceError> {
        let started = Instant::now();
        match tokio::time::timeout(self.time_budget, self.run(image)).await {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Invocation {
                reason: format!("exceeded the {:?} inference budget", self.time_budget),
                elapsed: started.elapsed(),
            }),
        }
    }

    async fn run(&self, image: &ImageRef) -> Result<ScanResult, InferenceError> {
        let image_url = image.to_model_url(&self.http).await?;
        let prompt = ChatPrompt::for_image(image_url, self.max_tokens);
        let completion = self.backend.complete(&prompt).await?;

        parse_classification(&completion).inspect_err(|_| {
            log::debug!(
                "Unparseable completion for image {}: {}",
                image.short_digest(),
                completion
            );
        })
    }
}
