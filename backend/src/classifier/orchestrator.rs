use super::mock::MockClassifier;
use crate::image_ref::ImageRef;
use crate::inference::InferenceError;
use crate::inference::adapter::InferenceAdapter;
use crate::inference::runtime::ModelStatus;
use shared::{Classification, ScanResponse};
use std::time::Instant;

pub const XP_PER_SCAN: u32 = 15;

/// Where a scan result came from. Only used for logging; clients never see it.
#[derive(Debug)]
pub enum ScanSource {
    Model,
    Fallback(InferenceError),
}

#[derive(Debug)]
pub struct Analysis {
    pub response: ScanResponse,
    pub source: ScanSource,
}

/// Runs a scan through the model and falls back to the mock classifier on any failure.
pub struct ScanOrchestrator {
    adapter: InferenceAdapter,
    mock: MockClassifier,
}

impl ScanOrchestrator {
    pub fn new(adapter: InferenceAdapter, mock: MockClassifier) -> Self {
        Self { adapter, mock }
    }

    pub fn model_status(&self) -> ModelStatus {
        self.adapter.model_status()
    }

    pub async fn analyze(&self, image: &ImageRef) -> ScanResponse {
        self.analyze_traced(image).await.response
    }

    pub async fn analyze_traced(&self, image: &ImageRef) -> Analysis {
        let started = Instant::now();
        let digest = image.short_digest();

        let (item, source) = match self.adapter.infer(image).await {
            Ok(item) => {
                log::info!(
                    "Model classified image {} as {} in {:?}",
                    digest,
                    item.category,
                    started.elapsed()
                );
                (item, ScanSource::Model)
            }
            Err(e) => {
                match &e {
                    InferenceError::Unavailable(_) => {
                        log::info!("Model unavailable for image {}, using mock: {}", digest, e)
                    }
                    InferenceError::Invocation { .. } | InferenceError::MalformedOutput(_) => {
                        log::warn!(
                            "Inference failed for image {} after {:?} ({}), using mock: {}",
                            digest,
                            started.elapsed(),
                            e.kind(),
                            e
                        )
                    }
                }
                (self.mock.classify(), ScanSource::Fallback(e))
            }
        };

        // TODO: derive the classification from the detected category once hazardous
        // categories exist in the catalog.
        let response = ScanResponse {
            success: true,
            classification: Classification::Safe,
            xp_awarded: XP_PER_SCAN,
            item,
        };
        Analysis { response, source }
    }
}
