use std::sync::Arc;

use tracing::{error, info, warn};

use crate::analyzer::Analyzer;
use crate::classifier::{ContentDescriptor, DescriptorKind};
use crate::platform::Platform;
use crate::resolver::has_instruction;

pub const UNSUPPORTED_MEDIA: &str =
    "❌ Цей тип медіа не підтримується для аналізу. Надішліть текст або зображення.";
pub const IMAGES_UNAVAILABLE: &str = "❌ Не вдалося отримати зображення для аналізу.";
pub const ANALYSIS_FAILED: &str =
    "❌ Вибачте, сталася помилка при аналізі поста. Спробуйте ще раз.";
pub const ANSWER_FAILED: &str = "❌ Вибачте, сталася помилка. Спробуйте ще раз.";

/// Verdict for one logical post, ready for formatting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisOutcome {
    pub display_text: String,
    pub source_label: String,
}

/// Which backend entry point a descriptor is sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisRoute {
    Text { custom: bool },
    Images { custom: bool },
    NotSupported,
}

pub fn route(kind: DescriptorKind, instruction: &str) -> AnalysisRoute {
    let custom = has_instruction(instruction);
    match kind {
        DescriptorKind::Text | DescriptorKind::OtherMediaWithCaption => {
            AnalysisRoute::Text { custom }
        }
        DescriptorKind::Image => AnalysisRoute::Images { custom },
        DescriptorKind::Unsupported => AnalysisRoute::NotSupported,
    }
}

/// Runs exactly one backend call per descriptor and never fails.
pub struct DispatchCoordinator {
    analyzer: Arc<dyn Analyzer>,
    platform: Arc<dyn Platform>,
}

impl DispatchCoordinator {
    pub fn new(analyzer: Arc<dyn Analyzer>, platform: Arc<dyn Platform>) -> Self {
        Self { analyzer, platform }
    }

    pub async fn dispatch(
        &self,
        descriptor: &ContentDescriptor,
        instruction: Option<&str>,
    ) -> AnalysisOutcome {
        let instruction = instruction.map(str::trim).unwrap_or_default();
        let route = route(descriptor.kind, instruction);
        let instruction = match route {
            AnalysisRoute::Text { custom: true } | AnalysisRoute::Images { custom: true } => {
                Some(instruction)
            }
            _ => None,
        };

        info!(
            "Dispatching {:?} post from {} ({:?})",
            descriptor.kind, descriptor.source_label, route
        );

        let display_text = match route {
            AnalysisRoute::NotSupported => UNSUPPORTED_MEDIA.to_string(),
            AnalysisRoute::Text { .. } => {
                match self
                    .analyzer
                    .analyze_text(&descriptor.text, &descriptor.source_label, instruction)
                    .await
                {
                    Ok(analysis) => analysis,
                    Err(e) => {
                        error!("Text analysis failed: {:#}", e);
                        ANALYSIS_FAILED.to_string()
                    }
                }
            }
            AnalysisRoute::Images { .. } => self.dispatch_images(descriptor, instruction).await,
        };

        AnalysisOutcome {
            display_text,
            source_label: descriptor.source_label.clone(),
        }
    }

    async fn dispatch_images(
        &self,
        descriptor: &ContentDescriptor,
        instruction: Option<&str>,
    ) -> String {
        let mut urls = Vec::with_capacity(descriptor.media.len());
        for media in &descriptor.media {
            match self.platform.resolve_media(media).await {
                Ok(url) => urls.push(url),
                Err(e) => warn!("Failed to resolve image {}: {:#}", media.file_id, e),
            }
        }

        if urls.is_empty() {
            return IMAGES_UNAVAILABLE.to_string();
        }

        match self
            .analyzer
            .analyze_images(
                &urls,
                &descriptor.text,
                &descriptor.caption,
                &descriptor.source_label,
                instruction,
            )
            .await
        {
            Ok(analysis) => analysis,
            Err(e) => {
                error!("Image analysis failed: {:#}", e);
                ANALYSIS_FAILED.to_string()
            }
        }
    }

    /// Answer a question that is not about any post.
    pub async fn answer(&self, question: &str) -> String {
        match self.analyzer.answer_freeform(question).await {
            Ok(answer) => answer,
            Err(e) => {
                error!("Free-form answer failed: {:#}", e);
                ANSWER_FAILED.to_string()
            }
        }
    }
}
