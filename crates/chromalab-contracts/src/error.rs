use std::io;

use thiserror::Error;

/// Raised by the structured-response validator. Distinguishes a payload that
/// is not JSON at all from one that parses but is missing required shape.
#[derive(Debug, Error)]
pub enum ResponseFormatError {
    #[error("generator payload is not parseable JSON: {0}")]
    Unparseable(String),
    #[error("generator payload is schema-incomplete: {0}")]
    SchemaIncomplete(String),
}

impl ResponseFormatError {
    pub fn kind(&self) -> &'static str {
        match self {
            ResponseFormatError::Unparseable(_) => "unparseable",
            ResponseFormatError::SchemaIncomplete(_) => "schema_incomplete",
        }
    }
}

/// Stage-level failures of the auto-plan pipeline. Transport and format
/// failures stay distinguishable here even though `user_message` surfaces
/// them identically.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no photo was provided")]
    EmptyInput,

    #[error("photo file I/O failed")]
    UnreadableFile {
        #[source]
        source: io::Error,
    },

    #[error("unsupported photo content type: {content_type}")]
    UnsupportedMediaType { content_type: String },

    #[error("photo is {bytes} bytes; the limit is {limit}")]
    PhotoTooLarge { bytes: u64, limit: u64 },

    #[error("analysis request failed")]
    AnalysisFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("analysis response failed validation")]
    AnalysisFormat {
        #[source]
        source: ResponseFormatError,
    },

    #[error("plan request failed")]
    PlanFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("plan response failed validation")]
    PlanFormat {
        #[source]
        source: ResponseFormatError,
    },
}

impl PipelineError {
    pub fn analysis_failed(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        PipelineError::AnalysisFailed {
            source: source.into(),
        }
    }

    pub fn plan_failed(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        PipelineError::PlanFailed {
            source: source.into(),
        }
    }

    /// Stable tag for the event log. Unlike `user_message`, this keeps the
    /// transport/format distinction.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::EmptyInput => "empty_input",
            PipelineError::UnreadableFile { .. } => "unreadable_file",
            PipelineError::UnsupportedMediaType { .. } => "unsupported_media_type",
            PipelineError::PhotoTooLarge { .. } => "photo_too_large",
            PipelineError::AnalysisFailed { .. } => "analysis_failed",
            PipelineError::AnalysisFormat { .. } => "analysis_format",
            PipelineError::PlanFailed { .. } => "plan_failed",
            PipelineError::PlanFormat { .. } => "plan_format",
        }
    }

    /// Text shown to the stylist. Transport and format failures of the same
    /// stage collapse into one message; retry guidance differs per stage.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::EmptyInput => {
                "No photo was provided. Please choose an image file.".to_string()
            }
            PipelineError::UnreadableFile { .. } => {
                "Could not read the photo. Please try another image.".to_string()
            }
            PipelineError::UnsupportedMediaType { content_type } => format!(
                "'{content_type}' is not a supported photo type. Please upload an image file."
            ),
            PipelineError::PhotoTooLarge { limit, .. } => format!(
                "The photo is too large. Please upload an image under {} MB.",
                limit / (1024 * 1024)
            ),
            PipelineError::AnalysisFailed { .. } | PipelineError::AnalysisFormat { .. } => {
                "Analysis failed: the model could not produce a usable diagnosis. Please try re-analyzing.".to_string()
            }
            PipelineError::PlanFailed { .. } | PipelineError::PlanFormat { .. } => {
                "Plan generation failed: the model could not complete the formula. Please try again.".to_string()
            }
        }
    }
}
