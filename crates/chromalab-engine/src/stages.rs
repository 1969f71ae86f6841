//! The two generator stages of the auto-plan pipeline. Each stage wraps the
//! capability call in the pipeline error taxonomy and runs the raw response
//! through the validator before anything downstream sees it.

use chromalab_contracts::validate::{validate_analysis, validate_plan};
use chromalab_contracts::{ClientPhoto, ColorPlan, HairAnalysis, PipelineError};

use crate::ColoristCapability;

pub fn analyze(
    capability: &dyn ColoristCapability,
    photo: &ClientPhoto,
) -> Result<HairAnalysis, PipelineError> {
    analyze_payload(capability, &photo.bytes, &photo.content_type)
}

/// Payload variant for callers that hold the photo bytes without the handle,
/// such as worker threads that must not keep the session state locked.
pub fn analyze_payload(
    capability: &dyn ColoristCapability,
    payload: &[u8],
    content_type: &str,
) -> Result<HairAnalysis, PipelineError> {
    let raw = capability
        .analyze_photo(payload, content_type)
        .map_err(PipelineError::analysis_failed)?;
    validate_analysis(&raw).map_err(|source| PipelineError::AnalysisFormat { source })
}

pub fn plan(
    capability: &dyn ColoristCapability,
    analysis: &HairAnalysis,
    target: &str,
) -> Result<ColorPlan, PipelineError> {
    let raw = capability
        .generate_plan(analysis, target)
        .map_err(PipelineError::plan_failed)?;
    validate_plan(&raw).map_err(|source| PipelineError::PlanFormat { source })
}

#[cfg(test)]
mod tests {
    use anyhow::{bail, Result};
    use chromalab_contracts::chat::{ChatMessage, ContextPayload};
    use serde_json::json;

    use super::*;
    use crate::{DryrunCapability, GroundedAnswer};

    struct FixedResponses {
        analysis: Result<String, String>,
        plan: Result<String, String>,
    }

    impl ColoristCapability for FixedResponses {
        fn name(&self) -> &str {
            "fixed"
        }

        fn analyze_photo(&self, _payload: &[u8], _content_type: &str) -> Result<String> {
            match &self.analysis {
                Ok(raw) => Ok(raw.clone()),
                Err(message) => bail!("{message}"),
            }
        }

        fn generate_plan(&self, _analysis: &HairAnalysis, _target: &str) -> Result<String> {
            match &self.plan {
                Ok(raw) => Ok(raw.clone()),
                Err(message) => bail!("{message}"),
            }
        }

        fn generate_image(&self, _prompt: &str, _aspect_ratio: &str) -> Result<Vec<u8>> {
            bail!("not used")
        }

        fn edit_image(&self, _payload: &[u8], _content_type: &str, _prompt: &str) -> Result<Vec<u8>> {
            bail!("not used")
        }

        fn search_with_grounding(&self, _query: &str) -> Result<GroundedAnswer> {
            bail!("not used")
        }

        fn chat(&self, _history: &[ChatMessage], _context: &ContextPayload) -> Result<String> {
            bail!("not used")
        }
    }

    fn sample_analysis() -> HairAnalysis {
        let raw = DryrunCapability.analyze_photo(b"x", "image/jpeg").unwrap();
        validate_analysis(&raw).unwrap()
    }

    #[test]
    fn transport_failure_maps_to_the_stage_error() {
        let capability = FixedResponses {
            analysis: Err("socket closed".to_string()),
            plan: Err("socket closed".to_string()),
        };
        let err = analyze_payload(&capability, b"x", "image/jpeg").unwrap_err();
        assert_eq!(err.kind(), "analysis_failed");

        let err = plan(&capability, &sample_analysis(), "09V").unwrap_err();
        assert_eq!(err.kind(), "plan_failed");
    }

    #[test]
    fn malformed_payload_maps_to_the_format_error() {
        let capability = FixedResponses {
            analysis: Ok("Here is the diagnosis you asked for.".to_string()),
            plan: Ok(json!({ "path": "x", "steps": [] }).to_string()),
        };
        let err = analyze_payload(&capability, b"x", "image/jpeg").unwrap_err();
        assert_eq!(err.kind(), "analysis_format");

        let err = plan(&capability, &sample_analysis(), "09V").unwrap_err();
        assert_eq!(err.kind(), "plan_format");
    }

    #[test]
    fn valid_payloads_come_back_typed() {
        let capability = DryrunCapability;
        let analysis = analyze_payload(&capability, b"x", "image/jpeg").unwrap();
        let plan = plan(&capability, &analysis, "Goldwell Topchic 7RB").unwrap();
        assert!(plan.path.contains("Goldwell Topchic 7RB"));
        assert_eq!(plan.steps.len(), 3);
    }
}
