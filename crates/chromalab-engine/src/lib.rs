use std::env;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chromalab_contracts::chat::{ChatMessage, ContextPayload, Role};
use chromalab_contracts::HairAnalysis;
use image::{Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};

pub mod orchestrator;
pub mod stages;

pub use orchestrator::{AutoPlanOrchestrator, AutoPlanPhase, AutoPlanSnapshot, PipelineEvent};

const ANALYSIS_MODEL: &str = "gemini-2.5-flash";
const PLAN_MODEL: &str = "gemini-2.5-pro";
const IMAGE_MODEL: &str = "imagen-4.0-generate-001";
const EDIT_MODEL: &str = "gemini-2.5-flash-image";
const CHAT_MODEL: &str = "gemini-2.5-flash";

const PLAN_THINKING_BUDGET: u64 = 32_768;
const TRANSPORT_RETRIES: usize = 2;
const RETRY_BACKOFF_S: f64 = 1.2;
const REQUEST_TIMEOUT_S: f64 = 90.0;

#[derive(Debug, Clone, PartialEq)]
pub struct GroundedSource {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroundedAnswer {
    pub text: String,
    pub sources: Vec<GroundedSource>,
}

/// The generative capability surface the pipeline orchestrates over. The raw
/// `String` returns from `analyze_photo`/`generate_plan` are untrusted; they
/// must pass the validator before anything downstream sees them.
pub trait ColoristCapability: Send + Sync {
    fn name(&self) -> &str;
    fn analyze_photo(&self, payload: &[u8], content_type: &str) -> Result<String>;
    fn generate_plan(&self, analysis: &HairAnalysis, target: &str) -> Result<String>;
    fn generate_image(&self, prompt: &str, aspect_ratio: &str) -> Result<Vec<u8>>;
    fn edit_image(&self, payload: &[u8], content_type: &str, prompt: &str) -> Result<Vec<u8>>;
    fn search_with_grounding(&self, query: &str) -> Result<GroundedAnswer>;
    fn chat(&self, history: &[ChatMessage], context: &ContextPayload) -> Result<String>;
}

/// Gemini-backed capability over the generative language REST API.
pub struct GeminiCapability {
    api_base: String,
    http: HttpClient,
}

impl Default for GeminiCapability {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiCapability {
    pub fn new() -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            http: HttpClient::new(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn endpoint(&self, model: &str, verb: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:{}", self.api_base, model_path, verb)
    }

    fn post_with_transport_retries(&self, endpoint: &str, payload: &Value) -> Result<HttpResponse> {
        let Some(api_key) = Self::api_key() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        for attempt in 0..=TRANSPORT_RETRIES {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", api_key.as_str())])
                .timeout(Duration::from_secs_f64(REQUEST_TIMEOUT_S))
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    let err = anyhow::Error::new(raw)
                        .context(format!("Gemini request failed ({endpoint})"));
                    if !is_retryable_transport_error(&err) || attempt >= TRANSPORT_RETRIES {
                        return Err(err);
                    }
                    let delay_s = RETRY_BACKOFF_S * (attempt as f64 + 1.0);
                    thread::sleep(Duration::from_secs_f64(delay_s));
                }
            }
        }

        unreachable!("transport retry loop always returns a response or error")
    }

    fn generate_content(&self, model: &str, payload: Value) -> Result<Value> {
        let endpoint = self.endpoint(model, "generateContent");
        let response = self.post_with_transport_retries(&endpoint, &payload)?;
        response_json_or_error("Gemini", response)
    }
}

impl ColoristCapability for GeminiCapability {
    fn name(&self) -> &str {
        "gemini"
    }

    fn analyze_photo(&self, payload: &[u8], content_type: &str) -> Result<String> {
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    inline_image_part(payload, content_type),
                    { "text": analysis_prompt() },
                ],
            }],
            "generationConfig": { "responseMimeType": "application/json" },
        });
        let response = self.generate_content(ANALYSIS_MODEL, body)?;
        let text = extract_text(&response);
        if text.trim().is_empty() {
            bail!("Gemini returned no analysis text");
        }
        Ok(text)
    }

    fn generate_plan(&self, analysis: &HairAnalysis, target: &str) -> Result<String> {
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": plan_prompt(analysis, target)? }],
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "thinkingConfig": { "thinkingBudget": PLAN_THINKING_BUDGET },
            },
        });
        let response = self.generate_content(PLAN_MODEL, body)?;
        let text = extract_text(&response);
        if text.trim().is_empty() {
            bail!("Gemini returned no plan text");
        }
        Ok(text)
    }

    fn generate_image(&self, prompt: &str, aspect_ratio: &str) -> Result<Vec<u8>> {
        let endpoint = self.endpoint(IMAGE_MODEL, "predict");
        let body = json!({
            "instances": [{ "prompt": prompt }],
            "parameters": {
                "sampleCount": 1,
                "aspectRatio": aspect_ratio,
                "outputMimeType": "image/jpeg",
            },
        });
        let response = self.post_with_transport_retries(&endpoint, &body)?;
        let payload = response_json_or_error("Imagen", response)?;
        let encoded = payload
            .get("predictions")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("bytesBase64Encoded"))
            .and_then(Value::as_str)
            .context("Imagen returned no image")?;
        BASE64
            .decode(encoded.as_bytes())
            .context("Imagen image base64 decode failed")
    }

    fn edit_image(&self, payload: &[u8], content_type: &str, prompt: &str) -> Result<Vec<u8>> {
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    inline_image_part(payload, content_type),
                    { "text": prompt },
                ],
            }],
            "generationConfig": { "responseModalities": ["IMAGE"] },
        });
        let response = self.generate_content(EDIT_MODEL, body)?;
        extract_inline_image(&response).context("Gemini returned no edited image")
    }

    fn search_with_grounding(&self, query: &str) -> Result<GroundedAnswer> {
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": query }],
            }],
            "tools": [{ "google_search": {} }],
        });
        let response = self.generate_content(CHAT_MODEL, body)?;
        let text = extract_text(&response);
        if text.trim().is_empty() {
            bail!("Gemini returned no grounded answer");
        }
        Ok(GroundedAnswer {
            text,
            sources: extract_grounding_sources(&response),
        })
    }

    fn chat(&self, history: &[ChatMessage], context: &ContextPayload) -> Result<String> {
        let contents: Vec<Value> = history
            .iter()
            .map(|message| {
                json!({
                    "role": match message.role {
                        Role::User => "user",
                        Role::Model => "model",
                    },
                    "parts": [{ "text": message.text }],
                })
            })
            .collect();
        let body = json!({
            "systemInstruction": { "parts": [{ "text": context.instructions }] },
            "contents": contents,
        });
        let response = self.generate_content(CHAT_MODEL, body)?;
        let text = extract_text(&response);
        if text.trim().is_empty() {
            bail!("Gemini returned no chat reply");
        }
        Ok(text)
    }
}

/// Offline capability for demos and tests: canned, validator-clean payloads
/// and locally rendered placeholder images.
#[derive(Debug, Default, Clone)]
pub struct DryrunCapability;

impl ColoristCapability for DryrunCapability {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn analyze_photo(&self, payload: &[u8], content_type: &str) -> Result<String> {
        let value = json!({
            "naturalLevel": "Level 6 (Dark Blonde)",
            "currentCosmeticLevel": "Level 7 with brassy mids and ends",
            "dominantUndertone": "Orange-Gold",
            "grayPercentage": "Around 10% at the temples",
            "porosity": "High",
            "bandingZones": "1-inch natural root, band of previous color",
            "riskFlags": format!("dryrun diagnosis of {} bytes ({content_type})", payload.len()),
            "stylistNotes": "Recommend bond builder; violet toner path.",
        });
        Ok(value.to_string())
    }

    fn generate_plan(&self, _analysis: &HairAnalysis, target: &str) -> Result<String> {
        let value = json!({
            "path": format!("Dryrun corrective path toward {target}"),
            "preLighten": null,
            "tone": {
                "shades": "9V",
                "ratio": "1:1",
                "developer": "10 vol",
                "time": "10-15 min",
            },
            "fashionOverlay": null,
            "steps": [
                "Step 1: Prep with a clarifying treatment.",
                "Step 2: Apply toner root to ends.",
                "Step 3: Rinse and apply bond sealer.",
            ],
        });
        Ok(value.to_string())
    }

    fn generate_image(&self, prompt: &str, _aspect_ratio: &str) -> Result<Vec<u8>> {
        render_placeholder_png(prompt)
    }

    fn edit_image(&self, _payload: &[u8], _content_type: &str, prompt: &str) -> Result<Vec<u8>> {
        render_placeholder_png(prompt)
    }

    fn search_with_grounding(&self, query: &str) -> Result<GroundedAnswer> {
        Ok(GroundedAnswer {
            text: format!("Dryrun research summary for: {query}"),
            sources: vec![GroundedSource {
                title: "Dryrun source".to_string(),
                uri: "https://example.invalid/dryrun".to_string(),
            }],
        })
    }

    fn chat(&self, history: &[ChatMessage], _context: &ContextPayload) -> Result<String> {
        let last = history
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.text.as_str())
            .unwrap_or("your plan");
        Ok(format!(
            "Dryrun assistant: staying within the recorded plan while considering '{last}'."
        ))
    }
}

fn analysis_prompt() -> String {
    [
        "You are a professional hair colorist expert. Analyze this client's hair from the photo and provide a detailed diagnosis.",
        "Respond ONLY with a bare JSON object, no markdown fences, with string fields:",
        "naturalLevel, currentCosmeticLevel, dominantUndertone, grayPercentage, porosity, bandingZones, riskFlags, stylistNotes.",
        "For porosity use one of \"Low\", \"Medium\", or \"High\". For stylistNotes give a concise, actionable summary.",
    ]
    .join("\n")
}

fn plan_prompt(analysis: &HairAnalysis, target: &str) -> Result<String> {
    let analysis_json = serde_json::to_string_pretty(analysis)?;
    Ok(format!(
        "You are a master hairstylist and color formulator. Given the client hair \
analysis and target color below, create a detailed, brand-agnostic color plan. \
Output a single bare JSON object with fields: path (string), preLighten \
(object with product, ratio, zone, time, visualEndpoint, or null), tone \
(object with shades, ratio, developer, time, or null), fashionOverlay (object \
with shades, saturation, time, or null), steps (non-empty array of strings). \
Set any section that is not needed to null.\n\n\
Client Hair Analysis:\n{analysis_json}\n\nTarget Color:\n{target}"
    ))
}

fn inline_image_part(payload: &[u8], content_type: &str) -> Value {
    json!({
        "inlineData": {
            "mimeType": content_type,
            "data": BASE64.encode(payload),
        }
    })
}

/// Concatenates every text part across candidates; Gemini occasionally splits
/// one JSON payload over several parts.
fn extract_text(response: &Value) -> String {
    let mut out = String::new();
    for part in candidate_parts(response) {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            out.push_str(text);
        }
    }
    out.trim().to_string()
}

fn extract_inline_image(response: &Value) -> Option<Vec<u8>> {
    for part in candidate_parts(response) {
        let data = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
            .and_then(|inline| inline.get("data"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        if let Ok(bytes) = BASE64.decode(data.as_bytes()) {
            return Some(bytes);
        }
    }
    None
}

fn extract_grounding_sources(response: &Value) -> Vec<GroundedSource> {
    let chunks = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|candidate| candidate.get("groundingMetadata"))
        .and_then(|metadata| metadata.get("groundingChunks"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    chunks
        .iter()
        .filter_map(|chunk| chunk.get("web"))
        .filter_map(|web| {
            let uri = web.get("uri").and_then(Value::as_str)?;
            let title = web
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or(uri)
                .to_string();
            Some(GroundedSource {
                title,
                uri: uri.to_string(),
            })
        })
        .collect()
}

fn candidate_parts(response: &Value) -> Vec<Map<String, Value>> {
    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut out = Vec::new();
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(Value::as_object)
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            if let Some(obj) = part.as_object() {
                out.push(obj.clone());
            }
        }
    }
    out
}

fn render_placeholder_png(prompt: &str) -> Result<Vec<u8>> {
    let mut seed = 0u32;
    for byte in prompt.bytes() {
        seed = seed.wrapping_mul(31).wrapping_add(byte as u32);
    }
    let base = Rgb([
        (seed & 0xff) as u8,
        ((seed >> 8) & 0xff) as u8,
        ((seed >> 16) & 0xff) as u8,
    ]);
    let mut canvas = RgbImage::from_pixel(512, 512, base);
    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        if (x / 32 + y / 32) % 2 == 0 {
            *pixel = Rgb([
                pixel.0[0].wrapping_add(24),
                pixel.0[1].wrapping_add(24),
                pixel.0[2].wrapping_add(24),
            ]);
        }
    }
    let mut bytes = Vec::new();
    canvas
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .context("placeholder image encode failed")?;
    Ok(bytes)
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| {
                reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
            })
            .unwrap_or(false)
    })
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}…")
}

#[cfg(test)]
mod tests {
    use chromalab_contracts::validate::{validate_analysis, validate_plan};
    use chromalab_contracts::Porosity;
    use serde_json::json;

    use super::*;

    #[test]
    fn dryrun_payloads_pass_the_validator() -> Result<()> {
        let capability = DryrunCapability;
        let raw = capability.analyze_photo(b"bytes", "image/jpeg")?;
        let analysis = validate_analysis(&raw).unwrap();
        assert_eq!(analysis.porosity, Porosity::High);

        let raw = capability.generate_plan(&analysis, "Redken Shades EQ 09V")?;
        let plan = validate_plan(&raw).unwrap();
        assert!(plan.path.contains("Redken Shades EQ 09V"));
        assert!(!plan.steps.is_empty());
        Ok(())
    }

    #[test]
    fn dryrun_placeholder_renders_a_png() -> Result<()> {
        let bytes = DryrunCapability.generate_image("violet balayage", "3:4")?;
        assert_eq!(&bytes[1..4], b"PNG");
        Ok(())
    }

    #[test]
    fn extract_text_joins_split_parts_across_candidates() {
        let response = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"path\":" }, { "text": "\"corrective\"}" }] }
            }]
        });
        assert_eq!(extract_text(&response), "{\"path\":\"corrective\"}");
        assert_eq!(extract_text(&json!({})), "");
    }

    #[test]
    fn extract_inline_image_skips_empty_parts() {
        let encoded = BASE64.encode(b"img");
        let response = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "here you go" },
                    { "inlineData": { "mimeType": "image/png", "data": encoded } },
                ] }
            }]
        });
        assert_eq!(extract_inline_image(&response).unwrap(), b"img");
        assert!(extract_inline_image(&json!({})).is_none());
    }

    #[test]
    fn grounding_sources_fall_back_to_uri_for_title() {
        let response = json!({
            "candidates": [{
                "groundingMetadata": { "groundingChunks": [
                    { "web": { "uri": "https://example.com/a", "title": "Trend report" } },
                    { "web": { "uri": "https://example.com/b" } },
                    { "retrievedContext": { "uri": "ignored" } },
                ] }
            }]
        });
        let sources = extract_grounding_sources(&response);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].title, "Trend report");
        assert_eq!(sources[1].title, "https://example.com/b");
    }

    #[test]
    fn plan_prompt_embeds_analysis_and_target() -> Result<()> {
        let raw = DryrunCapability.analyze_photo(b"x", "image/png")?;
        let analysis = validate_analysis(&raw).unwrap();
        let prompt = plan_prompt(&analysis, "#B66FB3")?;
        assert!(prompt.contains("\"naturalLevel\""));
        assert!(prompt.contains("#B66FB3"));
        Ok(())
    }
}
