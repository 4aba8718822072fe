//! Vision-model detector speaking the OpenAI-compatible chat API
//! (LM Studio, Ollama's compatibility layer, OpenAI).

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{clamp_unit, Detection, DetectionOutcome, DetectionRequest, EquipmentDetector, Position};
use crate::config::DetectorConfig;
use crate::db::{LocationType, MetadataStore};
use crate::error::DetectionError;
use crate::storage::ObjectStore;

pub struct LlmDetector {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    min_confidence: f32,
    inline_images: bool,
    objects: Arc<dyn ObjectStore>,
    store: Arc<dyn MetadataStore>,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Shape the model is asked to answer with.
#[derive(Debug, Deserialize)]
struct EquipmentReply {
    #[serde(default)]
    equipment: Vec<EquipmentItem>,
}

#[derive(Debug, Deserialize)]
struct EquipmentItem {
    name: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default = "centre")]
    x: f32,
    #[serde(default = "centre")]
    y: f32,
    #[serde(default = "full_confidence")]
    confidence: f32,
}

fn centre() -> f32 {
    0.5
}

fn full_confidence() -> f32 {
    1.0
}

impl LlmDetector {
    pub fn from_config(
        config: &DetectorConfig,
        objects: Arc<dyn ObjectStore>,
        store: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            min_confidence: config.min_confidence,
            inline_images: config.inline_images,
            objects,
            store,
        }
    }

    async fn image_url(&self, request: &DetectionRequest) -> Result<String, DetectionError> {
        if !self.inline_images {
            return Ok(request.photo_url.clone());
        }
        let bytes = self.objects.get(&request.storage_path).await?;
        Ok(format!("data:image/jpeg;base64,{}", BASE64.encode(bytes)))
    }
}

#[async_trait]
impl EquipmentDetector for LlmDetector {
    async fn detect(&self, request: &DetectionRequest) -> Result<DetectionOutcome, DetectionError> {
        let chat = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: equipment_prompt(request.location_type),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: self.image_url(request).await?,
                        },
                    },
                ],
            }],
            max_tokens: 1500,
            temperature: 0.2,
        };

        let url = format!("{}/chat/completions", self.endpoint);
        let api_key = self.api_key.clone();
        let timeout = self.timeout;

        // ureq blocks; keep it off the runtime threads
        let content = tokio::task::spawn_blocking(move || send_chat(&url, api_key.as_deref(), timeout, &chat))
            .await
            .map_err(|e| DetectionError::Worker(e.to_string()))??;

        let detections = parse_detections(&content, self.min_confidence)?;

        tracing::debug!(
            photo_id = %request.photo_id,
            location_id = %request.location_id,
            count = detections.len(),
            "Equipment detected"
        );

        self.store.save_detections(request.photo_id, &detections).await?;

        Ok(DetectionOutcome {
            equipment_count: detections.len(),
            detections,
        })
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

fn send_chat(
    url: &str,
    api_key: Option<&str>,
    timeout: Duration,
    request: &ChatRequest,
) -> Result<String, DetectionError> {
    let agent = ureq::AgentBuilder::new().timeout(timeout).build();

    let mut req = agent.post(url).set("Content-Type", "application/json");
    if let Some(key) = api_key {
        req = req.set("Authorization", &format!("Bearer {}", key));
    }

    let response = req
        .send_json(request)
        .map_err(|e| DetectionError::Request(e.to_string()))?;

    let chat: ChatResponse = response
        .into_json()
        .map_err(|e| DetectionError::Parse(e.to_string()))?;

    chat.choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| DetectionError::Parse("empty response from model".to_string()))
}

fn equipment_hints(location_type: LocationType) -> &'static str {
    match location_type {
        LocationType::Home => {
            "dumbbells, kettlebells, resistance bands, yoga mats, benches, pull-up bars, \
             stationary bikes, treadmills, furniture usable for exercise"
        }
        LocationType::Gym => {
            "barbells, squat racks, power racks, benches, cable machines, plate-loaded and \
             selector machines, dumbbell racks, cardio machines, plates, kettlebells"
        }
        LocationType::Outdoor => {
            "pull-up bars, parallel bars, monkey bars, benches, stairs, low walls, \
             running tracks, street workout stations, trees or posts usable for anchoring"
        }
    }
}

fn equipment_prompt(location_type: LocationType) -> String {
    format!(
        r#"This photo shows a {} training space. List every piece of training equipment you can see.
Typical items for this kind of space: {}.

For each item provide:
1. "name": a short equipment name
2. "category": one of strength, cardio, functional, bodyweight, mobility, other
3. "x", "y": the item's centre as fractions of image width and height (0-1)
4. "confidence": your confidence (0-1)

Return the results as JSON in this exact format:
{{"equipment": [{{"name": "...", "category": "...", "x": 0.5, "y": 0.5, "confidence": 0.9}}]}}

If nothing is found, return: {{"equipment": []}}

Return ONLY the JSON, no other text."#,
        location_type,
        equipment_hints(location_type)
    )
}

/// Pull the JSON body out of a reply that may be wrapped in a code fence
/// or surrounded by prose.
fn extract_json(content: &str) -> &str {
    let trimmed = content.trim();

    if trimmed.starts_with("```") {
        if let Some(start) = trimmed.find('\n') {
            let body = &trimmed[start + 1..];
            if let Some(end) = body.rfind("```") {
                return body[..end].trim();
            }
        }
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn parse_detections(content: &str, min_confidence: f32) -> Result<Vec<Detection>, DetectionError> {
    let reply: EquipmentReply = serde_json::from_str(extract_json(content))
        .map_err(|e| DetectionError::Parse(format!("{} - response was: {}", e, content)))?;

    Ok(reply
        .equipment
        .into_iter()
        .filter_map(|item| {
            let label = item.name.trim();
            let confidence = clamp_unit(item.confidence);
            if label.is_empty() || confidence < min_confidence {
                return None;
            }
            Some(Detection {
                label: label.to_string(),
                category: item
                    .category
                    .map(|c| c.trim().to_lowercase())
                    .filter(|c| !c.is_empty()),
                position: Position::clamped(item.x, item.y),
                confidence,
            })
        })
        .collect())
}
