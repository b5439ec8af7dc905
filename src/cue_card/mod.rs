//! Cue-card supplier client.
//!
//! Part 2 prompts come from the agent backend's one-shot generateContent
//! endpoint as `{topic, bulletPoints}` JSON, optionally pinned to a
//! specific Cambridge book and test. The core only reads the card to build
//! the session instruction; authoring and storage stay out of scope.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;

/// Part 2 prompt: topic plus the ordered talking points. Immutable once
/// fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CueCard {
    pub topic: String,
    pub bullet_points: Vec<String>,
}

/// A specific Cambridge practice-test to imitate.
#[derive(Debug, Clone, Copy)]
pub struct CambridgeContext {
    pub book: u32,
    pub test: u32,
}

fn build_prompt(context: Option<CambridgeContext>) -> String {
    let context_prompt = match context {
        Some(c) => format!(
            "Simulate a Part 2 cue card from Cambridge IELTS Book {}, Test {}.",
            c.book, c.test
        ),
        None => "Generate a standard high-quality IELTS Speaking Part 2 cue card topic.".to_string(),
    };
    format!(
        "{context_prompt} Return a JSON object with 'topic' and 'bulletPoints' (array of 4 strings)."
    )
}

fn response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "OBJECT",
        "properties": {
            "topic": {"type": "STRING"},
            "bulletPoints": {"type": "ARRAY", "items": {"type": "STRING"}}
        },
        "required": ["topic", "bulletPoints"]
    })
}

/// Fetch a fresh cue card from the supplier.
pub async fn fetch_cue_card(
    client: &reqwest::Client,
    config: &Config,
    context: Option<CambridgeContext>,
) -> anyhow::Result<CueCard> {
    let api_key = config
        .api_key
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("no API key configured"))?;

    let url = format!(
        "{}/models/{}:generateContent",
        config.rest_endpoint, config.cue_card_model
    );
    let body = serde_json::json!({
        "contents": [{"parts": [{"text": build_prompt(context)}]}],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": response_schema(),
        },
    });

    debug!(model = %config.cue_card_model, "Requesting cue card");

    let resp = client
        .post(&url)
        .header("x-goog-api-key", api_key)
        .json(&body)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("cue card request failed with {}: {}", status, body);
    }

    let json: serde_json::Value = resp.json().await?;
    parse_cue_card_response(&json)
}

/// Pull the JSON cue card out of a generateContent response envelope.
fn parse_cue_card_response(json: &serde_json::Value) -> anyhow::Result<CueCard> {
    let text = json["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("cue card response carried no text part"))?;
    let card: CueCard = serde_json::from_str(text)?;
    Ok(card)
}
