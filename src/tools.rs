//! The closed set of tools exposed to the model.
//!
//! Tool failures (bad arguments, upstream errors, unknown names) are
//! reported back to the model as `Error: ...` result strings so a single
//! bad call never aborts the reply.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::llm::OpenAiClient;
use crate::models::ToolCall;

/// A tool definition in the OpenAI function-calling format.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub spec_type: String,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// What one tool call produced: the result string handed back to the
/// model, plus any image URLs it generated.
pub struct ToolOutput {
    pub content: String,
    pub image_urls: Vec<String>,
}

impl ToolOutput {
    fn text(content: impl Into<String>) -> Self {
        ToolOutput {
            content: content.into(),
            image_urls: Vec::new(),
        }
    }
}

fn spec(name: &str, description: &str, parameters: serde_json::Value) -> ToolSpec {
    ToolSpec {
        spec_type: "function".to_string(),
        function: ToolFunction {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        },
    }
}

/// Definitions for every available tool, sent with each chat request.
pub fn definitions() -> Vec<ToolSpec> {
    vec![
        spec(
            "get_current_time",
            "Get the current date and time in RFC 3339 format.",
            json!({"type": "object", "properties": {}}),
        ),
        spec(
            "get_version",
            "Get the version of the bot software.",
            json!({"type": "object", "properties": {}}),
        ),
        spec(
            "get_random_number",
            "Get a random integer between min and max, inclusive.",
            json!({
                "type": "object",
                "properties": {
                    "min": {
                        "type": "integer",
                        "description": "Lower bound, inclusive. Defaults to 0."
                    },
                    "max": {
                        "type": "integer",
                        "description": "Upper bound, inclusive. Defaults to 100."
                    }
                }
            }),
        ),
        spec(
            "get_weather",
            "Get the current weather conditions at a location.",
            json!({
                "type": "object",
                "properties": {
                    "latitude": {
                        "type": "number",
                        "description": "Latitude of the location in decimal degrees."
                    },
                    "longitude": {
                        "type": "number",
                        "description": "Longitude of the location in decimal degrees."
                    }
                },
                "required": ["latitude", "longitude"]
            }),
        ),
        spec(
            "generate_image",
            "Generate an image from a text prompt. The image is attached \
             to the reply automatically.",
            json!({
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "Description of the image to generate."
                    }
                },
                "required": ["prompt"]
            }),
        ),
    ]
}

/// Run one requested tool call. Never fails: errors come back as the
/// result string the model sees.
pub async fn run_tool(llm: &OpenAiClient, call: &ToolCall) -> ToolOutput {
    match execute(llm, call).await {
        Ok(output) => output,
        Err(e) => {
            warn!(tool = %call.function.name, error = %format!("{e:#}"), "tool call failed");
            ToolOutput::text(format!("Error: {e:#}"))
        }
    }
}

async fn execute(llm: &OpenAiClient, call: &ToolCall) -> Result<ToolOutput> {
    let args = if call.function.arguments.trim().is_empty() {
        json!({})
    } else {
        call.function.arguments_json()?
    };

    match call.function.name.as_str() {
        "get_current_time" => Ok(ToolOutput::text(chrono::Local::now().to_rfc3339())),
        "get_version" => Ok(ToolOutput::text(env!("CARGO_PKG_VERSION"))),
        "get_random_number" => {
            let min = args.get("min").and_then(|v| v.as_i64()).unwrap_or(0);
            let max = args.get("max").and_then(|v| v.as_i64()).unwrap_or(100);
            Ok(ToolOutput::text(random_between(min, max).to_string()))
        }
        "get_weather" => {
            let latitude = args
                .get("latitude")
                .and_then(|v| v.as_f64())
                .ok_or_else(|| anyhow!("get_weather requires a latitude"))?;
            let longitude = args
                .get("longitude")
                .and_then(|v| v.as_f64())
                .ok_or_else(|| anyhow!("get_weather requires a longitude"))?;
            Ok(ToolOutput::text(fetch_weather(latitude, longitude).await?))
        }
        "generate_image" => {
            let prompt = args
                .get("prompt")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("generate_image requires a prompt"))?;
            let url = llm.generate_image(prompt).await?;
            Ok(ToolOutput {
                content: "Image generated; it will be attached to the reply.".to_string(),
                image_urls: vec![url],
            })
        }
        other => bail!("unknown tool: {}", other),
    }
}

/// Random integer in the inclusive range, with swapped bounds tolerated.
fn random_between(min: i64, max: i64) -> i64 {
    let (lo, hi) = if min > max { (max, min) } else { (min, max) };
    rand::thread_rng().gen_range(lo..=hi)
}

/// Current conditions from the Open-Meteo forecast API, as compact JSON.
async fn fetch_weather(latitude: f64, longitude: f64) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let url = format!(
        "https://api.open-meteo.com/v1/forecast\
         ?latitude={latitude}&longitude={longitude}\
         &current=temperature_2m,relative_humidity_2m,weather_code,wind_speed_10m"
    );

    let resp = client.get(&url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        bail!("weather API error {}", status);
    }

    let body: serde_json::Value = resp.json().await?;
    let current = body
        .get("current")
        .cloned()
        .ok_or_else(|| anyhow!("weather response missing current conditions"))?;
    Ok(serde_json::to_string(&current)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_cover_the_closed_set() {
        let names: Vec<String> = definitions()
            .into_iter()
            .map(|s| s.function.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "get_current_time",
                "get_version",
                "get_random_number",
                "get_weather",
                "generate_image",
            ]
        );
    }

    #[test]
    fn tool_specs_serialize_as_functions() {
        let json = serde_json::to_value(definitions()).unwrap();
        assert_eq!(json[0]["type"], "function");
        assert!(json[0]["function"]["parameters"].is_object());
    }

    #[test]
    fn random_between_tolerates_swapped_bounds() {
        for _ in 0..50 {
            let value = random_between(10, 3);
            assert!((3..=10).contains(&value));
        }
    }

    #[test]
    fn random_between_handles_equal_bounds() {
        assert_eq!(random_between(7, 7), 7);
    }
}
