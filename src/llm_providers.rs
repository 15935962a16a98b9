use anyhow::Result;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use tracing::{error, info};

/// Image attached to a vision request
#[derive(Debug, Clone)]
pub struct ImageInput<'a> {
    pub bytes: &'a [u8],
    pub mime_type: &'a str,
}

impl ImageInput<'_> {
    fn base64(&self) -> String {
        BASE64.encode(self.bytes)
    }
}

/// Enum-based provider so the service can be cloned freely
#[derive(Debug, Clone)]
pub enum LLMProvider {
    OpenAI(OpenAIProvider),
    Gemini(GeminiProvider),
}

impl LLMProvider {
    /// Text request with an optional system message; the reply is expected to be JSON.
    pub async fn make_request(&self, system_message: Option<&str>, prompt: &str) -> Result<String> {
        match self {
            LLMProvider::OpenAI(provider) => provider.make_request(system_message, prompt).await,
            LLMProvider::Gemini(provider) => provider.make_request(system_message, prompt).await,
        }
    }

    pub async fn make_vision_request(&self, prompt: &str, image: ImageInput<'_>) -> Result<String> {
        match self {
            LLMProvider::OpenAI(provider) => provider.make_vision_request(prompt, image).await,
            LLMProvider::Gemini(provider) => provider.make_vision_request(prompt, image).await,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            LLMProvider::OpenAI(_) => "OpenAI",
            LLMProvider::Gemini(_) => "Gemini",
        }
    }

    pub fn model_name(&self) -> &str {
        match self {
            LLMProvider::OpenAI(provider) => &provider.model,
            LLMProvider::Gemini(provider) => &provider.model,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    vision_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

impl OpenAIProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>, vision_model: Option<String>) -> Self {
        let model = model.unwrap_or_else(|| "gpt-4o-mini".to_string());
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            vision_model: vision_model.unwrap_or_else(|| model.clone()),
            model,
        }
    }

    pub async fn make_request(&self, system_message: Option<&str>, prompt: &str) -> Result<String> {
        let mut messages = Vec::new();
        if let Some(sys_msg) = system_message {
            messages.push(json!({"role": "system", "content": sys_msg}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.5,
            "response_format": {"type": "json_object"},
        });

        info!(
            provider = "OpenAI",
            model = %self.model,
            base_url = %self.base_url,
            prompt_length = prompt.len(),
            "Making LLM request"
        );
        self.send(body).await
    }

    pub async fn make_vision_request(&self, prompt: &str, image: ImageInput<'_>) -> Result<String> {
        let body = json!({
            "model": self.vision_model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": prompt},
                    {
                        "type": "image_url",
                        "image_url": {"url": format!("data:{};base64,{}", image.mime_type, image.base64())}
                    }
                ]
            }],
            "response_format": {"type": "json_object"},
        });

        info!(
            provider = "OpenAI",
            model = %self.vision_model,
            image_bytes = image.bytes.len(),
            "Making LLM vision request"
        );
        self.send(body).await
    }

    async fn send(&self, body: Value) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                provider = "OpenAI",
                status = %status,
                error = %error_text,
                "LLM API request failed"
            );
            return Err(anyhow::anyhow!("OpenAI API request failed ({}): {}", status, error_text));
        }

        let parsed: OpenAIResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("No content in OpenAI response"))?;

        info!(
            provider = "OpenAI",
            response_length = content.len(),
            "Received LLM response"
        );
        Ok(content)
    }
}

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiTextPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiTextPart {
    #[serde(default)]
    text: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            model: model.unwrap_or_else(|| "gemini-2.0-flash".to_string()),
        }
    }

    pub async fn make_request(&self, system_message: Option<&str>, prompt: &str) -> Result<String> {
        let full_prompt = match system_message {
            Some(sys_msg) => format!("{}\n\n{}", sys_msg, prompt),
            None => prompt.to_string(),
        };

        info!(
            provider = "Gemini",
            model = %self.model,
            base_url = %self.base_url,
            prompt_length = prompt.len(),
            "Making LLM request"
        );
        self.send(json!([{"text": full_prompt}])).await
    }

    pub async fn make_vision_request(&self, prompt: &str, image: ImageInput<'_>) -> Result<String> {
        info!(
            provider = "Gemini",
            model = %self.model,
            image_bytes = image.bytes.len(),
            "Making LLM vision request"
        );
        self.send(json!([
            {"text": prompt},
            {"inline_data": {"mime_type": image.mime_type, "data": image.base64()}}
        ]))
        .await
    }

    async fn send(&self, parts: Value) -> Result<String> {
        let body = json!({
            "contents": [{"parts": parts}],
            "generationConfig": {
                "temperature": 0.5,
                "maxOutputTokens": 2048,
                "responseMimeType": "application/json"
            }
        });

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                provider = "Gemini",
                status = %status,
                error = %error_text,
                "LLM API request failed"
            );
            return Err(anyhow::anyhow!("Gemini API request failed ({}): {}", status, error_text));
        }

        let parsed: GeminiResponse = response.json().await?;
        let content = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or_else(|| anyhow::anyhow!("No candidates in Gemini response"))?;

        info!(
            provider = "Gemini",
            response_length = content.len(),
            "Received LLM response"
        );
        Ok(content)
    }
}

/// Pulls JSON out of model replies that may wrap it in markdown or prose
#[derive(Clone)]
pub struct JsonResponseParser;

impl JsonResponseParser {
    pub fn extract_json_from_response(content: &str) -> String {
        if let Some(start) = content.find("```json") {
            if let Some(end) = content[start + 7..].find("```") {
                let json_start = start + 7;
                return content[json_start..json_start + end].trim().to_string();
            }
        }

        if let Some(start) = content.find("```") {
            if let Some(end) = content[start + 3..].find("```") {
                let json_start = start + 3;
                let candidate = content[json_start..json_start + end].trim();
                if candidate.starts_with('{') || candidate.starts_with('[') {
                    return candidate.to_string();
                }
            }
        }

        // Whichever bracket opens first decides between object and array.
        let object_start = content.find('{');
        let array_start = content.find('[');
        let (open, close) = match (object_start, array_start) {
            (Some(o), Some(a)) if a < o => ('[', ']'),
            (None, Some(_)) => ('[', ']'),
            _ => ('{', '}'),
        };
        if let (Some(start), Some(end)) = (content.find(open), content.rfind(close)) {
            if end > start {
                return content[start..=end].to_string();
            }
        }

        content.trim().to_string()
    }

    pub fn parse_json_response<T>(&self, content: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let json_content = Self::extract_json_from_response(content);
        serde_json::from_str::<T>(&json_content)
            .map_err(|e| anyhow::anyhow!("Failed to parse JSON response: {}", e))
    }
}

pub struct LLMProviderFactory;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LLMProviderType {
    OpenAI,
    Gemini,
}

impl fmt::Display for LLMProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LLMProviderType::OpenAI => write!(f, "openai"),
            LLMProviderType::Gemini => write!(f, "gemini"),
        }
    }
}

impl LLMProviderFactory {
    pub fn create_provider(
        provider_type: LLMProviderType,
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        vision_model: Option<String>,
    ) -> LLMProvider {
        match provider_type {
            LLMProviderType::OpenAI => {
                LLMProvider::OpenAI(OpenAIProvider::new(api_key, base_url, model, vision_model))
            }
            // Gemini models accept images directly, so one model serves both.
            LLMProviderType::Gemini => LLMProvider::Gemini(GeminiProvider::new(api_key, base_url, model)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_markdown_block() {
        let content = "Here you go:\n```json\n{\"items\": []}\n```\nEnjoy";
        assert_eq!(JsonResponseParser::extract_json_from_response(content), "{\"items\": []}");
    }

    #[test]
    fn test_extract_json_from_plain_block_and_prose() {
        let block = "```\n[1, 2]\n```";
        assert_eq!(JsonResponseParser::extract_json_from_response(block), "[1, 2]");

        let prose = "Result: {\"hint\": \"think of 'hello'\"} done";
        assert_eq!(
            JsonResponseParser::extract_json_from_response(prose),
            "{\"hint\": \"think of 'hello'\"}"
        );
    }

    #[test]
    fn test_top_level_array_is_kept_whole() {
        let content = "[{\"a\": 1}, {\"a\": 2}]";
        assert_eq!(JsonResponseParser::extract_json_from_response(content), content);
    }

    #[test]
    fn test_parse_json_response_reports_errors() {
        let parser = JsonResponseParser;
        let value: Value = parser.parse_json_response("{\"ok\": true}").unwrap();
        assert_eq!(value["ok"], true);
        assert!(parser.parse_json_response::<Value>("not json at all").is_err());
    }

    #[test]
    fn test_factory_creates_requested_provider() {
        let openai = LLMProviderFactory::create_provider(
            LLMProviderType::OpenAI,
            "key".to_string(),
            None,
            None,
            Some("gpt-4o".to_string()),
        );
        assert_eq!(openai.provider_name(), "OpenAI");
        assert_eq!(openai.model_name(), "gpt-4o-mini");

        let gemini = LLMProviderFactory::create_provider(
            LLMProviderType::Gemini,
            "key".to_string(),
            None,
            Some("gemini-custom".to_string()),
            None,
        );
        assert_eq!(gemini.provider_name(), "Gemini");
        assert_eq!(gemini.model_name(), "gemini-custom");
    }

    #[test]
    fn test_image_input_is_base64_encoded() {
        let image = ImageInput { bytes: b"abc", mime_type: "image/png" };
        assert_eq!(image.base64(), "YWJj");
    }
}
