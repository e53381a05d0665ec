//! Request line builder.
//!
//! Produces one self-describing inference request per document: correlation
//! id, system instruction, user turn (image then conversation text) and the
//! strict output schema the service must conform to. Pure: no I/O.

use serde::Serialize;
use serde_json::{json, Value};

use super::error::BatchError;
use super::types::RequestLine;

pub const REQUEST_METHOD: &str = "POST";
pub const CHAT_COMPLETIONS_URL: &str = "/v1/chat/completions";
pub const MAX_OUTPUT_TOKENS: u32 = 8000;
pub const RESPONSE_SCHEMA_NAME: &str = "GPTOutputSchema";

#[derive(Serialize)]
struct RequestEnvelope<'a> {
    custom_id: &'a str,
    method: &'static str,
    url: &'static str,
    body: RequestBody<'a>,
}

#[derive(Serialize)]
struct RequestBody<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    response_format: &'a Value,
    max_tokens: u32,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: MessageContent<'a>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    ImageUrl { image_url: ImageUrl },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

/// Strict JSON schema for `{document_representation, conversation_translation}`.
pub fn response_format() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": RESPONSE_SCHEMA_NAME,
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "document_representation": {
                        "type": "string",
                        "description": "YAML representation of the CV outputted as a string"
                    },
                    "conversation_translation": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "type": { "type": "string", "enum": ["assistant", "user"] },
                                "content": { "type": "string" }
                            },
                            "required": ["type", "content"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["document_representation", "conversation_translation"],
                "additionalProperties": false
            }
        }
    })
}

/// Builds request lines for one model and system instruction.
pub struct RequestLineBuilder {
    system_prompt: String,
    model: String,
    response_format: Value,
}

impl RequestLineBuilder {
    pub fn new(system_prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            model: model.into(),
            response_format: response_format(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Serialize one request. `image_png_base64` is omitted from the user
    /// turn when the source document could not be rendered.
    ///
    /// Fails only on an empty or whitespace-only document id.
    pub fn build(
        &self,
        document_id: &str,
        image_png_base64: Option<&str>,
        conversation: &str,
    ) -> Result<RequestLine, BatchError> {
        if document_id.trim().is_empty() {
            return Err(BatchError::InvalidRequest(
                "document id must not be empty".into(),
            ));
        }

        let mut parts = Vec::with_capacity(2);
        if let Some(image) = image_png_base64 {
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:image/png;base64,{image}"),
                },
            });
        }
        parts.push(ContentPart::Text { text: conversation });

        let envelope = RequestEnvelope {
            custom_id: document_id,
            method: REQUEST_METHOD,
            url: CHAT_COMPLETIONS_URL,
            body: RequestBody {
                model: &self.model,
                messages: [
                    ChatMessage {
                        role: "system",
                        content: MessageContent::Text(&self.system_prompt),
                    },
                    ChatMessage {
                        role: "user",
                        content: MessageContent::Parts(parts),
                    },
                ],
                response_format: &self.response_format,
                max_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        Ok(RequestLine {
            document_id: document_id.to_string(),
            payload: serde_json::to_string(&envelope)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> RequestLineBuilder {
        RequestLineBuilder::new("be helpful", "gpt-4o-mini")
    }

    fn parse(line: &RequestLine) -> Value {
        serde_json::from_str(&line.payload).unwrap()
    }

    #[test]
    fn envelope_carries_correlation_id_and_endpoint() {
        let line = builder().build("doc1", Some("AAAA"), "hello").unwrap();
        let v = parse(&line);
        assert_eq!(line.document_id, "doc1");
        assert_eq!(v["custom_id"], "doc1");
        assert_eq!(v["method"], "POST");
        assert_eq!(v["url"], "/v1/chat/completions");
        assert_eq!(v["body"]["model"], "gpt-4o-mini");
        assert_eq!(v["body"]["max_tokens"], 8000);
    }

    #[test]
    fn user_turn_has_image_before_text() {
        let v = parse(&builder().build("doc1", Some("AAAA"), "hello").unwrap());
        let messages = v["body"]["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "be helpful");

        let parts = messages[1]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["type"], "image_url");
        assert_eq!(parts[0]["image_url"]["url"], "data:image/png;base64,AAAA");
        assert_eq!(parts[1]["type"], "text");
        assert_eq!(parts[1]["text"], "hello");
    }

    #[test]
    fn missing_image_leaves_only_text() {
        let v = parse(&builder().build("doc1", None, "").unwrap());
        let parts = v["body"]["messages"][1]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0]["text"], "");
    }

    #[test]
    fn schema_is_strict_and_closed() {
        let v = parse(&builder().build("doc1", None, "x").unwrap());
        let format = &v["body"]["response_format"];
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["name"], RESPONSE_SCHEMA_NAME);
        assert_eq!(format["json_schema"]["strict"], true);
        let schema = &format["json_schema"]["schema"];
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(
            schema["properties"]["conversation_translation"]["items"]["properties"]["type"]["enum"],
            json!(["assistant", "user"])
        );
    }

    #[test]
    fn build_is_deterministic() {
        let a = builder().build("doc1", Some("AAAA"), "hello").unwrap();
        let b = builder().build("doc1", Some("AAAA"), "hello").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn payload_is_a_single_line() {
        let line = builder().build("doc1", None, "line one\nline two").unwrap();
        assert!(!line.payload.contains('\n'));
    }

    #[test]
    fn empty_id_is_rejected() {
        assert!(matches!(
            builder().build("", None, "hello"),
            Err(BatchError::InvalidRequest(_))
        ));
        assert!(builder().build("   ", None, "hello").is_err());
    }
}
