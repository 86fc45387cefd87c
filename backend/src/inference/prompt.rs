use serde::Serialize;

pub const SYSTEM_INSTRUCTION: &str =
    "You are an AI assistant that identifies items for recycling and upcycling. Return JSON only.";

pub const USER_INSTRUCTION: &str = "Identify this item. Reply with JSON in the form \
     {\"objectName\": string, \"category\": string, \"material\": string, \"estimatedCoins\": number}.";

/// Chat-completions request body understood by the llama.cpp server.
#[derive(Debug, Clone, Serialize)]
pub struct ChatPrompt {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    ImageUrl { image_url: ImageUrl },
    Text { text: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ChatPrompt {
    pub fn for_image(image_url: String, max_tokens: u32) -> Self {
        Self {
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: MessageContent::Text(SYSTEM_INSTRUCTION.to_string()),
                },
                ChatMessage {
                    role: Role::User,
                    content: MessageContent::Parts(vec![
                        ContentPart::ImageUrl {
                            image_url: ImageUrl { url: image_url },
                        },
                        ContentPart::Text {
                            text: USER_INSTRUCTION.to_string(),
                        },
                    ]),
                },
            ],
            max_tokens,
            temperature: 0.1,
        }
    }
}
