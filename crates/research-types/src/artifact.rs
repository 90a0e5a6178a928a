use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub reasoning: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub job_id: Uuid,
    pub markdown_body: String,
    pub citations: Vec<Citation>,
    pub token_usage: TokenUsage,
    pub provider_raw: Value,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// First `words` words of the markdown body, used by the campaign
    /// Context Builder to summarize a prior phase for the next one.
    pub fn leading_words(&self, words: usize) -> String {
        self.markdown_body
            .split_whitespace()
            .take(words)
            .collect::<Vec<_>>()
            .join(" ")
    }
}
