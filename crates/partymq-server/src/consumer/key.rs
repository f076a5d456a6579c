//! Partition key extraction

use crate::broker::Headers;
use serde_json::Value;

/// Where the partition key is read from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum KeySource {
    /// A string message header
    #[default]
    Header,
    /// A top-level string field of a JSON body
    Body,
}

#[derive(Debug, Clone)]
pub struct KeyExtractor {
    source: KeySource,
    name: String,
}

impl KeyExtractor {
    pub fn new(source: KeySource, name: impl Into<String>) -> Self {
        Self {
            source,
            name: name.into(),
        }
    }

    /// Partition key of a message. Missing or non-string values yield the
    /// empty key.
    pub fn extract(&self, headers: &Headers, body: &[u8]) -> String {
        let key = match self.source {
            KeySource::Header => headers
                .get(&self.name)
                .and_then(|value| value.as_str())
                .map(str::to_string),
            KeySource::Body => serde_json::from_slice::<Value>(body)
                .ok()
                .and_then(|value| value.get(self.name.as_str())?.as_str().map(str::to_string)),
        };
        key.unwrap_or_default()
    }
}
