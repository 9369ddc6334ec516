use serde::Serialize;
use serde_json::Value;

/// Snapshot of a stream's introspection data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StreamMetadata {
    pub timed_out: bool,
    pub blocked: bool,
    pub eof: bool,
    pub wrapper_type: String,
    pub stream_type: String,
    pub mode: String,
    pub unread_bytes: u64,
    pub seekable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl StreamMetadata {
    /// Look up a single key by its serialized name.
    pub fn get(&self, key: &str) -> Option<Value> {
        match serde_json::to_value(self).ok()? {
            Value::Object(mut map) => map.remove(key),
            _ => None,
        }
    }
}
