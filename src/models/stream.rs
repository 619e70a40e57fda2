use serde::{ Serialize, Deserialize };

pub const NDJSON: &str = "application/x-ndjson";

/// One line of the `application/x-ndjson` response stream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum StreamFrame {
    #[serde(rename = "text")] Text {
        delta: String,
    },
    #[serde(rename = "navigate")] Navigate {
        path: String,
    },
    #[serde(rename = "error")] Error {
        message: String,
    },
}

impl StreamFrame {
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            format!("{{\"type\":\"error\",\"message\":\"frame encoding failed: {}\"}}", e)
        });
        line.push('\n');
        line
    }
}
