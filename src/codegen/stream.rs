//! Claude CLI `stream-json` output.
//!
//! Each stdout line is one JSON record. [`StreamReader`] yields decoded
//! records lazily and stops after the terminal `result` record or at end of
//! stream; [`collect_response`] folds them into the final answer.

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::debug;

use crate::errors::CodeGenError;

/// Events from Claude CLI's stream-json output format
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "system")]
    System {
        #[serde(default)]
        subtype: String,
    },

    #[serde(rename = "assistant")]
    Assistant { message: AssistantMessage },

    #[serde(rename = "user")]
    User,

    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        total_cost_usd: Option<f64>,
    },
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse { name: String, input: Value },

    #[serde(other)]
    Other,
}

impl AssistantMessage {
    /// Concatenated text blocks, or `None` if the message only used tools.
    pub fn text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        (!parts.is_empty()).then(|| parts.join("\n"))
    }
}

/// One-line summary of a tool call for debug logs.
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    let arg = |key: &str| input.get(key).and_then(Value::as_str);
    let target = match name {
        "Read" | "Write" | "Edit" => arg("file_path"),
        "Bash" => arg("command"),
        "Glob" | "Grep" => arg("pattern"),
        "Task" => arg("description"),
        _ => None,
    };
    match target {
        Some(t) => format!("{}: {}", name, truncate(t, 60)),
        None => name.to_string(),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

/// Lazily decodes stream-json records from a line source.
pub struct StreamReader<R> {
    lines: Lines<R>,
    finished: bool,
}

impl<R: AsyncBufRead + Unpin> StreamReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            finished: false,
        }
    }

    /// Next decoded record. Lines that are not records (blank lines, debug
    /// noise, unknown record types) are skipped.
    pub async fn next_event(&mut self) -> std::io::Result<Option<StreamEvent>> {
        if self.finished {
            return Ok(None);
        }

        while let Some(line) = self.lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<StreamEvent>(line) {
                Ok(event) => {
                    if matches!(event, StreamEvent::Result { .. }) {
                        self.finished = true;
                    }
                    return Ok(Some(event));
                }
                Err(e) => debug!(error = %e, "skipping non-event line"),
            }
        }

        self.finished = true;
        Ok(None)
    }
}

/// Consume the stream and produce the final response text.
pub async fn collect_response<R: AsyncBufRead + Unpin>(
    mut reader: StreamReader<R>,
) -> Result<String, CodeGenError> {
    let mut last_text: Option<String> = None;

    while let Some(event) = reader
        .next_event()
        .await
        .map_err(|e| CodeGenError::Other(e.into()))?
    {
        match event {
            StreamEvent::System { subtype } => debug!(subtype, "claude session event"),
            StreamEvent::Assistant { message } => {
                for block in &message.content {
                    if let ContentBlock::ToolUse { name, input } = block {
                        debug!("{}", describe_tool_use(name, input));
                    }
                }
                if let Some(text) = message.text() {
                    last_text = Some(text);
                }
            }
            StreamEvent::User => {}
            StreamEvent::Result {
                subtype,
                result,
                is_error,
                total_cost_usd,
            } => {
                debug!(subtype, cost_usd = ?total_cost_usd, "claude finished");
                if is_error {
                    return Err(CodeGenError::Reported(result.unwrap_or(subtype)));
                }
                return result
                    .filter(|r| !r.trim().is_empty())
                    .or(last_text)
                    .ok_or(CodeGenError::NoResult);
            }
        }
    }

    last_text.ok_or(CodeGenError::NoResult)
}
