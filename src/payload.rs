//! Canonical JSON payload sent to the n8n webhook.
//!
//! JSON requests from the widget already carry this shape and pass through
//! untouched; multipart requests are normalized here. The builder is a pure
//! transform and always produces a structurally valid payload; rejecting an
//! empty request is the handler's call, not ours.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;

use crate::multipart::ParsedForm;

#[derive(Debug, Serialize)]
pub struct FileInfo {
    pub filename: String,
    pub size: u64,
    pub content_type: String,
}

#[derive(Debug, Serialize)]
pub struct OutboundPayload {
    #[serde(rename = "chatInput")]
    pub chat_input: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "hasImage")]
    pub has_image: bool,
    #[serde(rename = "hasFiles")]
    pub has_files: bool,
    /// Data URI of the first attachment only. Keeping a single inline image
    /// bounds payload size and bandwidth.
    #[serde(rename = "imageUrl", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(rename = "fileCount")]
    pub file_count: usize,
    pub files: Vec<FileInfo>,
    pub timestamp: String,
    pub client_ip: String,
}

pub fn build_payload(form: &ParsedForm, client_ip: &str) -> OutboundPayload {
    let files: Vec<FileInfo> = form
        .attachments
        .iter()
        .map(|att| FileInfo {
            filename: att.filename.clone(),
            size: att.len(),
            content_type: att.mime_type.to_string(),
        })
        .collect();

    let image_url = form.attachments.first().and_then(|att| {
        att.bytes()
            .map(|data| format!("data:{};base64,{}", att.mime_type, BASE64.encode(data)))
    });

    let mut chat_input = form.chat_input.clone();
    if !files.is_empty() {
        chat_input.push_str(&format!(" [עם {} קבצים]", files.len()));
    }

    let payload = OutboundPayload {
        chat_input,
        session_id: form
            .session_id
            .clone()
            .unwrap_or_else(|| "default".to_string()),
        has_image: image_url.is_some(),
        has_files: !files.is_empty(),
        image_url,
        file_count: files.len(),
        files,
        timestamp: chrono::Utc::now().to_rfc3339(),
        client_ip: client_ip.to_string(),
    };

    tracing::debug!(
        chat_input_preview = %preview(&payload.chat_input, 80),
        session_id = %payload.session_id,
        has_image = payload.has_image,
        file_count = payload.file_count,
        "built outbound payload"
    );

    payload
}

/// Bounded prefix for log lines; the image data URI is never logged.
fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}
