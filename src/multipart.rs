//! Manual `multipart/form-data` decoding.
//!
//! The browser widget sends two kinds of fields: text (`chatInput`,
//! `sessionId`) and image attachments named `photo_*`. The decoder is a small
//! explicit state machine over byte slices; it never does string-level
//! substring search on the body, so CR/LF bytes inside file content cannot
//! confuse it. Only the first attachment is kept in memory (it gets promoted
//! into the outbound payload); the rest are spooled to scratch files that are
//! removed at the end of the request.

use std::path::PathBuf;

use memchr::memmem;

use crate::error::ProxyError;
use crate::tempfiles::TempFileSet;

/// Text field ceilings, in characters. Caps the outbound payload size.
pub const MAX_CHAT_INPUT_CHARS: usize = 1000;
pub const MAX_SESSION_ID_CHARS: usize = 100;

/// Extract the boundary token from a `multipart/form-data` content-type
/// header. Returns `None` when the header carries no usable boundary, which
/// is fatal for the whole request.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    for param in content_type.split(';').map(str::trim) {
        if param.len() < 9 || !param[..9].eq_ignore_ascii_case("boundary=") {
            continue;
        }
        let token = param[9..].trim().trim_matches('"');
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    None
}

/// Raw bytes of one attachment: the promoted one stays in memory, overflow
/// attachments live in scratch files owned by the request's [`TempFileSet`].
#[derive(Debug)]
pub enum AttachmentData {
    Memory(Vec<u8>),
    Spooled { path: PathBuf, len: u64 },
}

#[derive(Debug)]
pub struct FileAttachment {
    pub filename: String,
    /// Inferred purely from the filename suffix; no content sniffing.
    pub mime_type: &'static str,
    pub data: AttachmentData,
}

impl FileAttachment {
    pub fn len(&self) -> u64 {
        match &self.data {
            AttachmentData::Memory(bytes) => bytes.len() as u64,
            AttachmentData::Spooled { len, .. } => *len,
        }
    }

    /// In-memory bytes, if this attachment was not spooled.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.data {
            AttachmentData::Memory(bytes) => Some(bytes),
            AttachmentData::Spooled { .. } => None,
        }
    }
}

/// Structured result of decoding one multipart body.
#[derive(Debug, Default)]
pub struct ParsedForm {
    pub chat_input: String,
    pub session_id: Option<String>,
    pub attachments: Vec<FileAttachment>,
}

impl ParsedForm {
    pub fn is_empty(&self) -> bool {
        self.chat_input.trim().is_empty() && self.attachments.is_empty()
    }
}

pub fn mime_from_filename(filename: &str) -> &'static str {
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekBoundary,
    ReadHeaders,
    ReadBody,
    Done,
}

/// Name/filename pulled from one part's `Content-Disposition` header.
#[derive(Debug, Default)]
struct Disposition {
    name: Option<String>,
    filename: Option<String>,
}

/// Decode `body` against `boundary`. A part lacking the blank-line separator
/// between headers and content is skipped with a warning; a body with no
/// recognizable parts yields an empty form (the handler decides whether that
/// is an error). Attachments beyond `max_files` are dropped.
pub fn decode(
    body: &[u8],
    boundary: &str,
    max_files: usize,
    scratch: &mut TempFileSet,
) -> Result<ParsedForm, ProxyError> {
    let delim = format!("--{}", boundary).into_bytes();
    let finder = memmem::Finder::new(&delim);

    let mut form = ParsedForm::default();
    let mut state = State::SeekBoundary;
    let mut cursor = 0usize;
    let mut disposition = Disposition::default();
    let mut content_start = 0usize;

    while state != State::Done {
        match state {
            State::SeekBoundary => match finder.find(&body[cursor..]) {
                None => state = State::Done,
                Some(off) => {
                    let after = cursor + off + delim.len();
                    if body[after..].starts_with(b"--") {
                        // Closing delimiter.
                        state = State::Done;
                    } else {
                        match memmem::find(&body[after..], b"\r\n") {
                            None => state = State::Done,
                            Some(nl) => {
                                cursor = after + nl + 2;
                                state = State::ReadHeaders;
                            }
                        }
                    }
                }
            },
            State::ReadHeaders => {
                let part_end = finder
                    .find(&body[cursor..])
                    .map(|off| cursor + off)
                    .unwrap_or(body.len());
                match memmem::find(&body[cursor..part_end], b"\r\n\r\n") {
                    None => {
                        tracing::warn!("multipart part without header separator; skipping");
                        cursor = part_end;
                        state = State::SeekBoundary;
                    }
                    Some(sep) => {
                        disposition = parse_disposition(&body[cursor..cursor + sep]);
                        content_start = cursor + sep + 4;
                        state = State::ReadBody;
                    }
                }
            }
            State::ReadBody => {
                let part_end = finder
                    .find(&body[content_start..])
                    .map(|off| content_start + off)
                    .unwrap_or(body.len());
                let mut content = &body[content_start..part_end];
                // The CRLF before the next delimiter belongs to the delimiter.
                if content.ends_with(b"\r\n") {
                    content = &content[..content.len() - 2];
                }
                commit_field(&mut form, &disposition, content, max_files, scratch)?;
                cursor = part_end;
                state = State::SeekBoundary;
            }
            State::Done => unreachable!(),
        }
    }

    Ok(form)
}

fn commit_field(
    form: &mut ParsedForm,
    disposition: &Disposition,
    content: &[u8],
    max_files: usize,
    scratch: &mut TempFileSet,
) -> Result<(), ProxyError> {
    let name = match disposition.name.as_deref() {
        Some(n) => n,
        None => return Ok(()),
    };
    match name {
        "chatInput" => {
            let text = String::from_utf8_lossy(content);
            form.chat_input = truncate_chars(text.trim(), MAX_CHAT_INPUT_CHARS);
        }
        "sessionId" => {
            let text = String::from_utf8_lossy(content);
            form.session_id = Some(truncate_chars(text.trim(), MAX_SESSION_ID_CHARS));
        }
        n if n.starts_with("photo_") => {
            let filename = match disposition.filename.as_deref() {
                Some(f) if !f.is_empty() => f,
                // A photo field without a filename is not an attachment.
                _ => return Ok(()),
            };
            if form.attachments.len() >= max_files {
                tracing::warn!(field = %n, "attachment limit reached; dropping file part");
                return Ok(());
            }
            let mime_type = mime_from_filename(filename);
            let data = if form.attachments.is_empty() {
                // First attachment gets promoted into the payload; keep it hot.
                AttachmentData::Memory(content.to_vec())
            } else {
                let (path, len) = scratch.spool(content)?;
                AttachmentData::Spooled { path, len }
            };
            form.attachments.push(FileAttachment {
                filename: filename.to_string(),
                mime_type,
                data,
            });
        }
        other => {
            tracing::debug!(field = %other, "ignoring unknown multipart field");
        }
    }
    Ok(())
}

fn parse_disposition(header_block: &[u8]) -> Disposition {
    let text = String::from_utf8_lossy(header_block);
    for line in text.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("content-disposition") {
            continue;
        }
        let mut disposition = Disposition::default();
        for param in value.split(';').map(str::trim) {
            if let Some(v) = param.strip_prefix("name=") {
                disposition.name = Some(v.trim_matches('"').to_string());
            } else if let Some(v) = param.strip_prefix("filename=") {
                disposition.filename = Some(v.trim_matches('"').to_string());
            }
        }
        return disposition;
    }
    Disposition::default()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
