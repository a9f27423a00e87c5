use chrono::DateTime;
use inflections::case::to_title_case;

use crate::mime;

pub const UNREAD_LABEL: &str = "UNREAD";

const SNIPPET_MAX_CHARS: usize = 80;
const SNIPPET_KEEP_CHARS: usize = 77;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub id: String,
    pub name: String,
    pub label_type: String, // 'system' or 'user'
    pub display_name: String,
}

impl Label {
    pub fn new(id: impl Into<String>, name: impl Into<String>, label_type: impl Into<String>) -> Self {
        let name = name.into();
        let label_type = label_type.into();
        // System labels come back as INBOX, CATEGORY_SOCIAL, ...
        let display_name = if label_type == "system" {
            to_title_case(&name.replace('_', " ").to_lowercase())
        } else {
            name.clone()
        };
        Self {
            id: id.into(),
            name,
            label_type,
            display_name,
        }
    }
}

/// How much of a message the gateway should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    /// Id, labels and snippet only.
    Minimal,
    /// Minimal plus headers.
    Metadata,
    /// Headers and the whole MIME tree.
    Full,
}

impl Detail {
    pub fn as_str(self) -> &'static str {
        match self {
            Detail::Minimal => "minimal",
            Detail::Metadata => "metadata",
            Detail::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartBody {
    /// Body data in its wire form (base64url text).
    pub data: Option<String>,
    pub attachment_id: Option<String>,
    pub size: i64,
}

/// One node of a message's MIME tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MimePart {
    pub mime_type: String,
    pub filename: String,
    pub headers: Vec<(String, String)>,
    pub body: PartBody,
    pub parts: Vec<MimePart>,
}

impl MimePart {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A message as handed back by the gateway, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedMessage {
    pub id: String,
    pub thread_id: String,
    pub snippet: String,
    pub label_ids: Vec<String>,
    pub payload: Option<MimePart>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentInfo {
    pub filename: String,
    pub size: i64,
    pub attachment_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageSummary {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub snippet: String,
    pub date: String,
    pub labels: Vec<String>,
    pub is_unread: bool,
    pub to: String,
    pub cc: String,
    pub bcc: String,
    pub body: String,
    pub attachments: Vec<AttachmentInfo>,
}

impl MessageSummary {
    pub fn from_fetched(msg: FetchedMessage, detail: Detail) -> Self {
        let mut summary = MessageSummary {
            id: msg.id,
            thread_id: msg.thread_id,
            snippet: truncate_snippet(&msg.snippet),
            ..Default::default()
        };

        if let Some(payload) = &msg.payload {
            let header = |name: &str| payload.header(name).unwrap_or_default().to_string();
            summary.subject = header("Subject");
            summary.from = header("From");
            summary.date = format_date(&header("Date"));
            summary.to = header("To");
            summary.cc = header("Cc");
            summary.bcc = header("Bcc");

            if detail == Detail::Full {
                summary.body = mime::extract_plain_text(payload);
                summary.attachments = mime::find_attachments(payload)
                    .into_iter()
                    .map(|part| AttachmentInfo {
                        filename: part.filename.clone(),
                        size: part.body.size,
                        attachment_id: part.body.attachment_id.clone().unwrap_or_default(),
                    })
                    .collect();
            }
        }

        summary.set_labels(msg.label_ids);
        summary
    }

    /// Copy of this summary with the UNREAD label added or removed.
    pub fn with_unread(&self, unread: bool) -> Self {
        let mut labels: Vec<String> = self
            .labels
            .iter()
            .filter(|l| l.as_str() != UNREAD_LABEL)
            .cloned()
            .collect();
        if unread {
            labels.push(UNREAD_LABEL.to_string());
        }
        let mut updated = self.clone();
        updated.set_labels(labels);
        updated
    }

    fn set_labels(&mut self, labels: Vec<String>) {
        self.is_unread = labels.iter().any(|l| l == UNREAD_LABEL);
        self.labels = labels;
    }
}

pub fn truncate_snippet(snippet: &str) -> String {
    if snippet.chars().count() > SNIPPET_MAX_CHARS {
        let kept: String = snippet.chars().take(SNIPPET_KEEP_CHARS).collect();
        format!("{}...", kept)
    } else {
        snippet.to_string()
    }
}

/// Render a Date header as "Jan 02, 2006 15:04". Unrecognized values are
/// returned untouched.
pub fn format_date(raw: &str) -> String {
    let trimmed = raw.trim();
    // Drop a trailing zone comment such as "(UTC)".
    let without_comment = match trimmed.rfind(" (") {
        Some(idx) if trimmed.ends_with(')') => &trimmed[..idx],
        _ => trimmed,
    };

    if let Ok(date) = DateTime::parse_from_rfc2822(without_comment) {
        return date.format("%b %d, %Y %H:%M").to_string();
    }
    for format in ["%a, %d %b %Y %H:%M:%S %z", "%d %b %Y %H:%M:%S %z"] {
        if let Ok(date) = DateTime::parse_from_str(without_comment, format) {
            return date.format("%b %d, %Y %H:%M").to_string();
        }
    }
    raw.to_string()
}

/// Byte count in the form "1.5 KB".
pub fn human_size(bytes: i64) -> String {
    const UNIT: i64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let unit = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {}B", bytes as f64 / div as f64, unit)
}
