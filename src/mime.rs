//! Decoding of incoming message trees and assembly of outgoing raw messages.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use base64::{Engine as _, engine::general_purpose};
use regex::Regex;

use crate::error::ComposeError;
use crate::models::MimePart;

/// Malformed trees (or cyclic ones built by a buggy adapter) stop here.
pub const MAX_MIME_DEPTH: usize = 32;

pub const DECODE_FAILED: &str = "Failed to decode body.";

const BASE64_LINE_LEN: usize = 76;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid space regex"));

/// Decode body data as delivered by the mail service.
///
/// The service uses URL-safe base64 but is inconsistent about padding, so
/// the input is padded first and standard base64 is tried as a fallback.
/// Undecodable input yields [`DECODE_FAILED`] instead of an error.
pub fn decode_body(text: &str) -> Vec<u8> {
    let mut padded = text.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }

    general_purpose::URL_SAFE
        .decode(&padded)
        .or_else(|_| general_purpose::STANDARD.decode(&padded))
        .unwrap_or_else(|_| DECODE_FAILED.as_bytes().to_vec())
}

fn decode_text(text: &str) -> String {
    String::from_utf8_lossy(&decode_body(text)).into_owned()
}

/// Best plain-text rendition of a message tree. Plain text always wins over
/// HTML at the same level; HTML is stripped to text.
pub fn extract_plain_text(part: &MimePart) -> String {
    extract_at_depth(part, 0)
}

fn extract_at_depth(part: &MimePart, depth: usize) -> String {
    if depth > MAX_MIME_DEPTH {
        tracing::warn!(depth, "MIME tree too deep, giving up on body extraction");
        return String::new();
    }

    let data = part.body.data.as_deref().filter(|d| !d.is_empty());

    if part.mime_type == "text/plain" {
        if let Some(data) = data {
            return decode_text(data);
        }
    }

    if part.mime_type.starts_with("multipart/") && !part.parts.is_empty() {
        for wanted in ["text/plain", "text/html"] {
            let found = part
                .parts
                .iter()
                .filter(|p| p.mime_type == wanted)
                .map(|p| extract_at_depth(p, depth + 1))
                .find(|text| !text.is_empty());
            if let Some(text) = found {
                return text;
            }
        }
    }

    if part.mime_type == "text/html" {
        if let Some(data) = data {
            return strip_html(&decode_text(data));
        }
    }

    String::new()
}

/// Reduce HTML to a single line of text.
pub fn strip_html(html: &str) -> String {
    let mut text = TAG_RE.replace_all(html, "").into_owned();

    // &amp; last so "&amp;lt;" comes out as "&lt;" rather than "<"
    for (entity, literal) in [
        ("&nbsp;", " "),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&apos;", "'"),
        ("&amp;", "&"),
    ] {
        text = text.replace(entity, literal);
    }

    SPACE_RE.replace_all(&text, " ").trim().to_string()
}

/// Every part carrying a filename, in traversal order.
pub fn find_attachments(part: &MimePart) -> Vec<&MimePart> {
    let mut found = Vec::new();
    collect_attachments(part, 0, &mut found);
    found
}

fn collect_attachments<'a>(part: &'a MimePart, depth: usize, found: &mut Vec<&'a MimePart>) {
    if depth > MAX_MIME_DEPTH {
        tracing::warn!(depth, "MIME tree too deep, skipping remaining attachments");
        return;
    }
    if part.mime_type.starts_with("multipart/") {
        for child in &part.parts {
            collect_attachments(child, depth + 1, found);
        }
    } else if !part.filename.is_empty() {
        found.push(part);
    }
}

/// Make an attachment name safe to write into the download directory.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// A message ready to be turned into the service's raw format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: String,
    pub cc: String,
    pub bcc: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<PathBuf>,
}

impl OutgoingMessage {
    /// RFC 822 bytes of the message, reading every attachment from disk.
    pub fn to_rfc822(&self) -> Result<Vec<u8>, ComposeError> {
        let mut msg = String::new();
        for (name, value) in [
            ("From", &self.from),
            ("To", &self.to),
            ("Cc", &self.cc),
            ("Bcc", &self.bcc),
            ("Subject", &self.subject),
        ] {
            if !value.is_empty() {
                msg.push_str(&format!("{}: {}\r\n", name, value));
            }
        }

        if self.attachments.is_empty() {
            msg.push_str("\r\n");
            msg.push_str(&self.body);
            return Ok(msg.into_bytes());
        }

        // Read everything up front so a bad path aborts before any output.
        let files = self
            .attachments
            .iter()
            .map(|path| {
                fs::read(path)
                    .map(|content| (path.as_path(), content))
                    .map_err(|source| ComposeError::AttachmentRead {
                        path: path.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let boundary = new_boundary();
        msg.push_str("MIME-Version: 1.0\r\n");
        msg.push_str(&format!(
            "Content-Type: multipart/mixed; boundary={}\r\n\r\n",
            boundary
        ));
        msg.push_str(&format!("--{}\r\n", boundary));
        msg.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\n");
        msg.push_str(&self.body);
        msg.push_str("\r\n");

        for (path, content) in files {
            msg.push_str(&format!("--{}\r\n", boundary));
            msg.push_str(&attachment_part(path, &content));
        }
        msg.push_str(&format!("--{}--\r\n", boundary));

        Ok(msg.into_bytes())
    }

    /// The base64url form the service expects for sending.
    pub fn to_raw(&self) -> Result<String, ComposeError> {
        Ok(general_purpose::URL_SAFE.encode(self.to_rfc822()?))
    }
}

fn new_boundary() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn attachment_part(path: &Path, content: &[u8]) -> String {
    let content_type = mime_guess::from_path(path).first_or_octet_stream();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut part = String::new();
    part.push_str(&format!("Content-Type: {}\r\n", content_type.essence_str()));
    part.push_str(&format!(
        "Content-Disposition: attachment; filename=\"{}\"\r\n",
        filename
    ));
    part.push_str("Content-Transfer-Encoding: base64\r\n\r\n");

    let encoded = general_purpose::STANDARD.encode(content);
    for line in encoded.as_bytes().chunks(BASE64_LINE_LEN) {
        // base64 output is ASCII
        part.push_str(&String::from_utf8_lossy(line));
        part.push_str("\r\n");
    }
    part
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PartBody;
    use mailparse::MailHeaderMap;
    use std::io::Write;

    fn leaf(mime_type: &str, text: &str) -> MimePart {
        MimePart {
            mime_type: mime_type.to_string(),
            body: PartBody {
                data: Some(general_purpose::URL_SAFE_NO_PAD.encode(text)),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn multipart(subtype: &str, parts: Vec<MimePart>) -> MimePart {
        MimePart {
            mime_type: format!("multipart/{}", subtype),
            parts,
            ..Default::default()
        }
    }

    fn attachment(filename: &str) -> MimePart {
        MimePart {
            mime_type: "application/octet-stream".to_string(),
            filename: filename.to_string(),
            ..Default::default()
        }
    }

    fn decode_raw(raw: &str) -> Vec<u8> {
        general_purpose::URL_SAFE.decode(raw).unwrap()
    }

    #[test]
    fn test_decode_body_with_and_without_padding() {
        let samples: Vec<Vec<u8>> = vec![
            vec![],
            b"a".to_vec(),
            b"ab".to_vec(),
            b"hello world".to_vec(),
            vec![0xfb, 0xff, 0xfe, 0x00, 0x3e, 0x3f],
            (0u8..=255).collect(),
        ];
        for bytes in samples {
            let padded = general_purpose::URL_SAFE.encode(&bytes);
            let unpadded = general_purpose::URL_SAFE_NO_PAD.encode(&bytes);
            assert_eq!(decode_body(&padded), bytes);
            assert_eq!(decode_body(&unpadded), bytes);
        }
    }

    #[test]
    fn test_decode_body_falls_back_to_standard_alphabet() {
        let bytes = vec![0xfb, 0xff, 0xbf];
        let standard = general_purpose::STANDARD.encode(&bytes);
        assert!(standard.contains('+') || standard.contains('/'));
        assert_eq!(decode_body(&standard), bytes);
    }

    #[test]
    fn test_decode_body_sentinel_on_garbage() {
        assert_eq!(decode_body("!!!not base64!!!"), DECODE_FAILED.as_bytes());
    }

    #[test]
    fn test_extract_plain_leaf() {
        assert_eq!(extract_plain_text(&leaf("text/plain", "hi there")), "hi there");
    }

    #[test]
    fn test_extract_html_only() {
        let tree = multipart(
            "alternative",
            vec![leaf(
                "text/html",
                "<html><body><p>Fish &amp; chips</p>\n\n<b>&lt;today&gt;</b>&nbsp;only</body></html>",
            )],
        );
        assert_eq!(extract_plain_text(&tree), "Fish & chips <today> only");
    }

    #[test]
    fn test_extract_prefers_plain_over_html() {
        let tree = multipart(
            "alternative",
            vec![
                leaf("text/html", "<p>html version</p>"),
                leaf("text/plain", "plain version"),
            ],
        );
        assert_eq!(extract_plain_text(&tree), "plain version");
    }

    #[test]
    fn test_extract_skips_empty_plain_for_html() {
        let empty_plain = MimePart {
            mime_type: "text/plain".to_string(),
            ..Default::default()
        };
        let tree = multipart("alternative", vec![empty_plain, leaf("text/html", "<i>x</i>")]);
        assert_eq!(extract_plain_text(&tree), "x");
    }

    #[test]
    fn test_extract_ignores_nested_multipart_children() {
        // Only direct text/plain and text/html children are considered.
        let nested = multipart("alternative", vec![leaf("text/plain", "deep")]);
        let tree = multipart("mixed", vec![nested, attachment("a.bin")]);
        assert_eq!(extract_plain_text(&tree), "");
    }

    #[test]
    fn test_extract_unknown_type_is_empty() {
        assert_eq!(extract_plain_text(&leaf("image/png", "xyz")), "");
    }

    #[test]
    fn test_attachment_walk_depth_is_capped() {
        let mut deep = attachment("deep.bin");
        for _ in 0..(MAX_MIME_DEPTH * 2) {
            deep = multipart("mixed", vec![deep]);
        }
        assert!(find_attachments(&deep).is_empty());

        let mut shallow = attachment("ok.bin");
        for _ in 0..3 {
            shallow = multipart("mixed", vec![shallow]);
        }
        assert_eq!(find_attachments(&shallow).len(), 1);
    }

    #[test]
    fn test_strip_html_collapses_whitespace() {
        assert_eq!(
            strip_html("  <div>one</div>\n\t<div>two &quot;2&quot; &apos;b&apos;</div>  "),
            "one two \"2\" 'b'"
        );
        assert_eq!(strip_html("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_find_attachments_in_order() {
        let tree = multipart(
            "mixed",
            vec![
                multipart(
                    "alternative",
                    vec![leaf("text/plain", "body"), leaf("text/html", "<p>body</p>")],
                ),
                attachment("first.pdf"),
                multipart("related", vec![attachment("second.png")]),
                MimePart {
                    mime_type: "text/plain".to_string(),
                    filename: "notes.txt".to_string(),
                    ..Default::default()
                },
            ],
        );
        let names: Vec<&str> = find_attachments(&tree)
            .iter()
            .map(|p| p.filename.as_str())
            .collect();
        assert_eq!(names, vec!["first.pdf", "second.png", "notes.txt"]);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report (final).pdf"), "report _final_.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("résumé 2024.doc"), "résumé 2024.doc");
        for name in ["a/b\\c:d*e?f", "plain-name_1.txt", "tab\there"] {
            let sanitized = sanitize_filename(name);
            assert_eq!(sanitized.chars().count(), name.chars().count());
            assert!(
                sanitized
                    .chars()
                    .all(|c| c.is_alphanumeric() || c.is_whitespace() || "-_.".contains(c))
            );
        }
    }

    #[test]
    fn test_simple_message_round_trip() {
        let outgoing = OutgoingMessage {
            from: "me".to_string(),
            to: "bob@example.com".to_string(),
            cc: "carol@example.com".to_string(),
            subject: "Lunch?".to_string(),
            body: "Noon at the usual place.\nBring cash.".to_string(),
            ..Default::default()
        };
        let raw = decode_raw(&outgoing.to_raw().unwrap());
        let parsed = mailparse::parse_mail(&raw).unwrap();
        assert_eq!(
            parsed.headers.get_first_value("To").as_deref(),
            Some("bob@example.com")
        );
        assert_eq!(
            parsed.headers.get_first_value("Cc").as_deref(),
            Some("carol@example.com")
        );
        assert_eq!(parsed.headers.get_first_value("Bcc"), None);
        assert_eq!(parsed.headers.get_first_value("Subject").as_deref(), Some("Lunch?"));

        let text = String::from_utf8(raw).unwrap();
        let (_, body) = text.split_once("\r\n\r\n").unwrap();
        assert_eq!(body, "Noon at the usual place.\nBring cash.");
    }

    #[test]
    fn test_empty_headers_are_omitted() {
        let outgoing = OutgoingMessage {
            to: "bob@example.com".to_string(),
            body: "x".to_string(),
            ..Default::default()
        };
        let text = String::from_utf8(outgoing.to_rfc822().unwrap()).unwrap();
        assert_eq!(text, "To: bob@example.com\r\n\r\nx");
    }

    #[test]
    fn test_multipart_message_carries_attachments_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("photo.png");
        let second = dir.path().join("data.unknownext");
        let first_bytes: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
        let second_bytes = b"col1,col2\n1,2\n".to_vec();
        fs::File::create(&first).unwrap().write_all(&first_bytes).unwrap();
        fs::File::create(&second).unwrap().write_all(&second_bytes).unwrap();

        let outgoing = OutgoingMessage {
            to: "bob@example.com".to_string(),
            subject: "Files".to_string(),
            body: "Two files attached.".to_string(),
            attachments: vec![first.clone(), second.clone()],
            ..Default::default()
        };
        let raw = decode_raw(&outgoing.to_raw().unwrap());
        let parsed = mailparse::parse_mail(&raw).unwrap();

        assert_eq!(parsed.ctype.mimetype, "multipart/mixed");
        assert_eq!(parsed.subparts.len(), 3);
        assert_eq!(parsed.subparts[0].ctype.mimetype, "text/plain");
        assert_eq!(
            parsed.subparts[0].get_body().unwrap().trim_end(),
            "Two files attached."
        );

        let attachments: Vec<_> = parsed
            .subparts
            .iter()
            .filter(|p| {
                p.get_content_disposition().disposition == mailparse::DispositionType::Attachment
            })
            .collect();
        assert_eq!(attachments.len(), 2);

        assert_eq!(attachments[0].ctype.mimetype, "image/png");
        assert_eq!(
            attachments[0].get_content_disposition().params.get("filename").map(String::as_str),
            Some("photo.png")
        );
        assert_eq!(attachments[0].get_body_raw().unwrap(), first_bytes);

        assert_eq!(attachments[1].ctype.mimetype, "application/octet-stream");
        assert_eq!(attachments[1].get_body_raw().unwrap(), second_bytes);
    }

    #[test]
    fn test_unreadable_attachment_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.txt");
        let outgoing = OutgoingMessage {
            to: "bob@example.com".to_string(),
            attachments: vec![missing.clone()],
            ..Default::default()
        };
        match outgoing.to_raw() {
            Err(ComposeError::AttachmentRead { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected attachment read error, got {:?}", other),
        }
    }
}
