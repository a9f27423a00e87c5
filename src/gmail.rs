use crate::models::{self, Detail, FetchedMessage, MimePart, PartBody};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use google_gmail1::Gmail;
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use tracing::debug;

const USER: &str = "me";

/// What to list: a free-text query, a label, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub query: Option<String>,
    pub label_id: Option<String>,
    pub max_results: u32,
}

/// The remote mail operations the session depends on.
#[async_trait]
pub trait MailGateway: Send + Sync {
    /// Ids of matching messages, newest first.
    async fn list_messages(&self, query: &ListQuery) -> Result<Vec<String>>;
    async fn get_message(&self, id: &str, detail: Detail) -> Result<FetchedMessage>;
    /// Send a base64url encoded RFC 822 message.
    async fn send_raw(&self, raw: &str) -> Result<()>;
    async fn trash_message(&self, id: &str) -> Result<()>;
    async fn modify_labels(&self, id: &str, add: &[String], remove: &[String]) -> Result<()>;
    async fn list_labels(&self) -> Result<Vec<models::Label>>;
    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>>;
}

#[derive(Clone)]
pub struct GmailClient {
    hub: Gmail<HttpsConnector<HttpConnector>>,
}

impl GmailClient {
    pub fn new(hub: Gmail<HttpsConnector<HttpConnector>>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl MailGateway for GmailClient {
    async fn list_messages(&self, query: &ListQuery) -> Result<Vec<String>> {
        let mut req = self
            .hub
            .users()
            .messages_list(USER)
            .max_results(query.max_results);

        if let Some(q) = &query.query {
            req = req.q(q);
        }
        if let Some(label_id) = &query.label_id {
            req = req.add_label_ids(label_id);
        }

        let (_, message_list) = req.doit().await.context("Failed to list messages")?;

        let ids: Vec<String> = message_list
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect();
        debug!(?query, count = ids.len(), "listed messages");
        Ok(ids)
    }

    async fn get_message(&self, id: &str, detail: Detail) -> Result<FetchedMessage> {
        let (_, msg) = self
            .hub
            .users()
            .messages_get(USER, id)
            .format(detail.as_str())
            .doit()
            .await
            .context(format!("Failed to get message {}", id))?;

        Ok(FetchedMessage {
            id: msg.id.unwrap_or_default(),
            thread_id: msg.thread_id.unwrap_or_default(),
            snippet: msg.snippet.unwrap_or_default(),
            label_ids: msg.label_ids.unwrap_or_default(),
            payload: msg.payload.map(convert_part),
        })
    }

    async fn send_raw(&self, raw: &str) -> Result<()> {
        let bytes = general_purpose::URL_SAFE
            .decode(raw)
            .context("Outgoing message is not valid base64url")?;
        debug!(len = bytes.len(), "sending message");

        let rfc822: mime_guess::mime::Mime = "message/rfc822"
            .parse()
            .context("Invalid upload content type")?;
        self.hub
            .users()
            .messages_send(google_gmail1::api::Message::default(), USER)
            .upload(std::io::Cursor::new(bytes), rfc822)
            .await
            .context("Failed to send message")?;
        Ok(())
    }

    async fn trash_message(&self, id: &str) -> Result<()> {
        debug!(id, "trashing message");
        self.hub
            .users()
            .messages_trash(USER, id)
            .doit()
            .await
            .context("Failed to trash message")?;
        Ok(())
    }

    async fn modify_labels(&self, id: &str, add: &[String], remove: &[String]) -> Result<()> {
        debug!(id, ?add, ?remove, "modifying labels");
        let req = google_gmail1::api::ModifyMessageRequest {
            add_label_ids: (!add.is_empty()).then(|| add.to_vec()),
            remove_label_ids: (!remove.is_empty()).then(|| remove.to_vec()),
        };
        self.hub
            .users()
            .messages_modify(req, USER, id)
            .doit()
            .await
            .context("Failed to modify message labels")?;
        Ok(())
    }

    async fn list_labels(&self) -> Result<Vec<models::Label>> {
        let (_, label_list) = self
            .hub
            .users()
            .labels_list(USER)
            .doit()
            .await
            .context("Failed to list labels")?;

        let labels = label_list
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(|l| {
                models::Label::new(
                    l.id.unwrap_or_default(),
                    l.name.unwrap_or_default(),
                    l.type_.unwrap_or_default(),
                )
            })
            .collect();

        Ok(labels)
    }

    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let (_, body) = self
            .hub
            .users()
            .messages_attachments_get(USER, message_id, attachment_id)
            .doit()
            .await
            .context("Failed to fetch attachment")?;
        body.data.context("Attachment has no data")
    }
}

/// google-gmail1 hands body data back already decoded. The codec works on
/// the wire form, so it is re-encoded here.
fn convert_part(part: google_gmail1::api::MessagePart) -> MimePart {
    let body = part.body.map(|b| PartBody {
        data: b.data.map(|d| general_purpose::URL_SAFE.encode(d)),
        attachment_id: b.attachment_id,
        size: b.size.map(i64::from).unwrap_or(0),
    });

    MimePart {
        mime_type: part.mime_type.unwrap_or_default(),
        filename: part.filename.unwrap_or_default(),
        headers: part
            .headers
            .unwrap_or_default()
            .into_iter()
            .filter_map(|h| Some((h.name?, h.value.unwrap_or_default())))
            .collect(),
        body: body.unwrap_or_default(),
        parts: part
            .parts
            .unwrap_or_default()
            .into_iter()
            .map(convert_part)
            .collect(),
    }
}
