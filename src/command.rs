//! Remote and file work requested by the session, run off the event loop.
//!
//! A [`Command`] is a plain description of one unit of work. [`Executor::execute`]
//! runs it to completion and turns the outcome into exactly one [`AppEvent`];
//! the [`Dispatcher`] does that on a spawned task and posts the event to the
//! loop's queue.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::gmail::{ListQuery, MailGateway};
use crate::mime::{self, OutgoingMessage};
use crate::models::{AttachmentInfo, Detail, Label, MessageSummary, UNREAD_LABEL};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    LoadMessage { id: String },
    Search { query: String },
    LoadLabel { label: Label },
    LoadLabels,
    Send(OutgoingMessage),
    Trash { id: String },
    /// `unread` is the state the message is in now.
    ToggleRead { id: String, unread: bool },
    DownloadAttachment {
        message_id: String,
        attachment: AttachmentInfo,
    },
}

/// Which kind of command a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    LoadMessage,
    Search,
    LoadLabel,
    LoadLabels,
    Send,
    Trash,
    ToggleRead,
    DownloadAttachment,
}

impl Operation {
    /// Operations whose result the session waits for in `Loading`.
    pub fn drives_loading(self) -> bool {
        matches!(
            self,
            Operation::LoadMessage | Operation::Search | Operation::LoadLabel | Operation::LoadLabels
        )
    }
}

impl Command {
    pub fn operation(&self) -> Operation {
        match self {
            Command::LoadMessage { .. } => Operation::LoadMessage,
            Command::Search { .. } => Operation::Search,
            Command::LoadLabel { .. } => Operation::LoadLabel,
            Command::LoadLabels => Operation::LoadLabels,
            Command::Send(_) => Operation::Send,
            Command::Trash { .. } => Operation::Trash,
            Command::ToggleRead { .. } => Operation::ToggleRead,
            Command::DownloadAttachment { .. } => Operation::DownloadAttachment,
        }
    }
}

/// Results delivered back to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    MessageLoaded(MessageSummary),
    ListLoaded {
        title: String,
        messages: Vec<MessageSummary>,
    },
    LabelsLoaded(Vec<Label>),
    Sent,
    Trashed { id: String },
    ReadStateChanged { id: String, unread: bool },
    AttachmentSaved { filename: String },
    Failed { operation: Operation, reason: String },
}

/// Limits used by list-style commands.
#[derive(Debug, Clone)]
pub struct ListLimits {
    pub search_max_results: u32,
    pub label_max_results: u32,
    pub fetch_concurrency: usize,
}

impl Default for ListLimits {
    fn default() -> Self {
        Self {
            search_max_results: 30,
            label_max_results: 10,
            fetch_concurrency: 4,
        }
    }
}

#[derive(Clone)]
pub struct Executor {
    gateway: Arc<dyn MailGateway>,
    limits: ListLimits,
    download_dir: PathBuf,
}

impl Executor {
    pub fn new(gateway: Arc<dyn MailGateway>, limits: ListLimits, download_dir: PathBuf) -> Self {
        Self {
            gateway,
            limits,
            download_dir,
        }
    }

    /// Run one command to completion.
    pub async fn execute(&self, command: Command) -> AppEvent {
        let operation = command.operation();
        debug!(?operation, "executing command");
        match self.run(command).await {
            Ok(event) => event,
            Err(e) => {
                warn!(?operation, "command failed: {:#}", e);
                AppEvent::Failed {
                    operation,
                    reason: format!("{:#}", e),
                }
            }
        }
    }

    async fn run(&self, command: Command) -> anyhow::Result<AppEvent> {
        match command {
            Command::LoadMessage { id } => {
                let msg = self.gateway.get_message(&id, Detail::Full).await?;
                Ok(AppEvent::MessageLoaded(MessageSummary::from_fetched(
                    msg,
                    Detail::Full,
                )))
            }
            Command::Search { query } => {
                let messages = self
                    .load_list(ListQuery {
                        query: Some(query.clone()),
                        label_id: None,
                        max_results: self.limits.search_max_results,
                    })
                    .await?;
                Ok(AppEvent::ListLoaded {
                    title: format!("Search: {}", query),
                    messages,
                })
            }
            Command::LoadLabel { label } => {
                let messages = self
                    .load_list(ListQuery {
                        query: None,
                        label_id: Some(label.id.clone()),
                        max_results: self.limits.label_max_results,
                    })
                    .await?;
                Ok(AppEvent::ListLoaded {
                    title: label.display_name,
                    messages,
                })
            }
            Command::LoadLabels => Ok(AppEvent::LabelsLoaded(self.gateway.list_labels().await?)),
            Command::Send(outgoing) => {
                let raw = outgoing.to_raw()?;
                self.gateway.send_raw(&raw).await?;
                info!(to = %outgoing.to, "message sent");
                Ok(AppEvent::Sent)
            }
            Command::Trash { id } => {
                self.gateway.trash_message(&id).await?;
                Ok(AppEvent::Trashed { id })
            }
            Command::ToggleRead { id, unread } => {
                let label = vec![UNREAD_LABEL.to_string()];
                if unread {
                    self.gateway.modify_labels(&id, &[], &label).await?;
                } else {
                    self.gateway.modify_labels(&id, &label, &[]).await?;
                }
                Ok(AppEvent::ReadStateChanged {
                    id,
                    unread: !unread,
                })
            }
            Command::DownloadAttachment {
                message_id,
                attachment,
            } => {
                let data = self
                    .gateway
                    .get_attachment(&message_id, &attachment.attachment_id)
                    .await
                    .context("Download failed")?;
                let filename = mime::sanitize_filename(&attachment.filename);
                let path = self.download_dir.join(&filename);
                tokio::fs::write(&path, data)
                    .await
                    .with_context(|| format!("Save failed: {}", path.display()))?;
                info!(path = %path.display(), "attachment saved");
                Ok(AppEvent::AttachmentSaved { filename })
            }
        }
    }

    /// Ids first, then each message's headers. Messages that fail to load
    /// are left out of the list, unless none of them loads.
    pub async fn load_list(&self, query: ListQuery) -> anyhow::Result<Vec<MessageSummary>> {
        self.load_summaries(query, Detail::Metadata).await
    }

    pub async fn load_summaries(
        &self,
        query: ListQuery,
        detail: Detail,
    ) -> anyhow::Result<Vec<MessageSummary>> {
        let ids = self.gateway.list_messages(&query).await?;
        let listed = ids.len();
        let gateway = &self.gateway;
        let summaries: Vec<MessageSummary> = stream::iter(ids)
            .map(|id| async move {
                match gateway.get_message(&id, detail).await {
                    Ok(msg) => Some(MessageSummary::from_fetched(msg, detail)),
                    Err(e) => {
                        warn!(id, "Error fetching message: {:#}", e);
                        None
                    }
                }
            })
            .buffered(self.limits.fetch_concurrency.max(1))
            .filter_map(|summary| async move { summary })
            .collect()
            .await;
        if listed > 0 && summaries.is_empty() {
            anyhow::bail!("None of the {} listed messages could be fetched", listed);
        }
        Ok(summaries)
    }
}

/// Spawns commands onto the runtime and routes their events into the loop.
#[derive(Clone)]
pub struct Dispatcher {
    executor: Executor,
    events: mpsc::UnboundedSender<AppEvent>,
}

impl Dispatcher {
    pub fn new(executor: Executor, events: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self { executor, events }
    }

    pub fn dispatch(&self, command: Command) {
        let executor = self.executor.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let event = executor.execute(command).await;
            if events.send(event).is_err() {
                debug!("event loop gone, dropping command result");
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use crate::models::{FetchedMessage, MimePart, PartBody};
    use anyhow::{Result, anyhow, bail};
    use async_trait::async_trait;
    use base64::{Engine as _, engine::general_purpose};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory gateway recording every mutating call.
    #[derive(Default)]
    pub struct FakeGateway {
        pub messages: HashMap<String, FetchedMessage>,
        pub listing: Vec<String>,
        pub labels: Vec<Label>,
        pub attachments: HashMap<String, Vec<u8>>,
        pub fail_all: bool,
        pub sent: Mutex<Vec<String>>,
        pub trashed: Mutex<Vec<String>>,
        pub modified: Mutex<Vec<(String, Vec<String>, Vec<String>)>>,
        pub queries: Mutex<Vec<ListQuery>>,
    }

    impl FakeGateway {
        pub fn with_message(mut self, id: &str, subject: &str, body: &str) -> Self {
            self.messages.insert(id.to_string(), fetched(id, subject, body));
            self.listing.push(id.to_string());
            self
        }

        fn check(&self) -> Result<()> {
            if self.fail_all {
                bail!("service unavailable");
            }
            Ok(())
        }
    }

    pub fn fetched(id: &str, subject: &str, body: &str) -> FetchedMessage {
        FetchedMessage {
            id: id.to_string(),
            thread_id: format!("t-{}", id),
            snippet: body.chars().take(20).collect(),
            label_ids: vec!["INBOX".to_string(), "UNREAD".to_string()],
            payload: Some(MimePart {
                mime_type: "text/plain".to_string(),
                headers: vec![
                    ("Subject".to_string(), subject.to_string()),
                    ("From".to_string(), format!("{}@example.com", id)),
                    ("Date".to_string(), "Mon, 2 Jan 2006 15:04:05 -0700".to_string()),
                ],
                body: PartBody {
                    data: Some(general_purpose::URL_SAFE_NO_PAD.encode(body)),
                    ..Default::default()
                },
                ..Default::default()
            }),
        }
    }

    #[async_trait]
    impl MailGateway for FakeGateway {
        async fn list_messages(&self, query: &ListQuery) -> Result<Vec<String>> {
            self.check()?;
            self.queries.lock().unwrap().push(query.clone());
            Ok(self
                .listing
                .iter()
                .take(query.max_results as usize)
                .cloned()
                .collect())
        }

        async fn get_message(&self, id: &str, _detail: Detail) -> Result<FetchedMessage> {
            self.check()?;
            self.messages
                .get(id)
                .cloned()
                .ok_or_else(|| anyhow!("Failed to get message {}", id))
        }

        async fn send_raw(&self, raw: &str) -> Result<()> {
            self.check()?;
            self.sent.lock().unwrap().push(raw.to_string());
            Ok(())
        }

        async fn trash_message(&self, id: &str) -> Result<()> {
            self.check()?;
            self.trashed.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn modify_labels(&self, id: &str, add: &[String], remove: &[String]) -> Result<()> {
            self.check()?;
            self.modified
                .lock()
                .unwrap()
                .push((id.to_string(), add.to_vec(), remove.to_vec()));
            Ok(())
        }

        async fn list_labels(&self) -> Result<Vec<Label>> {
            self.check()?;
            Ok(self.labels.clone())
        }

        async fn get_attachment(&self, _message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
            self.check()?;
            self.attachments
                .get(attachment_id)
                .cloned()
                .ok_or_else(|| anyhow!("no attachment {}", attachment_id))
        }
    }
}
