//! The interactive session: which screen is up, what it holds, and how key
//! presses and command results move it along.
//!
//! The session never talks to the network. Key handling returns the
//! [`Command`]s the event loop should dispatch; results are folded in with
//! [`Session::apply`], which never issues follow-up commands.

use crate::command::{AppEvent, Command, Operation};
use crate::config::{Keybindings, matches_key, matches_key_in_text};
use crate::list::{EntryList, ListEntry};
use crate::mime::OutgoingMessage;
use crate::models::{Label, MessageSummary};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::style::Style;
use std::path::PathBuf;
use tracing::debug;
use tui_textarea::{CursorMove, TextArea};

pub const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Ticks a notification stays on screen.
const NOTIFICATION_TICKS: u16 = 40;
const PAGE_SCROLL: u16 = 10;

fn text_input(initial: &str) -> TextArea<'static> {
    let mut textarea = if initial.is_empty() {
        TextArea::default()
    } else {
        TextArea::from(initial.split('\n').map(str::to_string))
    };
    textarea.set_cursor_line_style(Style::default());
    textarea.move_cursor(CursorMove::Bottom);
    textarea.move_cursor(CursorMove::End);
    textarea
}

pub fn input_text(textarea: &TextArea<'_>) -> String {
    textarea.lines().join("\n")
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum ComposeField {
    #[default]
    From,
    To,
    Cc,
    Bcc,
    Subject,
    Body,
}

impl ComposeField {
    pub const ALL: [ComposeField; 6] = [
        ComposeField::From,
        ComposeField::To,
        ComposeField::Cc,
        ComposeField::Bcc,
        ComposeField::Subject,
        ComposeField::Body,
    ];

    pub fn next(self) -> Self {
        match self {
            ComposeField::From => ComposeField::To,
            ComposeField::To => ComposeField::Cc,
            ComposeField::Cc => ComposeField::Bcc,
            ComposeField::Bcc => ComposeField::Subject,
            ComposeField::Subject => ComposeField::Body,
            ComposeField::Body => ComposeField::From,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            ComposeField::From => ComposeField::Body,
            ComposeField::To => ComposeField::From,
            ComposeField::Cc => ComposeField::To,
            ComposeField::Bcc => ComposeField::Cc,
            ComposeField::Subject => ComposeField::Bcc,
            ComposeField::Body => ComposeField::Subject,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ComposeField::From => " From ",
            ComposeField::To => " To ",
            ComposeField::Cc => " Cc ",
            ComposeField::Bcc => " Bcc ",
            ComposeField::Subject => " Subject ",
            ComposeField::Body => " Body ",
        }
    }
}

/// Paths attached to a draft, plus the path being typed when the attachment
/// prompt is open.
#[derive(Default)]
pub struct Attachments {
    pub paths: Vec<PathBuf>,
    pub input: Option<TextArea<'static>>,
}

impl Attachments {
    pub fn is_entering(&self) -> bool {
        self.input.is_some()
    }

    pub fn open_input(&mut self) {
        if self.input.is_none() {
            self.input = Some(text_input(""));
        }
    }

    pub fn cancel_input(&mut self) {
        self.input = None;
    }

    /// Keeps the typed path if it exists. Otherwise the prompt stays open.
    pub fn submit_input(&mut self) -> bool {
        let Some(input) = &self.input else {
            return false;
        };
        let path = PathBuf::from(input_text(input).trim());
        if path.as_os_str().is_empty() || !path.exists() {
            debug!(path = %path.display(), "attachment path rejected");
            return false;
        }
        self.paths.push(path);
        self.input = None;
        true
    }

    pub fn remove_last(&mut self) -> Option<PathBuf> {
        if self.is_entering() {
            return None;
        }
        self.paths.pop()
    }
}

pub struct ComposeDraft {
    pub from: TextArea<'static>,
    pub to: TextArea<'static>,
    pub cc: TextArea<'static>,
    pub bcc: TextArea<'static>,
    pub subject: TextArea<'static>,
    pub body: TextArea<'static>,
    pub focused_field: ComposeField,
    pub attachments: Attachments,
}

impl ComposeDraft {
    pub fn new() -> Self {
        Self {
            from: text_input("me"),
            to: text_input(""),
            cc: text_input(""),
            bcc: text_input(""),
            subject: text_input(""),
            body: text_input(""),
            focused_field: ComposeField::default(),
            attachments: Attachments::default(),
        }
    }

    pub fn field(&self, field: ComposeField) -> &TextArea<'static> {
        match field {
            ComposeField::From => &self.from,
            ComposeField::To => &self.to,
            ComposeField::Cc => &self.cc,
            ComposeField::Bcc => &self.bcc,
            ComposeField::Subject => &self.subject,
            ComposeField::Body => &self.body,
        }
    }

    pub fn field_mut(&mut self, field: ComposeField) -> &mut TextArea<'static> {
        match field {
            ComposeField::From => &mut self.from,
            ComposeField::To => &mut self.to,
            ComposeField::Cc => &mut self.cc,
            ComposeField::Bcc => &mut self.bcc,
            ComposeField::Subject => &mut self.subject,
            ComposeField::Body => &mut self.body,
        }
    }

    pub fn to_outgoing(&self) -> OutgoingMessage {
        OutgoingMessage {
            from: input_text(&self.from),
            to: input_text(&self.to),
            cc: input_text(&self.cc),
            bcc: input_text(&self.bcc),
            subject: input_text(&self.subject),
            body: input_text(&self.body),
            attachments: self.attachments.paths.clone(),
        }
    }
}

impl Default for ComposeDraft {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ReplyDraft {
    pub body: TextArea<'static>,
    pub attachments: Attachments,
    pub original: MessageSummary,
}

impl ReplyDraft {
    pub fn new(original: MessageSummary) -> Self {
        Self {
            body: text_input(""),
            attachments: Attachments::default(),
            original,
        }
    }

    pub fn subject(&self) -> String {
        reply_subject(&self.original.subject)
    }

    pub fn to_outgoing(&self) -> OutgoingMessage {
        let quoted = format!(
            "\n\n--- Original Message ---\nFrom: {}\nDate: {}\n\n{}",
            self.original.from,
            self.original.date,
            quote(&self.original.body)
        );
        OutgoingMessage {
            to: self.original.from.clone(),
            subject: self.subject(),
            body: input_text(&self.body) + &quoted,
            attachments: self.attachments.paths.clone(),
            ..Default::default()
        }
    }
}

pub fn reply_subject(subject: &str) -> String {
    if subject.to_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {}", subject)
    }
}

fn quote(body: &str) -> String {
    body.split('\n')
        .map(|line| format!("> {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

pub enum Mode {
    Browsing,
    /// Waiting on a load. `resume` is the message to reopen if it fails.
    Loading {
        resume: Option<MessageSummary>,
    },
    Viewing {
        message: MessageSummary,
        selecting_attachment: bool,
    },
    Composing(ComposeDraft),
    Replying(ReplyDraft),
    Searching(TextArea<'static>),
    ManagingLabels,
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Browsing => "Browsing",
            Mode::Loading { .. } => "Loading",
            Mode::Viewing {
                selecting_attachment: true,
                ..
            } => "Select attachment",
            Mode::Viewing { .. } => "Viewing",
            Mode::Composing(_) => "Composing",
            Mode::Replying(_) => "Replying",
            Mode::Searching(_) => "Searching",
            Mode::ManagingLabels => "Labels",
        }
    }
}

pub struct Session {
    pub mode: Mode,
    pub show_help: bool,
    pub messages: EntryList,
    pub labels: EntryList,
    pub last_search: Option<String>,
    pub notification: Option<String>,
    notification_ttl: u16,
    pub viewer_scroll: u16,
    pub spinner_frame: usize,
    pub should_quit: bool,
}

impl Session {
    pub fn new(inbox: Vec<MessageSummary>, labels: Vec<Label>) -> Self {
        Self {
            mode: Mode::Browsing,
            show_help: false,
            messages: EntryList::new(
                "Inbox",
                inbox.into_iter().map(ListEntry::Message).collect(),
            ),
            labels: EntryList::new("Labels", labels.into_iter().map(ListEntry::Label).collect()),
            last_search: None,
            notification: None,
            notification_ttl: 0,
            viewer_scroll: 0,
            spinner_frame: 0,
            should_quit: false,
        }
    }

    pub fn notify(&mut self, text: impl Into<String>) {
        self.notification = Some(text.into());
        self.notification_ttl = NOTIFICATION_TICKS;
    }

    /// Advance the spinner and age the notification.
    pub fn tick(&mut self) {
        if matches!(self.mode, Mode::Loading { .. }) {
            self.spinner_frame = (self.spinner_frame + 1) % SPINNER_FRAMES.len();
        }
        if self.notification.is_some() {
            self.notification_ttl = self.notification_ttl.saturating_sub(1);
            if self.notification_ttl == 0 {
                self.notification = None;
            }
        }
    }

    /// True while a text field has the keyboard.
    pub fn in_text_entry(&self) -> bool {
        match &self.mode {
            Mode::Composing(_) | Mode::Replying(_) | Mode::Searching(_) => true,
            Mode::Browsing => self.messages.is_filtering(),
            Mode::ManagingLabels => self.labels.is_filtering(),
            Mode::Loading { .. } | Mode::Viewing { .. } => false,
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent, keys: &Keybindings) -> Vec<Command> {
        let help = if self.in_text_entry() {
            matches_key_in_text(key, &keys.help)
        } else {
            matches_key(key, &keys.help)
        };

        if self.show_help {
            if help || key.code == KeyCode::Esc {
                self.show_help = false;
            }
            return Vec::new();
        }
        if help {
            self.show_help = true;
            return Vec::new();
        }

        match std::mem::replace(&mut self.mode, Mode::Loading { resume: None }) {
            Mode::Browsing => {
                self.mode = Mode::Browsing;
                self.browsing_key(key, keys)
            }
            Mode::Loading { resume } => {
                if matches_key(key, &keys.quit) {
                    self.should_quit = true;
                }
                self.mode = Mode::Loading { resume };
                Vec::new()
            }
            Mode::Viewing {
                message,
                selecting_attachment,
            } => {
                if selecting_attachment {
                    self.attachment_select_key(message, key, keys)
                } else {
                    self.viewing_key(message, key, keys)
                }
            }
            Mode::Composing(draft) => self.composing_key(draft, key, keys),
            Mode::Replying(draft) => self.replying_key(draft, key, keys),
            Mode::Searching(input) => self.searching_key(input, key, keys),
            Mode::ManagingLabels => {
                self.mode = Mode::ManagingLabels;
                self.labels_key(key, keys)
            }
        }
    }

    fn browsing_key(&mut self, key: KeyEvent, keys: &Keybindings) -> Vec<Command> {
        if self.messages.is_filtering() {
            filter_key(&mut self.messages, key, keys);
            return Vec::new();
        }
        if navigate(&mut self.messages, key, keys) {
            return Vec::new();
        }

        if matches_key(key, &keys.quit) {
            self.should_quit = true;
        } else if matches_key(key, &keys.filter) {
            self.messages.start_filter();
        } else if matches_key(key, &keys.back) {
            if self.messages.filter().is_some() {
                self.messages.clear_filter();
            }
        } else if matches_key(key, &keys.select) {
            if let Some(message) = self.messages.selected_message() {
                let id = message.id.clone();
                self.mode = Mode::Loading { resume: None };
                return vec![Command::LoadMessage { id }];
            }
        } else if matches_key(key, &keys.compose) {
            self.mode = Mode::Composing(ComposeDraft::new());
        } else if matches_key(key, &keys.search) {
            self.mode = Mode::Searching(text_input(""));
        } else if matches_key(key, &keys.labels) {
            self.mode = Mode::Loading { resume: None };
            return vec![Command::LoadLabels];
        } else if matches_key(key, &keys.delete) {
            if let Some(message) = self.messages.selected_message() {
                return vec![Command::Trash {
                    id: message.id.clone(),
                }];
            }
        } else if matches_key(key, &keys.toggle_read) {
            if let Some(message) = self.messages.selected_message() {
                return vec![Command::ToggleRead {
                    id: message.id.clone(),
                    unread: message.is_unread,
                }];
            }
        }
        Vec::new()
    }

    fn viewing_key(
        &mut self,
        message: MessageSummary,
        key: KeyEvent,
        keys: &Keybindings,
    ) -> Vec<Command> {
        let mut commands = Vec::new();
        let mut selecting_attachment = false;

        if matches_key(key, &keys.back) {
            self.viewer_scroll = 0;
            self.mode = Mode::Browsing;
            return commands;
        } else if matches_key(key, &keys.quit) {
            self.should_quit = true;
        } else if matches_key(key, &keys.reply) {
            self.mode = Mode::Replying(ReplyDraft::new(message));
            return commands;
        } else if matches_key(key, &keys.labels) {
            self.mode = Mode::Loading {
                resume: Some(message),
            };
            return vec![Command::LoadLabels];
        } else if matches_key(key, &keys.download_attachment) {
            if message.attachments.is_empty() {
                self.notify("No attachments available");
            } else {
                selecting_attachment = true;
                self.notify("Select attachment to download (1-9)");
            }
        } else if matches_key(key, &keys.delete) {
            commands.push(Command::Trash {
                id: message.id.clone(),
            });
        } else if matches_key(key, &keys.toggle_read) {
            commands.push(Command::ToggleRead {
                id: message.id.clone(),
                unread: message.is_unread,
            });
        } else if matches_key(key, &keys.move_down) {
            self.viewer_scroll = self.viewer_scroll.saturating_add(1);
        } else if matches_key(key, &keys.move_up) {
            self.viewer_scroll = self.viewer_scroll.saturating_sub(1);
        } else {
            match key.code {
                KeyCode::PageDown | KeyCode::Char(' ') => {
                    self.viewer_scroll = self.viewer_scroll.saturating_add(PAGE_SCROLL)
                }
                KeyCode::PageUp => {
                    self.viewer_scroll = self.viewer_scroll.saturating_sub(PAGE_SCROLL)
                }
                KeyCode::Home => self.viewer_scroll = 0,
                _ => {}
            }
        }

        self.mode = Mode::Viewing {
            message,
            selecting_attachment,
        };
        commands
    }

    fn attachment_select_key(
        &mut self,
        message: MessageSummary,
        key: KeyEvent,
        keys: &Keybindings,
    ) -> Vec<Command> {
        let mut commands = Vec::new();
        let mut selecting_attachment = true;

        if matches_key(key, &keys.back) {
            selecting_attachment = false;
            self.notification = None;
        } else if let KeyCode::Char(c @ '1'..='9') = key.code {
            let index = (c as u8 - b'1') as usize;
            if let Some(attachment) = message.attachments.get(index) {
                self.notify(format!("Downloading {}...", attachment.filename));
                commands.push(Command::DownloadAttachment {
                    message_id: message.id.clone(),
                    attachment: attachment.clone(),
                });
                selecting_attachment = false;
            }
        }

        self.mode = Mode::Viewing {
            message,
            selecting_attachment,
        };
        commands
    }

    fn composing_key(
        &mut self,
        mut draft: ComposeDraft,
        key: KeyEvent,
        keys: &Keybindings,
    ) -> Vec<Command> {
        let mut commands = Vec::new();

        if matches_key_in_text(key, &keys.send) {
            self.notify("Sending...");
            commands.push(Command::Send(draft.to_outgoing()));
        } else if draft.attachments.is_entering() {
            if matches_key_in_text(key, &keys.back) {
                draft.attachments.cancel_input();
            } else if key.code == KeyCode::Enter {
                draft.attachments.submit_input();
            } else if let Some(input) = &mut draft.attachments.input {
                input.input(key);
            }
        } else if matches_key_in_text(key, &keys.back) {
            self.mode = Mode::Browsing;
            return commands;
        } else if matches_key_in_text(key, &keys.quit) {
            self.should_quit = true;
        } else if matches_key_in_text(key, &keys.add_attachment) {
            draft.attachments.open_input();
        } else if matches_key_in_text(key, &keys.remove_attachment) {
            draft.attachments.remove_last();
        } else if matches_key_in_text(key, &keys.next_field) {
            draft.focused_field = draft.focused_field.next();
        } else if matches_key_in_text(key, &keys.prev_field) {
            draft.focused_field = draft.focused_field.prev();
        } else if key.code == KeyCode::Enter && draft.focused_field != ComposeField::Body {
            draft.focused_field = draft.focused_field.next();
        } else {
            let field = draft.focused_field;
            draft.field_mut(field).input(key);
        }

        self.mode = Mode::Composing(draft);
        commands
    }

    fn replying_key(
        &mut self,
        mut draft: ReplyDraft,
        key: KeyEvent,
        keys: &Keybindings,
    ) -> Vec<Command> {
        let mut commands = Vec::new();

        if matches_key_in_text(key, &keys.send) {
            self.notify("Sending...");
            commands.push(Command::Send(draft.to_outgoing()));
        } else if draft.attachments.is_entering() {
            if matches_key_in_text(key, &keys.back) {
                draft.attachments.cancel_input();
            } else if key.code == KeyCode::Enter {
                draft.attachments.submit_input();
            } else if let Some(input) = &mut draft.attachments.input {
                input.input(key);
            }
        } else if matches_key_in_text(key, &keys.back) {
            self.mode = Mode::Viewing {
                message: draft.original,
                selecting_attachment: false,
            };
            return commands;
        } else if matches_key_in_text(key, &keys.quit) {
            self.should_quit = true;
        } else if matches_key_in_text(key, &keys.add_attachment) {
            draft.attachments.open_input();
        } else if matches_key_in_text(key, &keys.remove_attachment) {
            draft.attachments.remove_last();
        } else {
            draft.body.input(key);
        }

        self.mode = Mode::Replying(draft);
        commands
    }

    fn searching_key(
        &mut self,
        mut input: TextArea<'static>,
        key: KeyEvent,
        keys: &Keybindings,
    ) -> Vec<Command> {
        if matches_key_in_text(key, &keys.back) {
            self.mode = Mode::Browsing;
            return Vec::new();
        }
        if matches_key_in_text(key, &keys.quit) {
            self.should_quit = true;
        } else if key.code == KeyCode::Enter || matches_key_in_text(key, &keys.select) {
            let query = input_text(&input).trim().to_string();
            if !query.is_empty() {
                self.last_search = Some(query.clone());
                self.mode = Mode::Loading { resume: None };
                return vec![Command::Search { query }];
            }
        } else {
            input.input(key);
        }
        self.mode = Mode::Searching(input);
        Vec::new()
    }

    fn labels_key(&mut self, key: KeyEvent, keys: &Keybindings) -> Vec<Command> {
        if self.labels.is_filtering() {
            filter_key(&mut self.labels, key, keys);
            return Vec::new();
        }
        if navigate(&mut self.labels, key, keys) {
            return Vec::new();
        }

        if matches_key(key, &keys.quit) {
            self.should_quit = true;
        } else if matches_key(key, &keys.filter) {
            self.labels.start_filter();
        } else if matches_key(key, &keys.back) {
            if self.labels.filter().is_some() {
                self.labels.clear_filter();
            } else {
                self.mode = Mode::Browsing;
            }
        } else if matches_key(key, &keys.select) {
            if let Some(label) = self.labels.selected_label() {
                let label = label.clone();
                self.mode = Mode::Loading { resume: None };
                return vec![Command::LoadLabel { label }];
            }
        }
        Vec::new()
    }

    /// Fold a finished command back into the session.
    pub fn apply(&mut self, event: AppEvent) {
        match event {
            AppEvent::MessageLoaded(message) => {
                self.viewer_scroll = 0;
                self.mode = Mode::Viewing {
                    message,
                    selecting_attachment: false,
                };
            }
            AppEvent::ListLoaded { title, messages } => {
                debug!(%title, count = messages.len(), "list replaced");
                self.messages.title = title;
                self.messages
                    .set_entries(messages.into_iter().map(ListEntry::Message).collect());
                self.mode = Mode::Browsing;
            }
            AppEvent::LabelsLoaded(labels) => {
                self.labels
                    .set_entries(labels.into_iter().map(ListEntry::Label).collect());
                self.mode = Mode::ManagingLabels;
            }
            AppEvent::Sent => {
                self.viewer_scroll = 0;
                self.mode = Mode::Browsing;
                self.notify("Email sent successfully!");
            }
            AppEvent::Trashed { .. } => self.notify("Email moved to trash"),
            AppEvent::ReadStateChanged { id, unread } => {
                self.set_unread(&id, unread);
                self.notify(if unread {
                    "Email marked as unread"
                } else {
                    "Email marked as read"
                });
            }
            AppEvent::AttachmentSaved { filename } => {
                self.notify(format!("Downloaded: {}", filename))
            }
            AppEvent::Failed { operation, reason } => {
                if operation.drives_loading() {
                    if let Mode::Loading { resume } = &mut self.mode {
                        self.mode = match resume.take() {
                            Some(message) => Mode::Viewing {
                                message,
                                selecting_attachment: false,
                            },
                            None => Mode::Browsing,
                        };
                    }
                }
                self.notify(failure_text(operation, &reason));
            }
        }
    }

    fn set_unread(&mut self, id: &str, unread: bool) {
        if let Some(updated) = self.messages.find_message(id).map(|m| m.with_unread(unread)) {
            self.messages.replace_message(&updated);
        }
        if let Mode::Viewing { message, .. } = &mut self.mode {
            if message.id == id {
                *message = message.with_unread(unread);
            }
        }
    }
}

fn failure_text(operation: Operation, reason: &str) -> String {
    let what = match operation {
        Operation::LoadMessage => "Error loading message",
        Operation::Search => "Search failed",
        Operation::LoadLabel => "Error loading label",
        Operation::LoadLabels => "Error loading labels",
        Operation::Send => "Failed to send",
        Operation::Trash => "Failed to trash email",
        Operation::ToggleRead => "Failed to update read state",
        Operation::DownloadAttachment => "Attachment download failed",
    };
    format!("{}: {}", what, reason)
}

/// Up/down/home/end over a list. Returns whether the key was used.
fn navigate(list: &mut EntryList, key: KeyEvent, keys: &Keybindings) -> bool {
    if matches_key(key, &keys.move_down) {
        list.move_selection(1);
    } else if matches_key(key, &keys.move_up) {
        list.move_selection(-1);
    } else if key.code == KeyCode::Home {
        list.select(0);
    } else if key.code == KeyCode::End {
        list.select_last();
    } else if key.code == KeyCode::PageDown {
        list.move_selection(PAGE_SCROLL as i32);
    } else if key.code == KeyCode::PageUp {
        list.move_selection(-(PAGE_SCROLL as i32));
    } else {
        return false;
    }
    true
}

fn filter_key(list: &mut EntryList, key: KeyEvent, keys: &Keybindings) {
    if key.code == KeyCode::Esc {
        list.clear_filter();
    } else if key.code == KeyCode::Enter || matches_key_in_text(key, &keys.select) {
        list.accept_filter();
    } else if key.code == KeyCode::Backspace {
        list.pop_filter_char();
    } else if matches!(key.code, KeyCode::Down | KeyCode::Up) {
        navigate(list, key, keys);
    } else if let KeyCode::Char(c) = key.code {
        if !key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) {
            list.push_filter_char(c);
        }
    }
}
