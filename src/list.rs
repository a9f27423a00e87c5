use crate::models::{Label, MessageSummary};
use ratatui::widgets::ListState;

/// A row in one of the selectable lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry {
    Message(MessageSummary),
    Label(Label),
}

impl ListEntry {
    pub fn title(&self) -> String {
        match self {
            ListEntry::Message(m) if m.is_unread => format!("● {}", m.subject),
            ListEntry::Message(m) => format!("  {}", m.subject),
            ListEntry::Label(l) => l.display_name.clone(),
        }
    }

    pub fn description(&self) -> String {
        match self {
            ListEntry::Message(m) => format!("{} - {}", m.from, m.snippet),
            ListEntry::Label(l) => format!("ID: {}", l.id),
        }
    }

    pub fn filter_value(&self) -> String {
        match self {
            ListEntry::Message(m) => format!("{} {}", m.subject, m.from),
            ListEntry::Label(l) => l.display_name.clone(),
        }
    }
}

/// Text typed into the list filter, and whether it is still being edited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub text: String,
    pub editing: bool,
}

/// Entries plus selection and an optional filter. The selection indexes the
/// visible (filtered) rows.
#[derive(Debug, Default)]
pub struct EntryList {
    pub title: String,
    entries: Vec<ListEntry>,
    filter: Option<Filter>,
    pub state: ListState,
}

impl EntryList {
    pub fn new(title: impl Into<String>, entries: Vec<ListEntry>) -> Self {
        let mut list = Self {
            title: title.into(),
            ..Default::default()
        };
        list.set_entries(entries);
        list
    }

    /// Replace every entry; the filter is dropped and the selection reset.
    pub fn set_entries(&mut self, entries: Vec<ListEntry>) {
        self.entries = entries;
        self.filter = None;
        self.reset_selection();
    }

    pub fn entries(&self) -> &[ListEntry] {
        &self.entries
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn is_filtering(&self) -> bool {
        self.filter.as_ref().is_some_and(|f| f.editing)
    }

    pub fn visible(&self) -> Vec<&ListEntry> {
        match &self.filter {
            Some(f) if !f.text.is_empty() => {
                let needle = f.text.to_lowercase();
                self.entries
                    .iter()
                    .filter(|e| e.filter_value().to_lowercase().contains(&needle))
                    .collect()
            }
            _ => self.entries.iter().collect(),
        }
    }

    pub fn selected(&self) -> Option<&ListEntry> {
        let idx = self.state.selected()?;
        self.visible().get(idx).copied()
    }

    pub fn selected_message(&self) -> Option<&MessageSummary> {
        match self.selected()? {
            ListEntry::Message(m) => Some(m),
            ListEntry::Label(_) => None,
        }
    }

    pub fn selected_label(&self) -> Option<&Label> {
        match self.selected()? {
            ListEntry::Label(l) => Some(l),
            ListEntry::Message(_) => None,
        }
    }

    pub fn select(&mut self, index: usize) {
        let len = self.visible().len();
        if len == 0 {
            self.state.select(None);
        } else {
            self.state.select(Some(index.min(len - 1)));
        }
    }

    pub fn move_selection(&mut self, delta: i32) {
        let len = self.visible().len() as i32;
        if len == 0 {
            self.state.select(None);
            return;
        }
        let cur = self.state.selected().unwrap_or(0) as i32;
        let next = (cur + delta).clamp(0, len - 1) as usize;
        self.state.select(Some(next));
    }

    pub fn select_last(&mut self) {
        self.select(usize::MAX);
    }

    fn reset_selection(&mut self) {
        self.select(0);
    }

    /// Swap the message with the same id for `updated`.
    pub fn replace_message(&mut self, updated: &MessageSummary) {
        for entry in &mut self.entries {
            if let ListEntry::Message(m) = entry {
                if m.id == updated.id {
                    *m = updated.clone();
                }
            }
        }
    }

    pub fn find_message(&self, id: &str) -> Option<&MessageSummary> {
        self.entries.iter().find_map(|e| match e {
            ListEntry::Message(m) if m.id == id => Some(m),
            _ => None,
        })
    }

    pub fn start_filter(&mut self) {
        let text = self.filter.take().map(|f| f.text).unwrap_or_default();
        self.filter = Some(Filter {
            text,
            editing: true,
        });
    }

    pub fn push_filter_char(&mut self, c: char) {
        if let Some(f) = &mut self.filter {
            f.text.push(c);
        }
        self.reset_selection();
    }

    pub fn pop_filter_char(&mut self) {
        if let Some(f) = &mut self.filter {
            f.text.pop();
        }
        self.reset_selection();
    }

    /// Stop editing but keep the filter applied.
    pub fn accept_filter(&mut self) {
        match &mut self.filter {
            Some(f) if f.text.is_empty() => self.filter = None,
            Some(f) => f.editing = false,
            None => {}
        }
    }

    pub fn clear_filter(&mut self) {
        self.filter = None;
        self.reset_selection();
    }
}
