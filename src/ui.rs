use crate::config::Keybindings;
use crate::list::EntryList;
use crate::models::{MessageSummary, human_size};
use crate::session::{
    Attachments, ComposeDraft, ComposeField, Mode, ReplyDraft, SPINNER_FRAMES, Session,
    input_text,
};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use tui_textarea::TextArea;

fn focus_style(focused: bool) -> Style {
    if focused {
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    }
}

pub fn render(f: &mut Frame, session: &mut Session, keys: &Keybindings) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(f.area());

    let spinner = SPINNER_FRAMES[session.spinner_frame % SPINNER_FRAMES.len()];
    let viewer_scroll = session.viewer_scroll;

    match &mut session.mode {
        Mode::Browsing => render_list(f, &mut session.messages, chunks[0]),
        Mode::Loading { .. } => {
            render_list(f, &mut session.messages, chunks[0]);
            render_loading(f, spinner);
        }
        Mode::Searching(input) => {
            let parts = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(3), Constraint::Min(3)])
                .split(chunks[0]);
            input.set_block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Search [Enter to Search, Esc to Cancel] ")
                    .border_style(focus_style(true)),
            );
            f.render_widget(&*input, parts[0]);
            set_cursor(f, input, parts[0]);
            render_list(f, &mut session.messages, parts[1]);
        }
        Mode::Viewing {
            message,
            selecting_attachment,
        } => {
            render_message(f, message, viewer_scroll, chunks[0]);
            if *selecting_attachment {
                render_attachment_select(f, message);
            }
        }
        Mode::Composing(draft) => render_compose(f, draft, chunks[0]),
        Mode::Replying(draft) => render_reply(f, draft, chunks[0]),
        Mode::ManagingLabels => render_list(f, &mut session.labels, chunks[0]),
    }

    render_status(f, session, chunks[1]);

    if session.show_help {
        render_help(f, keys);
    }
}

fn render_list(f: &mut Frame, list: &mut EntryList, area: Rect) {
    let width = area.width.saturating_sub(4) as usize;
    let items: Vec<ListItem> = list
        .visible()
        .iter()
        .map(|entry| {
            let description: String = entry.description().chars().take(width).collect();
            ListItem::new(vec![
                Line::from(Span::styled(
                    entry.title(),
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(Span::styled(
                    description,
                    Style::default().fg(Color::DarkGray),
                )),
            ])
        })
        .collect();

    let title = match list.filter() {
        Some(filter) if filter.editing => format!(" {} - Filter: {}_ ", list.title, filter.text),
        Some(filter) => format!(" {} - Filter: {} ", list.title, filter.text),
        None => format!(" {} ", list.title),
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(Style::default().fg(Color::Yellow));

    if items.is_empty() {
        let empty = Paragraph::new("No items")
            .block(block)
            .style(Style::default().fg(Color::DarkGray));
        f.render_widget(empty, area);
        return;
    }

    let widget = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("█ ");
    f.render_stateful_widget(widget, area, &mut list.state);
}

fn render_loading(f: &mut Frame, spinner: &str) {
    let area = centered_rect(30, 20, f.area());
    f.render_widget(Clear, area);
    let loading = Paragraph::new(format!("{} Loading...", spinner))
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(loading, area);
}

fn message_header(message: &MessageSummary) -> String {
    let mut header = format!("From: {}\n", message.from);
    if !message.to.is_empty() {
        header.push_str(&format!("To: {}\n", message.to));
    }
    if !message.cc.is_empty() {
        header.push_str(&format!("Cc: {}\n", message.cc));
    }
    header.push_str(&format!(
        "Date: {}\nSubject: {}\n",
        message.date, message.subject
    ));
    if !message.attachments.is_empty() {
        let names: Vec<String> = message
            .attachments
            .iter()
            .map(|a| format!("{} ({})", a.filename, human_size(a.size)))
            .collect();
        header.push_str(&format!("Attachments: {}\n", names.join(", ")));
    }
    header
}

fn render_message(f: &mut Frame, message: &MessageSummary, scroll: u16, area: Rect) {
    let content = format!(
        "{}\n------------------------------------------------------------\n\n{}",
        message_header(message),
        clean_body(&message.body)
    );
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Message Details ")
        .border_style(Style::default().fg(Color::Yellow));
    let paragraph = Paragraph::new(content)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));
    f.render_widget(paragraph, area);
}

fn render_attachment_select(f: &mut Frame, message: &MessageSummary) {
    let area = centered_rect(60, 40, f.area());
    f.render_widget(Clear, area);
    let lines: Vec<Line> = message
        .attachments
        .iter()
        .take(9)
        .enumerate()
        .map(|(i, a)| Line::from(format!("{}. {} ({})", i + 1, a.filename, human_size(a.size))))
        .collect();
    let popup = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Select attachment to download (1-9, Esc to Cancel) ")
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(popup, area);
}

fn render_compose(f: &mut Frame, draft: &mut ComposeDraft, area: Rect) {
    let mut constraints: Vec<Constraint> = ComposeField::ALL
        .iter()
        .map(|field| match field {
            ComposeField::Body => Constraint::Min(5),
            _ => Constraint::Length(3),
        })
        .collect();
    constraints.push(Constraint::Length(1));
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    let entering = draft.attachments.is_entering();
    for (i, field) in ComposeField::ALL.into_iter().enumerate() {
        let focused = !entering && draft.focused_field == field;
        let title = if field == ComposeField::Body {
            " Body [Esc to Cancel, Ctrl-S to Send, Tab to Switch, Ctrl-A to Attach] "
        } else {
            field.title()
        };
        let textarea = draft.field_mut(field);
        textarea.set_block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(focus_style(focused)),
        );
        f.render_widget(&*textarea, chunks[i]);
        if focused {
            set_cursor(f, draft.field(field), chunks[i]);
        }
    }

    render_attachment_line(f, &draft.attachments, chunks[ComposeField::ALL.len()]);
    render_attachment_input(f, &mut draft.attachments);
}

fn render_reply(f: &mut Frame, draft: &mut ReplyDraft, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(5),
            Constraint::Length(1),
        ])
        .split(area);

    let header = Paragraph::new(format!(
        "Replying to: {}\nSubject: {}",
        draft.original.from,
        draft.subject()
    ))
    .block(Block::default().borders(Borders::ALL).title(" Reply "));
    f.render_widget(header, chunks[0]);

    let focused = !draft.attachments.is_entering();
    draft.body.set_block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Body [Esc to Cancel, Ctrl-S to Send, Ctrl-A to Attach] ")
            .border_style(focus_style(focused)),
    );
    f.render_widget(&draft.body, chunks[1]);
    if focused {
        set_cursor(f, &draft.body, chunks[1]);
    }

    render_attachment_line(f, &draft.attachments, chunks[2]);
    render_attachment_input(f, &mut draft.attachments);
}

fn render_attachment_line(f: &mut Frame, attachments: &Attachments, area: Rect) {
    let text = if attachments.paths.is_empty() {
        "No attachments".to_string()
    } else {
        let names: Vec<String> = attachments
            .paths
            .iter()
            .map(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| p.display().to_string())
            })
            .collect();
        format!("Attachments: {}", names.join(", "))
    };
    f.render_widget(
        Paragraph::new(text).style(Style::default().fg(Color::DarkGray)),
        area,
    );
}

fn render_attachment_input(f: &mut Frame, attachments: &mut Attachments) {
    let Some(input) = &mut attachments.input else {
        return;
    };
    let outer = centered_rect(70, 20, f.area());
    let area = Rect {
        height: outer.height.min(3),
        ..outer
    };
    f.render_widget(Clear, area);
    input.set_block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Attachment path [Enter to Add, Esc to Cancel] ")
            .border_style(focus_style(true)),
    );
    f.render_widget(&*input, area);
    set_cursor(f, input, area);
}

fn set_cursor(f: &mut Frame, textarea: &TextArea<'_>, area: Rect) {
    let (row, col) = textarea.cursor();
    f.set_cursor_position((area.x + 1 + col as u16, area.y + 1 + row as u16));
}

fn render_status(f: &mut Frame, session: &Session, area: Rect) {
    let mut spans = vec![Span::styled(
        format!(" {} ", session.mode.name()),
        Style::default()
            .fg(Color::Black)
            .bg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    )];
    if matches!(session.mode, Mode::Loading { .. }) {
        spans.push(Span::raw(format!(
            " {}",
            SPINNER_FRAMES[session.spinner_frame % SPINNER_FRAMES.len()]
        )));
    }
    match &session.notification {
        Some(text) => spans.push(Span::styled(
            format!(" {}", text),
            Style::default().fg(Color::Yellow),
        )),
        None => spans.push(Span::styled(
            " ? for help",
            Style::default().fg(Color::DarkGray),
        )),
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn help_lines(keys: &Keybindings) -> Vec<(String, &'static str)> {
    let k = |bindings: &[String]| bindings.join(", ");
    vec![
        (k(&keys.move_up), "Move up"),
        (k(&keys.move_down), "Move down"),
        (k(&keys.select), "Open message / label"),
        (k(&keys.back), "Back"),
        (k(&keys.compose), "Compose"),
        (k(&keys.reply), "Reply"),
        (k(&keys.search), "Search"),
        (k(&keys.filter), "Filter list"),
        (k(&keys.labels), "Labels"),
        (k(&keys.delete), "Move to trash"),
        (k(&keys.toggle_read), "Toggle read / unread"),
        (k(&keys.download_attachment), "Download attachment"),
        (k(&keys.send), "Send"),
        (k(&keys.next_field), "Next field"),
        (k(&keys.prev_field), "Previous field"),
        (k(&keys.add_attachment), "Add attachment"),
        (k(&keys.remove_attachment), "Remove last attachment"),
        (k(&keys.help), "Toggle help"),
        (k(&keys.quit), "Quit"),
    ]
}

fn render_help(f: &mut Frame, keys: &Keybindings) {
    let area = centered_rect(60, 80, f.area());
    f.render_widget(Clear, area);
    let lines: Vec<Line> = help_lines(keys)
        .into_iter()
        .map(|(binding, action)| {
            Line::from(vec![
                Span::styled(
                    format!("{:>16}  ", binding),
                    Style::default().fg(Color::Yellow),
                ),
                Span::raw(action),
            ])
        })
        .collect();
    let help = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Help ")
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(help, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

/// Normalizes line endings and collapses runs of blank lines to one.
fn clean_body(body: &str) -> String {
    let normalized = body.replace("\r\n", "\n").replace('\r', "\n");
    let mut result = String::with_capacity(normalized.len());
    let mut blank_run = 0;
    let mut first = true;

    for line in normalized.split('\n') {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            blank_run += 1;
            continue;
        }
        if !first {
            // one newline ends the previous line, a second keeps one blank line
            for _ in 0..std::cmp::min(blank_run + 1, 2) {
                result.push('\n');
            }
        }
        result.push_str(trimmed);
        blank_run = 0;
        first = false;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttachmentInfo;
    use ratatui::{Terminal, backend::TestBackend};

    fn screen_text(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        let mut text = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                text.push_str(buffer[(x, y)].symbol());
            }
            text.push('\n');
        }
        text
    }

    fn message(id: &str, subject: &str) -> MessageSummary {
        MessageSummary {
            id: id.to_string(),
            subject: subject.to_string(),
            from: "alice@example.com".to_string(),
            date: "Jan 02, 2006 15:04".to_string(),
            body: "Hello\r\n\r\n\r\nWorld".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_clean_body_removes_extra_newlines() {
        assert_eq!(
            clean_body("Line 1\n\n\nLine 2\n\n\n\nLine 3"),
            "Line 1\n\nLine 2\n\nLine 3"
        );
    }

    #[test]
    fn test_clean_body_normalizes_crlf() {
        assert_eq!(clean_body("Line 1\r\n\r\n\r\nLine 2"), "Line 1\n\nLine 2");
    }

    #[test]
    fn test_clean_body_handles_whitespace_lines() {
        assert_eq!(clean_body("Line 1\n   \n\t\nLine 2"), "Line 1\n\nLine 2");
    }

    #[test]
    fn test_clean_body_trims_lines() {
        assert_eq!(clean_body("Line 1   \nLine 2\t"), "Line 1\nLine 2");
    }

    #[test]
    fn test_message_header_lists_attachments() {
        let mut m = message("1", "Report");
        m.attachments.push(AttachmentInfo {
            filename: "q3.pdf".to_string(),
            size: 2048,
            attachment_id: "a".to_string(),
        });
        let header = message_header(&m);
        assert!(header.starts_with("From: alice@example.com\n"));
        assert!(header.contains("Subject: Report\n"));
        assert!(header.contains("Attachments: q3.pdf ("));
        assert!(!header.contains("Cc:"));
    }

    #[test]
    fn test_render_browsing_and_help() {
        let keys = Keybindings::default();
        let mut session = Session::new(vec![message("1", "Quarterly numbers")], Vec::new());
        let mut terminal = Terminal::new(TestBackend::new(80, 20)).unwrap();

        terminal
            .draw(|f| render(f, &mut session, &keys))
            .unwrap();
        let text = screen_text(&terminal);
        assert!(text.contains("Inbox"));
        assert!(text.contains("Quarterly numbers"));
        assert!(text.contains("Browsing"));

        session.show_help = true;
        terminal
            .draw(|f| render(f, &mut session, &keys))
            .unwrap();
        assert!(screen_text(&terminal).contains("Toggle read / unread"));
    }

    #[test]
    fn test_render_viewer() {
        let keys = Keybindings::default();
        let mut session = Session::new(Vec::new(), Vec::new());
        session.mode = Mode::Viewing {
            message: message("1", "Quarterly numbers"),
            selecting_attachment: false,
        };
        let mut terminal = Terminal::new(TestBackend::new(80, 20)).unwrap();
        terminal
            .draw(|f| render(f, &mut session, &keys))
            .unwrap();
        let text = screen_text(&terminal);
        assert!(text.contains("Subject: Quarterly numbers"));
        assert!(text.contains("World"));
    }
}
