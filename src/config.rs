use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub keybindings: Keybindings,
    pub mail: MailSettings,
    pub logging: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    pub credentials_path: PathBuf,
    pub inbox_query: String,
    pub inbox_max_results: u32,
    pub search_max_results: u32,
    pub label_max_results: u32,
    /// Parallel message fetches when filling a list.
    pub fetch_concurrency: usize,
    pub download_dir: PathBuf,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from("credentials.json"),
            inbox_query: "in:inbox category:primary".to_string(),
            inbox_max_results: 10,
            search_max_results: 30,
            label_max_results: 10,
            fetch_concurrency: 4,
            download_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub file: PathBuf,
    /// Used when RUST_LOG is not set.
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            file: PathBuf::from("gmail-tui.log"),
            level: "info".to_string(),
        }
    }
}

/// The key table. Built once at startup and only read afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Keybindings {
    pub back: Vec<String>,
    pub select: Vec<String>,
    pub reply: Vec<String>,
    pub compose: Vec<String>,
    pub delete: Vec<String>,
    pub search: Vec<String>,
    pub labels: Vec<String>,
    pub toggle_read: Vec<String>,
    pub quit: Vec<String>,
    pub send: Vec<String>,
    pub next_field: Vec<String>,
    pub prev_field: Vec<String>,
    pub help: Vec<String>,
    pub add_attachment: Vec<String>,
    pub remove_attachment: Vec<String>,
    pub download_attachment: Vec<String>,
    pub filter: Vec<String>,
    pub move_up: Vec<String>,
    pub move_down: Vec<String>,
}

impl Default for Keybindings {
    fn default() -> Self {
        let keys = |ks: &[&str]| ks.iter().map(|k| k.to_string()).collect::<Vec<_>>();
        Self {
            back: keys(&["b", "Esc"]),
            select: keys(&["Enter"]),
            reply: keys(&["r"]),
            compose: keys(&["c"]),
            delete: keys(&["d"]),
            search: keys(&["/"]),
            labels: keys(&["l"]),
            toggle_read: keys(&["m"]),
            quit: keys(&["q", "ctrl-c"]),
            send: keys(&["ctrl-s"]),
            next_field: keys(&["Tab"]),
            prev_field: keys(&["BackTab"]),
            help: keys(&["?", "F1"]),
            add_attachment: keys(&["ctrl-a"]),
            remove_attachment: keys(&["ctrl-x"]),
            download_attachment: keys(&["a"]),
            filter: keys(&["f"]),
            move_up: keys(&["k", "Up"]),
            move_down: keys(&["j", "Down"]),
        }
    }
}

pub fn parse_key_string(key_str: &str) -> (KeyCode, KeyModifiers) {
    let mut parts: Vec<&str> = key_str.split('-').collect();
    let mut modifiers = KeyModifiers::empty();

    // We process from the end to find the base key, then consume prefixes
    let base_key_str = parts.pop().unwrap_or("");

    for part in parts {
        match part.to_lowercase().as_str() {
            "ctrl" => modifiers.insert(KeyModifiers::CONTROL),
            "alt" => modifiers.insert(KeyModifiers::ALT),
            "shift" => modifiers.insert(KeyModifiers::SHIFT),
            _ => {}
        }
    }

    let mut chars = base_key_str.chars();
    let code = match base_key_str {
        "Backspace" => KeyCode::Backspace,
        "Enter" => KeyCode::Enter,
        "Left" => KeyCode::Left,
        "Right" => KeyCode::Right,
        "Up" => KeyCode::Up,
        "Down" => KeyCode::Down,
        "Home" => KeyCode::Home,
        "End" => KeyCode::End,
        "PageUp" => KeyCode::PageUp,
        "PageDown" => KeyCode::PageDown,
        "Tab" => KeyCode::Tab,
        "BackTab" => KeyCode::BackTab,
        "Esc" => KeyCode::Esc,
        _ => match (chars.next(), chars.next()) {
            (Some(c), None) => KeyCode::Char(c),
            (Some('F'), Some(_)) => base_key_str[1..]
                .parse()
                .map(KeyCode::F)
                .unwrap_or(KeyCode::Null),
            _ => KeyCode::Null,
        },
    };

    (code, modifiers)
}

pub fn matches_key(event: KeyEvent, bindings: &[String]) -> bool {
    bindings.iter().any(|b| {
        let (code, modifiers) = parse_key_string(b);
        event.code == code && event.modifiers.contains(modifiers)
    })
}

/// Like [`matches_key`], but skips bindings that would type a character.
/// Used while a text field has focus.
pub fn matches_key_in_text(event: KeyEvent, bindings: &[String]) -> bool {
    bindings.iter().any(|b| {
        let (code, modifiers) = parse_key_string(b);
        let types_char = matches!(code, KeyCode::Char(_))
            && !modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT);
        !types_char && event.code == code && event.modifiers.contains(modifiers)
    })
}

impl Config {
    /// Reads `settings.toml` from the working directory. A missing file means
    /// defaults; a malformed one is reported so the caller can log it.
    pub fn load() -> Result<Self, toml::de::Error> {
        match std::fs::read_to_string(SETTINGS_FILE) {
            Ok(content) => Self::from_toml(&content),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_parse_key_string() {
        assert_eq!(
            parse_key_string("ctrl-s"),
            (KeyCode::Char('s'), KeyModifiers::CONTROL)
        );
        assert_eq!(parse_key_string("Esc"), (KeyCode::Esc, KeyModifiers::empty()));
        assert_eq!(parse_key_string("?"), (KeyCode::Char('?'), KeyModifiers::empty()));
        assert_eq!(parse_key_string("é"), (KeyCode::Char('é'), KeyModifiers::empty()));
        assert_eq!(parse_key_string("Nope"), (KeyCode::Null, KeyModifiers::empty()));
        assert_eq!(parse_key_string("F1"), (KeyCode::F(1), KeyModifiers::empty()));
        assert_eq!(parse_key_string("F12"), (KeyCode::F(12), KeyModifiers::empty()));
        assert_eq!(parse_key_string("F"), (KeyCode::Char('F'), KeyModifiers::empty()));
        assert_eq!(parse_key_string("Fx"), (KeyCode::Null, KeyModifiers::empty()));
    }

    #[test]
    fn test_matches_key_requires_modifiers() {
        let send = vec!["ctrl-s".to_string()];
        assert!(matches_key(key(KeyCode::Char('s'), KeyModifiers::CONTROL), &send));
        assert!(!matches_key(key(KeyCode::Char('s'), KeyModifiers::NONE), &send));
    }

    #[test]
    fn test_text_matching_skips_printable_bindings() {
        let back = Keybindings::default().back;
        assert!(matches_key(key(KeyCode::Char('b'), KeyModifiers::NONE), &back));
        assert!(!matches_key_in_text(key(KeyCode::Char('b'), KeyModifiers::NONE), &back));
        assert!(matches_key_in_text(key(KeyCode::Esc, KeyModifiers::NONE), &back));

        let quit = Keybindings::default().quit;
        assert!(matches_key_in_text(key(KeyCode::Char('c'), KeyModifiers::CONTROL), &quit));
    }

    #[test]
    fn test_default_help_has_a_text_safe_binding() {
        let help = Keybindings::default().help;
        assert!(!matches_key_in_text(key(KeyCode::Char('?'), KeyModifiers::NONE), &help));
        assert!(matches_key_in_text(key(KeyCode::F(1), KeyModifiers::NONE), &help));
        assert!(matches_key(key(KeyCode::Char('?'), KeyModifiers::NONE), &help));
    }

    #[test]
    fn test_partial_settings_fall_back_to_defaults() {
        let config = Config::from_toml(
            r#"
            [keybindings]
            quit = ["x"]

            [mail]
            search_max_results = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.keybindings.quit, vec!["x".to_string()]);
        assert_eq!(config.keybindings.reply, vec!["r".to_string()]);
        assert_eq!(config.mail.search_max_results, 50);
        assert_eq!(config.mail.inbox_query, "in:inbox category:primary");
        assert_eq!(config.logging.level, "info");
    }
}
