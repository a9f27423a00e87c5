mod auth;
mod command;
mod config;
mod error;
mod gmail;
mod list;
mod mime;
mod models;
mod session;
mod ui;

use crate::command::{Dispatcher, Executor, ListLimits};
use crate::config::{Config, LogSettings};
use crate::error::StartupError;
use crate::gmail::{GmailClient, ListQuery, MailGateway};
use crate::models::Detail;
use crate::session::Session;
use crossterm::{
    event::{Event, EventStream, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use google_gmail1::Gmail;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const TICK: Duration = Duration::from_millis(100);

fn init_logging(settings: &LogSettings) -> anyhow::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&settings.file)?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

async fn connect(config: &Config) -> Result<Arc<dyn MailGateway>, StartupError> {
    let secret = auth::load_secret(&config.mail.credentials_path)
        .await
        .map_err(|source| StartupError::Credentials {
            path: config.mail.credentials_path.clone(),
            source,
        })?;
    let authenticator = auth::authenticate(secret)
        .await
        .map_err(StartupError::Authentication)?;

    let connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .map_err(|e| StartupError::Gateway(e.into()))?
        .https_only()
        .enable_http1()
        .build();
    let hub = Gmail::new(hyper::Client::builder().build(connector), authenticator);
    Ok(Arc::new(GmailClient::new(hub)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    init_logging(&config.logging)?;
    if let Some(e) = config_error {
        warn!("Invalid {}, using defaults: {}", config::SETTINGS_FILE, e);
    }

    let gateway = connect(&config).await?;
    let executor = Executor::new(
        gateway.clone(),
        ListLimits {
            search_max_results: config.mail.search_max_results,
            label_max_results: config.mail.label_max_results,
            fetch_concurrency: config.mail.fetch_concurrency,
        },
        config.mail.download_dir.clone(),
    );

    let inbox = executor
        .load_summaries(
            ListQuery {
                query: Some(config.mail.inbox_query.clone()),
                label_id: None,
                max_results: config.mail.inbox_max_results,
            },
            Detail::Full,
        )
        .await
        .map_err(StartupError::InitialFetch)?;
    if inbox.is_empty() {
        println!("No messages found in primary inbox");
        return Ok(());
    }
    let labels = match gateway.list_labels().await {
        Ok(labels) => labels,
        Err(e) => {
            warn!("Unable to retrieve labels: {:#}", e);
            Vec::new()
        }
    };
    info!(messages = inbox.len(), labels = labels.len(), "session seeded");

    let mut session = Session::new(inbox, labels);
    let (tx, rx) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher::new(executor, tx);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal, &mut session, &config, &dispatcher, rx).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(e) = &result {
        error!("event loop failed: {:#}", e);
    }
    result
}

async fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    session: &mut Session,
    config: &Config,
    dispatcher: &Dispatcher,
    mut results: mpsc::UnboundedReceiver<command::AppEvent>,
) -> anyhow::Result<()> {
    let mut events = EventStream::new();
    let mut tick = tokio::time::interval(TICK);

    loop {
        terminal.draw(|f| ui::render(f, session, &config.keybindings))?;

        let commands = tokio::select! {
            maybe_event = events.next() => match maybe_event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    session.handle_key(key, &config.keybindings)
                }
                Some(Ok(_)) => Vec::new(),
                Some(Err(e)) => return Err(e.into()),
                None => break,
            },
            Some(event) = results.recv() => {
                session.apply(event);
                Vec::new()
            }
            _ = tick.tick() => {
                session.tick();
                Vec::new()
            }
        };

        for command in commands {
            dispatcher.dispatch(command);
        }
        if session.should_quit {
            break;
        }
    }

    Ok(())
}
