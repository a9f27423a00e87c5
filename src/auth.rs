use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use google_gmail1::oauth2;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tracing::{info, warn};
use yup_oauth2::authenticator_delegate::InstalledFlowDelegate;
use yup_oauth2::storage::{TokenInfo, TokenStorage};
use yup_oauth2::{
    ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod,
    read_application_secret,
};

pub const SCOPES: &[&str] = &["https://mail.google.com/"];

const APP_NAME: &str = "gmail-tui";
const TOKEN_KEY: &str = "gmail_token";

pub type GmailAuthenticator = oauth2::authenticator::Authenticator<
    hyper_rustls::HttpsConnector<hyper::client::HttpConnector>,
>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenData {
    tokens: Vec<TokenInfo>,
}

/// Keeps the OAuth token in the OS keyring.
pub struct RingStorage;

fn entry() -> Result<Entry> {
    Entry::new(APP_NAME, TOKEN_KEY).map_err(|e| anyhow!("Keyring error: {}", e))
}

#[async_trait]
impl TokenStorage for RingStorage {
    async fn set(&self, _scopes: &[&str], token: TokenInfo) -> Result<()> {
        let data = TokenData {
            tokens: vec![token],
        };
        let serialized = serde_json::to_string(&data).context("Failed to serialize tokens")?;
        entry()?
            .set_password(&serialized)
            .map_err(|e| anyhow!("Keyring error: {}", e))?;
        Ok(())
    }

    async fn get(&self, _scopes: &[&str]) -> Option<TokenInfo> {
        match self.load() {
            Ok(data) => data.tokens.into_iter().next(),
            Err(e) => {
                warn!("Reading stored token failed: {:#}", e);
                None
            }
        }
    }
}

impl RingStorage {
    fn load(&self) -> Result<TokenData> {
        match entry()?.get_password() {
            Ok(serialized) => {
                serde_json::from_str(&serialized).context("Failed to deserialize tokens")
            }
            Err(keyring::Error::NoEntry) => Ok(TokenData::default()),
            Err(e) => Err(anyhow!("Keyring error: {}", e)),
        }
    }
}

/// Prints the consent URL and tries to open it in the browser. The terminal
/// is not in raw mode yet when this runs.
struct ConsoleDelegate;

impl InstalledFlowDelegate for ConsoleDelegate {
    fn present_user_url<'a>(
        &'a self,
        url: &'a str,
        _need_code: bool,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<String, String>> + Send + 'a>> {
        Box::pin(async move {
            println!("Go to the following link in your browser:\n\n{}\n", url);
            if let Err(e) = open::that(url) {
                warn!("Could not open browser: {}", e);
            }
            Ok(String::new())
        })
    }
}

pub async fn load_secret<P: AsRef<Path>>(path: P) -> Result<ApplicationSecret> {
    read_application_secret(path)
        .await
        .context("Failed to read application secret")
}

/// Builds the authenticator and makes sure a usable token exists.
pub async fn authenticate(secret: ApplicationSecret) -> Result<GmailAuthenticator> {
    let auth = InstalledFlowAuthenticator::builder(secret, InstalledFlowReturnMethod::HTTPRedirect)
        .with_storage(Box::new(RingStorage))
        .flow_delegate(Box::new(ConsoleDelegate))
        .build()
        .await
        .context("Failed to build authenticator")?;

    auth.token(SCOPES)
        .await
        .context("Failed to obtain access token")?;
    info!("authenticated");
    Ok(auth)
}
