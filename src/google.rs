//! Google Sheets REST v4 client authenticated with a service account.

use std::fs;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use log::{debug, info};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::sheets::{SheetsClient, SheetsError};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

// Tokens are refreshed this long before Google says they expire.
const TOKEN_SLACK: Duration = Duration::from_secs(60);

/// The subset of a service-account key file the client needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ServiceAccountKey {
    /// Parse a key from base64-encoded JSON.
    pub fn from_base64(encoded: &str) -> Result<Self, SheetsError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| SheetsError::Unavailable(format!("credentials are not base64: {e}")))?;
        Self::from_json(&bytes)
    }

    /// Parse a key from raw JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, SheetsError> {
        serde_json::from_slice(bytes)
            .map_err(|e| SheetsError::Unavailable(format!("credentials are not valid JSON: {e}")))
    }

    fn token_uri(&self) -> &str {
        self.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI)
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: SystemTime,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Client for one spreadsheet document.
pub struct GoogleSheetsClient {
    http: Client,
    spreadsheet_id: String,
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleSheetsClient {
    pub fn new(spreadsheet_id: &str, key: ServiceAccountKey) -> Result<Self, SheetsError> {
        if spreadsheet_id.trim().is_empty() {
            return Err(SheetsError::Unavailable("SPREADSHEET_ID is empty".to_string()));
        }
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| SheetsError::Unavailable(format!("invalid private key: {e}")))?;
        let http = Client::builder()
            .build()
            .map_err(|e| SheetsError::Unavailable(format!("cannot build HTTP client: {e}")))?;

        info!("Google Sheets client created for {}", key.client_email);

        Ok(GoogleSheetsClient {
            http,
            spreadsheet_id: spreadsheet_id.to_string(),
            key,
            signing_key,
            token: Mutex::new(None),
        })
    }

    /// Build a client from configuration.
    ///
    /// `GOOGLE_CREDENTIALS_BASE64` wins over `GOOGLE_CREDENTIALS_PATH`.
    ///
    /// # Errors
    /// * `SheetsError::Unavailable` when the spreadsheet id or the
    ///   credentials are missing or unusable
    pub fn from_config(config: &Config) -> Result<Self, SheetsError> {
        let spreadsheet_id = config
            .spreadsheet_id
            .as_deref()
            .ok_or_else(|| SheetsError::Unavailable("SPREADSHEET_ID not set".to_string()))?;

        let key = if let Some(encoded) = &config.credentials_base64 {
            ServiceAccountKey::from_base64(encoded)?
        } else if let Some(path) = &config.credentials_path {
            let bytes = fs::read(path).map_err(|e| {
                SheetsError::Unavailable(format!("cannot read {}: {e}", path.display()))
            })?;
            ServiceAccountKey::from_json(&bytes)?
        } else {
            return Err(SheetsError::Unavailable(
                "GOOGLE_CREDENTIALS_BASE64 or GOOGLE_CREDENTIALS_PATH not set".to_string(),
            ));
        };

        Self::new(spreadsheet_id, key)
    }

    async fn access_token(&self) -> Result<String, SheetsError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.refresh_at > SystemTime::now() {
                return Ok(token.value.clone());
            }
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: SHEETS_SCOPE,
            aud: self.key.token_uri(),
            iat: now,
            exp: now + 3600,
        };
        let assertion =
            jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
                .map_err(|e| SheetsError::Unavailable(format!("cannot sign assertion: {e}")))?;

        let response = self
            .http
            .post(self.key.token_uri())
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let response = check_status(response).await?;
        let token: TokenResponse = response.json().await?;

        debug!("Fetched access token valid for {}s", token.expires_in);
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_SLACK);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: SystemTime::now() + lifetime,
        });

        Ok(token.access_token)
    }

    fn values_url(&self, range: &str) -> Result<Url, SheetsError> {
        let mut url = Url::parse(SHEETS_API).map_err(|e| SheetsError::Transport(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| SheetsError::Transport("base URL cannot hold a path".to_string()))?
            .push(&self.spreadsheet_id)
            .push("values")
            .push(range);
        Ok(url)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SheetsError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(SheetsError::Remote {
        status: status.as_u16(),
        message,
    })
}

fn cell_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl SheetsClient for GoogleSheetsClient {
    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, SheetsError> {
        let token = self.access_token().await?;
        let url = self.values_url(range)?;

        let response = self.http.get(url).bearer_auth(token).send().await?;
        let body: ValueRange = check_status(response).await?.json().await?;

        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }

    async fn write_cell(&self, range: &str, value: &str) -> Result<(), SheetsError> {
        let token = self.access_token().await?;
        let mut url = self.values_url(range)?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");

        let body = serde_json::json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": [[value]],
        });
        let response = self
            .http
            .put(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        check_status(response).await?;

        Ok(())
    }
}
