use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// Environment-derived settings, resolved once before the listener binds.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub access_token: String,
    pub phone_number_id: String,
    pub verify_token: String,
    pub app_secret: String,
    pub database_path: String,
    pub port: u16,
}

pub struct AppState {
    pub db: SqlitePool,
    pub http: reqwest::Client,
    pub config: Config,
}

/// A tracked contact, keyed by phone number. Never deleted by this server.
#[derive(Debug, Clone, Serialize)]
pub struct Lead {
    pub id: i64,
    pub phone: String,
    pub name: Option<String>,
    pub status: String,
    pub last_message_at: Option<String>,
}

/// One entry in a lead's message history. Append-only.
#[derive(Debug, Clone, Serialize)]
pub struct LeadMessage {
    pub id: i64,
    pub lead_phone: String,
    pub wa_message_id: Option<String>,
    pub direction: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub content: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTextBody {
    pub phone: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HuntTemplateBody {
    pub phone: Option<String>,
    pub name: Option<String>,
    pub template_name: Option<String>,
}
