use std::collections::HashSet;

use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};

use crate::types::{Lead, LeadMessage};

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

pub async fn connect(database_path: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(database_path)
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS leads (\
             id INTEGER PRIMARY KEY AUTOINCREMENT, \
             phone TEXT NOT NULL UNIQUE, \
             name TEXT, \
             status TEXT NOT NULL DEFAULT 'new', \
             last_message_at TEXT\
         )",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS messages (\
             id INTEGER PRIMARY KEY AUTOINCREMENT, \
             lead_phone TEXT NOT NULL, \
             wa_message_id TEXT, \
             direction TEXT NOT NULL, \
             type TEXT NOT NULL, \
             content TEXT, \
             timestamp TEXT NOT NULL, \
             FOREIGN KEY (lead_phone) REFERENCES leads (phone) ON DELETE CASCADE\
         )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

fn parse_lead_row(row: SqliteRow) -> Lead {
    Lead {
        id: row.get("id"),
        phone: row.get("phone"),
        name: row.get("name"),
        status: row.get("status"),
        last_message_at: row.get("last_message_at"),
    }
}

fn parse_message_row(row: SqliteRow) -> LeadMessage {
    LeadMessage {
        id: row.get("id"),
        lead_phone: row.get("lead_phone"),
        wa_message_id: row.get("wa_message_id"),
        direction: row.get("direction"),
        message_type: row.get("type"),
        content: row.get("content"),
        timestamp: row.get("timestamp"),
    }
}

/// Insert-or-overwrite by phone. Last write wins; concurrent webhook and API
/// calls for the same phone race benignly.
pub async fn upsert_lead(
    pool: &SqlitePool,
    phone: &str,
    name: &str,
    status: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO leads (phone, name, status, last_message_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT(phone) DO UPDATE SET \
             name = excluded.name, \
             status = excluded.status, \
             last_message_at = excluded.last_message_at",
    )
    .bind(phone)
    .bind(name)
    .bind(status)
    .bind(now_iso())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_message(
    pool: &SqlitePool,
    phone: &str,
    wa_message_id: Option<&str>,
    direction: &str,
    message_type: &str,
    content: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO messages (lead_phone, wa_message_id, direction, type, content, timestamp) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(phone)
    .bind(wa_message_id)
    .bind(direction)
    .bind(message_type)
    .bind(content)
    .bind(now_iso())
    .execute(pool)
    .await?;
    Ok(())
}

/// Leads needing attention come first, then most recent activity.
pub async fn list_leads(pool: &SqlitePool) -> Result<Vec<Lead>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, phone, name, status, last_message_at FROM leads \
         ORDER BY CASE status WHEN 'responded' THEN 1 ELSE 2 END, last_message_at DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(parse_lead_row).collect())
}

/// Unconditional overwrite to 'read'. Zero affected rows is not an error.
pub async fn mark_lead_read(pool: &SqlitePool, phone: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE leads SET status = 'read' WHERE phone = ?")
        .bind(phone)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn messages_for_lead(
    pool: &SqlitePool,
    phone: &str,
) -> Result<Vec<LeadMessage>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, lead_phone, wa_message_id, direction, type, content, timestamp \
         FROM messages WHERE lead_phone = ? ORDER BY timestamp ASC, id ASC",
    )
    .bind(phone)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(parse_message_row).collect())
}

pub async fn existing_phones(pool: &SqlitePool) -> Result<HashSet<String>, sqlx::Error> {
    let phones = sqlx::query_scalar::<_, String>("SELECT phone FROM leads")
        .fetch_all(pool)
        .await?;
    Ok(phones.into_iter().collect())
}
