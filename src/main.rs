mod app;
mod store;
mod types;
mod whatsapp;

use std::env;
use std::sync::Arc;

use crate::types::{AppState, Config};

fn resolve_config() -> Config {
    Config {
        access_token: env::var("WHATSAPP_TOKEN").unwrap_or_default(),
        phone_number_id: env::var("PHONE_NUMBER_ID").unwrap_or_default(),
        verify_token: env::var("VERIFY_TOKEN").unwrap_or_default(),
        app_secret: env::var("APP_SECRET").unwrap_or_default(),
        database_path: env::var("LEADS_DB").unwrap_or_else(|_| "leads.db".to_string()),
        port: env::var("PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(3000),
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
    println!("[shutdown] signal received, stopping server");
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let config = resolve_config();
    if config.access_token.is_empty() || config.phone_number_id.is_empty() {
        eprintln!("[startup] WHATSAPP_TOKEN or PHONE_NUMBER_ID not set; outbound sends will fail");
    }

    let db = store::connect(&config.database_path)
        .await
        .expect("failed to open leads database (set LEADS_DB)");
    println!("[startup] leads database ready at {}", config.database_path);

    let port = config.port;
    let state = Arc::new(AppState {
        db,
        http: reqwest::Client::new(),
        config,
    });

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");

    println!("leads server running at http://localhost:{port}");
    axum::serve(listener, app::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server runtime failure");
}
