pub mod agent;
pub mod auth;
pub mod cli;
pub mod credential;
pub mod history;
pub mod llm;
pub mod models;
pub mod server;

use cli::Args;
use log::info;
use server::{ AppState, Server };
use std::error::Error;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("WebSocket Address: {}", args.ws_addr.as_deref().unwrap_or("disabled"));
    info!("Message Store Type: {}", args.store_type);
    info!("Auth Provider: {}", args.auth_type);
    info!("Supabase URL: {}", args.supabase_url.as_deref().unwrap_or("unset"));
    info!("Credential File: {}", args.credential_file.as_deref().unwrap_or("in-memory"));
    info!("OpenAI Model: {}", args.openai_model.as_deref().unwrap_or("client default"));
    info!("Gemini Model: {}", args.gemini_model.as_deref().unwrap_or("client default"));
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let state = AppState::from_args(&args)?;
    let server = Server::new(state, args);
    server.run().await?;

    Ok(())
}
