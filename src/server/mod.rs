pub mod api;
pub mod websocket;

use crate::agent::{ AgentContext, AgentRegistry };
use crate::auth::{ create_auth_provider, AuthProvider };
use crate::cli::Args;
use crate::credential::{ initialize_credential_store, CredentialStore };
use crate::history::initialize_message_store;
use crate::llm::chat::ProviderSet;
use log::info;
use std::error::Error;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<AgentRegistry>,
    pub auth: Arc<dyn AuthProvider>,
    pub credentials: Arc<CredentialStore>,
}

impl AppState {
    pub fn from_args(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let credentials = initialize_credential_store(args)?;
        let store = initialize_message_store(args)?;
        let providers = Arc::new(ProviderSet::from_args(args)?);
        let auth = create_auth_provider(args)?;

        let context = AgentContext {
            store,
            providers,
            credentials: credentials.clone(),
        };
        Ok(Self {
            registry: Arc::new(AgentRegistry::new(context)),
            auth,
            credentials,
        })
    }
}

pub struct Server {
    state: AppState,
    args: Args,
}

impl Server {
    pub fn new(state: AppState, args: Args) -> Self {
        Self { state, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        api::start_http_server(&self.args.server_addr, self.state.clone(), self.args.clone()).await?;

        match &self.args.ws_addr {
            Some(ws_addr) => {
                websocket::start_ws_server(ws_addr, self.state.clone(), self.args.clone()).await?;
            }
            None => {
                info!("WebSocket server disabled; serving HTTP API only");
                tokio::signal::ctrl_c().await?;
                info!("Shutting down");
            }
        }

        Ok(())
    }
}
