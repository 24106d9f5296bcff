use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Host address and port for the HTTP API to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Optional address for the WebSocket chat server. Disabled when unset.
    #[arg(long, env = "WS_ADDR")]
    pub ws_addr: Option<String>,

    // --- Message Store Args ---
    /// Message store type (memory, redis, supabase)
    #[arg(long, env = "STORE_TYPE", default_value = "memory")]
    pub store_type: String,

    /// Redis endpoint for the redis message store (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "STORE_HOST", default_value = "redis://127.0.0.1:6379")]
    pub store_host: String,

    /// Prefix for Redis message keys.
    #[arg(long, env = "STORE_REDIS_PREFIX", default_value = "messages:")]
    pub store_redis_prefix: String,

    // --- Supabase Args ---
    /// Supabase project URL (e.g., https://xyzcompany.supabase.co)
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    /// Supabase anon (public) key, sent as the `apikey` header.
    #[arg(long, env = "SUPABASE_ANON_KEY", default_value = "")]
    pub supabase_anon_key: String,

    /// Table holding chat messages.
    #[arg(long, env = "SUPABASE_TABLE", default_value = "messages")]
    pub supabase_table: String,

    // --- Auth Args ---
    /// Authentication provider (local, supabase)
    #[arg(long, env = "AUTH_TYPE", default_value = "local")]
    pub auth_type: String,

    /// Secret used to hash passwords of the local auth provider. Random per process if unset.
    #[arg(long, env = "AUTH_SECRET")]
    pub auth_secret: Option<String>,

    // --- Credential Args ---
    /// File where the configured LLM API key is persisted. Kept in memory only when unset.
    #[arg(long, env = "CREDENTIAL_FILE")]
    pub credential_file: Option<String>,

    // --- Chat LLM Provider Args ---
    /// Base URL of the OpenAI API (e.g., https://api.openai.com/v1)
    #[arg(long, env = "OPENAI_BASE_URL")] // No default, let the client handle defaults if None
    pub openai_base_url: Option<String>,

    /// OpenAI model name (e.g., gpt-4o)
    #[arg(long, env = "OPENAI_MODEL")]
    pub openai_model: Option<String>,

    /// Base URL of the Gemini API (e.g., https://generativelanguage.googleapis.com/v1beta)
    #[arg(long, env = "GEMINI_BASE_URL")]
    pub gemini_base_url: Option<String>,

    /// Gemini model name (e.g., gemini-pro)
    #[arg(long, env = "GEMINI_MODEL")]
    pub gemini_model: Option<String>,

    // --- General App Args ---
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}
