use crate::agent::ChatAgent;
use crate::cli::Args;
use crate::models::chat::Notification;
use crate::models::websocket::{ ClientMessage, ServerMessage };
use super::AppState;
use futures::{ SinkExt, StreamExt };
use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::num::NonZeroU32;
use std::net::SocketAddr;
use std::sync::{ Arc, Mutex as StdMutex };
use tokio::net::TcpListener;
use tokio::io::{ AsyncRead, AsyncWrite };
use tokio_tungstenite::{ accept_hdr_async_with_config, WebSocketStream };
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::protocol::{ Message, WebSocketConfig };
use tokio_tungstenite::tungstenite::handshake::server::{ Request, Response };
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::http::response::Response as HttpResponse;
use tokio_rustls::TlsAcceptor;
use rustls::ServerConfig;
use rustls::pki_types::{ CertificateDer, PrivateKeyDer };
use rustls_pemfile::{ certs, pkcs8_private_keys };
use lazy_static::lazy_static;
use governor::{ RateLimiter, Quota, state::{ InMemoryState, NotKeyed }, clock::DefaultClock };
use log::{ info, warn, error, debug };

const MAX_MESSAGE_SIZE: usize = 1 * 1024 * 1024;

lazy_static! {
    static ref CONNECTION_LIMITER: RateLimiter<NotKeyed, InMemoryState, DefaultClock> = RateLimiter::direct(
        Quota::per_second(NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN))
    );
}

/// Frames and messages above the cap are refused while they are read.
fn ws_config() -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(MAX_MESSAGE_SIZE),
        max_frame_size: Some(MAX_MESSAGE_SIZE),
        ..Default::default()
    }
}

fn load_tls_config(
    cert_path: &str,
    key_path: &str
) -> Result<Arc<ServerConfig>, Box<dyn Error + Send + Sync>> {
    let cert_file = File::open(cert_path).map_err(|e|
        format!("Failed to open TLS certificate file '{}': {}", cert_path, e)
    )?;
    let key_file = File::open(key_path).map_err(|e|
        format!("Failed to open TLS key file '{}': {}", key_path, e)
    )?;

    let mut cert_reader = BufReader::new(cert_file);
    let mut key_reader = BufReader::new(key_file);
    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| format!("Failed to read certificate(s): {}", e))?;

    let mut keys = pkcs8_private_keys(&mut key_reader);
    let key = match keys.next() {
        Some(Ok(k)) => PrivateKeyDer::Pkcs8(k),
        Some(Err(e)) => {
            return Err(format!("Error reading private key: {}", e).into());
        }
        None => {
            return Err("No PKCS8 private key found in key file".into());
        }
    };

    let config = ServerConfig::builder().with_no_client_auth().with_single_cert(cert_chain, key)?;

    Ok(Arc::new(config))
}

/// Pulls the access token out of the upgrade request: `Authorization: Bearer`
/// first, then the `access_token` query parameter.
fn token_from_request(req: &Request) -> Option<String> {
    let header = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_owned());
    if header.is_some() {
        return header.filter(|t| !t.is_empty());
    }

    let query = req.uri().query()?;
    url::form_urlencoded
        ::parse(query.as_bytes())
        .find(|(k, _)| k == "access_token")
        .map(|(_, v)| v.into_owned())
        .filter(|t| !t.is_empty())
}

pub async fn start_ws_server(
    addr: &str,
    state: AppState,
    args: Args
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    let tls_acceptor = if args.enable_tls {
        match (&args.tls_cert_path, &args.tls_key_path) {
            (Some(cert_path), Some(key_path)) => {
                info!(
                    "TLS enabled. Loading certificate from '{}' and key from '{}'",
                    cert_path,
                    key_path
                );
                let config = load_tls_config(cert_path, key_path)?;
                Some(TlsAcceptor::from(config))
            }
            (Some(_), None) | (None, Some(_)) => {
                error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
                return Err("Missing TLS certificate or key path".into());
            }
            (None, None) => {
                error!("--enable-tls was set but no certificate/key paths provided.");
                return Err("TLS enabled without cert/key".into());
            }
        }
    } else {
        None
    };
    let protocol = if tls_acceptor.is_some() { "WSS" } else { "WS" };
    info!("{} server listening on: {}", protocol, addr);

    loop {
        let (stream, peer) = listener.accept().await?;

        if CONNECTION_LIMITER.check().is_err() {
            warn!("Global connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }

        info!("Incoming connection from: {}", peer);
        let state = state.clone();
        let tls_acceptor_clone = tls_acceptor.clone();

        tokio::spawn(async move {
            let process_result = if let Some(acceptor) = tls_acceptor_clone {
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        info!("TLS handshake successful for {}", peer);
                        process_connection(peer, tls_stream, state).await
                    }
                    Err(e) => {
                        error!("TLS handshake error for {}: {}", peer, e);
                        Err(Box::new(e) as Box<dyn Error + Send + Sync>)
                    }
                }
            } else {
                process_connection(peer, stream, state).await
            };

            if let Err(e) = process_result {
                error!("Failed to process connection for {}: {}", peer, e);
            }
        });
    }
}

async fn process_connection<S>(
    peer: SocketAddr,
    stream: S,
    state: AppState
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    let token_slot: Arc<StdMutex<Option<String>>> = Arc::new(StdMutex::new(None));
    let callback_slot = token_slot.clone();

    let auth_callback = move |
        req: &Request,
        response: Response
    | -> Result<Response, HttpResponse<Option<String>>> {
        info!("Handshake from {}", peer);
        match token_from_request(req) {
            Some(token) => {
                debug!("{} presented an access token", peer);
                *callback_slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(token);
                Ok(response)
            }
            None => {
                warn!("{}: missing access token", peer);
                let mut resp = HttpResponse::new(Some("Unauthorized".to_string()));
                *resp.status_mut() = StatusCode::UNAUTHORIZED;
                Err(resp)
            }
        }
    };

    let mut ws = match accept_hdr_async_with_config(stream, auth_callback, Some(ws_config())).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("Handshake failed for {}: {}", peer, e);
            return Err(Box::new(e) as _);
        }
    };

    let token = token_slot.lock().unwrap_or_else(|p| p.into_inner()).take().unwrap_or_default();
    let identity = match state.auth.verify(&token).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!("{}: rejected access token: {}", peer, e);
            let msg = ServerMessage::Error {
                notification: Notification::error("Usuario no autenticado"),
            };
            ws.send(Message::Text(serde_json::to_string(&msg)?)).await?;
            ws.close(None).await?;
            return Ok(());
        }
    };
    info!("{} authenticated as user {}", peer, identity.user_id);

    let agent = state.registry.agent_for(&identity).await;
    handle_connection(peer, ws, agent).await;
    Ok(())
}

async fn send_json<S>(
    tx: &mut futures::stream::SplitSink<WebSocketStream<S>, Message>,
    msg: &ServerMessage
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin
{
    let json = serde_json::to_string(msg)?;
    tx.send(Message::Text(json)).await?;
    Ok(())
}

pub async fn handle_connection<S>(peer: SocketAddr, websocket: WebSocketStream<S>, agent: Arc<ChatAgent>)
    where S: AsyncRead + AsyncWrite + Unpin
{
    info!("New WebSocket connection: {}", peer);
    let (mut tx, mut rx) = websocket.split();

    let initial = match agent.load().await {
        Ok(()) => ServerMessage::History { messages: agent.messages().await },
        Err(e) => ServerMessage::Error { notification: e.notification() },
    };
    if let Err(e) = send_json(&mut tx, &initial).await {
        error!("Error sending history to {}: {}", peer, e);
        return;
    }

    while let Some(msg) = rx.next().await {
        let message = match msg {
            Ok(message) => message,
            Err(WsError::Capacity(e)) => {
                warn!("Message from {} exceeds size limit of {} bytes: {}", peer, MAX_MESSAGE_SIZE, e);
                let error_msg = ServerMessage::Error {
                    notification: Notification::error("Mensaje demasiado largo"),
                };
                if send_json(&mut tx, &error_msg).await.is_err() {
                    error!("Failed to send size limit error to {}", peer);
                }
                break;
            }
            Err(e) => {
                error!("Error receiving message from {}: {}", peer, e);
                break;
            }
        };

        let reply = match message {
            Message::Text(text) =>
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Chat { content }) => {
                        if let Err(e) = send_json(&mut tx, &ServerMessage::Processing).await {
                            error!("Error sending processing status to {}: {}", peer, e);
                            break;
                        }
                        match agent.send_message(&content).await {
                            Ok(message) => ServerMessage::Response { message },
                            Err(e) => {
                                error!("Chat turn failed for {}: {}", peer, e);
                                ServerMessage::Error { notification: e.notification() }
                            }
                        }
                    }
                    Ok(ClientMessage::History) =>
                        ServerMessage::History { messages: agent.messages().await },
                    Err(e) => {
                        error!("Failed to parse message from {}: {}", peer, e);
                        ServerMessage::Error {
                            notification: Notification::error(format!("Mensaje no válido: {}", e)),
                        }
                    }
                }
            Message::Close(_) => {
                info!("Connection closed by {}", peer);
                break;
            }
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {
                continue;
            }
        };

        if let Err(e) = send_json(&mut tx, &reply).await {
            error!("Error sending message to {}: {}", peer, e);
            break;
        }
    }

    info!("WebSocket connection closed: {}", peer);
}
