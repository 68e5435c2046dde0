//! wallet-login application entry point.
//!
//! Bootstraps the server:
//! 1. Load configuration from environment
//! 2. Pick the nonce backend (Redis when `REDIS_URL` is set, else in-memory)
//! 3. Start the prune loop and, if configured, the status socket
//! 4. Build router with API routes + security headers
//! 5. Start Axum server
//!
//! Also supports `keygen`, `sign`, `watch` and `report` subcommands for local
//! testing.

use k256::ecdsa::SigningKey;
use std::net::SocketAddr;
use std::sync::Arc;
use wallet_login::{
    auth::address::Address,
    auth::bridge::challenge_message,
    auth::verify::sign_personal_message,
    cleanup,
    config::Config,
    ratelimit::{RateLimiter, DEFAULT_WINDOW},
    routes,
    state::AppState,
    status::ConnectionStatusChannel,
    storage::{NonceBackend, NonceRegistry, RedisNonceStore},
};
use zeroize::Zeroizing;

/// Generate a random secp256k1 key, returning its hex encoding and address.
fn keygen() -> (Zeroizing<String>, Address) {
    use rand::Rng;

    let mut seed = Zeroizing::new([0u8; 32]);
    // A handful of 32-byte values (zero, >= curve order) are not valid keys
    let signing_key = loop {
        rand::rng().fill(&mut seed[..]);
        if let Ok(key) = SigningKey::from_slice(seed.as_slice()) {
            break key;
        }
    };

    let address = Address::from_verifying_key(signing_key.verifying_key());
    (Zeroizing::new(hex::encode(seed.as_slice())), address)
}

/// Sign the challenge message for `nonce_token` with a hex private key.
fn sign(private_key_hex: &str, service_name: &str, nonce_token: &str) -> Result<String, String> {
    let digits = private_key_hex
        .trim()
        .strip_prefix("0x")
        .unwrap_or(private_key_hex.trim());
    let key_bytes = Zeroizing::new(hex::decode(digits).map_err(|e| format!("Private key: {}", e))?);
    let signing_key =
        SigningKey::from_slice(&key_bytes).map_err(|e| format!("Private key: {}", e))?;

    let message = challenge_message(service_name, nonce_token);
    let signature = sign_personal_message(&signing_key, message.as_bytes())
        .map_err(|e| format!("Signing: {}", e))?;

    Ok(format!("0x{}", hex::encode(signature)))
}

/// Print every state frame from a status socket, reconnecting on loss.
#[cfg(unix)]
async fn watch(socket_path: &str) {
    use std::time::Duration;
    use wallet_login::status::socket::read_frame;

    loop {
        match tokio::net::UnixStream::connect(socket_path).await {
            Ok(mut stream) => loop {
                match read_frame(&mut stream).await {
                    Ok(true) => println!("connected"),
                    Ok(false) => println!("disconnected"),
                    Err(e) => {
                        eprintln!("Status socket closed: {}", e);
                        break;
                    }
                }
            },
            Err(e) => eprintln!("Failed to connect to {}: {}", socket_path, e),
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Report a connection change through a status socket.
#[cfg(unix)]
async fn report(socket_path: &str, connected: bool) -> Result<(), std::io::Error> {
    use tokio::io::AsyncWriteExt;
    use wallet_login::status::socket::encode_frame;

    let mut stream = tokio::net::UnixStream::connect(socket_path).await?;
    stream.write_all(&encode_frame(connected)).await?;
    stream.shutdown().await
}

fn print_usage() {
    eprintln!("Usage: wallet-login [keygen | sign <private-key-hex> <nonce-token> | watch <socket-path>");
    eprintln!("                    | report <socket-path> <connected|disconnected>]");
    eprintln!();
    eprintln!("With no subcommand, runs the sign-in server.");
    eprintln!();
    eprintln!("  keygen   Print a new secp256k1 private key and its address.");
    eprintln!("  sign     Sign the challenge for a nonce token, using SERVICE_NAME.");
    eprintln!("  watch    Print wallet connection changes from a status socket.");
    eprintln!("  report   Set the wallet connection state through a status socket.");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  TOKEN=$(curl -s -X POST localhost:3000/api/auth/nonce | jq -r .token)");
    eprintln!("  wallet-login sign <private-key-hex> \"$TOKEN\"");
}

/// Handle a CLI subcommand. Returns `false` when the server should run.
async fn run_subcommand(args: &[String]) -> bool {
    let Some(command) = args.get(1) else {
        return false;
    };

    match (command.as_str(), args.len()) {
        ("keygen", 2) => {
            let (private_key, address) = keygen();
            println!("private key: {}", private_key.as_str());
            println!("address:     {}", address);
        }
        ("sign", 4) => {
            let service_name = match Config::from_env() {
                Ok(config) => config.service_name,
                Err(e) => {
                    eprintln!("Error loading config: {}", e);
                    std::process::exit(1);
                }
            };
            match sign(&args[2], &service_name, &args[3]) {
                Ok(signature) => println!("{}", signature),
                Err(e) => {
                    eprintln!("Error signing challenge: {}", e);
                    std::process::exit(1);
                }
            }
        }
        #[cfg(unix)]
        ("watch", 3) => watch(&args[2]).await,
        #[cfg(unix)]
        ("report", 4) => {
            let connected = match args[3].as_str() {
                "connected" => true,
                "disconnected" => false,
                _ => {
                    print_usage();
                    std::process::exit(1);
                }
            };
            if let Err(e) = report(&args[2], connected).await {
                eprintln!("Error reporting status: {}", e);
                std::process::exit(1);
            }
        }
        _ => {
            print_usage();
            std::process::exit(1);
        }
    }
    true
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if run_subcommand(&args).await {
        return;
    }

    // Initialize tracing with env filter support (RUST_LOG)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config from environment
    let config = Config::from_env().expect("Failed to load config");
    tracing::info!("Starting wallet-login on {}", config.bind_addr);

    // Nonce backend, with request counters kept alongside the nonces
    let (backend, limiter) = match &config.redis_url {
        Some(url) => {
            let store = RedisNonceStore::connect(url)
                .await
                .expect("Failed to connect to Redis")
                .with_ttl(config.nonce_ttl())
                .with_retention(config.nonce_retention())
                .with_timeout(config.redis_timeout());
            let limiter = RateLimiter::redis(
                store.connection(),
                config.rate_limit_nonce_per_min,
                DEFAULT_WINDOW,
                config.redis_timeout(),
            );
            (NonceBackend::Redis(store), limiter)
        }
        None => (
            NonceBackend::Memory(
                NonceRegistry::new()
                    .with_ttl(config.nonce_ttl())
                    .with_retention(config.nonce_retention()),
            ),
            RateLimiter::in_memory(config.rate_limit_nonce_per_min, DEFAULT_WINDOW),
        ),
    };
    tracing::info!(
        backend = backend.name(),
        nonce_limit_per_min = config.rate_limit_nonce_per_min,
        "Nonce store ready"
    );
    let backend = Arc::new(backend);
    let limiter = Arc::new(limiter);

    // Redis expires its own keys; only the in-memory registry needs pruning
    if matches!(*backend, NonceBackend::Memory(_)) {
        tokio::spawn(cleanup::run_prune_loop(
            Arc::clone(&backend),
            Arc::clone(&limiter),
            config.prune_interval(),
        ));
    }

    let status = ConnectionStatusChannel::new();

    if let Some(path) = &config.status_socket_path {
        #[cfg(unix)]
        {
            let socket = wallet_login::status::socket::StatusSocket::bind(path, status.clone())
                .expect("Failed to bind status socket");
            tokio::spawn(async move {
                if let Err(e) = socket.serve().await {
                    tracing::error!(error = %e, "Status socket stopped");
                }
            });
        }
        #[cfg(not(unix))]
        tracing::warn!(path = %path.display(), "Status socket requires Unix; ignoring");
    }

    let state = AppState::new(backend, config.service_name.clone(), status, limiter);
    let app = routes::app(state);

    // Bind to configured address
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("Failed to bind");
    tracing::info!("Listening on {}", config.bind_addr);

    // Connect info carries the client address used for rate limiting
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
