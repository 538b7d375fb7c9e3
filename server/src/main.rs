use std::net::SocketAddr;

use parley_proto::UserId;
use parley_server::auth::jwt;
use parley_server::config::{generate_config_template, Config};
use parley_server::{db, routes, state};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("parley_server=info"))
    };
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(env_filter()).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(env_filter()).init();
    }

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    let jwt_secret = jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // Handle --issue-token: print a token for the given user and exit
    if let Some(user_id) = &config.issue_token {
        println!("{}", jwt::issue_access_token(&jwt_secret, &UserId::from(user_id.as_str()))?);
        return Ok(());
    }

    tracing::info!("Parley server v{} starting", env!("CARGO_PKG_VERSION"));

    let db = db::init_db(&config.data_dir)?;

    let app_state = state::AppState::new(
        db,
        &config.data_dir,
        jwt_secret,
        config.max_image_bytes,
        config.ws_settings(),
    )?;

    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
