use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "5984".to_string());
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "listening");
    match (std::env::var("COUCH_USER"), std::env::var("COUCH_PASSWORD")) {
        (Ok(user), Ok(password)) => {
            let router = mock_server::app_with_credentials(&user, &password);
            mock_server::serve(listener, router).await
        }
        _ => mock_server::run(listener).await,
    }
}
