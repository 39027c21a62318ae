use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use driftnet_common::Config;
use driftnet_firehose::{
    spawn_purge_loop, supervise, Blocklist, JetstreamConsumer, PostHandler, RetryPolicy,
};
use driftnet_store::{FeedStore, PostStore};

mod auth;
mod routes;

use auth::ServiceAuth;

pub struct AppState {
    pub store: Arc<dyn PostStore>,
    pub auth: ServiceAuth,
    pub feed_host: String,
    pub feed_name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("driftnet=info".parse()?))
        .init();

    let config = Config::from_env();

    let db_file = Path::new(&config.database_path).join("feed.db");
    let store = Arc::new(FeedStore::open(&db_file).await?);

    // One shutdown signal for every long-running activity.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let blocklist = match &config.blocklist {
        Some(list) => {
            let blocklist =
                Blocklist::connect(&list.pds_host, &list.handle, &list.app_password, &list.list_key)
                    .await?;
            blocklist.spawn_refresh_loop(shutdown_rx.clone());
            spawn_purge_loop(Arc::clone(&store), Arc::clone(&blocklist), shutdown_rx.clone());
            Some(blocklist)
        }
        None => None,
    };

    let handler = PostHandler::new(Arc::clone(&store), blocklist, &config.feed_keyword);
    let consumer = JetstreamConsumer::new(config.jetstream_addr.clone(), handler);
    {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            supervise(RetryPolicy::default(), shutdown, |signal| consumer.consume(signal)).await;
        });
    }

    let state = Arc::new(AppState {
        store,
        auth: ServiceAuth::new(),
        feed_host: config.feed_host,
        feed_name: config.feed_name,
    });

    let app = Router::new()
        .route("/xrpc/app.bsky.feed.getFeedSkeleton", get(routes::get_feed_skeleton))
        .route(
            "/xrpc/app.bsky.feed.describeFeedGenerator",
            get(routes::describe_feed_generator),
        )
        .route("/xrpc/app.bsky.feed.sendInteractions", post(routes::send_interactions))
        .route("/.well-known/did.json", get(routes::well_known_did))
        .with_state(state)
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        );

    let addr = format!("127.0.0.1:{}", config.server_port);
    info!(addr = %addr, "Feed generator starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    Ok(())
}

/// Resolves on SIGINT or SIGTERM, flipping the shared shutdown signal so
/// the consumer, refresh, and purge loops exit alongside the server.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);
}
