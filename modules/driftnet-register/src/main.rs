//! One-shot CLI that publishes the feed generator record to the operator's
//! repo, making the feed discoverable. Run once per feed, after deploy.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionAuth {
    access_jwt: String,
    did: String,
}

#[derive(Debug, Serialize)]
struct PutRecordRequest {
    repo: String,
    collection: String,
    rkey: String,
    record: GeneratorRecord,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeneratorRecord {
    did: String,
    display_name: String,
    description: String,
    created_at: String,
    accepts_interactions: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let host = std::env::var("BSKY_HOST").unwrap_or_else(|_| "https://bsky.social".to_string());
    let base_url = format!("{host}/xrpc");

    let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;

    let auth = login(&client, &base_url).await.context("failed to login")?;
    register(&client, &base_url, &auth).await?;

    info!("feed record published");
    Ok(())
}

async fn login(client: &reqwest::Client, base_url: &str) -> Result<SessionAuth> {
    let handle = required_env("BSKY_HANDLE")?;
    let app_password = required_env("BSKY_PASS")?;

    let response = client
        .post(format!("{base_url}/com.atproto.server.createSession"))
        .json(&serde_json::json!({
            "identifier": handle,
            "password": app_password,
        }))
        .send()
        .await
        .context("failed to make request")?;

    if !response.status().is_success() {
        bail!("createSession returned {}", response.status());
    }
    response.json().await.context("failed to decode session")
}

async fn register(client: &reqwest::Client, base_url: &str, auth: &SessionAuth) -> Result<()> {
    let feed_name = required_env("FEED_NAME")?;
    let display_name = required_env("FEED_DISPLAY_NAME")?;
    let description = required_env("FEED_DESCRIPTION")?;
    let feed_did = required_env("FEED_DID")?;
    let accepts_interactions = std::env::var("ACCEPTS_INTERACTIONS").as_deref() == Ok("true");

    let request = PutRecordRequest {
        repo: auth.did.clone(),
        collection: "app.bsky.feed.generator".to_string(),
        rkey: feed_name,
        record: GeneratorRecord {
            did: feed_did,
            display_name,
            description,
            created_at: Utc::now().to_rfc3339(),
            accepts_interactions,
        },
    };

    let response = client
        .post(format!("{base_url}/com.atproto.repo.putRecord"))
        .bearer_auth(&auth.access_jwt)
        .json(&request)
        .send()
        .await
        .context("failed to make putRecord request")?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    println!("{body}");

    if !status.is_success() {
        bail!("failed to publish feed record: {status}");
    }
    Ok(())
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("{key} env not set"))
}
