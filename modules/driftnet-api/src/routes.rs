//! XRPC handlers for the feed generator surface.

use std::num::ParseIntError;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use driftnet_common::Post;
use driftnet_store::FIRST_PAGE_CURSOR;

use crate::AppState;

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    feed: Option<String>,
    limit: Option<String>,
    cursor: Option<String>,
}

/// A page of the feed: post URIs plus an optional continuation cursor.
#[derive(Debug, PartialEq, Serialize)]
pub struct FeedSkeleton {
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<String>,
    feed: Vec<SkeletonPost>,
}

#[derive(Debug, PartialEq, Serialize)]
struct SkeletonPost {
    post: String,
}

pub async fn get_feed_skeleton(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<FeedQuery>,
) -> Response {
    if let Err(e) = state.auth.request_user_did(&headers).await {
        warn!(error = %e, "Rejected unauthenticated feed request");
        return (StatusCode::UNAUTHORIZED, "validate auth").into_response();
    }

    let Some(feed) = params.feed.filter(|f| !f.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing feed query param").into_response();
    };
    debug!(feed = %feed, "Feed skeleton requested");

    let limit = match parse_limit(params.limit.as_deref()) {
        Ok(limit) => limit,
        Err(e) => {
            warn!(error = %e, "Invalid limit query param");
            return (StatusCode::BAD_REQUEST, "invalid limit query param").into_response();
        }
    };
    let cursor = parse_cursor(params.cursor.as_deref());

    match state.store.posts_before(cursor, limit).await {
        Ok(posts) => Json(feed_page(posts, limit)).into_response(),
        Err(e) => {
            error!(error = %e, feed = %feed, "Failed to load feed page");
            (StatusCode::INTERNAL_SERVER_ERROR, "error getting feed").into_response()
        }
    }
}

/// Missing limit gets the default; an unparsable one is the caller's error;
/// an out-of-range one falls back to the default.
fn parse_limit(raw: Option<&str>) -> Result<u32, ParseIntError> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_LIMIT);
    };
    let parsed: i64 = raw.parse()?;
    if parsed < 1 || parsed > MAX_LIMIT as i64 {
        return Ok(DEFAULT_LIMIT);
    }
    Ok(parsed as u32)
}

/// An absent, zero, or unparsable cursor serves the first page.
fn parse_cursor(raw: Option<&str>) -> i64 {
    match raw {
        None | Some("") => FIRST_PAGE_CURSOR,
        Some(raw) => match raw.parse::<i64>() {
            Ok(0) => FIRST_PAGE_CURSOR,
            Ok(watermark) => watermark,
            Err(e) => {
                warn!(error = %e, cursor = raw, "Unparsable cursor, serving first page");
                FIRST_PAGE_CURSOR
            }
        },
    }
}

/// Shape one store page into the response, attaching a continuation cursor
/// only when the page came back exactly full. A short page is taken as
/// proof that no older matching rows remain, which skips one empty round
/// trip at the cost of a rare false end-of-feed when the final page is
/// exactly full.
fn feed_page(posts: Vec<Post>, limit: u32) -> FeedSkeleton {
    let cursor = (!posts.is_empty() && posts.len() == limit as usize)
        .then(|| posts.last().map(|post| post.created_at.to_string()))
        .flatten();

    FeedSkeleton {
        cursor,
        feed: posts
            .into_iter()
            .map(|post| SkeletonPost { post: post.uri })
            .collect(),
    }
}

#[derive(Debug, Serialize)]
pub struct DescribeFeedGenerator {
    did: String,
    feeds: Vec<FeedRef>,
}

#[derive(Debug, Serialize)]
struct FeedRef {
    uri: String,
}

pub async fn describe_feed_generator(State(state): State<Arc<AppState>>) -> Json<DescribeFeedGenerator> {
    Json(DescribeFeedGenerator {
        did: format!("did:web:{}", state.feed_host),
        feeds: vec![FeedRef {
            uri: format!(
                "at://{}/app.bsky.feed.generator/{}",
                state.feed_host, state.feed_name
            ),
        }],
    })
}

#[derive(Debug, Deserialize)]
struct FeedInteractions {
    #[serde(default)]
    interactions: Vec<Interaction>,
}

#[derive(Debug, Deserialize)]
struct Interaction {
    #[serde(default)]
    item: String,
    #[serde(default)]
    event: String,
}

/// Clients report back how a served feed was used. The data is only logged;
/// nothing feeds back into ranking yet.
pub async fn send_interactions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let user_did = match state.auth.request_user_did(&headers).await {
        Ok(did) => did,
        Err(e) => {
            warn!(error = %e, "Rejected unauthenticated interactions");
            return (StatusCode::UNAUTHORIZED, "validate auth").into_response();
        }
    };

    let interactions: FeedInteractions = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "Undecodable interactions body");
            return (StatusCode::BAD_REQUEST, "decode body").into_response();
        }
    };

    for interaction in interactions.interactions {
        info!(
            user = %user_did,
            item = %interaction.item,
            event = %interaction.event,
            "Feed interaction"
        );
    }
    StatusCode::OK.into_response()
}

#[derive(Debug, Serialize)]
pub struct WellKnownDid {
    #[serde(rename = "@context")]
    context: Vec<String>,
    id: String,
    service: Vec<WellKnownService>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WellKnownService {
    id: String,
    #[serde(rename = "type")]
    service_type: String,
    service_endpoint: String,
}

/// The `did:web` identity document for the service itself.
pub async fn well_known_did(State(state): State<Arc<AppState>>) -> Json<WellKnownDid> {
    Json(WellKnownDid {
        context: vec!["https://www.w3.org/ns/did/v1".to_string()],
        id: format!("did:web:{}", state.feed_host),
        service: vec![WellKnownService {
            id: "#bsky_fg".to_string(),
            service_type: "BskyFeedGenerator".to_string(),
            service_endpoint: format!("https://{}", state.feed_host),
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(parse_limit(None).unwrap(), DEFAULT_LIMIT);
        assert_eq!(parse_limit(Some("30")).unwrap(), 30);
        assert_eq!(parse_limit(Some("1")).unwrap(), 1);
        assert_eq!(parse_limit(Some("100")).unwrap(), 100);
        // Out of range falls back to the default rather than erroring.
        assert_eq!(parse_limit(Some("0")).unwrap(), DEFAULT_LIMIT);
        assert_eq!(parse_limit(Some("250")).unwrap(), DEFAULT_LIMIT);
        assert!(parse_limit(Some("fifty")).is_err());
    }

    #[test]
    fn absent_or_bad_cursors_serve_the_first_page() {
        assert_eq!(parse_cursor(None), FIRST_PAGE_CURSOR);
        assert_eq!(parse_cursor(Some("")), FIRST_PAGE_CURSOR);
        assert_eq!(parse_cursor(Some("junk")), FIRST_PAGE_CURSOR);
        assert_eq!(parse_cursor(Some("0")), FIRST_PAGE_CURSOR);
        assert_eq!(parse_cursor(Some("1700000000000")), 1_700_000_000_000);
    }

    #[test]
    fn full_page_emits_the_oldest_timestamp_as_cursor() {
        let posts = vec![
            Post::new("did:plc:alice", "3ka", 300),
            Post::new("did:plc:alice", "3kb", 200),
            Post::new("did:plc:alice", "3kc", 100),
        ];
        let page = feed_page(posts, 3);
        assert_eq!(page.cursor.as_deref(), Some("100"));
        assert_eq!(page.feed.len(), 3);
        assert_eq!(page.feed[0].post, "at://did:plc:alice/app.bsky.feed.post/3ka");
    }

    #[test]
    fn short_or_empty_pages_emit_no_cursor() {
        let posts = vec![Post::new("did:plc:alice", "3ka", 300)];
        assert_eq!(feed_page(posts, 3).cursor, None);
        assert_eq!(feed_page(Vec::new(), 3).cursor, None);
    }

    #[test]
    fn skeleton_serializes_without_a_cursor_field_on_the_last_page() {
        let page = feed_page(vec![Post::new("did:plc:alice", "3ka", 300)], 3);
        let json = serde_json::to_value(&page).unwrap();
        assert!(json.get("cursor").is_none());
        assert_eq!(json["feed"][0]["post"], "at://did:plc:alice/app.bsky.feed.post/3ka");
    }
}
