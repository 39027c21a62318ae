//! Minimal XRPC client for session auth and list pagination.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{FirehoseError, Result};

/// Credentials returned by `com.atproto.server.createSession`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_jwt: String,
    pub refresh_jwt: String,
    pub handle: String,
    pub did: String,
}

/// One page of `app.bsky.graph.getList`.
#[derive(Debug, Deserialize)]
pub struct ListPage {
    #[serde(default)]
    pub cursor: Option<String>,
    pub items: Vec<ListItem>,
}

#[derive(Debug, Deserialize)]
pub struct ListItem {
    pub subject: ListSubject,
}

#[derive(Debug, Deserialize)]
pub struct ListSubject {
    pub did: String,
}

/// Error body returned by XRPC endpoints.
#[derive(Debug, Deserialize)]
struct XrpcErrorBody {
    error: String,
    #[serde(default)]
    message: Option<String>,
}

pub struct XrpcClient {
    http: reqwest::Client,
    host: String,
}

impl XrpcClient {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            host: host.into(),
        }
    }

    /// Authenticate with a handle and app password.
    pub async fn create_session(&self, identifier: &str, password: &str) -> Result<Session> {
        let url = format!("{}/xrpc/com.atproto.server.createSession", self.host);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "identifier": identifier,
                "password": password,
            }))
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Fetch one page of list members.
    pub async fn get_list(
        &self,
        session: &Session,
        list_uri: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<ListPage> {
        let url = format!("{}/xrpc/app.bsky.graph.getList", self.host);
        let mut request = self
            .http
            .get(&url)
            .bearer_auth(&session.access_jwt)
            .query(&[("list", list_uri), ("limit", &limit.to_string())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        Self::decode(request.send().await?).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        if let Ok(err) = serde_json::from_str::<XrpcErrorBody>(&body) {
            if err.error == "ExpiredToken" {
                return Err(FirehoseError::ExpiredToken);
            }
            return Err(FirehoseError::Api {
                status: status.as_u16(),
                message: err.message.unwrap_or(err.error),
            });
        }
        Err(FirehoseError::Api {
            status: status.as_u16(),
            message: body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_decodes_from_camel_case() {
        let session: Session = serde_json::from_str(
            r#"{"accessJwt":"aj","refreshJwt":"rj","handle":"feed.example","did":"did:plc:me"}"#,
        )
        .unwrap();
        assert_eq!(session.did, "did:plc:me");
        assert_eq!(session.access_jwt, "aj");
    }

    #[test]
    fn list_page_decodes_members_and_cursor() {
        let page: ListPage = serde_json::from_str(
            r#"{"cursor":"next","items":[{"subject":{"did":"did:plc:spammer","handle":"x"}}]}"#,
        )
        .unwrap();
        assert_eq!(page.cursor.as_deref(), Some("next"));
        assert_eq!(page.items[0].subject.did, "did:plc:spammer");
    }
}
