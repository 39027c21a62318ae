/// The collection watched on the firehose.
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// A post accepted into the feed.
///
/// `created_at` is the post's claimed creation time in epoch milliseconds,
/// falling back to ingestion time when the claimed value is unparsable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    /// Per-author record key, globally unique in storage.
    pub rkey: String,
    /// Fully qualified record address.
    pub uri: String,
    pub created_at: i64,
}

impl Post {
    /// Build a post with its derived `at://` address.
    pub fn new(author_did: &str, rkey: &str, created_at: i64) -> Self {
        Self {
            rkey: rkey.to_string(),
            uri: format!("at://{author_did}/{POST_COLLECTION}/{rkey}"),
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_uri_carries_author_and_rkey() {
        let post = Post::new("did:plc:abc123", "3kwxyz", 1_700_000_000_000);
        assert_eq!(post.uri, "at://did:plc:abc123/app.bsky.feed.post/3kwxyz");
        assert_eq!(post.rkey, "3kwxyz");
    }
}
