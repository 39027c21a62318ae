//! Firehose consumption: the jetstream consumer, the filter pipeline, the
//! moderation blocklist, and the purge loop.

mod blocklist;
mod consumer;
mod error;
mod events;
mod handler;
mod purge;
mod retry;
mod xrpc;

pub use blocklist::Blocklist;
pub use consumer::JetstreamConsumer;
pub use error::{FirehoseError, Result};
pub use events::{Commit, CommitOperation, EventKind, FeedPostRecord, JetstreamEvent};
pub use handler::PostHandler;
pub use purge::spawn_purge_loop;
pub use retry::{supervise, RetryPolicy};
pub use xrpc::{Session, XrpcClient};
