//! Cross-instance delivery over Redis pub/sub.
//!
//! Every instance publishes on `<prefix>:<session key>` and pattern-subscribes
//! to `<prefix>:*`, forwarding what it hears to its own registry. A callback
//! handled on one instance thus reaches a socket held by another.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::{AsyncCommands, aio::ConnectionManager};

use crate::{
    challenge::models::SessionOwner,
    notify::{ConnectionRegistry, ExecutionEvent, Notifier},
};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

pub struct RedisNotifier {
    manager: ConnectionManager,
    channel_prefix: String,
    local: Arc<ConnectionRegistry>,
}

impl RedisNotifier {
    pub async fn connect(
        url: &str,
        channel_prefix: &str,
        local: Arc<ConnectionRegistry>,
    ) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("invalid REDIS_URL")?;
        let manager = client
            .get_connection_manager()
            .await
            .context("failed to connect to redis")?;

        spawn_fanout(client, channel_prefix.to_string(), local.clone());

        Ok(Self {
            manager,
            channel_prefix: channel_prefix.to_string(),
            local,
        })
    }

    fn channel(&self, owner: &SessionOwner) -> String {
        format!("{}:{}", self.channel_prefix, owner.channel_key())
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn publish(&self, owner: &SessionOwner, event: &ExecutionEvent) {
        let payload = match event.to_json() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode execution event");
                return;
            }
        };

        let mut conn = self.manager.clone();
        let published: redis::RedisResult<i64> =
            conn.publish(self.channel(owner), payload.clone()).await;
        if let Err(err) = published {
            tracing::warn!(
                session = %owner,
                error = %err,
                "redis publish failed, delivering locally only"
            );
            self.local.deliver(&owner.channel_key(), payload);
        }
    }
}

fn spawn_fanout(client: redis::Client, prefix: String, local: Arc<ConnectionRegistry>) {
    tokio::spawn(async move {
        loop {
            match run_fanout(&client, &prefix, &local).await {
                Ok(()) => tracing::warn!("redis subscription ended, resubscribing"),
                Err(err) => tracing::warn!(error = %err, "redis subscription failed, retrying"),
            }
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        }
    });
}

async fn run_fanout(
    client: &redis::Client,
    prefix: &str,
    local: &ConnectionRegistry,
) -> redis::RedisResult<()> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.psubscribe(format!("{prefix}:*")).await?;
    tracing::info!(prefix, "subscribed to live event fabric");

    let mut messages = pubsub.on_message();
    while let Some(message) = messages.next().await {
        let Some(key) = session_key(prefix, message.get_channel_name()) else {
            continue;
        };
        match message.get_payload::<String>() {
            Ok(payload) => {
                local.deliver(key, payload);
            }
            Err(err) => tracing::warn!(error = %err, "dropping undecodable fabric message"),
        }
    }
    Ok(())
}

fn session_key<'a>(prefix: &str, channel: &'a str) -> Option<&'a str> {
    channel
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix(':'))
        .filter(|key| !key.is_empty())
}

#[cfg(test)]
mod tests {
    use super::session_key;

    #[test]
    fn extracts_session_key_from_channel() {
        assert_eq!(
            session_key("challenge:live", "challenge:live:interview:3"),
            Some("interview:3")
        );
        assert_eq!(session_key("challenge:live", "challenge:live:"), None);
        assert_eq!(session_key("challenge:live", "other:interview:3"), None);
        assert_eq!(session_key("challenge:live", "challenge:liveinterview:3"), None);
    }
}
