use anyhow::{Context, Result};
use async_nats::jetstream::{self, kv, stream::Config as StreamConfig};
use tracing::info;

pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: std::time::Duration) -> Result<Self> {
        info!("Connecting to NATS at {} (timeout={:?})", url, timeout);

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        info!("Successfully connected to NATS");
        Ok(Self { client, jetstream })
    }

    /// Create the stream if it does not exist. Subjects follow the
    /// `{stream}.*` convention, one token after the stream name.
    pub async fn ensure_stream(&self, stream_name: &str, description: &str) -> Result<()> {
        info!("Ensuring stream '{}' exists", stream_name);

        let stream_config = StreamConfig {
            name: stream_name.to_string(),
            subjects: vec![format!("{}.*", stream_name)],
            description: Some(description.to_string()),
            ..Default::default()
        };

        match self.jetstream.get_stream(stream_name).await {
            Ok(_) => {
                info!("Stream '{}' already exists", stream_name);
            }
            Err(_) => {
                self.jetstream
                    .create_stream(stream_config)
                    .await
                    .context("Failed to create stream")?;
                info!("Created stream '{}'", stream_name);
            }
        }

        Ok(())
    }

    /// Create a key-value bucket if it does not exist and return a
    /// handle to it.
    pub async fn ensure_kv_bucket(&self, bucket: &str) -> Result<kv::Store> {
        info!("Ensuring KV bucket '{}' exists", bucket);

        match self.jetstream.get_key_value(bucket).await {
            Ok(store) => {
                info!("KV bucket '{}' already exists", bucket);
                Ok(store)
            }
            Err(_) => {
                let store = self
                    .jetstream
                    .create_key_value(kv::Config {
                        bucket: bucket.to_string(),
                        history: 1,
                        ..Default::default()
                    })
                    .await
                    .context("Failed to create KV bucket")?;
                info!("Created KV bucket '{}'", bucket);
                Ok(store)
            }
        }
    }

    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    /// Flush buffered publishes and close the connection.
    pub async fn close(self) -> Result<()> {
        info!("Closing NATS connection");
        self.client
            .drain()
            .await
            .context("Failed to drain NATS connection")?;
        Ok(())
    }
}
