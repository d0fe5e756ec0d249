use std::sync::Arc;

use amqprs::channel::{
    Channel, ExchangeDeclareArguments, QueueBindArguments, QueueDeclareArguments,
};
use amqprs::connection::{Connection, OpenConnectionArguments};
use amqprs::{FieldTable, FieldValue};
use anyhow::{Context, Result};
use chrono::Local;
use log::debug;

/// One AMQP connection plus a channel of its own. Channels must not be
/// shared across tasks; use [RabbitHandle::fork] to get a sibling with a
/// fresh channel on the same connection.
pub struct RabbitHandle {
    connection: Arc<Connection>,
    channel: Channel,
}

impl RabbitHandle {
    pub async fn connect(amqp_uri: &str, conn_name: &str) -> Result<Self> {
        let mut args = OpenConnectionArguments::try_from(amqp_uri)
            .with_context(|| format!("Invalid connection URI in {:?}", amqp_uri))?;
        args.connection_name(&format!("{}@{}", conn_name, Local::now()));
        let connection = Connection::open(&args)
            .await
            .with_context(|| format!("while opening RabbitMQ connection {:?}", amqp_uri))
            .with_context(|| "Maybe double-check credentials?")?;
        let channel = open_channel(&connection).await?;
        Ok(RabbitHandle {
            connection: Arc::new(connection),
            channel,
        })
    }

    pub fn chan(&self) -> &Channel {
        &self.channel
    }

    pub async fn fork(&self) -> Result<RabbitHandle> {
        Ok(RabbitHandle {
            connection: self.connection.clone(),
            channel: open_channel(&self.connection).await?,
        })
    }

    /// Declares a durable queue honoring per-message priorities up to
    /// `max_priority` (higher wins, FIFO within one level).
    pub async fn declare_priority_queue(&self, name: &str, max_priority: u8) -> Result<&Self> {
        let mut table = FieldTable::new();
        table.insert(
            "x-max-priority".try_into().expect("static field name"),
            FieldValue::s(max_priority as i16),
        );
        let args = QueueDeclareArguments::new(name)
            .durable(true)
            .arguments(table)
            .finish();
        self.channel
            .queue_declare(args)
            .await
            .with_context(|| format!("while declaring queue {}", name))?
            .expect("queue_declare returns Some without no_wait");
        Ok(self)
    }

    pub async fn declare_exchange(&self, name: &str, kind: &str) -> Result<&Self> {
        let args = ExchangeDeclareArguments::new(name, kind)
            .durable(true)
            .finish();
        self.channel
            .exchange_declare(args)
            .await
            .with_context(|| format!("while declaring exchange {}", name))?;
        Ok(self)
    }

    pub async fn bind_queue(
        &self,
        queue_name: &str,
        exchange_name: &str,
        routing_key: &str,
    ) -> Result<&Self> {
        let args = QueueBindArguments::new(queue_name, exchange_name, routing_key);
        self.channel
            .queue_bind(args)
            .await
            .with_context(|| format!("while binding {} -> {}", queue_name, exchange_name))?;
        Ok(self)
    }
}

async fn open_channel(conn: &Connection) -> Result<Channel> {
    let channel = conn
        .open_channel(None)
        .await
        .with_context(|| "while opening RabbitMQ channel")?;
    debug!("Fresh RabbitMQ channel connected.");
    Ok(channel)
}
