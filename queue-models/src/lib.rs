pub mod probe_task;

/// A message type with a fixed routing key under the task exchange.
pub trait TypeRoutedMessage {
    fn routing_key() -> &'static str;
}
