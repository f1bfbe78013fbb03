use async_trait::async_trait;

/// Optional markup applied to an outgoing chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    Html,
    MarkdownV2,
}

/// Delivers a text message to an external chat channel.
///
/// Delivery is best-effort: implementations report failure as `false`
/// and never return an error or panic.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str, format: Option<MessageFormat>) -> bool;
}

/// Notifier for setups without a chat channel. Never delivers anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, _message: &str, _format: Option<MessageFormat>) -> bool {
        false
    }
}
