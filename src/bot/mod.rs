/// Command menu published to Telegram
pub mod commands;
/// Outbound replies and document downloads through the Bot API
pub mod outbound;
/// Retrying Bot API helpers
pub mod resilient;
/// Telegram updates to engine events
pub mod transport;

pub use outbound::{TelegramFileStore, TelegramOutbound};
pub use transport::run;
