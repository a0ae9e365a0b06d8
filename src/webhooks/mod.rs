//! Webhook payload types and the router that applies them.

pub mod payload;
pub mod router;

pub use payload::{AgentStatus, CalendarWebhook, TranscodingWebhook, map_agent_status};
pub use router::WebhookRouter;
