//! Message bus, notification payloads and alerting for batch steps.

pub mod alert;
pub mod bus;
pub mod consumer;
pub mod in_memory_bus;
pub mod ledger;
pub mod message;

pub use alert::{Alert, AlertSink, InMemoryAlertSink, LogAlertSink};
pub use bus::{BusError, EventBus, Subscription};
pub use consumer::{ConsumerHandle, DedupConsumer};
pub use in_memory_bus::InMemoryEventBus;
pub use ledger::DeliveryLedger;
pub use message::{NotificationEvent, NotificationKey, OutboundMessage, Severity, topics};
