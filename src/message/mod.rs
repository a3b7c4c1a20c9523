//! Message data model: the immutable payload plus the mutable delivery
//! metadata that the rest of the broker reasons about.

mod attempts;
mod metadata;

pub use attempts::DeliveryAttempts;
pub use metadata::{now_millis, ClientType, DlqReason, MessageMetadata, MessageMetadataBuilder};
