//! Downstream sinks
//!
//! A sink turns lifelogs into a destination-specific payload and sends it.
//! Sinks only report success or failure; deciding what that means for the
//! watermark is the dispatcher's job.

mod mem;
mod notion;

pub use mem::MemSink;
pub use notion::NotionSink;

use crate::error::SinkError;
use crate::models::LifelogRecord;

/// Confirmation of a successful delivery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Destination reference, such as a page id or note URL
    pub reference: Option<String>,
}

/// A delivery target
pub trait Sink: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Deliver `records` in the given order.
    ///
    /// `Ok` means the destination confirmed every record in the call.
    fn deliver(&self, records: &[LifelogRecord]) -> Result<DeliveryReceipt, SinkError>;
}
