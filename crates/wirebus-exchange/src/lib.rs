//! Bidirectional message exchange over byte streams.
//!
//! An [`Exchange`] connects one inbound and one outbound byte stream to a set
//! of independently-scheduled message consumers. Inbound envelopes are fanned
//! out to every registered consumer through a dedicated per-consumer dispatch
//! worker, so a slow or blocked handler never stalls the reader loop or other
//! consumers. Outbound sends are serialized so frames never interleave on the
//! wire.
//!
//! The exchange does not establish transport connections and does not retry:
//! stream failure is detected reactively and reported exactly once through
//! the closed-callback supplied at attach time.

mod dispatch;
pub mod exchange;

pub use exchange::{Exchange, ExchangeConfig};
pub use wirebus_frame::Envelope;
