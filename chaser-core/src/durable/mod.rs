//! Durable order buffer, binary codec and the shared-memory transport

pub mod buffer;
pub mod codec;
pub mod record;
pub mod transport;

pub use buffer::OrderBuffer;
pub use codec::{decode, BookSnapshotMsg, CodecError, Encoder, Message, OrderMsg, TradeSignalMsg};
pub use record::OrderRecord;
pub use transport::{
    ChannelStream, DurableContext, Publisher, Subscriber, TransportConfig, TransportError,
    TransportKind,
};
