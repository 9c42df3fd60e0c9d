//! Stream layer: topic routing and per-stream packet framing.

mod buffer;
mod multiplexer;

pub use buffer::PacketBuffer;
pub use multiplexer::StreamMultiplexer;
