//! MQTT 3.1.1 packet codec.
//!
//! Transport independent: encoders return [`bytes::Bytes`], the decoder works
//! over any byte slice and reports incomplete input as `Ok(None)`.

mod decode;
mod encode;
mod packet;
mod remaining_length;

pub use decode::{RawPacket, decode_packet, try_decode_packet, try_decode_packet_with_limit};
pub use encode::{
    encode_connect, encode_disconnect, encode_pingreq, encode_puback, encode_publish,
    encode_subscribe,
};
pub use packet::*;
pub use remaining_length::{decode_remaining_length, encode_remaining_length, remaining_length_size};
