//! Wire protocol
//!
//! Envelopes, request and push identifiers, gateway-owned payloads, and the
//! encode/compress codec.

mod codec;
mod envelope;
mod identifiers;
mod payloads;

pub use codec::{Codec, CodecError, Compressor, Encoder, GatewayCodec, GzipCompressor, JsonEncoder};
pub use envelope::{base64_bytes, Req, Resp};
pub use identifiers::{PushKind, RequestKind};
pub use payloads::{
    OnlineStatusPush, StatusReply, SubUserOnlineStatus, SubUserOnlineStatusElem,
    SubUserOnlineStatusTips,
};
