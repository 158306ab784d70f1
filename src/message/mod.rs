//! Message codec: frame and parse wire messages with a stable
//! tag/field layout, split between a small fixed header and an
//! opaque, independently-serialized payload. The source NodeID lives
//! *outside* the digested payload, which is what keeps a forwarded
//! message's digest stable across hops (see `message::digest`).

mod digest;
mod envelope;
mod wire;

pub use digest::Digest;
pub use envelope::{
    Action, Category, ConnectionAction, ControlAction, DiscoverAction, DiscoveryAction,
    FederationAction, LinkAction, Message, ModelAction, OfferAction, ReputationAction,
};
pub use wire::{CodecError, FrameCodec, WIRE_VERSION};
