//! # Channels
//!
//! A channel is a named backend integration: a route table of entrances, a
//! settings file and optional data files, all living under one directory.

pub mod entrance;
pub mod setting;
pub mod store;
pub mod whitelist;

pub use entrance::{
    Authentication, DispatchTarget, Entrance, HttpProxyTarget, NativeMode, RouteRule, ServerTag,
    ServiceTarget, SocketProxyTarget,
};
pub use setting::{
    ChannelSetting, ServerEntry, SignApi, SignUser, SignUserRegistry, SocketSettings, TimestampPolicy,
};
pub use store::{Channel, ChannelStore};
pub use whitelist::Whitelist;
