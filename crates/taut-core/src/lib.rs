#![forbid(unsafe_code)]
#![deny(unreachable_pub, missing_docs, rustdoc::broken_intra_doc_links)]

//! Engine-agnostic torrent types and DTOs shared across the workspace.
//!
//! Everything here is plain data: identity primitives ([`InfoHash`],
//! [`RpcId`]), the immutable snapshot model published by the engine, and the
//! persisted session settings schema. No I/O, no session state.

mod error;
mod hash;
mod model;
mod partfile;
mod settings;

pub use error::InfoHashError;
pub use hash::{InfoHash, RpcId};
pub use model::{
    AddTorrentRequest, SessionSnapshot, TorrentSnapshot, TorrentSource, TorrentState,
};
pub use partfile::{partfile_extension, set_partfile_extension};
pub use settings::{EncryptionMode, ProxyType, SessionSettings, SettingsUpdate};
