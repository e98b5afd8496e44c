#![forbid(unsafe_code)]
#![deny(unreachable_pub, rustdoc::broken_intra_doc_links)]

//! Durable storage for the engine: session state, resume blobs, metadata
//! files, and library session params, all written with crash-safe
//! temp+fsync+rename semantics.

mod atomic;
mod blocklist;
mod error;
mod layout;
mod manager;
mod state;

pub use atomic::{atomic_replace, write_atomic};
pub use blocklist::read_blocklist;
pub use error::PersistError;
pub use layout::DataLayout;
pub use manager::{PersistenceManager, RESUME_FLUSH_INTERVAL};
pub use state::{LoadedState, PersistedState};
