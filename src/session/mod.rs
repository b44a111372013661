//! Client-side peer session management
//!
//! One `PeerSession` per remote peer, all owned by a single
//! `SessionOrchestrator` that dispatches relay frames and engine events.

mod media;
mod orchestrator;
mod peer;


pub use media::{MediaSource, NoMedia, StaticVideoSource};
pub use orchestrator::{PeerView, SessionDirectory, SessionOrchestrator, StopHandle};
pub use peer::{PeerSession, SessionDirection, SessionEvent, SessionState};
