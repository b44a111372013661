pub mod config;
pub mod protocol;
pub mod relay;
pub mod session;

pub use config::{Config, RelayConfig, SessionConfig};
pub use protocol::{ClientMessage, PeerId, ServerMessage};
pub use relay::{ws_handler, ConnectionRegistry, RelayServer, RelayState};
pub use session::{
    MediaSource, NoMedia, PeerSession, PeerView, SessionDirection, SessionDirectory, SessionEvent,
    SessionOrchestrator, SessionState, StaticVideoSource, StopHandle,
};
