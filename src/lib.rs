pub mod audio;
pub mod blendshape;
pub mod config;
pub mod error;
pub mod events;
pub mod interrupt;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod transcription;

pub use blendshape::{Blendshape, Weights};
pub use config::{ConfigManager, SyncConfig};
pub use error::SyncError;
pub use events::{AvatarStatus, Role, SyncEvent};
pub use protocol::ProtocolEvent;
pub use session::AvatarSession;
