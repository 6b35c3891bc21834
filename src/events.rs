use serde::{Deserialize, Serialize};

use crate::blendshape::Weights;

pub type EventSender = crossbeam_channel::Sender<SyncEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvatarStatus {
    Speaking,
    Listening,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Full facial pose for "now".
    Weights(Weights),
    /// Full replacement subtitle line.
    Subtitle { role: Role, text: String },
    /// A transcript bubble is complete.
    MessageFinal { role: Role, text: String },
    /// Audio for the current session has fully played out.
    PlaybackEnded,
    Status(AvatarStatus),
}

/// Send without caring whether the host is still listening.
pub(crate) fn emit(tx: &EventSender, event: SyncEvent) {
    if tx.send(event).is_err() {
        log::debug!("Event receiver dropped");
    }
}
