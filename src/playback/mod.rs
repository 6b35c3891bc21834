pub mod engine;
pub mod frame;
pub mod idle;
pub mod pool;

pub use engine::{PlaybackEngine, TickStatus};
pub use frame::{PlaybackState, ScheduledFrame, SyncFrame};
pub use idle::{BlendshapeFrame, IdleFrameBuffer};
pub use pool::{BlendshapeResult, FramePool, PoolSlot};
