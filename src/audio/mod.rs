pub mod clock;
pub mod device;
pub mod pcm;
pub mod resample;

pub use clock::{AudioClock, VirtualClock};
pub use device::DeviceClock;
