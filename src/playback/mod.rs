//! Playback coordination and audio output

mod clock;
mod coordinator;
pub mod device;
mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{Admission, Interrupt, PlaybackCoordinator, Rejection, Subscription};
pub use device::{PlaybackDevice, SpeakerDevice, UnavailableDevice};
pub use state::{PlaybackState, RateLimitConfig};
