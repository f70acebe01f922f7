pub mod clock;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TrackerConfig;
pub use error::{TrackError, TrackResult};
pub use event_bus::{DataLayerSink, PixelCall, PixelMode, PixelSink};
pub use types::{Attribution, ContactRecord, ContextPatch, ContextSnapshot, Payload, SessionContext};
