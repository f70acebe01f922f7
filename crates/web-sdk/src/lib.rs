//! Lead tracking for landing pages: funnel events normalized and fanned out
//! to an ad-platform pixel and a tag-manager data layer, with dedup windows,
//! session/flow context, campaign attribution and hashed contact fields.
//!
//! # Modules
//!
//! - [`host`]: The surrounding page: location, storage tiers, sinks, debug overrides
//! - [`context`] / [`attribution`]: Session context and `utm_*` attribution
//! - [`hasher`]: SHA-256 hashing of contact fields for enhanced matching
//! - [`adaptors`]: Pixel and data-layer pipelines, chat-widget bridge
//! - [`events`]: Funnel event vocabulary and operation inputs
//! - [`tracker`] / [`funnel`]: The per-page client and its public operations

#[macro_use]
pub mod debug;

pub mod adaptors;
pub mod attribution;
pub mod context;
pub mod events;
pub mod funnel;
pub mod hasher;
pub mod host;
pub mod tracker;

pub use adaptors::gtm::{GtmDispatcher, PushOutcome};
pub use adaptors::meta::{MetaPixelDispatcher, PixelOutcome, PixelRequest};
pub use adaptors::typebot::TypebotAdaptor;
pub use adaptors::{ChatAdaptor, FunnelSignal};
pub use events::{FunnelEvent, LeadInput, RegistrationInput, StartedInput, StepAnswer};
pub use funnel::FunnelDispatch;
pub use host::PageHost;
pub use tracker::{LeadTracker, TrackerBuilder};
