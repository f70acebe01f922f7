//! Adaptors for third-party platforms on either side of the tracker.
//!
//! Outbound: [`meta`] drives the ad-platform pixel, [`gtm`] pushes into the
//! tag-manager data layer. Inbound: [`typebot`] turns an embedded chat
//! widget's messages into [`FunnelSignal`]s via the [`ChatAdaptor`] trait.

pub mod gtm;
pub mod meta;
pub mod typebot;

use serde_json::Value;

/// Funnel step recognised in an inbound widget message.
#[derive(Debug, Clone, PartialEq)]
pub enum FunnelSignal {
    Started {
        step_id: String,
    },
    StepAnswered {
        step_id: String,
        answer: Option<Value>,
        /// The step collects the visitor's phone; a truthy answer is a lead.
        captures_contact: bool,
    },
    Completed,
}

/// Adaptor trait: recognises funnel signals in a chat widget's messages.
pub trait ChatAdaptor: Send + Sync {
    /// Platform identifier (e.g. "typebot").
    fn platform(&self) -> &str;

    /// Interpret one raw inbound message. Anything unrecognised yields `None`.
    fn parse_inbound_message(&self, raw: &Value) -> Option<FunnelSignal>;
}
