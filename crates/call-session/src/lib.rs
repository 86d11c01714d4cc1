//! # Call-Session - Call State Machine and Media Renegotiation for RVoIP
//!
//! This crate tracks one SIP call from invitation to release: the call state
//! machine, SDP-style offer/answer reconciliation, mid-call renegotiation
//! (hold, resume, parameter changes, glare), early-media tone control,
//! mapping of protocol rejections to user-facing reasons, and call logs.
//!
//! SIP transactions and RTP transport stay outside. The engine talks to them
//! through the [`SignalingTransport`] and [`MediaEngine`] traits, receives
//! their reports as [`InboundEvent`]s, and processes everything during
//! [`SessionRegistry::drive`]. [`SessionDriver`] runs that loop on tokio.
//!
//! ```no_run
//! use std::sync::Arc;
//! use rvoip_call_session::{SessionConfig, SessionRegistry, SignalingTransport, MediaEngine};
//!
//! fn place_call(
//!     transport: Arc<dyn SignalingTransport>,
//!     media: Arc<dyn MediaEngine>,
//! ) -> rvoip_call_session::SessionResult<()> {
//!     let mut registry = SessionRegistry::from_config(SessionConfig::default(), transport, media)?;
//!     let call = registry.invite("sip:alice@example.com", "sip:bob@example.com", None, None)?;
//!     println!("{} is {}", call.id(), call.state());
//!     registry.drive(chrono::Utc::now());
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod call_log;
pub mod config;
pub mod driver;
pub mod early_media;
pub mod errors;
pub mod events;
pub mod logging;
pub mod notify;
pub mod offer_answer;
pub mod params;
pub mod reason;
pub mod registry;
pub mod renegotiation;
pub mod session;
pub mod types;

pub use adapters::{
    Credentials, FinalResponse, MediaEngine, OutgoingRequest, SignalingTransport, StreamStats,
    UpdateMethod,
};
pub use call_log::{
    CallLog, CallLogRecord, CallLogStatus, CallLogStore, JsonLinesCallLogStore, MemoryCallLogStore,
};
pub use config::SessionConfig;
pub use driver::SessionDriver;
pub use errors::{MediaError, NegotiationError, SessionError, SessionResult, TransportError};
pub use events::{AnsweredRequest, InboundEvent, MediaEvent, SignalingEvent};
pub use logging::{LoggingConfig, setup_logging};
pub use notify::{
    CallSessionListener, ChallengeContext, ListenerContext, ListenerId, SessionNotification,
    ToneEvent,
};
pub use offer_answer::{MediaDescription, NegotiationRole, Negotiator, PortPlan, StreamDescription};
pub use params::{
    AttributeValue, Codec, MediaEncryption, MediaParameters, ParamChange, ParamDelta, Privacy,
    StreamParams,
};
pub use reason::{Reason, ReasonKind, SubReason};
pub use registry::{DriveReport, SessionRegistry};
pub use session::{CancelOutcome, SessionHandle, SessionSnapshot};
pub use types::{
    CallDirection, CallState, DialogId, ForkId, Headers, MediaDirection, SessionId, StreamType,
};
