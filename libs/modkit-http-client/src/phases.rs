//! The four pipelines every client owns and their phases.
//!
//! Call flow:
//!
//! ```text
//! request pipeline:  Before → State → Transform → Render → Send
//!                                                          │ (send orchestration)
//! send pipeline:     Before → State → Monitoring → Engine → Receive
//!                                                          │ (receive bridge)
//! receive pipeline:  Before → State → After
//! response pipeline: Receive → Parse → Transform → State → After
//! ```

use crate::call::HttpCall;
use crate::pipeline::{Pipeline, PipelinePhase};

/// Phases of the request pipeline (outgoing request preparation).
pub struct RequestPhase;

impl RequestPhase {
    /// Earliest phase; used for call-wide bookkeeping.
    pub const BEFORE: PipelinePhase = PipelinePhase::new("Before");
    pub const STATE: PipelinePhase = PipelinePhase::new("State");
    pub const TRANSFORM: PipelinePhase = PipelinePhase::new("Transform");
    /// Headers and body are finalized here.
    pub const RENDER: PipelinePhase = PipelinePhase::new("Render");
    /// Hand-off to the send pipeline.
    pub const SEND: PipelinePhase = PipelinePhase::new("Send");

    pub const ALL: [PipelinePhase; 5] = [
        Self::BEFORE,
        Self::STATE,
        Self::TRANSFORM,
        Self::RENDER,
        Self::SEND,
    ];
}

/// Phases of the send pipeline (one network exchange).
pub struct SendPhase;

impl SendPhase {
    pub const BEFORE: PipelinePhase = PipelinePhase::new("Before");
    pub const STATE: PipelinePhase = PipelinePhase::new("State");
    pub const MONITORING: PipelinePhase = PipelinePhase::new("Monitoring");
    /// The engine executes the request here.
    pub const ENGINE: PipelinePhase = PipelinePhase::new("Engine");
    /// Join point with the receive pipeline.
    pub const RECEIVE: PipelinePhase = PipelinePhase::new("Receive");

    pub const ALL: [PipelinePhase; 5] = [
        Self::BEFORE,
        Self::STATE,
        Self::MONITORING,
        Self::ENGINE,
        Self::RECEIVE,
    ];
}

/// Phases of the receive pipeline (raw response of one exchange).
pub struct ReceivePhase;

impl ReceivePhase {
    pub const BEFORE: PipelinePhase = PipelinePhase::new("Before");
    pub const STATE: PipelinePhase = PipelinePhase::new("State");
    pub const AFTER: PipelinePhase = PipelinePhase::new("After");

    pub const ALL: [PipelinePhase; 3] = [Self::BEFORE, Self::STATE, Self::AFTER];
}

/// Phases of the response pipeline (final response of the call).
pub struct ResponsePhase;

impl ResponsePhase {
    pub const RECEIVE: PipelinePhase = PipelinePhase::new("Receive");
    pub const PARSE: PipelinePhase = PipelinePhase::new("Parse");
    pub const TRANSFORM: PipelinePhase = PipelinePhase::new("Transform");
    pub const STATE: PipelinePhase = PipelinePhase::new("State");
    pub const AFTER: PipelinePhase = PipelinePhase::new("After");

    pub const ALL: [PipelinePhase; 5] = [
        Self::RECEIVE,
        Self::PARSE,
        Self::TRANSFORM,
        Self::STATE,
        Self::AFTER,
    ];
}

pub fn request_pipeline() -> Pipeline<HttpCall> {
    Pipeline::new("request", &RequestPhase::ALL)
}

pub fn send_pipeline() -> Pipeline<HttpCall> {
    Pipeline::new("send", &SendPhase::ALL)
}

pub fn receive_pipeline() -> Pipeline<HttpCall> {
    Pipeline::new("receive", &ReceivePhase::ALL)
}

pub fn response_pipeline() -> Pipeline<HttpCall> {
    Pipeline::new("response", &ResponsePhase::ALL)
}
