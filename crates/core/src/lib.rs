#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod flow;
pub mod metrics;
pub mod segment;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{ConfigError, FlowgateError, SegmentError};

// 플로우
pub use flow::FlowRecord;

// 설정
pub use config::{parse_declarations, EvaluationMode, SegmentDecl, ThresholdMetricDecl};

// 세그먼트 계약
pub use segment::{
    flow_channel, BoxFuture, DynSegment, FlowReceiver, FlowSender, Segment, SegmentLink, TextSink,
    FLOW_CHANNEL_CAPACITY,
};
