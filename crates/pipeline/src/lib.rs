#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`pipeline`]: 채널 배선과 생명주기 (빌드 → 시작 → 종료 웨이브)
//! - [`builder`]: 세그먼트 레지스트리와 설정 → 파이프라인 확장
//! - [`segments`]: 내장 세그먼트 구현
//!
//! # 아키텍처
//!
//! ```text
//! In -> [segment 1] -> [segment 2] -> ... -> [segment N] -> Out
//!           |               |                     |
//!           +---------------+---- drops ----------+--> Drop
//! ```

pub mod builder;
pub mod pipeline;
pub mod segments;

// --- 주요 타입 re-export ---

pub use builder::{PipelineBuilder, SegmentRegistry};
pub use pipeline::Pipeline;
