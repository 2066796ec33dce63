//! 세그먼트 구현 모음
//!
//! 각 서브모듈이 세그먼트 타입 하나를 구현하고 `NAME` 상수로 설정에서
//! 쓰이는 타입 이름을 내보냅니다. 일반 세그먼트는
//! [`SegmentRegistry`](crate::builder::SegmentRegistry)에 팩토리로
//! 등록되고, 서브파이프라인을 내장하는 `branch`와
//! `traffic_specific_toptalkers`는 빌더가 직접 조립합니다.

pub mod branch;
pub mod count;
pub mod counter;
pub mod discard;
pub mod expression;
pub mod flowfilter;
pub mod json;
pub mod pass;
pub mod snmp;
pub mod stdin;
pub mod toptalkers;
