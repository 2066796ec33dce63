//! `drop` 세그먼트 — 모든 플로우를 버립니다.
//!
//! 필터 계열이므로 드롭 채널이 구독되어 있으면 버리는 플로우를 그쪽으로
//! 내보냅니다. 출력으로는 아무것도 전달하지 않습니다. branch 조건
//! 파이프라인의 끝에 두면 "모두 거짓" 술어가 됩니다.

use std::collections::HashMap;

use flowgate_core::error::SegmentError;
use flowgate_core::segment::{send_drop, FlowReceiver, FlowSender, Segment, SegmentLink};

/// 설정에서 쓰이는 세그먼트 타입 이름
pub const NAME: &str = "drop";

/// 모든 플로우를 버리는 필터 세그먼트
pub struct Discard {
    link: SegmentLink,
    drops: Option<FlowSender>,
}

impl Discard {
    /// 옵션 없이 생성됩니다.
    pub fn from_config(_config: &HashMap<String, String>) -> Result<Self, SegmentError> {
        Ok(Self {
            link: SegmentLink::default(),
            drops: None,
        })
    }
}

impl Segment for Discard {
    fn rewire(&mut self, input: FlowReceiver, output: FlowSender) {
        self.link.attach(input, output);
    }

    fn subscribe_drops(&mut self, drops: FlowSender) {
        self.drops = Some(drops);
    }

    async fn run(&mut self) {
        let Some((mut rx, _tx)) = self.link.take() else {
            tracing::error!("drop: run called before rewire");
            return;
        };
        let mut drops = self.drops.take();
        while let Some(flow) = rx.recv().await {
            send_drop(&mut drops, flow, NAME).await;
        }
    }
}
