//! `pass` 세그먼트 — 플로우를 변경 없이 그대로 전달합니다.
//!
//! 파이프라인 구성을 자리만 잡아 두거나 테스트할 때 사용합니다.

use std::collections::HashMap;

use flowgate_core::error::SegmentError;
use flowgate_core::segment::{FlowReceiver, FlowSender, Segment, SegmentLink};

/// 설정에서 쓰이는 세그먼트 타입 이름
pub const NAME: &str = "pass";

/// 아무것도 하지 않는 통과 세그먼트
pub struct Pass {
    link: SegmentLink,
}

impl Pass {
    /// 옵션 없이 생성됩니다. 모든 옵션을 무시합니다.
    pub fn from_config(_config: &HashMap<String, String>) -> Result<Self, SegmentError> {
        Ok(Self {
            link: SegmentLink::default(),
        })
    }
}

impl Segment for Pass {
    fn rewire(&mut self, input: FlowReceiver, output: FlowSender) {
        self.link.attach(input, output);
    }

    async fn run(&mut self) {
        let Some((mut rx, tx)) = self.link.take() else {
            tracing::error!("pass: run called before rewire");
            return;
        };
        while let Some(flow) = rx.recv().await {
            if tx.send(flow).await.is_err() {
                break;
            }
        }
    }
}
