//! `counter` 세그먼트 — 테스트에서 관찰 가능한 플로우 카운터
//!
//! [`Count`](crate::segments::count::Count)와 달리 아무것도 출력하지
//! 않고, 공유 원자 카운터 핸들로 값을 노출합니다. 매칭 파이프라인에
//! 몇 개의 플로우가 들어왔는지 검증하는 테스트에 쓰입니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flowgate_core::error::SegmentError;
use flowgate_core::segment::{FlowReceiver, FlowSender, Segment, SegmentLink};

/// 설정에서 쓰이는 세그먼트 타입 이름
pub const NAME: &str = "counter";

/// 공유 카운터로 플로우 수를 세는 세그먼트
pub struct Counter {
    link: SegmentLink,
    count: Arc<AtomicU64>,
}

impl Counter {
    /// 옵션 없이 생성됩니다.
    pub fn from_config(_config: &HashMap<String, String>) -> Result<Self, SegmentError> {
        Ok(Self {
            link: SegmentLink::default(),
            count: Arc::new(AtomicU64::new(0)),
        })
    }

    /// 카운터 핸들. 세그먼트가 실행되는 동안에도 읽을 수 있습니다.
    pub fn handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.count)
    }
}

impl Segment for Counter {
    fn rewire(&mut self, input: FlowReceiver, output: FlowSender) {
        self.link.attach(input, output);
    }

    async fn run(&mut self) {
        let Some((mut rx, tx)) = self.link.take() else {
            tracing::error!("counter: run called before rewire");
            return;
        };
        while let Some(flow) = rx.recv().await {
            self.count.fetch_add(1, Ordering::Relaxed);
            if tx.send(flow).await.is_err() {
                break;
            }
        }
    }
}
