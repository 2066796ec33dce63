//! `flowfilter` 세그먼트 — 필터 표현식에 매칭되는 플로우만 통과시킵니다.
//!
//! 매칭된 플로우는 출력으로, 나머지는 드롭 채널로 갑니다. branch 조건
//! 파이프라인의 마지막에 두면 출력/드롭 분기가 곧 분기 술어가 됩니다.

use std::collections::HashMap;

use flowgate_core::error::SegmentError;
use flowgate_core::segment::{send_drop, FlowReceiver, FlowSender, Segment, SegmentLink};

use super::expression::FilterExpression;

/// 설정에서 쓰이는 세그먼트 타입 이름
pub const NAME: &str = "flowfilter";

/// 표현식 기반 필터 세그먼트
pub struct FlowFilter {
    link: SegmentLink,
    drops: Option<FlowSender>,
    expression: FilterExpression,
}

impl FlowFilter {
    /// 옵션:
    /// - `filter` — 필수. 필터 표현식.
    ///   문법 오류는 파이프라인 기동을 중단시킵니다.
    pub fn from_config(config: &HashMap<String, String>) -> Result<Self, SegmentError> {
        let raw = config
            .get("filter")
            .filter(|v| !v.is_empty())
            .ok_or(SegmentError::MissingOption {
                segment: NAME,
                option: "filter",
            })?;
        let expression = FilterExpression::parse(raw)?;
        tracing::info!(filter = %expression.source(), "flowfilter: expression compiled");
        Ok(Self {
            link: SegmentLink::default(),
            drops: None,
            expression,
        })
    }
}

impl Segment for FlowFilter {
    fn rewire(&mut self, input: FlowReceiver, output: FlowSender) {
        self.link.attach(input, output);
    }

    fn subscribe_drops(&mut self, drops: FlowSender) {
        self.drops = Some(drops);
    }

    async fn run(&mut self) {
        let Some((mut rx, tx)) = self.link.take() else {
            tracing::error!("flowfilter: run called before rewire");
            return;
        };
        let mut drops = self.drops.take();
        while let Some(flow) = rx.recv().await {
            if self.expression.matches(&flow) {
                if tx.send(flow).await.is_err() {
                    break;
                }
            } else {
                send_drop(&mut drops, flow, NAME).await;
            }
        }
    }
}
