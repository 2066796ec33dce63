//! `count` 세그먼트 — 지나가는 플로우 수를 세어 종료 시점에 출력합니다.
//!
//! 주로 파이프라인 디버깅용입니다. 예를 들어 `flowfilter` 앞뒤에 하나씩
//! 두고 `prefix`를 `"pre-filter: "`, `"post-filter: "`로 주면 필터를
//! 통과한 플로우 수를 `| wc -l` 없이 확인할 수 있습니다.
//!
//! 결과는 파이프라인이 종료될 때 텍스트 싱크(기본: 표준 출력)에 한 줄로
//! 기록됩니다.

use std::collections::HashMap;

use flowgate_core::error::SegmentError;
use flowgate_core::segment::{FlowReceiver, FlowSender, Segment, SegmentLink, TextSink};

/// 설정에서 쓰이는 세그먼트 타입 이름
pub const NAME: &str = "count";

/// 플로우 카운터 세그먼트 (텍스트 출력 계열)
pub struct Count {
    link: SegmentLink,
    count: u64,
    prefix: String,
    sink: TextSink,
}

impl Count {
    /// 옵션:
    /// - `prefix` — 결과 앞에 붙일 문자열 (기본: 빈 문자열)
    /// - `filename` — 출력 싱크 대상 (기본: 표준 출력)
    pub fn from_config(config: &HashMap<String, String>) -> Result<Self, SegmentError> {
        let target = config.get("filename").map(String::as_str).unwrap_or("");
        Ok(Self {
            link: SegmentLink::default(),
            count: 0,
            prefix: config.get("prefix").cloned().unwrap_or_default(),
            sink: TextSink::for_target(target)?,
        })
    }

    /// 싱크를 교체합니다. 테스트에서 출력 내용을 검증할 때 사용합니다.
    pub fn with_sink(mut self, sink: TextSink) -> Self {
        self.sink = sink;
        self
    }
}

impl Segment for Count {
    fn rewire(&mut self, input: FlowReceiver, output: FlowSender) {
        self.link.attach(input, output);
    }

    async fn run(&mut self) {
        let Some((mut rx, tx)) = self.link.take() else {
            tracing::error!("count: run called before rewire");
            return;
        };
        while let Some(flow) = rx.recv().await {
            self.count += 1;
            if tx.send(flow).await.is_err() {
                break;
            }
        }
        self.sink.write_line(&format!("{}{}", self.prefix, self.count));
        self.sink.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segments::testutil::SharedBuf;
    use flowgate_core::flow::FlowRecord;
    use flowgate_core::segment::flow_channel;

    #[tokio::test]
    async fn counts_flows_and_reports_on_exit() {
        let buf = SharedBuf::default();
        let mut config = HashMap::new();
        config.insert("prefix".to_owned(), "n=".to_owned());
        let mut segment = Count::from_config(&config)
            .unwrap()
            .with_sink(TextSink::from_writer(Box::new(buf.clone())));

        let (in_tx, in_rx) = flow_channel();
        let (out_tx, mut out_rx) = flow_channel();
        segment.rewire(in_rx, out_tx);
        let task = tokio::spawn(async move { segment.run().await });

        for _ in 0..100 {
            in_tx.send(FlowRecord::default()).await.unwrap();
            assert!(out_rx.recv().await.is_some());
        }
        drop(in_tx);
        task.await.unwrap();

        assert_eq!(buf.contents(), "n=100\n");
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn reports_zero_without_flows() {
        let buf = SharedBuf::default();
        let mut segment = Count::from_config(&HashMap::new())
            .unwrap()
            .with_sink(TextSink::from_writer(Box::new(buf.clone())));

        let (in_tx, in_rx) = flow_channel();
        let (out_tx, _out_rx) = flow_channel();
        segment.rewire(in_rx, out_tx);
        drop(in_tx);
        segment.run().await;

        assert_eq!(buf.contents(), "0\n");
    }
}
