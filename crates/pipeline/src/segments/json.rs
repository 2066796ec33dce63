//! `json` 세그먼트 — 플로우를 JSON 한 줄씩 텍스트 싱크에 씁니다.
//!
//! 출력 형식은 `stdin` 세그먼트가 읽는 형식과 같아서, 파이프라인 간에
//! 플로우를 넘겨주는 간단한 통로로 쓸 수 있습니다. 플로우는 기록 후
//! 변경 없이 다음 세그먼트로 전달됩니다.

use std::collections::HashMap;

use flowgate_core::error::SegmentError;
use flowgate_core::segment::{FlowReceiver, FlowSender, Segment, SegmentLink, TextSink};

/// 설정에서 쓰이는 세그먼트 타입 이름
pub const NAME: &str = "json";

/// JSON 라인 출력 세그먼트 (텍스트 출력 계열)
pub struct Json {
    link: SegmentLink,
    sink: TextSink,
}

impl Json {
    /// 옵션:
    /// - `filename` — 출력 싱크 대상 (기본: 표준 출력)
    pub fn from_config(config: &HashMap<String, String>) -> Result<Self, SegmentError> {
        let target = config.get("filename").map(String::as_str).unwrap_or("");
        Ok(Self {
            link: SegmentLink::default(),
            sink: TextSink::for_target(target)?,
        })
    }

    /// 싱크를 교체합니다. 테스트용입니다.
    pub fn with_sink(mut self, sink: TextSink) -> Self {
        self.sink = sink;
        self
    }
}

impl Segment for Json {
    fn rewire(&mut self, input: FlowReceiver, output: FlowSender) {
        self.link.attach(input, output);
    }

    async fn run(&mut self) {
        let Some((mut rx, tx)) = self.link.take() else {
            tracing::error!("json: run called before rewire");
            return;
        };
        while let Some(flow) = rx.recv().await {
            match serde_json::to_string(&flow) {
                Ok(line) => self.sink.write_line(&line),
                Err(e) => tracing::warn!(error = %e, "json: failed to serialize flow"),
            }
            if tx.send(flow).await.is_err() {
                break;
            }
        }
        self.sink.flush();
    }
}
