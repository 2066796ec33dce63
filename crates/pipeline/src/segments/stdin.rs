//! `stdin` 세그먼트 — 표준 입력의 JSON 플로우를 파이프라인에 공급합니다.
//!
//! 한 줄에 플로우 레코드 하나씩 JSON으로 읽습니다. `json` 세그먼트의
//! 출력을 그대로 되돌려 넣을 수 있는 형식입니다. 입력 채널로 들어오는
//! 플로우도 함께 통과시키므로 파이프라인 중간에 둘 수도 있습니다.
//! 파싱에 실패한 줄은 경고 로그만 남기고 건너뜁니다.

use std::collections::HashMap;

use tokio::io::{AsyncBufReadExt, BufReader};

use flowgate_core::error::SegmentError;
use flowgate_core::flow::FlowRecord;
use flowgate_core::segment::{FlowReceiver, FlowSender, Segment, SegmentLink};

/// 설정에서 쓰이는 세그먼트 타입 이름
pub const NAME: &str = "stdin";

/// 표준 입력 JSON 리더 세그먼트
pub struct StdIn {
    link: SegmentLink,
}

impl StdIn {
    /// 옵션 없이 생성됩니다.
    pub fn from_config(_config: &HashMap<String, String>) -> Result<Self, SegmentError> {
        Ok(Self {
            link: SegmentLink::default(),
        })
    }
}

/// JSON 한 줄을 플로우로 파싱합니다. 빈 줄은 조용히 무시합니다.
fn parse_line(line: &str) -> Option<FlowRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(flow) => Some(flow),
        Err(e) => {
            tracing::warn!(error = %e, "stdin: skipping unparsable line");
            None
        }
    }
}

impl Segment for StdIn {
    fn rewire(&mut self, input: FlowReceiver, output: FlowSender) {
        self.link.attach(input, output);
    }

    async fn run(&mut self) {
        let Some((mut rx, tx)) = self.link.take() else {
            tracing::error!("stdin: run called before rewire");
            return;
        };
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        loop {
            tokio::select! {
                flow = rx.recv() => match flow {
                    Some(flow) => {
                        if tx.send(flow).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(line)) => {
                        if let Some(flow) = parse_line(&line) {
                            if tx.send(flow).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::info!("stdin: end of input");
                        stdin_open = false;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin: read error");
                        stdin_open = false;
                    }
                },
            }
        }
    }
}
