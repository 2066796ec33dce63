//! 세그먼트 계약 — 모든 파이프라인 스테이지가 구현하는 인터페이스
//!
//! 세그먼트는 입력 채널에서 [`FlowRecord`]를 받아 검사/수정/필터링한 뒤
//! 출력 채널로 넘기는 하나의 처리 단계입니다. 계약은 의도적으로 좁습니다:
//! 채널 두 개([`Segment::rewire`])와 실행 루프([`Segment::run`])가 전부이며,
//! 필터 세그먼트만 드롭 채널([`Segment::subscribe_drops`])을 추가로 받습니다.
//!
//! # 소유권 규칙
//! - 입력 채널(수신측)은 세그먼트가 소유하지만, 송신측은 앞 세그먼트
//!   (또는 파이프라인)의 것입니다.
//! - 출력 채널(송신측)은 세그먼트가 소유하며, 입력이 닫히고 잔여 작업을
//!   모두 내보낸 뒤 정확히 한 번 닫습니다(송신측 drop).
//! - 레코드의 소유권은 채널 전송과 함께 이동합니다.

use std::future::Future;
use std::io::Write;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::error::SegmentError;
use crate::flow::FlowRecord;
use crate::metrics as m;

/// dyn-compatible Future 타입 별칭
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 플로우 채널 용량
///
/// 각 홉이 자연스러운 백프레셔를 갖도록 랑데부에 가장 가까운 용량 1을
/// 사용합니다. 느린 세그먼트는 업스트림 전체를 막습니다.
pub const FLOW_CHANNEL_CAPACITY: usize = 1;

/// 플로우 채널 송신측
pub type FlowSender = mpsc::Sender<FlowRecord>;
/// 플로우 채널 수신측
pub type FlowReceiver = mpsc::Receiver<FlowRecord>;

/// 파이프라인 배선에 쓰이는 플로우 채널을 생성합니다.
pub fn flow_channel() -> (FlowSender, FlowReceiver) {
    mpsc::channel(FLOW_CHANNEL_CAPACITY)
}

/// 모든 세그먼트가 구현하는 계약
///
/// 생성(`from_config`, 각 타입의 고유 함수) → [`rewire`](Segment::rewire) →
/// [`run`](Segment::run) 순서로 정확히 한 번씩 호출됩니다.
/// `run`은 입력 채널이 닫힐 때까지 돌다가, 잔여 작업을 내보낸 뒤
/// 출력 송신측을 drop하여 종료 웨이브를 다음 세그먼트로 전파합니다.
pub trait Segment: Send {
    /// 파이프라인 빌드 시점에 입력/출력 채널을 연결합니다.
    ///
    /// `run` 전에 정확히 한 번 호출됩니다.
    fn rewire(&mut self, input: FlowReceiver, output: FlowSender);

    /// 드롭 채널을 구독시킵니다. 필터 계열 세그먼트만 오버라이드합니다.
    ///
    /// 기본 구현은 송신측을 그대로 버립니다 — 필터가 아닌 세그먼트는
    /// 드롭을 내보내지 않습니다.
    fn subscribe_drops(&mut self, drops: FlowSender) {
        let _ = drops;
    }

    /// 세그먼트 실행 루프. 입력이 닫히면 출력을 닫고 반환합니다.
    fn run(&mut self) -> impl Future<Output = ()> + Send;
}

/// dyn-compatible 세그먼트 trait
///
/// `Segment` trait은 RPITIT를 사용하므로 `dyn Segment`가 불가합니다.
/// `DynSegment`는 `BoxFuture`를 반환하여 `Vec<Box<dyn DynSegment>>`로
/// 파이프라인을 동적으로 배선할 수 있게 합니다.
pub trait DynSegment: Send {
    /// 입력/출력 채널을 연결합니다.
    fn rewire(&mut self, input: FlowReceiver, output: FlowSender);

    /// 드롭 채널을 구독시킵니다.
    fn subscribe_drops(&mut self, drops: FlowSender);

    /// 세그먼트 실행 루프
    fn run(&mut self) -> BoxFuture<'_, ()>;
}

/// Segment를 구현한 타입은 자동으로 DynSegment도 구현됩니다.
impl<T: Segment> DynSegment for T {
    fn rewire(&mut self, input: FlowReceiver, output: FlowSender) {
        Segment::rewire(self, input, output);
    }

    fn subscribe_drops(&mut self, drops: FlowSender) {
        Segment::subscribe_drops(self, drops);
    }

    fn run(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(Segment::run(self))
    }
}

/// 세그먼트의 채널 연결 상태
///
/// 각 세그먼트 구조체가 이 타입을 내장하여 `rewire`/`run`의 배선 규약을
/// 공유합니다. `take`는 배선 전이면 `None`을 반환하므로, `run`은 이를
/// 감지해 에러 로그 후 조용히 반환해야 합니다.
#[derive(Default)]
pub struct SegmentLink {
    input: Option<FlowReceiver>,
    output: Option<FlowSender>,
}

impl SegmentLink {
    /// 채널을 연결합니다. `rewire`에서 호출합니다.
    pub fn attach(&mut self, input: FlowReceiver, output: FlowSender) {
        self.input = Some(input);
        self.output = Some(output);
    }

    /// 연결된 채널 쌍을 꺼냅니다. `run` 시작 시점에 호출합니다.
    pub fn take(&mut self) -> Option<(FlowReceiver, FlowSender)> {
        match (self.input.take(), self.output.take()) {
            (Some(rx), Some(tx)) => Some((rx, tx)),
            _ => None,
        }
    }
}

/// 드롭 채널로 플로우를 내보냅니다.
///
/// 구독자가 사라져 전송이 실패하면 해당 세그먼트의 드롭 경로를 영구히
/// 비활성화합니다(`*drops = None`). 구독자가 없으면 플로우는 버려집니다.
pub async fn send_drop(drops: &mut Option<FlowSender>, flow: FlowRecord, segment: &'static str) {
    if let Some(tx) = drops {
        if tx.send(flow).await.is_err() {
            tracing::warn!(segment, "drop subscriber gone, disabling drops");
            *drops = None;
        } else {
            metrics::counter!(m::FILTER_FLOWS_DROPPED_TOTAL, m::LABEL_SEGMENT => segment)
                .increment(1);
        }
    }
}

/// 텍스트 출력 세그먼트의 싱크
///
/// `count`, `json` 같은 출력 계열 세그먼트가 결과를 쓰는 대상입니다.
/// 쓰기 실패는 경고 로그만 남기고 플로우 처리는 계속합니다.
pub struct TextSink {
    target: String,
    writer: Box<dyn Write + Send>,
}

impl TextSink {
    /// 싱크 대상 문자열로부터 싱크를 엽니다.
    ///
    /// - `""` 또는 `"-"` — 표준 출력 (기본값)
    /// - `"stderr"` — 표준 에러
    /// - 그 외 — 해당 경로의 파일을 생성/덮어쓰기
    pub fn for_target(target: &str) -> Result<Self, SegmentError> {
        let writer: Box<dyn Write + Send> = match target {
            "" | "-" => Box::new(std::io::stdout()),
            "stderr" => Box::new(std::io::stderr()),
            path => {
                let file = std::fs::File::create(path).map_err(|e| SegmentError::Sink {
                    target: path.to_owned(),
                    reason: e.to_string(),
                })?;
                Box::new(file)
            }
        };
        Ok(Self {
            target: target.to_owned(),
            writer,
        })
    }

    /// 임의의 writer로 싱크를 만듭니다. 주로 테스트에서 사용합니다.
    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            target: "(custom)".to_owned(),
            writer,
        }
    }

    /// 싱크 대상 문자열
    pub fn target(&self) -> &str {
        &self.target
    }

    /// 한 줄을 씁니다. 실패는 경고 로그만 남깁니다.
    pub fn write_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.writer, "{line}") {
            tracing::warn!(target = %self.target, error = %e, "failed to write to output sink");
        }
    }

    /// 버퍼를 비웁니다.
    pub fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!(target = %self.target, error = %e, "failed to flush output sink");
        }
    }
}
