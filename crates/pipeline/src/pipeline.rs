//! 파이프라인 — 세그먼트 목록과 채널 배선, 생명주기 관리
//!
//! [`Pipeline`]은 세그먼트 S₁..Sₙ과 채널 C₀..Cₙ을 소유합니다.
//! Cᵢ₋₁이 Sᵢ의 입력, Cᵢ가 Sᵢ의 출력이며, C₀가 파이프라인의 공개 입력,
//! Cₙ이 공개 출력입니다. 생명주기는 빌드 → (드롭 구독) → 시작 →
//! (선택적 auto-drain) → 종료 순서입니다.
//!
//! # 종료 웨이브
//! [`Pipeline::close`]는 공개 입력 송신측을 drop합니다. 첫 세그먼트가
//! 입력 닫힘을 관찰하면 잔여 작업을 내보낸 뒤 자기 출력을 닫고, 이것이
//! 마지막 세그먼트까지 순서대로 전파됩니다. 모든 세그먼트 태스크가
//! 반환되어야 `close`가 완료됩니다.

use tokio::task::JoinHandle;

use flowgate_core::segment::{flow_channel, DynSegment, FlowReceiver, FlowSender};

/// 세그먼트 목록과 그 배선, 실행 중인 태스크를 소유하는 파이프라인
///
/// branch나 toptalkers의 매칭 파이프라인처럼 세그먼트 안에 통째로
/// 내장되어 재귀적으로 쓰일 수 있습니다. 내장한 세그먼트는 자신의
/// 생명주기 이벤트를 서브파이프라인의 생명주기로 전달할 책임을 집니다.
pub struct Pipeline {
    input: Option<FlowSender>,
    output: Option<FlowReceiver>,
    segments: Vec<Box<dyn DynSegment>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// 세그먼트 목록을 배선하여 파이프라인을 만듭니다.
    ///
    /// N+1개의 용량 1 채널을 만들고 각 세그먼트에
    /// `rewire(channels[i], channels[i+1])`를 호출합니다. 세그먼트가
    /// 없으면 공개 입력이 곧 공개 출력인 통과 파이프라인이 됩니다.
    pub fn new(mut segments: Vec<Box<dyn DynSegment>>) -> Self {
        let (input, mut tail) = flow_channel();
        for segment in &mut segments {
            let (tx, rx) = flow_channel();
            segment.rewire(tail, tx);
            tail = rx;
        }
        Self {
            input: Some(input),
            output: Some(tail),
            segments,
            tasks: Vec::new(),
        }
    }

    /// 세그먼트가 하나도 없으면 true
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.tasks.is_empty()
    }

    /// 공개 입력 송신측의 사본을 반환합니다.
    ///
    /// [`close`](Self::close) 이후에는 `None`입니다. 사본을 쥔 쪽도
    /// 종료 웨이브가 시작되려면 사본을 drop해야 합니다.
    pub fn input(&self) -> Option<FlowSender> {
        self.input.clone()
    }

    /// 공개 출력 수신측을 꺼냅니다. 한 번만 꺼낼 수 있습니다.
    pub fn take_output(&mut self) -> Option<FlowReceiver> {
        self.output.take()
    }

    /// 드롭 채널을 만들고 모든 필터 계열 세그먼트를 구독시킵니다.
    ///
    /// 모든 필터의 드롭이 이 채널 하나로 합쳐집니다(fan-in).
    /// [`start`](Self::start) 전에 호출해야 합니다. 필터 세그먼트가
    /// 없으면 반환된 수신측은 즉시 닫힌 것으로 보입니다.
    pub fn subscribe_drops(&mut self) -> FlowReceiver {
        let (tx, rx) = flow_channel();
        for segment in &mut self.segments {
            segment.subscribe_drops(tx.clone());
        }
        rx
    }

    /// 세그먼트마다 태스크를 하나씩 띄워 파이프라인을 시작합니다.
    pub fn start(&mut self) {
        for mut segment in self.segments.drain(..) {
            self.tasks.push(tokio::spawn(async move {
                segment.run().await;
            }));
        }
    }

    /// 공개 출력을 읽어서 버리는 태스크를 띄웁니다.
    ///
    /// 마지막 세그먼트가 그 자체로 싱크(print/export)라서 파이프라인
    /// 뒤에서 결과를 소비할 주체가 없을 때 사용합니다.
    pub fn auto_drain(&mut self) {
        if let Some(mut output) = self.output.take() {
            self.tasks.push(tokio::spawn(async move {
                while output.recv().await.is_some() {}
                tracing::info!("pipeline closed, auto draining finished");
            }));
        }
    }

    /// 공개 입력을 닫고 종료 웨이브가 끝까지 전파되기를 기다립니다.
    ///
    /// 이미 닫혀 있으면 태스크 대기만 수행합니다(멱등).
    /// 세그먼트 태스크의 panic은 버그이므로 그대로 다시 발생시킵니다.
    pub async fn close(&mut self) {
        self.input = None;
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                if e.is_panic() {
                    std::panic::resume_unwind(e.into_panic());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segments::counter::Counter;
    use crate::segments::discard::Discard;
    use crate::segments::flowfilter::FlowFilter;
    use crate::segments::pass::Pass;
    use crate::segments::testutil::{tcp_flow, udp_flow};
    use flowgate_core::flow::FlowRecord;
    use std::collections::HashMap;
    use std::time::Duration;

    fn pass_segments(n: usize) -> Vec<Box<dyn DynSegment>> {
        (0..n)
            .map(|_| Box::new(Pass::from_config(&HashMap::new()).unwrap()) as Box<dyn DynSegment>)
            .collect()
    }

    #[tokio::test]
    async fn flows_are_conserved_in_order() {
        // 필터 없는 파이프라인은 플로우를 보존한다: 넣은 순서 그대로,
        // 정확히 한 번씩 출력에 나타난다
        let mut pipeline = Pipeline::new(pass_segments(3));
        let input = pipeline.input().unwrap();
        let mut output = pipeline.take_output().unwrap();
        pipeline.start();

        let feeder = tokio::spawn(async move {
            for i in 0..100u64 {
                let mut flow = FlowRecord::default();
                flow.bytes = i;
                input.send(flow).await.unwrap();
            }
        });

        for i in 0..100u64 {
            let flow = output.recv().await.unwrap();
            assert_eq!(flow.bytes, i, "flows must arrive in send order");
        }

        feeder.await.unwrap();
        pipeline.close().await;
        assert!(output.recv().await.is_none(), "output must be closed after close()");
    }

    #[tokio::test]
    async fn close_propagates_through_every_segment() {
        let mut pipeline = Pipeline::new(pass_segments(5));
        let input = pipeline.input().unwrap();
        let mut output = pipeline.take_output().unwrap();
        pipeline.start();

        input.send(FlowRecord::default()).await.unwrap();
        assert!(output.recv().await.is_some());

        drop(input);
        // 전체 close는 1초 안에 끝나야 한다 (데드락 없음)
        tokio::time::timeout(Duration::from_secs(1), pipeline.close())
            .await
            .expect("close wave must not deadlock");
        assert!(output.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut pipeline = Pipeline::new(pass_segments(2));
        pipeline.auto_drain();
        pipeline.start();
        pipeline.close().await;
        pipeline.close().await;
        assert!(pipeline.input().is_none());
    }

    #[tokio::test]
    async fn empty_pipeline_passes_through() {
        let mut pipeline = Pipeline::new(Vec::new());
        assert!(pipeline.is_empty());

        let input = pipeline.input().unwrap();
        let mut output = pipeline.take_output().unwrap();
        pipeline.start();

        let mut flow = FlowRecord::default();
        flow.bytes = 42;
        input.send(flow).await.unwrap();
        assert_eq!(output.recv().await.unwrap().bytes, 42);

        drop(input);
        pipeline.close().await;
    }

    #[tokio::test]
    async fn filter_drops_fan_into_one_channel() {
        // 필터 두 개의 드롭이 채널 하나로 합쳐진다
        let filters: Vec<Box<dyn DynSegment>> = vec![
            Box::new(FlowFilter::from_config(&option_map("filter", "proto udp")).unwrap()),
            Box::new(Pass::from_config(&HashMap::new()).unwrap()),
            Box::new(FlowFilter::from_config(&option_map("filter", "port 53")).unwrap()),
        ];
        let mut pipeline = Pipeline::new(filters);
        let input = pipeline.input().unwrap();
        let mut output = pipeline.take_output().unwrap();
        let mut drops = pipeline.subscribe_drops();
        pipeline.start();

        // udp:53 → 둘 다 통과, tcp → 첫 필터에서 드롭, udp:80 → 둘째에서 드롭
        let mut dns = udp_flow();
        dns.dst_port = 53;
        input.send(dns).await.unwrap();
        assert_eq!(output.recv().await.unwrap().dst_port, 53);

        input.send(tcp_flow()).await.unwrap();
        assert_eq!(drops.recv().await.unwrap().proto, 6);

        let mut other = udp_flow();
        other.dst_port = 80;
        other.src_port = 4000;
        input.send(other).await.unwrap();
        assert_eq!(drops.recv().await.unwrap().dst_port, 80);

        drop(input);
        pipeline.close().await;
        assert!(output.recv().await.is_none());
        assert!(drops.recv().await.is_none(), "drop channel closes with the filters");
    }

    #[tokio::test]
    async fn subscribe_drops_without_filters_closes_immediately() {
        let mut pipeline = Pipeline::new(pass_segments(2));
        let mut drops = pipeline.subscribe_drops();
        pipeline.start();
        assert!(drops.recv().await.is_none());
        pipeline.close().await;
    }

    #[tokio::test]
    async fn auto_drain_consumes_terminal_output() {
        let counter = Counter::from_config(&HashMap::new()).unwrap();
        let handle = counter.handle();
        let mut pipeline = Pipeline::new(vec![Box::new(counter) as Box<dyn DynSegment>]);
        let input = pipeline.input().unwrap();
        pipeline.start();
        pipeline.auto_drain();

        for _ in 0..10 {
            input.send(FlowRecord::default()).await.unwrap();
        }
        drop(input);
        pipeline.close().await;
        assert_eq!(handle.load(std::sync::atomic::Ordering::Relaxed), 10);
    }

    #[tokio::test]
    async fn send_n_close_yields_n_outputs_plus_drops() {
        // N개 전송 후 닫으면 출력+드롭 합계가 정확히 N이다
        let segments: Vec<Box<dyn DynSegment>> = vec![
            Box::new(FlowFilter::from_config(&option_map("filter", "proto udp")).unwrap()),
        ];
        let mut pipeline = Pipeline::new(segments);
        let input = pipeline.input().unwrap();
        let mut output = pipeline.take_output().unwrap();
        let mut drops = pipeline.subscribe_drops();
        pipeline.start();

        let feeder = tokio::spawn(async move {
            for i in 0..50 {
                let flow = if i % 2 == 0 { udp_flow() } else { tcp_flow() };
                input.send(flow).await.unwrap();
            }
        });

        let mut forwarded = 0;
        let mut dropped = 0;
        let mut output_open = true;
        let mut drops_open = true;
        while output_open || drops_open {
            tokio::select! {
                flow = output.recv(), if output_open => match flow {
                    Some(_) => forwarded += 1,
                    None => output_open = false,
                },
                flow = drops.recv(), if drops_open => match flow {
                    Some(_) => dropped += 1,
                    None => drops_open = false,
                },
            }
        }

        feeder.await.unwrap();
        pipeline.close().await;
        assert_eq!(forwarded, 25);
        assert_eq!(dropped, 25);
    }

    #[tokio::test]
    async fn discard_segment_sends_nothing_downstream() {
        let segments: Vec<Box<dyn DynSegment>> =
            vec![Box::new(Discard::from_config(&HashMap::new()).unwrap())];
        let mut pipeline = Pipeline::new(segments);
        let input = pipeline.input().unwrap();
        let mut output = pipeline.take_output().unwrap();
        pipeline.start();

        input.send(udp_flow()).await.unwrap();
        drop(input);
        pipeline.close().await;
        assert!(output.recv().await.is_none(), "discard must forward nothing");
    }

    fn option_map(key: &str, value: &str) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert(key.to_owned(), value.to_owned());
        map
    }
}
