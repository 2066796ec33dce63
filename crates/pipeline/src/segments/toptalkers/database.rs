//! 슬라이딩 윈도우 집계 — 키별 버킷 링과 임계값 판정
//!
//! 트래픽 클래스 하나당 [`Database`] 하나가 있고, 그 안에 집계 키
//! (평가 모드에 따라 출발지/목적지 주소 또는 연결)별로 [`Record`]가
//! 하나씩 생깁니다. 레코드는 B개의 버킷 링으로, 시계 태스크가 버킷
//! 주기마다 링을 회전시키면서 가장 오래된 버킷을 비우고 임계 윈도우에
//! 대한 평균 비트율/패킷율을 다시 계산합니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use flowgate_core::config::{EvaluationMode, ThresholdMetricDecl};
use flowgate_core::flow::FlowRecord;
use flowgate_core::metrics as m;

/// 기본 버킷 수
pub const DEFAULT_BUCKETS: usize = 60;
/// 기본 버킷 길이
pub const DEFAULT_BUCKET_DURATION: Duration = Duration::from_secs(1);

/// 트래픽 클래스 하나의 윈도우/임계값 파라미터
#[derive(Debug, Clone)]
pub struct WindowParams {
    /// 트래픽 클래스 레이블 (메트릭 차원)
    pub traffic_type: String,
    /// 링의 버킷 수
    pub buckets: usize,
    /// 임계값 판정에 쓰는 최근 완결 버킷 수
    pub threshold_buckets: usize,
    /// 보고 평균에 쓰는 최근 완결 버킷 수
    pub report_buckets: usize,
    /// 버킷 하나의 길이
    pub bucket_duration: Duration,
    /// bit/s 임계값 (0 = 모든 트래픽이 초과)
    pub threshold_bps: u64,
    /// packet/s 임계값
    pub threshold_pps: u64,
    /// 집계 키 결정 방식
    pub evaluation_mode: EvaluationMode,
}

impl WindowParams {
    /// 선언으로부터 파라미터를 만들고 기본값을 채웁니다.
    pub fn from_decl(decl: &ThresholdMetricDecl, default_mode: EvaluationMode) -> Self {
        let buckets = decl.buckets.unwrap_or(DEFAULT_BUCKETS).max(2);
        Self {
            traffic_type: decl.traffic_type.clone(),
            buckets,
            threshold_buckets: decl.threshold_buckets.unwrap_or(buckets).clamp(1, buckets),
            report_buckets: decl.report_buckets.unwrap_or(buckets).clamp(1, buckets),
            bucket_duration: Duration::from_secs(decl.bucket_duration_secs.unwrap_or(1).max(1)),
            threshold_bps: decl.threshold_bps,
            threshold_pps: decl.threshold_pps,
            evaluation_mode: decl.evaluation_mode.unwrap_or(default_mode),
        }
    }

    /// 전체 윈도우 길이. 이 시간 동안 업데이트가 없는 레코드는
    /// 정리 대상입니다.
    pub fn window(&self) -> Duration {
        self.bucket_duration * self.buckets as u32
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    bytes: u64,
    packets: u64,
    bytes_forwarded: u64,
    packets_forwarded: u64,
}

struct RecordInner {
    buckets: Vec<Bucket>,
    head: usize,
    last_update: Instant,
}

/// 집계 키 하나의 슬라이딩 윈도우 레코드
///
/// `above_threshold`는 시계 태스크가 회전 시점마다 다시 계산합니다.
/// 플로우 처리 경로는 이 플래그를 원자적으로 읽기만 합니다.
pub struct Record {
    above_threshold: AtomicBool,
    inner: Mutex<RecordInner>,
}

impl Record {
    fn new(buckets: usize) -> Self {
        Self {
            above_threshold: AtomicBool::new(false),
            inner: Mutex::new(RecordInner {
                buckets: vec![Bucket::default(); buckets],
                head: 0,
                last_update: Instant::now(),
            }),
        }
    }

    /// 현재 버킷에 플로우의 카운트를 더합니다.
    pub fn append(&self, flow: &FlowRecord) {
        let mut inner = self.inner.lock().expect("record lock poisoned");
        let head = inner.head;
        let bucket = &mut inner.buckets[head];
        bucket.bytes += flow.bytes;
        bucket.packets += flow.packets;
        if flow.is_forwarded() {
            bucket.bytes_forwarded += flow.bytes;
            bucket.packets_forwarded += flow.packets;
        }
        inner.last_update = Instant::now();
    }

    /// 현재 임계값 초과 여부
    pub fn above_threshold(&self) -> bool {
        self.above_threshold.load(Ordering::Relaxed)
    }

    /// 링을 한 칸 회전시키고 임계값 판정을 갱신합니다.
    ///
    /// 임계 윈도우에 대한 (bit/s, packet/s)를 반환합니다.
    fn rotate(&self, params: &WindowParams) -> (f64, f64) {
        let mut inner = self.inner.lock().expect("record lock poisoned");
        inner.head = (inner.head + 1) % inner.buckets.len();
        let head = inner.head;
        inner.buckets[head] = Bucket::default();
        let (bps, pps) = rates_over(&inner, params.threshold_buckets, params.bucket_duration);
        drop(inner);
        let above = bps > params.threshold_bps as f64 || pps > params.threshold_pps as f64;
        self.above_threshold.store(above, Ordering::Relaxed);
        (bps, pps)
    }

    /// 모든 버킷의 (바이트, 패킷) 합계
    pub fn totals(&self) -> (u64, u64) {
        let inner = self.inner.lock().expect("record lock poisoned");
        inner
            .buckets
            .iter()
            .fold((0, 0), |(b, p), bucket| (b + bucket.bytes, p + bucket.packets))
    }

    /// 보고 윈도우에 대한 (bit/s, packet/s)
    fn report_rates(&self, params: &WindowParams) -> (f64, f64) {
        let inner = self.inner.lock().expect("record lock poisoned");
        rates_over(&inner, params.report_buckets, params.bucket_duration)
    }

    fn idle_for(&self) -> Duration {
        self.inner
            .lock()
            .expect("record lock poisoned")
            .last_update
            .elapsed()
    }
}

/// 현재 버킷을 제외한 직전 `buckets`개에 대한 평균 (bit/s, packet/s)
fn rates_over(inner: &RecordInner, buckets: usize, bucket_duration: Duration) -> (f64, f64) {
    let len = inner.buckets.len();
    let n = buckets.min(len.saturating_sub(1));
    if n == 0 {
        return (0.0, 0.0);
    }
    let mut bytes = 0u64;
    let mut packets = 0u64;
    for offset in 1..=n {
        let idx = (inner.head + len - offset) % len;
        bytes += inner.buckets[idx].bytes;
        packets += inner.buckets[idx].packets;
    }
    let secs = n as f64 * bucket_duration.as_secs_f64();
    ((bytes as f64 * 8.0) / secs, packets as f64 / secs)
}

/// flowdata 보고에 쓰이는 레코드 요약 한 줄
pub struct RecordReport {
    /// 집계 키 (주소 또는 연결)
    pub key: String,
    /// 보고 윈도우 평균 bit/s
    pub bits_per_second: f64,
    /// 보고 윈도우 평균 packet/s
    pub packets_per_second: f64,
    /// 임계값 초과 여부
    pub above_threshold: bool,
}

/// 트래픽 클래스 하나의 키별 레코드 저장소
pub struct Database {
    params: WindowParams,
    records: Mutex<HashMap<String, Arc<Record>>>,
}

impl Database {
    /// 파라미터로 빈 데이터베이스를 만듭니다.
    pub fn new(params: WindowParams) -> Self {
        Self {
            params,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// 윈도우 파라미터
    pub fn params(&self) -> &WindowParams {
        &self.params
    }

    /// 키의 레코드에 플로우를 더합니다. 처음 보는 키면 레코드를 만듭니다.
    pub fn append(&self, key: &str, flow: &FlowRecord) {
        let record = {
            let mut records = self.records.lock().expect("database lock poisoned");
            Arc::clone(
                records
                    .entry(key.to_owned())
                    .or_insert_with(|| Arc::new(Record::new(self.params.buckets))),
            )
        };
        record.append(flow);
    }

    /// 키의 레코드가 임계값을 넘었는지 확인합니다. 모르는 키는 false입니다.
    pub fn above_threshold(&self, key: &str) -> bool {
        self.records
            .lock()
            .expect("database lock poisoned")
            .get(key)
            .is_some_and(|record| record.above_threshold())
    }

    /// 추적 중인 레코드 수
    pub fn len(&self) -> usize {
        self.records.lock().expect("database lock poisoned").len()
    }

    /// 레코드가 없으면 true
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 모든 레코드의 링을 한 칸 회전시키고 클래스 게이지를 갱신합니다.
    ///
    /// 시계 태스크가 버킷 주기마다 호출합니다.
    pub fn rotate_once(&self) {
        let records: Vec<Arc<Record>> = {
            let records = self.records.lock().expect("database lock poisoned");
            records.values().cloned().collect()
        };
        let mut total_bps = 0.0;
        let mut total_pps = 0.0;
        let mut above = 0usize;
        for record in &records {
            let (bps, pps) = record.rotate(&self.params);
            total_bps += bps;
            total_pps += pps;
            if record.above_threshold() {
                above += 1;
            }
        }

        let class = self.params.traffic_type.clone();
        metrics::gauge!(m::TOPTALKERS_RECORDS, m::LABEL_TRAFFIC_CLASS => class.clone())
            .set(records.len() as f64);
        metrics::gauge!(
            m::TOPTALKERS_RECORDS_ABOVE_THRESHOLD,
            m::LABEL_TRAFFIC_CLASS => class.clone()
        )
        .set(above as f64);
        metrics::gauge!(m::TOPTALKERS_BITS_PER_SECOND, m::LABEL_TRAFFIC_CLASS => class.clone())
            .set(total_bps);
        metrics::gauge!(m::TOPTALKERS_PACKETS_PER_SECOND, m::LABEL_TRAFFIC_CLASS => class)
            .set(total_pps);
    }

    /// 윈도우 길이보다 오래 업데이트가 없던 레코드를 제거합니다.
    pub fn evict_stale(&self) {
        let window = self.params.window();
        let mut records = self.records.lock().expect("database lock poisoned");
        let before = records.len();
        records.retain(|_, record| record.idle_for() <= window);
        let evicted = before - records.len();
        if evicted > 0 {
            tracing::debug!(
                traffic_class = %self.params.traffic_type,
                evicted,
                "evicted stale toptalker records"
            );
        }
    }

    /// 보고 윈도우 기준 레코드 요약, bit/s 내림차순
    pub fn snapshot(&self) -> Vec<RecordReport> {
        let records = self.records.lock().expect("database lock poisoned");
        let mut reports: Vec<RecordReport> = records
            .iter()
            .map(|(key, record)| {
                let (bps, pps) = record.report_rates(&self.params);
                RecordReport {
                    key: key.clone(),
                    bits_per_second: bps,
                    packets_per_second: pps,
                    above_threshold: record.above_threshold(),
                }
            })
            .collect();
        reports.sort_by(|a, b| {
            b.bits_per_second
                .partial_cmp(&a.bits_per_second)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        reports
    }
}
