//! `snmp` 세그먼트 — 라우터 SNMP 질의로 인터페이스 정보를 보강합니다.
//!
//! `sampler_address`의 라우터에 플로우의 유입/유출 인터페이스 인덱스로
//! 질의하여 `{src,dst}_if_name`, `{src,dst}_if_desc`, `{src,dst}_if_speed`
//! 필드를 채웁니다. 라우터에 부하를 주지 않고 파이프라인을 지연시키지
//! 않기 위해:
//!
//! - 질의 응답을 기다리지 않습니다. 새 인터페이스의 첫 플로우는 보강
//!   없이 그대로 전달되고, 백그라운드 질의가 끝나면 이후의 플로우가
//!   캐시에서 보강됩니다. (`synchronous` 옵션으로 바꿀 수 있으며, 이는
//!   소규모 환경의 디버깅용입니다.)
//! - 동시 질의 수는 `connlimit`개의 세마포어로 제한됩니다.
//! - 캐시 항목은 `cache_interval`(기본 1h) 뒤에 만료되어, 그 시점의
//!   플로우 하나가 다시 보강 없이 지나가면서 재질의를 유발합니다.
//! - 실패한 질의는 "질의 진행 중" 표시를 지워서 다음 플로우가 재시도하게
//!   합니다.
//!
//! `regex` 옵션의 첫 캡처 그룹으로 설명 문자열을 정리할 수 있습니다.
//! 예를 들어 설명이 `customerid - blablabla` 형식이라면 `(.*) -.*`가
//! 고객 ID만 남깁니다.

pub(crate) mod cache;
pub mod source;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use tokio::sync::Semaphore;

use flowgate_core::error::SegmentError;
use flowgate_core::metrics as m;
use flowgate_core::segment::{FlowReceiver, FlowSender, Segment, SegmentLink};

use cache::TtlCache;
use source::{IfaceAttr, IfaceValue, InterfaceSource, SnmpSource};

/// 설정에서 쓰이는 세그먼트 타입 이름
pub const NAME: &str = "snmp";

const DEFAULT_CONN_LIMIT: usize = 16;
const DEFAULT_CACHE_INTERVAL: Duration = Duration::from_secs(3600);
const DEFAULT_CLEAN_REGEX: &str = "^(.*)$";

type CacheKey = (IpAddr, u32, IfaceAttr);
type SharedCache = Arc<Mutex<TtlCache<CacheKey, Option<IfaceValue>>>>;

/// SNMP 인터페이스 보강 세그먼트
pub struct Snmp {
    link: SegmentLink,
    synchronous: bool,
    clean_regex: Regex,
    cache: SharedCache,
    semaphore: Arc<Semaphore>,
    source: Arc<dyn InterfaceSource>,
}

impl Snmp {
    /// 옵션:
    /// - `community` — SNMPv2c 커뮤니티 (기본 `public`)
    /// - `connlimit` — 동시 질의 제한 (기본 16, 0은 허용되지 않음)
    /// - `synchronous` — 질의 응답을 기다릴지 여부 (기본 false)
    /// - `cache_interval` — 캐시 유지 시간, `90s`/`30m`/`1h` 형식 (기본 1h)
    /// - `regex` — 설명 정리에 쓸 정규식 (기본 `^(.*)$`)
    pub fn from_config(config: &HashMap<String, String>) -> Result<Self, SegmentError> {
        let conn_limit = match config.get("connlimit").map(String::as_str) {
            None | Some("") => {
                tracing::info!("snmp: 'connlimit' set to default '{DEFAULT_CONN_LIMIT}'");
                DEFAULT_CONN_LIMIT
            }
            Some(raw) => match raw.parse::<usize>() {
                Ok(0) => {
                    return Err(SegmentError::InvalidOption {
                        segment: NAME,
                        option: "connlimit",
                        reason: "limiting connections to 0 will not work, use a higher value"
                            .to_owned(),
                    });
                }
                Ok(limit) => limit,
                Err(_) => {
                    tracing::error!(
                        "snmp: could not parse 'connlimit' parameter, using default {DEFAULT_CONN_LIMIT}"
                    );
                    DEFAULT_CONN_LIMIT
                }
            },
        };

        let synchronous = match config.get("synchronous").map(String::as_str) {
            None | Some("") => false,
            Some(raw) => match raw.parse::<bool>() {
                Ok(true) => {
                    tracing::warn!(
                        "snmp: synchronous set to true, only recommended for small setups and testing"
                    );
                    true
                }
                Ok(false) => false,
                Err(_) => {
                    tracing::warn!(
                        value = %raw,
                        "snmp: failed to parse 'synchronous' bool, using default false"
                    );
                    false
                }
            },
        };

        let cache_interval = match config.get("cache_interval").map(String::as_str) {
            None | Some("") => {
                tracing::info!("snmp: 'cache_interval' set to default '1h'");
                DEFAULT_CACHE_INTERVAL
            }
            Some(raw) => match parse_duration(raw) {
                Some(interval) if !interval.is_zero() => {
                    tracing::info!(cache_interval = %raw, "snmp: cache_interval configured");
                    interval
                }
                _ => {
                    tracing::warn!(
                        value = %raw,
                        "snmp: bad configuration of cache_interval, set to default '1h'"
                    );
                    DEFAULT_CACHE_INTERVAL
                }
            },
        };

        let community = match config.get("community").map(String::as_str) {
            None | Some("") => {
                tracing::info!("snmp: 'community' set to default 'public'");
                "public".to_owned()
            }
            Some(community) => community.to_owned(),
        };

        let raw_regex = match config.get("regex").map(String::as_str) {
            None | Some("") => {
                tracing::info!("snmp: 'regex' set to default '{DEFAULT_CLEAN_REGEX}'");
                DEFAULT_CLEAN_REGEX
            }
            Some(raw) => raw,
        };
        let clean_regex = Regex::new(raw_regex).map_err(|e| SegmentError::InitFailed {
            segment: NAME,
            reason: format!("regex does not compile: {e}"),
        })?;

        Ok(Self {
            link: SegmentLink::default(),
            synchronous,
            clean_regex,
            cache: Arc::new(Mutex::new(TtlCache::new(cache_interval))),
            semaphore: Arc::new(Semaphore::new(conn_limit)),
            source: Arc::new(SnmpSource::new(community)),
        })
    }

    /// 질의 백엔드를 교체합니다. 테스트에서 mock을 주입할 때 사용합니다.
    pub fn with_source(mut self, source: Arc<dyn InterfaceSource>) -> Self {
        self.source = source;
        self
    }

    /// 인터페이스의 (이름, 설명, 속도)를 캐시 또는 라우터에서 가져옵니다.
    ///
    /// 캐시 미스는 질의를 시작만 하고 빈 값을 반환하므로, 새 인터페이스의
    /// 첫 플로우는 절대 지연되지 않습니다. 어느 속성이든 질의가 진행 중
    /// (`Some(None)`)이면 즉시 빈 값을 반환합니다.
    async fn fetch_interface_data(&self, router: IpAddr, ifindex: u32) -> (String, String, u64) {
        let mut name = String::new();
        let mut desc = String::new();
        let mut speed = 0u64;

        for attr in IfaceAttr::ALL {
            let key = (router, ifindex, attr);
            let cached = {
                let mut cache = self.cache.lock().expect("snmp cache lock poisoned");
                cache.get(&key).cloned()
            };
            match cached {
                Some(Some(value)) => apply_value(attr, value, &mut name, &mut desc, &mut speed),
                // 다른 태스크가 이 인터페이스를 질의하는 중
                Some(None) => return (String::new(), String::new(), 0),
                None => {
                    if self.synchronous {
                        query_and_store(
                            Arc::clone(&self.source),
                            Arc::clone(&self.semaphore),
                            Arc::clone(&self.cache),
                            key,
                        )
                        .await;
                        let refreshed = {
                            let mut cache =
                                self.cache.lock().expect("snmp cache lock poisoned");
                            cache.get(&key).cloned()
                        };
                        match refreshed {
                            Some(Some(value)) => {
                                apply_value(attr, value, &mut name, &mut desc, &mut speed);
                            }
                            _ => return (String::new(), String::new(), 0),
                        }
                    } else {
                        // "질의 진행 중"을 표시해 두고 백그라운드로 질의한다.
                        // 이번 플로우의 해당 필드는 비워 둔다.
                        self.cache
                            .lock()
                            .expect("snmp cache lock poisoned")
                            .insert(key, None);
                        tokio::spawn(query_and_store(
                            Arc::clone(&self.source),
                            Arc::clone(&self.semaphore),
                            Arc::clone(&self.cache),
                            key,
                        ));
                    }
                }
            }
        }
        (name, desc, speed)
    }

    /// 정규식의 첫 캡처 그룹으로 설명을 정리합니다.
    fn clean_description(&self, desc: String) -> String {
        if desc.is_empty() {
            return desc;
        }
        let cleaned = self
            .clean_regex
            .captures(&desc)
            .and_then(|caps| caps.get(1))
            .map(|group| group.as_str().to_owned());
        cleaned.unwrap_or(desc)
    }
}

fn apply_value(attr: IfaceAttr, value: IfaceValue, name: &mut String, desc: &mut String, speed: &mut u64) {
    match (attr, value) {
        (IfaceAttr::Name, IfaceValue::Text(text)) => *name = text,
        (IfaceAttr::Desc, IfaceValue::Text(text)) => *desc = text,
        (IfaceAttr::Speed, IfaceValue::Speed(value)) => *speed = value,
        (attr, value) => {
            tracing::warn!(attr = attr.label(), ?value, "snmp: mismatched cached value type");
        }
    }
}

/// 질의 하나를 수행하고 결과를 캐시에 넣습니다. 세마포어로 동시 질의
/// 수를 제한하며, 실패하면 "질의 진행 중" 표시를 지워 재시도를 허용합니다.
async fn query_and_store(
    source: Arc<dyn InterfaceSource>,
    semaphore: Arc<Semaphore>,
    cache: SharedCache,
    key: CacheKey,
) {
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return;
    };
    let (router, ifindex, attr) = key;
    match source.fetch(router, ifindex, attr).await {
        Ok(value) => {
            metrics::counter!(m::SNMP_QUERIES_TOTAL, m::LABEL_RESULT => "success").increment(1);
            let mut cache = cache.lock().expect("snmp cache lock poisoned");
            cache.insert(key, Some(value));
            metrics::gauge!(m::SNMP_CACHE_ENTRIES).set(cache.len() as f64);
        }
        Err(e) => {
            metrics::counter!(m::SNMP_QUERIES_TOTAL, m::LABEL_RESULT => "failure").increment(1);
            tracing::warn!(
                router = %router,
                ifindex,
                attr = attr.label(),
                error = %e,
                "snmp: query failed"
            );
            let mut cache = cache.lock().expect("snmp cache lock poisoned");
            cache.remove(&key);
            metrics::gauge!(m::SNMP_CACHE_ENTRIES).set(cache.len() as f64);
        }
    }
}

/// `90s`/`30m`/`1h`/`250ms` 또는 초 단위 숫자를 파싱합니다.
fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Some(num) = value.strip_suffix("ms") {
        return num.parse().ok().map(Duration::from_millis);
    }
    if let Some(num) = value.strip_suffix('h') {
        return num.parse::<u64>().ok().map(|n| Duration::from_secs(n * 3600));
    }
    if let Some(num) = value.strip_suffix('m') {
        return num.parse::<u64>().ok().map(|n| Duration::from_secs(n * 60));
    }
    if let Some(num) = value.strip_suffix('s') {
        return num.parse().ok().map(Duration::from_secs);
    }
    value.parse().ok().map(Duration::from_secs)
}

impl Segment for Snmp {
    fn rewire(&mut self, input: FlowReceiver, output: FlowSender) {
        self.link.attach(input, output);
    }

    async fn run(&mut self) {
        let Some((mut rx, tx)) = self.link.take() else {
            tracing::error!("snmp: run called before rewire");
            return;
        };
        while let Some(mut flow) = rx.recv().await {
            let router = flow.sampler_address;
            if flow.in_if > 0 {
                let (name, desc, speed) = self.fetch_interface_data(router, flow.in_if).await;
                flow.src_if_name = name;
                flow.src_if_desc = self.clean_description(desc);
                flow.src_if_speed = speed;
            }
            if flow.out_if > 0 {
                let (name, desc, speed) = self.fetch_interface_data(router, flow.out_if).await;
                flow.dst_if_name = name;
                flow.dst_if_desc = self.clean_description(desc);
                flow.dst_if_speed = speed;
            }
            if tx.send(flow).await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::source::QueryError;
    use super::*;
    use flowgate_core::flow::FlowRecord;
    use flowgate_core::segment::{flow_channel, BoxFuture};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 동시성과 호출 수를 기록하는 mock 백엔드
    struct MockSource {
        delay: Duration,
        fail: bool,
        calls: AtomicUsize,
        current: AtomicUsize,
        max_concurrent: AtomicUsize,
    }

    impl MockSource {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                fail: false,
                calls: AtomicUsize::new(0),
                current: AtomicUsize::new(0),
                max_concurrent: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                delay: Duration::from_millis(1),
                fail: true,
                calls: AtomicUsize::new(0),
                current: AtomicUsize::new(0),
                max_concurrent: AtomicUsize::new(0),
            })
        }
    }

    impl InterfaceSource for Arc<MockSource> {
        fn fetch(
            &self,
            _router: IpAddr,
            ifindex: u32,
            attr: IfaceAttr,
        ) -> BoxFuture<'static, Result<IfaceValue, QueryError>> {
            let mock = Arc::clone(self);
            Box::pin(async move {
                mock.calls.fetch_add(1, Ordering::SeqCst);
                let now = mock.current.fetch_add(1, Ordering::SeqCst) + 1;
                mock.max_concurrent.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(mock.delay).await;
                mock.current.fetch_sub(1, Ordering::SeqCst);
                if mock.fail {
                    return Err(QueryError("mock failure".to_owned()));
                }
                Ok(match attr {
                    IfaceAttr::Name => IfaceValue::Text(format!("eth{ifindex}")),
                    IfaceAttr::Desc => IfaceValue::Text(format!("customer{ifindex} - uplink")),
                    IfaceAttr::Speed => IfaceValue::Speed(10_000),
                })
            })
        }
    }

    fn options(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn test_flow(in_if: u32) -> FlowRecord {
        FlowRecord {
            sampler_address: "192.0.2.254".parse().unwrap(),
            in_if,
            ..Default::default()
        }
    }

    #[test]
    fn connlimit_zero_is_rejected() {
        let result = Snmp::from_config(&options(&[("connlimit", "0")]));
        assert!(matches!(result, Err(SegmentError::InvalidOption { .. })));
    }

    #[test]
    fn bad_regex_is_rejected() {
        let result = Snmp::from_config(&options(&[("regex", "(unclosed")]));
        assert!(matches!(result, Err(SegmentError::InitFailed { .. })));
    }

    #[test]
    fn unparsable_connlimit_falls_back_to_default() {
        let segment = Snmp::from_config(&options(&[("connlimit", "many")])).unwrap();
        assert_eq!(segment.semaphore.available_permits(), DEFAULT_CONN_LIMIT);
    }

    #[test]
    fn parse_duration_formats() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("30m"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("42"), Some(Duration::from_secs(42)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[tokio::test]
    async fn first_flow_is_never_blocked_later_flows_are_enriched() {
        let mock = MockSource::new(Duration::from_millis(10));
        let mut segment = Snmp::from_config(&options(&[("regex", "^(.*) -.*$")]))
            .unwrap()
            .with_source(Arc::new(Arc::clone(&mock)));

        let (in_tx, in_rx) = flow_channel();
        let (out_tx, mut out_rx) = flow_channel();
        segment.rewire(in_rx, out_tx);
        let task = tokio::spawn(async move { segment.run().await });

        // 첫 플로우는 즉시, 보강 없이 나온다
        in_tx.send(test_flow(1)).await.unwrap();
        let first = out_rx.recv().await.unwrap();
        assert_eq!(first.src_if_name, "");
        assert_eq!(first.src_if_speed, 0);

        // 백그라운드 질의가 끝난 뒤의 플로우는 캐시에서 보강된다
        tokio::time::sleep(Duration::from_millis(80)).await;
        in_tx.send(test_flow(1)).await.unwrap();
        let second = out_rx.recv().await.unwrap();
        assert_eq!(second.src_if_name, "eth1");
        assert_eq!(second.src_if_desc, "customer1", "regex keeps the first capture group");
        assert_eq!(second.src_if_speed, 10_000);

        drop(in_tx);
        task.await.unwrap();
        assert_eq!(mock.calls.load(Ordering::SeqCst), 3, "one query per attribute");
    }

    #[tokio::test]
    async fn synchronous_mode_enriches_the_first_flow() {
        let mock = MockSource::new(Duration::from_millis(1));
        let mut segment = Snmp::from_config(&options(&[("synchronous", "true")]))
            .unwrap()
            .with_source(Arc::new(Arc::clone(&mock)));

        let (in_tx, in_rx) = flow_channel();
        let (out_tx, mut out_rx) = flow_channel();
        segment.rewire(in_rx, out_tx);
        let task = tokio::spawn(async move { segment.run().await });

        in_tx.send(test_flow(2)).await.unwrap();
        let flow = out_rx.recv().await.unwrap();
        assert_eq!(flow.src_if_name, "eth2");
        assert_eq!(flow.src_if_desc, "customer2 - uplink", "default regex keeps everything");
        assert_eq!(flow.src_if_speed, 10_000);

        drop(in_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_queries_respect_the_connection_limit() {
        let mock = MockSource::new(Duration::from_millis(20));
        let mut segment = Snmp::from_config(&options(&[("connlimit", "2")]))
            .unwrap()
            .with_source(Arc::new(Arc::clone(&mock)));

        let (in_tx, in_rx) = flow_channel();
        let (out_tx, mut out_rx) = flow_channel();
        segment.rewire(in_rx, out_tx);
        let task = tokio::spawn(async move { segment.run().await });

        // 서로 다른 인터페이스 4개 → 12개의 질의가 시작된다
        for ifindex in 1..=4 {
            in_tx.send(test_flow(ifindex)).await.unwrap();
            assert!(out_rx.recv().await.is_some());
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(mock.calls.load(Ordering::SeqCst), 12);
        assert!(
            mock.max_concurrent.load(Ordering::SeqCst) <= 2,
            "at most connlimit queries may be in flight, saw {}",
            mock.max_concurrent.load(Ordering::SeqCst)
        );

        drop(in_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn failed_queries_clear_the_placeholder_for_retry() {
        let mock = MockSource::failing();
        let mut segment = Snmp::from_config(&HashMap::new())
            .unwrap()
            .with_source(Arc::new(Arc::clone(&mock)));

        let (in_tx, in_rx) = flow_channel();
        let (out_tx, mut out_rx) = flow_channel();
        segment.rewire(in_rx, out_tx);
        let task = tokio::spawn(async move { segment.run().await });

        in_tx.send(test_flow(1)).await.unwrap();
        assert_eq!(out_rx.recv().await.unwrap().src_if_name, "");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let after_first = mock.calls.load(Ordering::SeqCst);
        assert_eq!(after_first, 3);

        // 실패가 표시를 지웠으므로 다음 플로우가 재질의를 유발한다
        in_tx.send(test_flow(1)).await.unwrap();
        assert_eq!(out_rx.recv().await.unwrap().src_if_name, "");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mock.calls.load(Ordering::SeqCst), 6);

        drop(in_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn flows_without_interfaces_are_untouched() {
        let mock = MockSource::new(Duration::from_millis(1));
        let mut segment = Snmp::from_config(&HashMap::new())
            .unwrap()
            .with_source(Arc::new(Arc::clone(&mock)));

        let (in_tx, in_rx) = flow_channel();
        let (out_tx, mut out_rx) = flow_channel();
        segment.rewire(in_rx, out_tx);
        let task = tokio::spawn(async move { segment.run().await });

        in_tx.send(test_flow(0)).await.unwrap();
        assert!(out_rx.recv().await.is_some());
        drop(in_tx);
        task.await.unwrap();
        assert_eq!(mock.calls.load(Ordering::SeqCst), 0, "no interface, no query");
    }
}
