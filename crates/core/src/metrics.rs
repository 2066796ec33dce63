//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 세그먼트는 이 상수를 사용하여 `metrics::counter!()`,
//! `metrics::gauge!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `flowgate_`
//! - 영역: `daemon_`, `filter_`, `toptalkers_`, `snmp_`
//! - 접미어: `_total` (counter), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 세그먼트 타입 레이블 키
pub const LABEL_SEGMENT: &str = "segment";

/// 트래픽 클래스 레이블 키
pub const LABEL_TRAFFIC_CLASS: &str = "traffic_class";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

// ─── Filter 메트릭 ──────────────────────────────────────────────────

/// 필터 세그먼트가 드롭 채널로 내보낸 플로우 수 (counter, label: segment)
pub const FILTER_FLOWS_DROPPED_TOTAL: &str = "flowgate_filter_flows_dropped_total";

// ─── Toptalkers 메트릭 ──────────────────────────────────────────────

/// Toptalkers: 세그먼트가 처리한 전체 플로우 수 (counter)
pub const TOPTALKERS_FLOWS_TOTAL: &str = "flowgate_toptalkers_flows_total";

/// Toptalkers: 매칭 파이프라인으로 보낸 플로우 수 (counter)
pub const TOPTALKERS_MATCHED_FLOWS_TOTAL: &str = "flowgate_toptalkers_matched_flows_total";

/// Toptalkers: 추적 중인 레코드 수 (gauge, label: traffic_class)
pub const TOPTALKERS_RECORDS: &str = "flowgate_toptalkers_records";

/// Toptalkers: 임계값을 넘은 레코드 수 (gauge, label: traffic_class)
pub const TOPTALKERS_RECORDS_ABOVE_THRESHOLD: &str =
    "flowgate_toptalkers_records_above_threshold";

/// Toptalkers: 클래스 합계 비트율 (gauge, label: traffic_class)
pub const TOPTALKERS_BITS_PER_SECOND: &str = "flowgate_toptalkers_bits_per_second";

/// Toptalkers: 클래스 합계 패킷율 (gauge, label: traffic_class)
pub const TOPTALKERS_PACKETS_PER_SECOND: &str = "flowgate_toptalkers_packets_per_second";

// ─── SNMP 메트릭 ────────────────────────────────────────────────────

/// SNMP: 수행한 질의 수 (counter, label: result)
pub const SNMP_QUERIES_TOTAL: &str = "flowgate_snmp_queries_total";

/// SNMP: 캐시 엔트리 수 (gauge)
pub const SNMP_CACHE_ENTRIES: &str = "flowgate_snmp_cache_entries";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "flowgate_daemon_uptime_seconds";

/// Daemon: 실행 중인 파이프라인 레플리카 수 (gauge)
pub const DAEMON_PIPELINES_RUNNING: &str = "flowgate_daemon_pipelines_running";

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "flowgate_daemon_build_info";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// Prometheus HELP 텍스트를 설정합니다. 전역 레코더 설치 후 한 번만
/// 호출해야 하며, 일반적으로 `flowgate-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(
        FILTER_FLOWS_DROPPED_TOTAL,
        "Flows emitted on the drop channel by filter segments"
    );

    describe_counter!(
        TOPTALKERS_FLOWS_TOTAL,
        "Total number of flows processed by the toptalkers segment"
    );
    describe_counter!(
        TOPTALKERS_MATCHED_FLOWS_TOTAL,
        "Flows routed into the toptalkers matching pipeline"
    );
    describe_gauge!(
        TOPTALKERS_RECORDS,
        "Number of sliding-window records currently tracked per traffic class"
    );
    describe_gauge!(
        TOPTALKERS_RECORDS_ABOVE_THRESHOLD,
        "Number of records currently above their configured rate thresholds"
    );
    describe_gauge!(
        TOPTALKERS_BITS_PER_SECOND,
        "Aggregate rolling bit rate per traffic class"
    );
    describe_gauge!(
        TOPTALKERS_PACKETS_PER_SECOND,
        "Aggregate rolling packet rate per traffic class"
    );

    describe_counter!(SNMP_QUERIES_TOTAL, "SNMP interface queries performed");
    describe_gauge!(SNMP_CACHE_ENTRIES, "Entries in the SNMP interface cache");

    describe_gauge!(DAEMON_UPTIME_SECONDS, "Flowgate daemon uptime in seconds");
    describe_gauge!(
        DAEMON_PIPELINES_RUNNING,
        "Number of pipeline replicas currently running"
    );
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        FILTER_FLOWS_DROPPED_TOTAL,
        TOPTALKERS_FLOWS_TOTAL,
        TOPTALKERS_MATCHED_FLOWS_TOTAL,
        TOPTALKERS_RECORDS,
        TOPTALKERS_RECORDS_ABOVE_THRESHOLD,
        TOPTALKERS_BITS_PER_SECOND,
        TOPTALKERS_PACKETS_PER_SECOND,
        SNMP_QUERIES_TOTAL,
        SNMP_CACHE_ENTRIES,
        DAEMON_UPTIME_SECONDS,
        DAEMON_PIPELINES_RUNNING,
        DAEMON_BUILD_INFO,
    ];

    #[test]
    fn all_metrics_start_with_flowgate_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("flowgate_"),
                "Metric '{}' does not start with 'flowgate_' prefix",
                name
            );
        }
    }

    #[test]
    fn counters_end_with_total() {
        for name in ALL_METRIC_NAMES.iter().filter(|n| n.contains("_total")) {
            assert!(name.ends_with("_total"), "Counter '{}' must end in _total", name);
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        // 레코더가 설치되지 않아도 describe_all()은 panic하지 않아야 한다
        describe_all();
    }

    #[test]
    fn label_keys_are_lowercase() {
        for label in [LABEL_SEGMENT, LABEL_TRAFFIC_CLASS, LABEL_RESULT] {
            assert_eq!(label.to_lowercase(), label);
        }
    }
}
