//! 설정 모델 — 파이프라인 선언과 변수 확장
//!
//! 파이프라인 설정은 세그먼트 선언([`SegmentDecl`])의 YAML 시퀀스 하나로
//! 이루어집니다. 기동 시 한 번 파싱되며 이후에는 불변입니다.
//!
//! ```yaml
//! - segment: flowfilter
//!   config:
//!     filter: "proto udp"
//! - segment: branch
//!   if:
//!     - segment: flowfilter
//!       config: { filter: "port 53" }
//!   then:
//!     - segment: count
//!       config: { prefix: "dns=" }
//!   else:
//!     - segment: pass
//! ```
//!
//! 옵션 값의 변수 확장은 두 단계로 시도합니다:
//! 1. `$N` 토큰을 N번째 비플래그 명령행 인자로 치환 (`$1`이 첫 인자)
//! 2. 1단계 결과가 비었고 원본이 비어 있지 않았다면 환경 변수로 재확장
//!
//! 같은 설정 파일이 위치 인자와 환경 변수 어느 쪽으로도 매개변수화될 수
//! 있으며, 위치 인자가 우선합니다.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::ConfigError;

/// 하나의 세그먼트 선언
///
/// `if`/`then`/`else`는 branch 세그먼트만, `definitions`와
/// `matching_pipeline`은 traffic_specific_toptalkers 세그먼트만 사용합니다.
/// 다른 세그먼트는 해당 키를 무시합니다.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SegmentDecl {
    /// 레지스트리에서 조회할 세그먼트 타입 이름
    #[serde(rename = "segment")]
    pub name: String,

    /// 평평한 문자열 → 문자열 옵션. 세그먼트가 인식하지 못하는 키는
    /// 무시됩니다(전방 호환). 숫자/불리언 스칼라는 문자열로 읽습니다.
    #[serde(default, deserialize_with = "string_map")]
    pub config: HashMap<String, String>,

    /// branch: 조건 서브파이프라인 선언
    #[serde(default, rename = "if")]
    pub if_branch: Vec<SegmentDecl>,

    /// branch: then 서브파이프라인 선언
    #[serde(default)]
    pub then: Vec<SegmentDecl>,

    /// branch: else 서브파이프라인 선언
    #[serde(default, rename = "else")]
    pub else_branch: Vec<SegmentDecl>,

    /// toptalkers: 임계 메트릭 정의 트리
    #[serde(default)]
    pub definitions: Vec<ThresholdMetricDecl>,

    /// toptalkers: 매칭 서브파이프라인 선언
    #[serde(default)]
    pub matching_pipeline: Vec<SegmentDecl>,
}

impl SegmentDecl {
    /// 모든 옵션 값에 변수 확장을 적용한 사본을 반환합니다.
    ///
    /// `args`는 비플래그 명령행 인자 목록이며 `$1`이 `args[0]`에
    /// 대응합니다. 위치 인자 확장이 빈 문자열을 내고 원본 값이 비어 있지
    /// 않았다면 환경 변수 확장으로 재시도합니다.
    pub fn expanded_config(&self, args: &[String]) -> HashMap<String, String> {
        self.config
            .iter()
            .map(|(key, value)| {
                let positional = expand_tokens(value, |name| {
                    name.parse::<usize>()
                        .ok()
                        .and_then(|n| n.checked_sub(1))
                        .and_then(|i| args.get(i))
                        .cloned()
                        .unwrap_or_default()
                });
                let expanded = if positional.is_empty() && !value.is_empty() {
                    expand_tokens(value, |name| std::env::var(name).unwrap_or_default())
                } else {
                    positional
                };
                (key.clone(), expanded)
            })
            .collect()
    }
}

/// 임계 메트릭 정의 — toptalkers 필터 트리의 한 노드
///
/// `traffictype`이 비어 있지 않은 노드만 집계 데이터베이스를 갖습니다.
/// 자식 노드는 부모 필터가 매칭된 플로우에 대해서만 평가됩니다(논리곱
/// 계층).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThresholdMetricDecl {
    /// 필터 표현식. 비어 있으면 모든 플로우에 매칭됩니다.
    #[serde(default)]
    pub filter: String,

    /// 트래픽 클래스 레이블. 비어 있으면 이 노드는 집계하지 않고
    /// 자식으로 내려가는 관문 역할만 합니다.
    #[serde(default, rename = "traffictype")]
    pub traffic_type: String,

    /// 슬라이딩 윈도우 버킷 수 (기본 60)
    #[serde(default)]
    pub buckets: Option<usize>,

    /// 임계값 계산에 쓰는 최근 버킷 수 (기본: `buckets`)
    #[serde(default, rename = "thresholdbuckets")]
    pub threshold_buckets: Option<usize>,

    /// 보고 평균 계산에 쓰는 최근 버킷 수 (기본: `buckets`)
    #[serde(default, rename = "reportbuckets")]
    pub report_buckets: Option<usize>,

    /// 버킷 하나의 길이, 초 (기본 1)
    #[serde(default, rename = "bucketduration")]
    pub bucket_duration_secs: Option<u64>,

    /// bit/s 임계값. 평균 비트율이 이 값을 넘으면 above-threshold (기본 0)
    #[serde(default, rename = "thresholdbps")]
    pub threshold_bps: u64,

    /// packet/s 임계값 (기본 0)
    #[serde(default, rename = "thresholdpps")]
    pub threshold_pps: u64,

    /// 집계 키로 삼을 엔드포인트 (기본: 세그먼트 전역 설정을 따름)
    #[serde(default, rename = "evaluationmode")]
    pub evaluation_mode: Option<EvaluationMode>,

    /// 하위 정의. 부모가 매칭될 때만 평가됩니다.
    #[serde(default, rename = "subfilter")]
    pub subfilter: Vec<ThresholdMetricDecl>,
}

/// 집계 키 결정 방식 — 플로우의 어느 엔드포인트를 키로 쓸지 정합니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum EvaluationMode {
    /// 출발지 주소
    #[serde(rename = "source")]
    Source,
    /// 목적지 주소 (기본값)
    #[default]
    #[serde(rename = "destination")]
    Destination,
    /// 출발지와 목적지 각각 한 번씩
    #[serde(rename = "source and destination", alias = "both")]
    SourceAndDestination,
    /// `"출발지 -> 목적지"` 연결 단위
    #[serde(rename = "connection")]
    Connection,
}

impl EvaluationMode {
    /// 평평한 옵션 문자열을 파싱합니다. 알 수 없는 값이면 `None`입니다.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "source" => Some(Self::Source),
            "destination" => Some(Self::Destination),
            "source and destination" | "both" => Some(Self::SourceAndDestination),
            "connection" => Some(Self::Connection),
            _ => None,
        }
    }
}

impl fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Destination => write!(f, "destination"),
            Self::SourceAndDestination => write!(f, "source and destination"),
            Self::Connection => write!(f, "connection"),
        }
    }
}

/// 설정 문서(YAML)에서 세그먼트 선언 목록을 파싱합니다.
///
/// 빈 문서는 빈 파이프라인으로 취급합니다.
pub fn parse_declarations(document: &str) -> Result<Vec<SegmentDecl>, ConfigError> {
    if document.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_yaml::from_str(document).map_err(|e| ConfigError::ParseFailed {
        reason: e.to_string(),
    })
}

/// 옵션 맵을 읽습니다. 값이 숫자나 불리언이어도 문자열로 받아들입니다.
fn string_map<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let raw: HashMap<String, serde_yaml::Value> = HashMap::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Null => String::new(),
                other => {
                    return Err(D::Error::custom(format!(
                        "option '{key}' must be a scalar, got {other:?}"
                    )));
                }
            };
            Ok((key, value))
        })
        .collect()
}

/// `$NAME` / `${NAME}` 토큰을 mapper의 결과로 치환합니다.
///
/// 토큰이 없는 값은 그대로 반환되므로 확장은 멱등입니다.
fn expand_tokens(value: &str, mapper: impl Fn(&str) -> String) -> String {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    let token = TOKEN.get_or_init(|| {
        Regex::new(r"\$(?:\{([A-Za-z0-9_]+)\}|([A-Za-z0-9_]+))").expect("valid token regex")
    });
    token
        .replace_all(value, |caps: &regex::Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            mapper(name)
        })
        .into_owned()
}
