//! 에러 타입 — 도메인별 에러 정의

/// flowgate 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum FlowgateError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 세그먼트 초기화/동작 에러
    #[error("segment error: {0}")]
    Segment(#[from] SegmentError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
///
/// 모두 기동 시점에 치명적(fatal)입니다. 파이프라인이 일단 실행되면
/// 설정은 불변이므로 런타임에는 발생하지 않습니다.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 등록되지 않은 세그먼트 타입
    #[error("unknown segment type: {name}")]
    UnknownSegment { name: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 세그먼트 초기화 에러
///
/// 세그먼트의 `from_config`가 반환하며, 빌더는 이를 받으면
/// 파이프라인 기동 전체를 중단합니다.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    /// 필수 옵션 누락
    #[error("segment '{segment}' requires option '{option}'")]
    MissingOption {
        segment: &'static str,
        option: &'static str,
    },

    /// 옵션 값 파싱 실패
    #[error("segment '{segment}': invalid value for option '{option}': {reason}")]
    InvalidOption {
        segment: &'static str,
        option: &'static str,
        reason: String,
    },

    /// 필터 표현식 문법 오류
    #[error("syntax error in filter expression '{expression}': {reason}")]
    FilterSyntax { expression: String, reason: String },

    /// 텍스트 출력 싱크를 열 수 없음
    #[error("cannot open output sink '{target}': {reason}")]
    Sink { target: String, reason: String },

    /// 기타 초기화 실패
    #[error("segment '{segment}' failed to initialize: {reason}")]
    InitFailed {
        segment: &'static str,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::UnknownSegment {
            name: "frobnicate".to_owned(),
        };
        assert_eq!(err.to_string(), "unknown segment type: frobnicate");
    }

    #[test]
    fn segment_error_display() {
        let err = SegmentError::MissingOption {
            segment: "flowfilter",
            option: "filter",
        };
        assert!(err.to_string().contains("flowfilter"));
        assert!(err.to_string().contains("filter"));
    }

    #[test]
    fn filter_syntax_error_display() {
        let err = SegmentError::FilterSyntax {
            expression: "proto frobnicate".to_owned(),
            reason: "unknown protocol".to_owned(),
        };
        assert!(err.to_string().contains("proto frobnicate"));
        assert!(err.to_string().contains("unknown protocol"));
    }

    #[test]
    fn errors_convert_to_flowgate_error() {
        let err: FlowgateError = ConfigError::ParseFailed {
            reason: "bad yaml".to_owned(),
        }
        .into();
        assert!(matches!(err, FlowgateError::Config(_)));
        assert!(err.to_string().contains("bad yaml"));

        let err: FlowgateError = SegmentError::InitFailed {
            segment: "snmp",
            reason: "regex does not compile".to_owned(),
        }
        .into();
        assert!(matches!(err, FlowgateError::Segment(_)));
    }
}
