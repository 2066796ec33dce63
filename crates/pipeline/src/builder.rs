//! 세그먼트 레지스트리와 설정 → 파이프라인 확장
//!
//! [`SegmentRegistry`]는 세그먼트 타입 이름을 팩토리에 매핑합니다.
//! 기동 시 한 번 채워진 뒤에는 읽기 전용입니다. 알 수 없는 타입 이름은
//! 기동을 중단시킵니다.
//!
//! [`PipelineBuilder`]는 파싱된 선언 목록을 실제 세그먼트로 인스턴스화
//! 합니다. 각 선언의 옵션은 먼저 변수 확장을 거치고, 서브파이프라인을
//! 내장하는 세그먼트(`branch`, `traffic_specific_toptalkers`)는 빌더가
//! 재귀적으로 서브파이프라인을 만들어 넘겨줍니다.

use std::collections::HashMap;

use flowgate_core::config::{parse_declarations, SegmentDecl};
use flowgate_core::error::{ConfigError, FlowgateError, SegmentError};
use flowgate_core::segment::DynSegment;

use crate::pipeline::Pipeline;
use crate::segments::branch::{self, Branch};
use crate::segments::toptalkers::{self, TrafficSpecificToptalkers};
use crate::segments::{count, counter, discard, flowfilter, json, pass, snmp, stdin};

/// 세그먼트 팩토리 — 확장된 옵션으로 세그먼트를 만듭니다.
pub type SegmentFactory =
    fn(&HashMap<String, String>) -> Result<Box<dyn DynSegment>, SegmentError>;

/// 세그먼트 타입 이름 → 팩토리 레지스트리
pub struct SegmentRegistry {
    factories: HashMap<String, SegmentFactory>,
}

impl SegmentRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// 모든 내장 세그먼트가 등록된 레지스트리를 생성합니다.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(pass::NAME, |config| {
            Ok(Box::new(pass::Pass::from_config(config)?))
        });
        registry.register(count::NAME, |config| {
            Ok(Box::new(count::Count::from_config(config)?))
        });
        registry.register(counter::NAME, |config| {
            Ok(Box::new(counter::Counter::from_config(config)?))
        });
        registry.register(discard::NAME, |config| {
            Ok(Box::new(discard::Discard::from_config(config)?))
        });
        registry.register(flowfilter::NAME, |config| {
            Ok(Box::new(flowfilter::FlowFilter::from_config(config)?))
        });
        registry.register(stdin::NAME, |config| {
            Ok(Box::new(stdin::StdIn::from_config(config)?))
        });
        registry.register(json::NAME, |config| {
            Ok(Box::new(json::Json::from_config(config)?))
        });
        registry.register(snmp::NAME, |config| {
            Ok(Box::new(snmp::Snmp::from_config(config)?))
        });
        registry
    }

    /// 팩토리를 등록합니다. 같은 이름이 있으면 교체합니다.
    pub fn register(&mut self, name: impl Into<String>, factory: SegmentFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// 타입 이름이 알려져 있는지 확인합니다. 빌더가 직접 조립하는
    /// 세그먼트도 포함합니다.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name) || name == branch::NAME || name == toptalkers::NAME
    }

    /// 등록된 타입 이름 수 (빌더 직속 세그먼트 제외)
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// 등록된 팩토리가 없으면 true
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    fn create(
        &self,
        name: &str,
        options: &HashMap<String, String>,
    ) -> Result<Box<dyn DynSegment>, FlowgateError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ConfigError::UnknownSegment {
                name: name.to_owned(),
            })?;
        Ok(factory(options)?)
    }
}

impl Default for SegmentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 선언 목록을 파이프라인으로 인스턴스화하는 빌더
pub struct PipelineBuilder<'a> {
    registry: &'a SegmentRegistry,
    args: Vec<String>,
}

impl<'a> PipelineBuilder<'a> {
    /// 레지스트리로 빌더를 만듭니다.
    pub fn new(registry: &'a SegmentRegistry) -> Self {
        Self {
            registry,
            args: Vec::new(),
        }
    }

    /// `$N` 확장에 쓸 비플래그 명령행 인자를 설정합니다.
    pub fn args(mut self, args: &[String]) -> Self {
        self.args = args.to_vec();
        self
    }

    /// YAML 설정 문서로부터 파이프라인을 만듭니다.
    pub fn from_yaml(&self, document: &str) -> Result<Pipeline, FlowgateError> {
        let decls = parse_declarations(document)?;
        self.build(&decls)
    }

    /// 선언 목록으로부터 파이프라인을 만듭니다.
    ///
    /// 세그먼트 하나라도 초기화에 실패하면 전체가 실패합니다.
    pub fn build(&self, decls: &[SegmentDecl]) -> Result<Pipeline, FlowgateError> {
        let mut segments: Vec<Box<dyn DynSegment>> = Vec::with_capacity(decls.len());
        for decl in decls {
            segments.push(self.instantiate(decl)?);
        }
        Ok(Pipeline::new(segments))
    }

    fn instantiate(&self, decl: &SegmentDecl) -> Result<Box<dyn DynSegment>, FlowgateError> {
        let options = decl.expanded_config(&self.args);
        // 서브파이프라인을 내장하는 세그먼트는 빌더가 직접 조립한다
        match decl.name.as_str() {
            branch::NAME => {
                let mut segment = Branch::from_config(&options)?;
                segment.import_branches(
                    self.build(&decl.if_branch)?,
                    self.build(&decl.then)?,
                    self.build(&decl.else_branch)?,
                );
                Ok(Box::new(segment))
            }
            toptalkers::NAME => {
                let mut segment = TrafficSpecificToptalkers::from_config(&options)?;
                segment.set_definitions(&decl.definitions)?;
                if !decl.matching_pipeline.is_empty() {
                    segment.set_matching_pipeline(self.build(&decl.matching_pipeline)?);
                }
                Ok(Box::new(segment))
            }
            name => self.registry.create(name, &options),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segments::testutil::{tcp_flow, udp_flow};
    use flowgate_core::flow::FlowRecord;

    #[test]
    fn default_registry_knows_every_builtin() {
        let registry = SegmentRegistry::with_defaults();
        for name in [
            "pass",
            "count",
            "counter",
            "drop",
            "flowfilter",
            "stdin",
            "json",
            "snmp",
            "branch",
            "traffic_specific_toptalkers",
        ] {
            assert!(registry.contains(name), "registry must know '{name}'");
        }
        assert!(!registry.contains("frobnicate"));
    }

    #[test]
    fn unknown_segment_aborts_the_build() {
        let registry = SegmentRegistry::with_defaults();
        let result = PipelineBuilder::new(&registry).from_yaml("- segment: frobnicate\n");
        match result.err() {
            Some(FlowgateError::Config(ConfigError::UnknownSegment { name })) => {
                assert_eq!(name, "frobnicate");
            }
            other => panic!("expected UnknownSegment, got {other:?}"),
        }
    }

    #[test]
    fn segment_init_failure_aborts_the_build() {
        let registry = SegmentRegistry::with_defaults();
        let yaml = r#"
- segment: flowfilter
  config:
    filter: "proto frobnicate"
"#;
        let result = PipelineBuilder::new(&registry).from_yaml(yaml);
        assert!(matches!(
            result,
            Err(FlowgateError::Segment(SegmentError::FilterSyntax { .. }))
        ));
    }

    #[test]
    fn toptalkers_definition_errors_abort_the_build() {
        let registry = SegmentRegistry::with_defaults();
        let yaml = r#"
- segment: traffic_specific_toptalkers
  config:
    endpoint: ""
  definitions:
    - filter: "port nonsense"
"#;
        let result = PipelineBuilder::new(&registry).from_yaml(yaml);
        assert!(matches!(
            result,
            Err(FlowgateError::Segment(SegmentError::FilterSyntax { .. }))
        ));
    }

    #[test]
    fn custom_segments_can_be_registered() {
        let mut registry = SegmentRegistry::with_defaults();
        registry.register("alias-pass", |config| {
            Ok(Box::new(crate::segments::pass::Pass::from_config(config)?))
        });
        let pipeline = PipelineBuilder::new(&registry)
            .from_yaml("- segment: alias-pass\n")
            .unwrap();
        assert!(!pipeline.is_empty());
    }

    #[tokio::test]
    async fn built_pipeline_conserves_flows() {
        let registry = SegmentRegistry::with_defaults();
        let yaml = r#"
- segment: pass
- segment: counter
- segment: pass
"#;
        let mut pipeline = PipelineBuilder::new(&registry).from_yaml(yaml).unwrap();
        let input = pipeline.input().unwrap();
        let mut output = pipeline.take_output().unwrap();
        pipeline.start();

        for i in 0..10u64 {
            let mut flow = FlowRecord::default();
            flow.packets = i;
            input.send(flow).await.unwrap();
            assert_eq!(output.recv().await.unwrap().packets, i);
        }
        drop(input);
        pipeline.close().await;
    }

    #[tokio::test]
    async fn positional_argument_reaches_the_segment() {
        // 설정 값 "$1"이 첫 번째 비플래그 인자로 치환되어 세그먼트에
        // 그대로 보여야 한다
        let registry = SegmentRegistry::with_defaults();
        let yaml = r#"
- segment: flowfilter
  config:
    filter: "$1"
"#;
        let args = vec!["proto udp".to_owned()];
        let mut pipeline = PipelineBuilder::new(&registry)
            .args(&args)
            .from_yaml(yaml)
            .unwrap();
        let input = pipeline.input().unwrap();
        let mut output = pipeline.take_output().unwrap();
        pipeline.start();

        input.send(udp_flow()).await.unwrap();
        assert_eq!(output.recv().await.unwrap().proto, 17);
        input.send(tcp_flow()).await.unwrap();
        input.send(udp_flow()).await.unwrap();
        assert_eq!(output.recv().await.unwrap().proto, 17, "tcp must have been filtered");

        drop(input);
        pipeline.close().await;
    }

    #[tokio::test]
    async fn branch_pipeline_from_config_routes_and_conserves() {
        let registry = SegmentRegistry::with_defaults();
        let yaml = r#"
- segment: branch
  if:
    - segment: flowfilter
      config:
        filter: "proto udp"
  then:
    - segment: counter
  else:
    - segment: counter
"#;
        let mut pipeline = PipelineBuilder::new(&registry).from_yaml(yaml).unwrap();
        let input = pipeline.input().unwrap();
        let mut output = pipeline.take_output().unwrap();
        pipeline.start();

        input.send(udp_flow()).await.unwrap();
        input.send(tcp_flow()).await.unwrap();
        input.send(tcp_flow()).await.unwrap();
        for _ in 0..3 {
            assert!(output.recv().await.is_some());
        }

        drop(input);
        pipeline.close().await;
        assert!(output.recv().await.is_none());
    }

    #[tokio::test]
    async fn toptalkers_with_matching_pipeline_builds_and_runs() {
        let registry = SegmentRegistry::with_defaults();
        let yaml = r#"
- segment: traffic_specific_toptalkers
  config:
    endpoint: ""
  definitions:
    - filter: "proto udp"
      traffictype: "UDP"
      thresholdbps: 1
  matching_pipeline:
    - segment: counter
"#;
        let mut pipeline = PipelineBuilder::new(&registry).from_yaml(yaml).unwrap();
        let input = pipeline.input().unwrap();
        let mut output = pipeline.take_output().unwrap();
        pipeline.start();

        input.send(udp_flow()).await.unwrap();
        assert!(output.recv().await.is_some());

        drop(input);
        pipeline.close().await;
    }
}
