//! `traffic_specific_toptalkers` 세그먼트 — 트래픽 클래스별 톱토커 탐지
//!
//! 필터 트리로 플로우를 분류하고, 클래스 레이블이 붙은 노드마다 키별
//! 슬라이딩 윈도우 집계를 유지합니다. 트리는 논리곱 계층입니다: 자식
//! 노드는 부모 필터가 매칭된 플로우에 대해서만 평가되므로, 공통 접두
//! 필터를 한 번만 평가하는 결정 트리가 됩니다. 형제는 선언 순서대로
//! 평가됩니다.
//!
//! 매칭 파이프라인이 설정되어 있으면, 현재 임계값을 넘은 키가 연루된
//! 플로우가 그 파이프라인으로도 복사되어 들어갑니다. 주 출력은 어떤
//! 경우에도 억제되지 않습니다 — 플로우는 항상 본래 파이프라인을 계속
//! 따라갑니다.
//!
//! 데이터베이스 갱신이 임계값 검사보다 먼저 일어나므로, 키를 처음으로
//! 임계값 위로 올린 플로우 자신은 다음 회전 이후의 플로우부터 매칭
//! 파이프라인에 잡힙니다.

pub mod database;
mod flowdata;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use flowgate_core::config::{EvaluationMode, ThresholdMetricDecl};
use flowgate_core::error::SegmentError;
use flowgate_core::flow::FlowRecord;
use flowgate_core::metrics as m;
use flowgate_core::segment::{FlowReceiver, FlowSender, Segment, SegmentLink};

use crate::pipeline::Pipeline;
use crate::segments::expression::FilterExpression;

use database::{Database, WindowParams};

/// 설정에서 쓰이는 세그먼트 타입 이름
pub const NAME: &str = "traffic_specific_toptalkers";

const DEFAULT_ENDPOINT: &str = "0.0.0.0:8080";
const DEFAULT_FLOWDATA_PATH: &str = "/flowdata";

/// 컴파일된 필터 트리의 한 노드
struct ThresholdMetric {
    /// 없으면 모든 플로우에 매칭
    expression: Option<FilterExpression>,
    /// 트래픽 클래스 레이블이 있는 노드만 집계 데이터베이스를 가진다
    database: Option<Arc<Database>>,
    children: Vec<ThresholdMetric>,
}

/// 트래픽 클래스별 톱토커 세그먼트
pub struct TrafficSpecificToptalkers {
    link: SegmentLink,
    endpoint: String,
    flowdata_path: String,
    default_mode: EvaluationMode,
    tree: Vec<ThresholdMetric>,
    databases: Vec<Arc<Database>>,
    matching: Option<Pipeline>,
}

impl TrafficSpecificToptalkers {
    /// 옵션:
    /// - `endpoint` — flowdata HTTP 리슨 주소 (기본 `0.0.0.0:8080`,
    ///   빈 문자열이면 비활성화)
    /// - `flowdatapath` — 표 형태 보기 경로 (기본 `/flowdata`)
    /// - `evaluationmode` — 정의가 지정하지 않았을 때의 기본 평가 모드
    ///   (기본 `destination`)
    pub fn from_config(config: &HashMap<String, String>) -> Result<Self, SegmentError> {
        let endpoint = match config.get("endpoint") {
            Some(value) => value.clone(),
            None => {
                tracing::info!(
                    "toptalkers: missing configuration parameter 'endpoint', using default '{DEFAULT_ENDPOINT}'"
                );
                DEFAULT_ENDPOINT.to_owned()
            }
        };

        let flowdata_path = match config.get("flowdatapath") {
            Some(value) if !value.is_empty() => value.clone(),
            _ => {
                tracing::info!(
                    "toptalkers: missing configuration parameter 'flowdatapath', using default '{DEFAULT_FLOWDATA_PATH}'"
                );
                DEFAULT_FLOWDATA_PATH.to_owned()
            }
        };
        if !flowdata_path.starts_with('/') {
            return Err(SegmentError::InvalidOption {
                segment: NAME,
                option: "flowdatapath",
                reason: "path must start with '/'".to_owned(),
            });
        }

        let default_mode = match config.get("evaluationmode").map(String::as_str).unwrap_or("") {
            "" => {
                tracing::info!("toptalkers: 'evaluationmode' set to default 'destination'");
                EvaluationMode::Destination
            }
            value => match EvaluationMode::parse(value) {
                Some(mode) => mode,
                None => {
                    tracing::error!(
                        value = %value,
                        "toptalkers: could not parse 'evaluationmode', using default 'destination'"
                    );
                    EvaluationMode::Destination
                }
            },
        };

        Ok(Self {
            link: SegmentLink::default(),
            endpoint,
            flowdata_path,
            default_mode,
            tree: Vec::new(),
            databases: Vec::new(),
            matching: None,
        })
    }

    /// 임계 메트릭 정의 트리를 컴파일합니다.
    ///
    /// 필터 표현식의 문법 오류는 파이프라인 기동을 중단시킵니다.
    pub fn set_definitions(&mut self, decls: &[ThresholdMetricDecl]) -> Result<(), SegmentError> {
        for decl in decls {
            let node = self.compile(decl)?;
            self.tree.push(node);
        }
        Ok(())
    }

    fn compile(&mut self, decl: &ThresholdMetricDecl) -> Result<ThresholdMetric, SegmentError> {
        let expression = if decl.filter.is_empty() {
            None
        } else {
            Some(FilterExpression::parse(&decl.filter)?)
        };
        let database = if decl.traffic_type.is_empty() {
            None
        } else {
            let params = WindowParams::from_decl(decl, self.default_mode);
            let database = Arc::new(Database::new(params));
            self.databases.push(Arc::clone(&database));
            Some(database)
        };
        let children = decl
            .subfilter
            .iter()
            .map(|sub| self.compile(sub))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ThresholdMetric {
            expression,
            database,
            children,
        })
    }

    /// 매칭 서브파이프라인을 설정합니다.
    pub fn set_matching_pipeline(&mut self, pipeline: Pipeline) {
        self.matching = Some(pipeline);
    }
}

/// 평가 모드에 따라 플로우에서 집계 키를 뽑습니다.
fn keys_for(mode: EvaluationMode, flow: &FlowRecord) -> Vec<String> {
    match mode {
        EvaluationMode::Source => vec![flow.src_key()],
        EvaluationMode::Destination => vec![flow.dst_key()],
        EvaluationMode::SourceAndDestination => vec![flow.src_key(), flow.dst_key()],
        EvaluationMode::Connection => vec![flow.connection_key()],
    }
}

/// 깊이 우선으로 트리를 내려가며 매칭되는 노드의 집계를 갱신합니다.
/// 자식은 부모가 매칭됐을 때만 평가합니다.
fn feed_tree(node: &ThresholdMetric, flow: &FlowRecord) {
    if let Some(expression) = &node.expression {
        if !expression.matches(flow) {
            return;
        }
    }
    if let Some(database) = &node.database {
        for key in keys_for(database.params().evaluation_mode, flow) {
            database.append(&key, flow);
        }
    }
    for child in &node.children {
        feed_tree(child, flow);
    }
}

/// 플로우가 연루된 키 중 하나라도 임계값을 넘었는지 검사합니다.
///
/// 필터 매칭과 무관하게 데이터베이스 상태만 봅니다 — 다른 클래스의
/// 트래픽이라도 탐지된 톱토커가 연루되어 있으면 참입니다.
fn key_in_toptalkers(node: &ThresholdMetric, flow: &FlowRecord) -> bool {
    if let Some(database) = &node.database {
        for key in keys_for(database.params().evaluation_mode, flow) {
            if database.above_threshold(&key) {
                return true;
            }
        }
    }
    node.children.iter().any(|child| key_in_toptalkers(child, flow))
}

impl Segment for TrafficSpecificToptalkers {
    fn rewire(&mut self, input: FlowReceiver, output: FlowSender) {
        self.link.attach(input, output);
    }

    async fn run(&mut self) {
        let Some((mut rx, tx)) = self.link.take() else {
            tracing::error!("toptalkers: run called before rewire");
            return;
        };

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut aux: Vec<JoinHandle<()>> = Vec::new();

        let mut matching = self.matching.take();
        let matching_in = match matching.as_mut() {
            Some(pipeline) => {
                let input = pipeline.input();
                pipeline.auto_drain();
                pipeline.start();
                input
            }
            None => None,
        };

        if !self.endpoint.is_empty() {
            aux.push(tokio::spawn(flowdata::serve(
                self.endpoint.clone(),
                self.flowdata_path.clone(),
                self.databases.clone(),
                shutdown_tx.subscribe(),
            )));
        }

        // 데이터베이스마다 시계(버킷 회전)와 정리(만료 레코드 제거) 태스크
        for database in &self.databases {
            let clock_db = Arc::clone(database);
            let mut clock_shutdown = shutdown_tx.subscribe();
            aux.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(clock_db.params().bucket_duration);
                tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = tick.tick() => clock_db.rotate_once(),
                        _ = clock_shutdown.recv() => break,
                    }
                }
            }));

            let cleanup_db = Arc::clone(database);
            let mut cleanup_shutdown = shutdown_tx.subscribe();
            aux.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(cleanup_db.params().window());
                tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = tick.tick() => cleanup_db.evict_stale(),
                        _ = cleanup_shutdown.recv() => break,
                    }
                }
            }));
        }

        tracing::info!(
            endpoint = %self.endpoint,
            databases = self.databases.len(),
            "toptalkers: threshold metric report running"
        );

        while let Some(flow) = rx.recv().await {
            metrics::counter!(m::TOPTALKERS_FLOWS_TOTAL).increment(1);
            for node in &self.tree {
                feed_tree(node, &flow);
            }
            if let Some(matching_tx) = &matching_in {
                if self.tree.iter().any(|node| key_in_toptalkers(node, &flow)) {
                    metrics::counter!(m::TOPTALKERS_MATCHED_FLOWS_TOTAL).increment(1);
                    if matching_tx.send(flow.clone()).await.is_err() {
                        tracing::debug!("toptalkers: matching pipeline input closed");
                    }
                }
            }
            if tx.send(flow).await.is_err() {
                break;
            }
        }

        drop(tx);
        let _ = shutdown_tx.send(());
        for task in aux {
            let _ = task.await;
        }
        drop(matching_in);
        if let Some(mut pipeline) = matching {
            pipeline.close().await;
        }
    }
}
