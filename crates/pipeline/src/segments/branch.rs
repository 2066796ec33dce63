//! `branch` 세그먼트 — 플로우에 대한 if/then/else 제어 흐름
//!
//! 세 개의 서브파이프라인(condition, then, else)을 내장합니다. 들어온
//! 플로우는 그대로 condition으로 전달되고, condition의 **출력**으로 나온
//! 플로우는 then으로, **드롭 채널**로 나온 플로우는 else로 갑니다.
//! 따라서 condition 파이프라인은 필터 계열 세그먼트로 끝나야 하며, 그
//! 출력/드롭 분기가 곧 분기 술어입니다.
//!
//! then/else의 출력은 멀티플렉서가 branch 자신의 출력으로 합칩니다.
//! 경로별 순서는 보존되지만 경로 간 순서는 비결정적입니다.
//!
//! condition 서브파이프라인이 플로우를 복제하면 branch는 다중 전달이
//! 됩니다. 이 동작은 정의되지 않은 것으로 둡니다.

use std::collections::HashMap;

use flowgate_core::error::SegmentError;
use flowgate_core::segment::{FlowReceiver, FlowSender, Segment, SegmentLink};

use crate::pipeline::Pipeline;

/// 설정에서 쓰이는 세그먼트 타입 이름
pub const NAME: &str = "branch";

/// 서브파이프라인 세 개를 내장하는 제어 흐름 세그먼트
pub struct Branch {
    link: SegmentLink,
    condition: Option<Pipeline>,
    then_branch: Option<Pipeline>,
    else_branch: Option<Pipeline>,
}

impl Branch {
    /// 옵션 없이 생성됩니다. 서브파이프라인은
    /// [`import_branches`](Self::import_branches)로 주입됩니다.
    pub fn from_config(_config: &HashMap<String, String>) -> Result<Self, SegmentError> {
        Ok(Self {
            link: SegmentLink::default(),
            condition: None,
            then_branch: None,
            else_branch: None,
        })
    }

    /// 빌더가 `if`/`then`/`else` 선언으로부터 만든 서브파이프라인을
    /// 넘겨줍니다. `run` 전에 호출되어야 합니다.
    pub fn import_branches(
        &mut self,
        condition: Pipeline,
        then_branch: Pipeline,
        else_branch: Pipeline,
    ) {
        self.condition = Some(condition);
        self.then_branch = Some(then_branch);
        self.else_branch = Some(else_branch);
    }
}

impl Segment for Branch {
    fn rewire(&mut self, input: FlowReceiver, output: FlowSender) {
        self.link.attach(input, output);
    }

    async fn run(&mut self) {
        let Some((mut rx, out_tx)) = self.link.take() else {
            tracing::error!("branch: run called before rewire");
            return;
        };
        let (Some(mut condition), Some(mut then_branch), Some(mut else_branch)) = (
            self.condition.take(),
            self.then_branch.take(),
            self.else_branch.take(),
        ) else {
            // 이 세그먼트는 파이프라인을 내장하므로 실제 동작 검증은
            // 빌더를 거친 테스트에서 이루어진다. 단독 생성 시에는 이
            // 상태가 정상이다.
            tracing::error!(
                "branch: uninitialized sub-pipelines, expected during standalone testing"
            );
            return;
        };

        let (Some(cond_in), Some(mut cond_out)) = (condition.input(), condition.take_output())
        else {
            tracing::error!("branch: condition pipeline is not freshly built");
            return;
        };
        let mut cond_drop = condition.subscribe_drops();
        let (Some(then_in), Some(mut then_out)) = (then_branch.input(), then_branch.take_output())
        else {
            tracing::error!("branch: then pipeline is not freshly built");
            return;
        };
        let (Some(else_in), Some(mut else_out)) = (else_branch.input(), else_branch.take_output())
        else {
            tracing::error!("branch: else pipeline is not freshly built");
            return;
        };

        condition.start();
        then_branch.start();
        else_branch.start();

        // condition의 출력/드롭을 then/else 입력으로 옮긴다
        let router = tokio::spawn(async move {
            let mut out_open = true;
            let mut drop_open = true;
            loop {
                tokio::select! {
                    flow = cond_out.recv(), if out_open => match flow {
                        Some(flow) => {
                            if then_in.send(flow).await.is_err() {
                                break;
                            }
                        }
                        None => out_open = false,
                    },
                    flow = cond_drop.recv(), if drop_open => match flow {
                        Some(flow) => {
                            if else_in.send(flow).await.is_err() {
                                break;
                            }
                        }
                        None => drop_open = false,
                    },
                    else => break,
                }
            }
        });

        // then/else의 출력을 branch 자신의 출력으로 합친다
        let mux = tokio::spawn(async move {
            let mut then_open = true;
            let mut else_open = true;
            loop {
                tokio::select! {
                    flow = then_out.recv(), if then_open => match flow {
                        Some(flow) => {
                            if out_tx.send(flow).await.is_err() {
                                break;
                            }
                        }
                        None => then_open = false,
                    },
                    flow = else_out.recv(), if else_open => match flow {
                        Some(flow) => {
                            if out_tx.send(flow).await.is_err() {
                                break;
                            }
                        }
                        None => else_open = false,
                    },
                    else => break,
                }
            }
        });

        // 자신의 입력을 condition으로 연결한다
        while let Some(flow) = rx.recv().await {
            if cond_in.send(flow).await.is_err() {
                break;
            }
        }

        // 종료 웨이브를 서브파이프라인 순서대로 전파한다:
        // condition → (router 종료) → then/else → (mux 종료 = 출력 닫힘)
        drop(cond_in);
        condition.close().await;
        let _ = router.await;
        then_branch.close().await;
        else_branch.close().await;
        let _ = mux.await;
    }
}
