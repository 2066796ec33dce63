//! flowdata HTTP 엔드포인트 — 레코드 상위 목록의 표 형태 보기
//!
//! 수치 게이지는 프로세스 전역 Prometheus 레코더로 나가고, 키별 상세
//! 표는 세그먼트 자체의 엔드포인트에서 텍스트로 제공합니다.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast;

use super::database::Database;

/// flowdata 엔드포인트를 서비스합니다. 종료 신호를 받으면 내려갑니다.
///
/// 바인드 실패는 기동을 막지 않고 에러 로그만 남깁니다 — 집계와
/// 파이프라인 동작은 엔드포인트 없이도 계속됩니다.
pub(crate) async fn serve(
    endpoint: String,
    path: String,
    databases: Vec<Arc<Database>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let listener = match tokio::net::TcpListener::bind(&endpoint).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(endpoint = %endpoint, error = %e, "toptalkers: cannot bind flowdata endpoint");
            return;
        }
    };
    tracing::info!(endpoint = %endpoint, path = %path, "toptalkers: flowdata endpoint active");

    let app = Router::new().route(&path, get(render)).with_state(databases);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await;
    if let Err(e) = result {
        tracing::error!(error = %e, "toptalkers: flowdata server terminated");
    }
}

/// 모든 데이터베이스의 레코드 요약을 표로 렌더링합니다.
async fn render(State(databases): State<Vec<Arc<Database>>>) -> String {
    let mut table = String::new();
    let _ = writeln!(
        table,
        "{:<16} {:<42} {:>14} {:>12} {:>6}",
        "traffic_class", "key", "bits/s", "packets/s", "above"
    );
    for database in &databases {
        let class = &database.params().traffic_type;
        for report in database.snapshot() {
            let _ = writeln!(
                table,
                "{:<16} {:<42} {:>14.1} {:>12.1} {:>6}",
                class,
                report.key,
                report.bits_per_second,
                report.packets_per_second,
                if report.above_threshold { "yes" } else { "no" },
            );
        }
    }
    table
}
