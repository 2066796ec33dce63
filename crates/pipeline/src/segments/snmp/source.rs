//! SNMP 질의 백엔드 — 라우터의 ifXTable에서 인터페이스 속성을 읽습니다.
//!
//! 실제 네트워크 질의는 [`InterfaceSource`] trait 뒤에 있어서 테스트는
//! mock으로 대체할 수 있습니다. 기본 구현은 SNMPv2c GET 한 번으로 속성
//! 하나를 읽습니다.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use csnmp::{ObjectIdentifier, ObjectValue, Snmp2cClient};

use flowgate_core::segment::BoxFuture;

/// ifXTable (`.1.3.6.1.2.1.31.1.1.1`) 아래의 속성 컬럼
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IfaceAttr {
    /// ifName (컬럼 1)
    Name,
    /// ifAlias — 인터페이스 설명 (컬럼 18)
    Desc,
    /// ifHighSpeed (컬럼 15)
    Speed,
}

impl IfaceAttr {
    /// 인터페이스 하나를 보강할 때 조회하는 속성들
    pub const ALL: [IfaceAttr; 3] = [IfaceAttr::Name, IfaceAttr::Desc, IfaceAttr::Speed];

    fn column(self) -> u8 {
        match self {
            IfaceAttr::Name => 1,
            IfaceAttr::Speed => 15,
            IfaceAttr::Desc => 18,
        }
    }

    /// 로그용 속성 이름
    pub fn label(self) -> &'static str {
        match self {
            IfaceAttr::Name => "name",
            IfaceAttr::Desc => "desc",
            IfaceAttr::Speed => "speed",
        }
    }
}

/// 캐시에 저장되는 질의 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfaceValue {
    /// 이름/설명 같은 문자열 속성
    Text(String),
    /// 인터페이스 속도
    Speed(u64),
}

/// 단일 질의 실패
#[derive(Debug, thiserror::Error)]
#[error("snmp query failed: {0}")]
pub struct QueryError(pub String);

/// 인터페이스 속성 조회 백엔드
pub trait InterfaceSource: Send + Sync {
    /// 라우터의 인터페이스 속성 하나를 조회합니다.
    fn fetch(
        &self,
        router: IpAddr,
        ifindex: u32,
        attr: IfaceAttr,
    ) -> BoxFuture<'static, Result<IfaceValue, QueryError>>;
}

/// SNMPv2c로 실제 라우터에 질의하는 기본 백엔드
pub struct SnmpSource {
    community: String,
    timeout: Duration,
}

impl SnmpSource {
    /// 커뮤니티 문자열로 백엔드를 만듭니다.
    pub fn new(community: impl Into<String>) -> Self {
        Self {
            community: community.into(),
            timeout: Duration::from_secs(2),
        }
    }
}

impl InterfaceSource for SnmpSource {
    fn fetch(
        &self,
        router: IpAddr,
        ifindex: u32,
        attr: IfaceAttr,
    ) -> BoxFuture<'static, Result<IfaceValue, QueryError>> {
        let community = self.community.clone().into_bytes();
        let timeout = self.timeout;
        Box::pin(async move {
            let target = SocketAddr::new(router, 161);
            let client = Snmp2cClient::new(target, community, None, Some(timeout), 0)
                .await
                .map_err(|e| QueryError(e.to_string()))?;

            let oid: ObjectIdentifier =
                format!("1.3.6.1.2.1.31.1.1.1.{}.{}", attr.column(), ifindex)
                    .parse()
                    .map_err(|e| QueryError(format!("bad oid: {e:?}")))?;
            let value = client
                .get(oid)
                .await
                .map_err(|e| QueryError(e.to_string()))?;

            match (attr, value) {
                (IfaceAttr::Speed, ObjectValue::Unsigned32(v)) => Ok(IfaceValue::Speed(v.into())),
                (IfaceAttr::Speed, ObjectValue::Counter32(v)) => Ok(IfaceValue::Speed(v.into())),
                (IfaceAttr::Speed, ObjectValue::Counter64(v)) => Ok(IfaceValue::Speed(v)),
                (IfaceAttr::Speed, ObjectValue::Integer(v)) => {
                    Ok(IfaceValue::Speed(v.max(0) as u64))
                }
                (IfaceAttr::Name | IfaceAttr::Desc, ObjectValue::String(bytes)) => Ok(
                    IfaceValue::Text(String::from_utf8_lossy(&bytes).into_owned()),
                ),
                (attr, other) => Err(QueryError(format!(
                    "unexpected value type for {}: {:?}",
                    attr.label(),
                    other
                ))),
            }
        })
    }
}
