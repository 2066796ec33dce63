//! 플로우 레코드 — 파이프라인을 흐르는 네트워크 관측의 기본 단위
//!
//! [`FlowRecord`]는 NetFlow/IPFIX/sFlow 수집기가 내보내는 플로우 속성을
//! 평평한 구조체로 담습니다. 세그먼트는 레코드를 채널로 전달받아 제자리에서
//! 수정(보강)한 뒤 다음 세그먼트로 넘깁니다. 채널 전송 시점에 소유권이
//! 함께 이동하므로, 보낸 뒤에는 더 이상 접근할 수 없습니다.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

/// TCP 프로토콜 번호
pub const PROTO_TCP: u8 = 6;
/// UDP 프로토콜 번호
pub const PROTO_UDP: u8 = 17;
/// ICMP 프로토콜 번호
pub const PROTO_ICMP: u8 = 1;
/// ICMPv6 프로토콜 번호
pub const PROTO_ICMPV6: u8 = 58;

/// 하나의 네트워크 플로우 관측
///
/// 주소/포트/프로토콜과 바이트·패킷 카운트 외에, 라우팅 정보(AS 경로,
/// BGP 커뮤니티)와 SNMP 보강 필드(`*_if_name`, `*_if_desc`, `*_if_speed`)를
/// 포함합니다. 보강 필드는 비어 있는 상태로 수집되어 해당 세그먼트가
/// 채워 넣습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowRecord {
    /// 출발지 주소
    pub src_addr: IpAddr,
    /// 목적지 주소
    pub dst_addr: IpAddr,
    /// 넥스트홉 주소
    pub next_hop: IpAddr,
    /// 플로우를 내보낸 라우터(샘플러) 주소
    pub sampler_address: IpAddr,
    /// 출발지 포트
    pub src_port: u16,
    /// 목적지 포트
    pub dst_port: u16,
    /// IP 프로토콜 번호 (6=TCP, 17=UDP, ...)
    pub proto: u8,
    /// 플로우의 총 바이트 수
    pub bytes: u64,
    /// 플로우의 총 패킷 수
    pub packets: u64,
    /// 유입 인터페이스 인덱스 (0 = 알 수 없음)
    pub in_if: u32,
    /// 유출 인터페이스 인덱스 (0 = 알 수 없음)
    pub out_if: u32,
    /// 출발지 AS 번호
    pub src_as: u32,
    /// 목적지 AS 번호
    pub dst_as: u32,
    /// BGP AS 경로
    pub as_path: Vec<u32>,
    /// BGP 커뮤니티
    pub bgp_communities: Vec<u32>,
    /// 수집기 수신 시각 (Unix epoch 초)
    pub time_received: u64,
    /// 플로우 시작 시각 (Unix epoch 초)
    pub time_flow_start: u64,
    /// 플로우 종료 시각 (Unix epoch 초)
    pub time_flow_end: u64,
    /// IPFIX forwardingStatus (상위 2비트가 포워딩 분류)
    pub forwarding_status: u32,
    /// 유입 인터페이스 이름 (SNMP 보강)
    pub src_if_name: String,
    /// 유입 인터페이스 설명 (SNMP 보강)
    pub src_if_desc: String,
    /// 유입 인터페이스 속도, bit/s (SNMP 보강)
    pub src_if_speed: u64,
    /// 유출 인터페이스 이름 (SNMP 보강)
    pub dst_if_name: String,
    /// 유출 인터페이스 설명 (SNMP 보강)
    pub dst_if_desc: String,
    /// 유출 인터페이스 속도, bit/s (SNMP 보강)
    pub dst_if_speed: u64,
}

impl Default for FlowRecord {
    fn default() -> Self {
        let unspecified = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        Self {
            src_addr: unspecified,
            dst_addr: unspecified,
            next_hop: unspecified,
            sampler_address: unspecified,
            src_port: 0,
            dst_port: 0,
            proto: 0,
            bytes: 0,
            packets: 0,
            in_if: 0,
            out_if: 0,
            src_as: 0,
            dst_as: 0,
            as_path: Vec::new(),
            bgp_communities: Vec::new(),
            time_received: 0,
            time_flow_start: 0,
            time_flow_end: 0,
            forwarding_status: 0,
            src_if_name: String::new(),
            src_if_desc: String::new(),
            src_if_speed: 0,
            dst_if_name: String::new(),
            dst_if_desc: String::new(),
            dst_if_speed: 0,
        }
    }
}

impl FlowRecord {
    /// 프로토콜 번호를 잘 알려진 이름으로 변환합니다.
    pub fn proto_name(&self) -> &'static str {
        match self.proto {
            PROTO_TCP => "tcp",
            PROTO_UDP => "udp",
            PROTO_ICMP => "icmp",
            PROTO_ICMPV6 => "icmpv6",
            _ => "other",
        }
    }

    /// 라우터가 이 플로우를 포워딩했는지 여부를 반환합니다.
    ///
    /// IPFIX forwardingStatus의 상위 2비트가 `01`이면 Forwarded 클래스입니다.
    pub fn is_forwarded(&self) -> bool {
        self.forwarding_status & 0xc0 == 0x40
    }

    /// 출발지 주소의 문자열 표현
    pub fn src_key(&self) -> String {
        self.src_addr.to_string()
    }

    /// 목적지 주소의 문자열 표현
    pub fn dst_key(&self) -> String {
        self.dst_addr.to_string()
    }

    /// `"출발지 -> 목적지"` 형태의 연결 키
    pub fn connection_key(&self) -> String {
        format!("{} -> {}", self.src_addr, self.dst_addr)
    }
}

impl fmt::Display for FlowRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} proto={} bytes={} packets={}",
            self.src_addr,
            self.src_port,
            self.dst_addr,
            self.dst_port,
            self.proto_name(),
            self.bytes,
            self.packets,
        )
    }
}
