//! 필터 표현식 — 플로우 속성에 대한 작은 술어 언어
//!
//! `flowfilter` 세그먼트와 toptalkers 필터 트리가 같은 언어를 씁니다.
//! 표현식은 세그먼트 생성 시점에 한 번 컴파일되며, 문법 오류는
//! 파이프라인 기동 전체를 중단시킵니다. 런타임에는 파싱이 일어나지
//! 않습니다.
//!
//! ```text
//! proto udp
//! dst port 123 and bytes > 1000
//! not (proto tcp or proto udp)
//! src address 10.0.0.1 or dst address 10.0.0.1
//! ```

use std::net::IpAddr;

use flowgate_core::error::SegmentError;
use flowgate_core::flow::{FlowRecord, PROTO_ICMP, PROTO_ICMPV6, PROTO_TCP, PROTO_UDP};

/// 컴파일된 필터 표현식
pub struct FilterExpression {
    root: Expr,
    source: String,
}

/// 매칭 대상 엔드포인트 한정자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Src,
    Dst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmp {
    Less,
    Greater,
}

#[derive(Debug)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Proto(u8),
    Port { dir: Option<Direction>, port: u16 },
    Address { dir: Option<Direction>, addr: IpAddr },
    Bytes { op: Cmp, value: u64 },
    Packets { op: Cmp, value: u64 },
}

impl FilterExpression {
    /// 표현식 문자열을 컴파일합니다.
    pub fn parse(input: &str) -> Result<Self, SegmentError> {
        let tokens = tokenize(input);
        if tokens.is_empty() {
            return Err(syntax_error(input, "empty expression"));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.parse_or().map_err(|reason| syntax_error(input, &reason))?;
        if let Some(extra) = parser.peek() {
            return Err(syntax_error(input, &format!("unexpected trailing token '{extra}'")));
        }
        Ok(Self {
            root,
            source: input.to_owned(),
        })
    }

    /// 플로우가 표현식에 매칭되는지 평가합니다.
    pub fn matches(&self, flow: &FlowRecord) -> bool {
        eval(&self.root, flow)
    }

    /// 원본 표현식 문자열
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Debug for FilterExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterExpression")
            .field("source", &self.source)
            .finish()
    }
}

fn syntax_error(expression: &str, reason: &str) -> SegmentError {
    SegmentError::FilterSyntax {
        expression: expression.to_owned(),
        reason: reason.to_owned(),
    }
}

fn eval(expr: &Expr, flow: &FlowRecord) -> bool {
    match expr {
        Expr::Or(a, b) => eval(a, flow) || eval(b, flow),
        Expr::And(a, b) => eval(a, flow) && eval(b, flow),
        Expr::Not(inner) => !eval(inner, flow),
        Expr::Proto(proto) => flow.proto == *proto,
        Expr::Port { dir, port } => match dir {
            Some(Direction::Src) => flow.src_port == *port,
            Some(Direction::Dst) => flow.dst_port == *port,
            None => flow.src_port == *port || flow.dst_port == *port,
        },
        Expr::Address { dir, addr } => match dir {
            Some(Direction::Src) => flow.src_addr == *addr,
            Some(Direction::Dst) => flow.dst_addr == *addr,
            None => flow.src_addr == *addr || flow.dst_addr == *addr,
        },
        Expr::Bytes { op, value } => compare(flow.bytes, *op, *value),
        Expr::Packets { op, value } => compare(flow.packets, *op, *value),
    }
}

fn compare(left: u64, op: Cmp, right: u64) -> bool {
    match op {
        Cmp::Less => left < right,
        Cmp::Greater => left > right,
    }
}

fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    for ch in input.chars() {
        match ch {
            '(' | ')' | '<' | '>' => {
                if !word.is_empty() {
                    tokens.push(std::mem::take(&mut word));
                }
                tokens.push(ch.to_string());
            }
            c if c.is_whitespace() => {
                if !word.is_empty() {
                    tokens.push(std::mem::take(&mut word));
                }
            }
            c => word.push(c),
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }
    tokens
}

struct Parser {
    tokens: Vec<String>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Option<&str> {
        let token = self.tokens.get(self.pos).map(String::as_str);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn next_required(&mut self, what: &str) -> Result<&str, String> {
        self.next().ok_or_else(|| format!("expected {what}, found end of expression"))
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.peek() == Some("or") {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some("and") {
            self.next();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        match self.peek() {
            Some("not") => {
                self.next();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some("(") => {
                self.next();
                let inner = self.parse_or()?;
                match self.next() {
                    Some(")") => Ok(inner),
                    _ => Err("expected ')'".to_owned()),
                }
            }
            _ => self.parse_predicate(),
        }
    }

    fn parse_predicate(&mut self) -> Result<Expr, String> {
        let keyword = self.next_required("a predicate")?.to_owned();
        match keyword.as_str() {
            "proto" => {
                let value = self.next_required("a protocol")?;
                Ok(Expr::Proto(parse_proto(value)?))
            }
            "port" => Ok(Expr::Port {
                dir: None,
                port: self.parse_number("a port number")?,
            }),
            "address" => Ok(Expr::Address {
                dir: None,
                addr: self.parse_address()?,
            }),
            "src" | "dst" => {
                let dir = if keyword == "src" {
                    Direction::Src
                } else {
                    Direction::Dst
                };
                let field = self.next_required("'port' or 'address'")?.to_owned();
                match field.as_str() {
                    "port" => Ok(Expr::Port {
                        dir: Some(dir),
                        port: self.parse_number("a port number")?,
                    }),
                    "address" => Ok(Expr::Address {
                        dir: Some(dir),
                        addr: self.parse_address()?,
                    }),
                    other => Err(format!("expected 'port' or 'address' after '{keyword}', found '{other}'")),
                }
            }
            "bytes" => {
                let op = self.parse_cmp()?;
                Ok(Expr::Bytes {
                    op,
                    value: self.parse_number("a byte count")?,
                })
            }
            "packets" => {
                let op = self.parse_cmp()?;
                Ok(Expr::Packets {
                    op,
                    value: self.parse_number("a packet count")?,
                })
            }
            other => Err(format!("unexpected token '{other}'")),
        }
    }

    fn parse_cmp(&mut self) -> Result<Cmp, String> {
        match self.next_required("'<' or '>'")? {
            "<" => Ok(Cmp::Less),
            ">" => Ok(Cmp::Greater),
            other => Err(format!("expected '<' or '>', found '{other}'")),
        }
    }

    fn parse_number<T: std::str::FromStr>(&mut self, what: &str) -> Result<T, String> {
        let token = self.next_required(what)?;
        token.parse().map_err(|_| format!("expected {what}, found '{token}'"))
    }

    fn parse_address(&mut self) -> Result<IpAddr, String> {
        let token = self.next_required("an ip address")?;
        token.parse().map_err(|_| format!("invalid ip address '{token}'"))
    }
}

fn parse_proto(token: &str) -> Result<u8, String> {
    match token {
        "tcp" => Ok(PROTO_TCP),
        "udp" => Ok(PROTO_UDP),
        "icmp" => Ok(PROTO_ICMP),
        "icmpv6" => Ok(PROTO_ICMPV6),
        number => number
            .parse()
            .map_err(|_| format!("unknown protocol '{number}'")),
    }
}
