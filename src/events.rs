//! MySQL Binlog 이벤트 타입 및 데이터 구조 정의

use crate::checksum::ChecksumAlgorithm;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// MySQL Binlog 이벤트 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventType {
    /// 알 수 없는 이벤트
    Unknown = 0,
    /// 쿼리 이벤트 (statement 기반 로깅의 DDL/DML)
    QueryEvent = 2,
    /// 서버 정지 이벤트
    StopEvent = 3,
    /// 로테이션 이벤트 (새 binlog 파일)
    RotateEvent = 4,
    /// 포맷 설명 이벤트 (binlog 파일의 첫 이벤트, 체크섬 알고리즘 포함)
    FormatDescriptionEvent = 15,
    /// 트랜잭션 커밋 (XID)
    XidEvent = 16,
    /// 테이블 맵 이벤트 (스키마 정보)
    TableMapEvent = 19,
    /// 하트비트 이벤트
    HeartbeatEvent = 27,
    /// WRITE_ROWS 이벤트 (INSERT)
    WriteRowsEvent = 30,
    /// UPDATE_ROWS 이벤트 (UPDATE)
    UpdateRowsEvent = 31,
    /// DELETE_ROWS 이벤트 (DELETE)
    DeleteRowsEvent = 32,
    /// GTID 이벤트
    GtidEvent = 33,
    /// 익명 GTID 이벤트
    AnonymousGtidEvent = 34,
    /// 이전 GTID 집합 이벤트
    PreviousGtidsEvent = 35,
}

impl EventType {
    pub fn from_u8(val: u8) -> Self {
        match val {
            2 => EventType::QueryEvent,
            3 => EventType::StopEvent,
            4 => EventType::RotateEvent,
            15 => EventType::FormatDescriptionEvent,
            16 => EventType::XidEvent,
            19 => EventType::TableMapEvent,
            27 => EventType::HeartbeatEvent,
            30 => EventType::WriteRowsEvent,
            31 => EventType::UpdateRowsEvent,
            32 => EventType::DeleteRowsEvent,
            33 => EventType::GtidEvent,
            34 => EventType::AnonymousGtidEvent,
            35 => EventType::PreviousGtidsEvent,
            _ => EventType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Unknown => "UNKNOWN_EVENT",
            EventType::QueryEvent => "QUERY_EVENT",
            EventType::StopEvent => "STOP_EVENT",
            EventType::RotateEvent => "ROTATE_EVENT",
            EventType::FormatDescriptionEvent => "FORMAT_DESCRIPTION_EVENT",
            EventType::XidEvent => "XID_EVENT",
            EventType::TableMapEvent => "TABLE_MAP_EVENT",
            EventType::HeartbeatEvent => "HEARTBEAT_EVENT",
            EventType::WriteRowsEvent => "WRITE_ROWS_EVENT",
            EventType::UpdateRowsEvent => "UPDATE_ROWS_EVENT",
            EventType::DeleteRowsEvent => "DELETE_ROWS_EVENT",
            EventType::GtidEvent => "GTID_EVENT",
            EventType::AnonymousGtidEvent => "ANONYMOUS_GTID_EVENT",
            EventType::PreviousGtidsEvent => "PREVIOUS_GTIDS_EVENT",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Binlog 이벤트 헤더 (모든 이벤트 앞의 고정 19 bytes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    /// 이벤트 타임스탬프 (초 단위)
    pub timestamp: u32,
    /// 이벤트 타입
    pub event_type: EventType,
    /// MySQL 서버 ID
    pub server_id: u32,
    /// 이벤트 전체 길이 (헤더 포함, 바이트)
    pub event_size: u32,
    /// 다음 이벤트 위치
    pub log_pos: u32,
    /// 이벤트 플래그
    pub flags: u16,
}

/// 포맷 설명 이벤트 데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatDescriptionData {
    /// binlog 포맷 버전 (v4)
    pub binlog_version: u16,
    /// 서버 버전 문자열 (50 byte 고정 필드에서 NUL 패딩 제거)
    pub server_version: String,
    /// binlog 생성 타임스탬프
    pub create_timestamp: u32,
    /// 선언된 이벤트 헤더 길이 (19이어야 함)
    pub event_header_length: u8,
    /// 이벤트 타입별 고정 헤더 길이 테이블
    pub event_type_header_lengths: Vec<u8>,
    /// 이후 이벤트에 적용되는 체크섬 알고리즘
    pub checksum_algorithm: ChecksumAlgorithm,
}

/// 회전 이벤트 데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotateEventData {
    /// 새 파일에서 이어 읽을 위치
    pub position: u64,
    /// 새 바이너리 로그 파일명
    pub next_binlog_name: String,
}

/// 쿼리 이벤트 데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryEventData {
    /// 슬레이브 프록시 ID (실행 스레드)
    pub slave_proxy_id: u32,
    /// 실행 시간 (초)
    pub execution_time: u32,
    /// 에러 코드
    pub error_code: u16,
    /// 상태 변수 (원본 바이트)
    pub status_vars: Vec<u8>,
    /// 데이터베이스명
    pub schema: String,
    /// 쿼리 문자열
    pub query: String,
}

/// 관찰된 스키마 변경 한 건의 구조화 레코드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdlRecord {
    /// 이벤트 타입
    pub event_type: EventType,
    /// 헤더 타임스탬프의 벽시계 시각
    pub timestamp: DateTime<Utc>,
    /// 다음 이벤트 위치
    pub log_pos: u32,
    /// 이벤트 크기 (바이트)
    pub event_size: u32,
    /// 이벤트를 생성한 서버 ID
    pub server_id: u32,
    /// 헤더 플래그
    pub flags: u16,
    /// 슬레이브 프록시 ID
    pub slave_proxy_id: u32,
    /// 실행 시간 (초)
    pub execution_time: u32,
    /// 에러 코드
    pub error_code: u16,
    /// 데이터베이스명
    pub schema: String,
    /// 실행된 쿼리
    pub query: String,
}

impl DdlRecord {
    pub fn new(header: &EventHeader, body: &QueryEventData) -> Self {
        let timestamp = DateTime::<Utc>::from_timestamp(header.timestamp as i64, 0)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        DdlRecord {
            event_type: header.event_type,
            timestamp,
            log_pos: header.log_pos,
            event_size: header.event_size,
            server_id: header.server_id,
            flags: header.flags,
            slave_proxy_id: body.slave_proxy_id,
            execution_time: body.execution_time,
            error_code: body.error_code,
            schema: body.schema.clone(),
            query: body.query.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "event_type": self.event_type.as_str(),
            "timestamp": self.timestamp.to_rfc3339(),
            "log_pos": self.log_pos,
            "event_size": self.event_size,
            "server_id": self.server_id,
            "flags": self.flags,
            "slave_proxy_id": self.slave_proxy_id,
            "execution_time": self.execution_time,
            "error_code": self.error_code,
            "schema": self.schema,
            "query": self.query,
        })
    }
}

impl fmt::Display for DdlRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "EventType: {}", self.event_type)?;
        writeln!(f, "Date: {}", self.timestamp.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "Log position: {}", self.log_pos)?;
        writeln!(f, "Event size: {}", self.event_size)?;
        writeln!(f, "Server ID: {}", self.server_id)?;
        writeln!(f, "Flag: {}", self.flags)?;
        writeln!(f, "Slave proxy ID: {}", self.slave_proxy_id)?;
        writeln!(f, "Execution time: {}", self.execution_time)?;
        writeln!(f, "Error code: {}", self.error_code)?;
        writeln!(f, "Schema: {}", self.schema)?;
        writeln!(f, "Query: {}", self.query)
    }
}
