//! MySQL Binlog 이벤트 디코딩
//!
//! 복제 스트림에서 받은 raw 이벤트 버퍼를 구조화된 이벤트로 해석합니다.
//! 각 이벤트:
//!   - Timestamp (4 bytes)
//!   - Type (1 byte)
//!   - Server ID (4 bytes)
//!   - Event Size (4 bytes)
//!   - Log Position (4 bytes)
//!   - Flags (2 bytes)
//!   - Event Body (variable)
//!
//! 헤더 이후의 본문 디코더는 반드시 헤더를 제외한 슬라이스를 받으며,
//! 현재 체크섬 알고리즘이 CRC32이면 꼬리 4 bytes를 먼저 제거합니다.

use crate::checksum::{
    self, ChecksumAlgorithm, BINLOG_CHECKSUM_LENGTH,
};
use crate::error::{MonitorError, Result};
use crate::events::*;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

/// 모든 이벤트 앞의 고정 헤더 크기
pub const EVENT_HEADER_SIZE: usize = 19;

/// 포맷 설명 이벤트의 고정 본문 크기 (binlog version 2 + server version 50
/// + create timestamp 4 + header length 1)
const FORMAT_DESCRIPTION_FIXED_SIZE: usize = 57;

/// 서버 버전 필드의 고정 크기
const SERVER_VERSION_SIZE: usize = 50;

/// 쿼리 이벤트의 고정 선두부 크기 (proxy id 4 + exec time 4 + schema length 1
/// + error code 2 + status vars length 2)
const QUERY_FIXED_SIZE: usize = 13;

/// Binlog 이벤트 파서
pub struct BinlogParser;

impl BinlogParser {
    /// 이벤트 헤더 파싱
    ///
    /// 19 bytes 미만이거나 선언된 이벤트 크기가 19 미만이면 복구 가능한
    /// 에러를 반환합니다. 호출자는 해당 이벤트만 건너뛰면 됩니다.
    pub fn parse_header(data: &[u8]) -> Result<EventHeader> {
        if data.len() < EVENT_HEADER_SIZE {
            return Err(MonitorError::MalformedHeader(format!(
                "header size too short {}, must {}",
                data.len(),
                EVENT_HEADER_SIZE
            )));
        }

        let mut cursor = Cursor::new(data);

        let timestamp = cursor.read_u32::<LittleEndian>()?;
        let event_type = cursor.read_u8()?;
        let server_id = cursor.read_u32::<LittleEndian>()?;
        let event_size = cursor.read_u32::<LittleEndian>()?;
        let log_pos = cursor.read_u32::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;

        if event_size < EVENT_HEADER_SIZE as u32 {
            return Err(MonitorError::MalformedHeader(format!(
                "invalid event size {}, must >= {}",
                event_size, EVENT_HEADER_SIZE
            )));
        }

        Ok(EventHeader {
            timestamp,
            event_type: EventType::from_u8(event_type),
            server_id,
            event_size,
            log_pos,
            flags,
        })
    }

    /// 포맷 설명 이벤트 파싱 (15)
    ///
    /// `data`는 헤더를 제외한 본문입니다. 서버 버전이 체크섬 하한을 충족하면
    /// 본문의 마지막 5 bytes가 {알고리즘 1 byte, 체크섬 4 bytes}이고, 그 앞까지가
    /// 이벤트 타입별 헤더 길이 테이블입니다. 하한 미만이면 꼬리 전체가 테이블이고
    /// 알고리즘은 미확정입니다.
    pub fn parse_format_description(data: &[u8]) -> Result<FormatDescriptionData> {
        if data.len() < FORMAT_DESCRIPTION_FIXED_SIZE {
            return Err(MonitorError::TruncatedBody(format!(
                "format description event too short: {} bytes",
                data.len()
            )));
        }

        let mut cursor = Cursor::new(data);

        let binlog_version = cursor.read_u16::<LittleEndian>()?;

        let mut version_bytes = [0u8; SERVER_VERSION_SIZE];
        cursor.read_exact(&mut version_bytes)?;
        let end = version_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(SERVER_VERSION_SIZE);
        let server_version = String::from_utf8_lossy(&version_bytes[..end]).to_string();

        let create_timestamp = cursor.read_u32::<LittleEndian>()?;
        let event_header_length = cursor.read_u8()?;

        let pos = cursor.position() as usize;

        let (event_type_header_lengths, checksum_algorithm) =
            if checksum::version_supports_checksum(&server_version) {
                // 마지막 5 bytes: 알고리즘 1 byte + 체크섬 4 bytes
                let tail = BINLOG_CHECKSUM_LENGTH + 1;
                if data.len() < pos + tail {
                    return Err(MonitorError::TruncatedBody(format!(
                        "format description event missing checksum tail: {} bytes",
                        data.len()
                    )));
                }
                let algorithm = ChecksumAlgorithm::from_u8(data[data.len() - tail]);
                (data[pos..data.len() - tail].to_vec(), algorithm)
            } else {
                (data[pos..].to_vec(), ChecksumAlgorithm::Undefined)
            };

        Ok(FormatDescriptionData {
            binlog_version,
            server_version,
            create_timestamp,
            event_header_length,
            event_type_header_lengths,
            checksum_algorithm,
        })
    }

    /// 회전 이벤트 파싱 (4)
    ///
    /// 8 byte 위치 이후의 나머지 전체가 새 파일명입니다 (NUL 종료 아님).
    pub fn parse_rotate(data: &[u8], algorithm: ChecksumAlgorithm) -> Result<RotateEventData> {
        let data = strip_checksum(data, algorithm)?;

        if data.len() < 8 {
            return Err(MonitorError::TruncatedBody(format!(
                "rotate event too short: {} bytes",
                data.len()
            )));
        }

        let mut cursor = Cursor::new(data);
        let position = cursor.read_u64::<LittleEndian>()?;
        let next_binlog_name = String::from_utf8_lossy(&data[8..]).to_string();

        Ok(RotateEventData {
            position,
            next_binlog_name,
        })
    }

    /// 쿼리 이벤트 파싱 (2)
    ///
    /// 쿼리 필드에는 길이 접두사가 없어 상태 변수/스키마 길이를 정확히
    /// 소비해야만 쿼리 텍스트가 올바르게 잘립니다.
    pub fn parse_query(data: &[u8], algorithm: ChecksumAlgorithm) -> Result<QueryEventData> {
        let data = strip_checksum(data, algorithm)?;

        if data.len() < QUERY_FIXED_SIZE {
            return Err(MonitorError::TruncatedBody(format!(
                "query event too short: {} bytes",
                data.len()
            )));
        }

        let mut cursor = Cursor::new(data);

        let slave_proxy_id = cursor.read_u32::<LittleEndian>()?;
        let execution_time = cursor.read_u32::<LittleEndian>()?;
        let schema_length = cursor.read_u8()? as usize;
        let error_code = cursor.read_u16::<LittleEndian>()?;
        let status_vars_length = cursor.read_u16::<LittleEndian>()? as usize;

        // 상태 변수 + 스키마 + NUL 구분자 1 byte까지 있어야 함
        let mut pos = QUERY_FIXED_SIZE;
        if data.len() < pos + status_vars_length + schema_length + 1 {
            return Err(MonitorError::TruncatedBody(format!(
                "query event underrun: {} bytes, need status vars {} + schema {}",
                data.len(),
                status_vars_length,
                schema_length
            )));
        }

        let status_vars = data[pos..pos + status_vars_length].to_vec();
        pos += status_vars_length;

        let schema = String::from_utf8_lossy(&data[pos..pos + schema_length]).to_string();
        pos += schema_length;

        // NUL 구분자 skip
        pos += 1;

        let query = String::from_utf8_lossy(&data[pos..]).to_string();

        Ok(QueryEventData {
            slave_proxy_id,
            execution_time,
            error_code,
            status_vars,
            schema,
            query,
        })
    }
}

/// 현재 알고리즘이 CRC32이면 본문 꼬리의 체크섬 4 bytes를 제거
fn strip_checksum(data: &[u8], algorithm: ChecksumAlgorithm) -> Result<&[u8]> {
    if algorithm != ChecksumAlgorithm::Crc32 {
        return Ok(data);
    }

    if data.len() < BINLOG_CHECKSUM_LENGTH {
        return Err(MonitorError::TruncatedBody(format!(
            "event body shorter than checksum: {} bytes",
            data.len()
        )));
    }

    Ok(&data[..data.len() - BINLOG_CHECKSUM_LENGTH])
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    fn encode_header(
        timestamp: u32,
        event_type: u8,
        server_id: u32,
        event_size: u32,
        log_pos: u32,
        flags: u16,
    ) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.write_u32::<LittleEndian>(timestamp).unwrap();
        buffer.write_u8(event_type).unwrap();
        buffer.write_u32::<LittleEndian>(server_id).unwrap();
        buffer.write_u32::<LittleEndian>(event_size).unwrap();
        buffer.write_u32::<LittleEndian>(log_pos).unwrap();
        buffer.write_u16::<LittleEndian>(flags).unwrap();
        buffer
    }

    fn encode_query_payload(
        slave_proxy_id: u32,
        execution_time: u32,
        error_code: u16,
        status_vars: &[u8],
        schema: &str,
        query: &str,
    ) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.write_u32::<LittleEndian>(slave_proxy_id).unwrap();
        buffer.write_u32::<LittleEndian>(execution_time).unwrap();
        buffer.write_u8(schema.len() as u8).unwrap();
        buffer.write_u16::<LittleEndian>(error_code).unwrap();
        buffer
            .write_u16::<LittleEndian>(status_vars.len() as u16)
            .unwrap();
        buffer.write_all(status_vars).unwrap();
        buffer.write_all(schema.as_bytes()).unwrap();
        buffer.write_u8(0).unwrap();
        buffer.write_all(query.as_bytes()).unwrap();
        buffer
    }

    #[test]
    fn test_header_round_trip() {
        let raw = encode_header(1593679068, 2, 123, 119, 500, 8);
        let header = BinlogParser::parse_header(&raw).unwrap();

        assert_eq!(header.timestamp, 1593679068);
        assert_eq!(header.event_type, EventType::QueryEvent);
        assert_eq!(header.server_id, 123);
        assert_eq!(header.event_size, 119);
        assert_eq!(header.log_pos, 500);
        assert_eq!(header.flags, 8);
    }

    #[test]
    fn test_header_too_short() {
        let raw = encode_header(0, 2, 1, 100, 0, 0);
        let err = BinlogParser::parse_header(&raw[..18]).unwrap_err();
        assert!(matches!(err, MonitorError::MalformedHeader(_)));
    }

    #[test]
    fn test_header_invalid_event_size() {
        let raw = encode_header(0, 2, 1, 18, 0, 0);
        let err = BinlogParser::parse_header(&raw).unwrap_err();
        assert!(matches!(err, MonitorError::MalformedHeader(_)));
    }

    // MySQL 5.7.29가 생성한 실제 포맷 설명 이벤트 (119 bytes)
    const FORMAT_DESCRIPTION_5_7_29: &[u8] = &[
        220, 156, 253, 94, 15, 123, 0, 0, 0, 119, 0, 0, 0, 123, 0, 0, 0, 1, 0, 4, 0, 53, 46, 55,
        46, 50, 57, 45, 108, 111, 103, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 220, 156, 253, 94, 19, 56, 13,
        0, 8, 0, 18, 0, 4, 4, 4, 4, 18, 0, 0, 95, 0, 4, 26, 8, 0, 0, 0, 8, 8, 8, 2, 0, 0, 0, 10,
        10, 10, 42, 42, 0, 18, 52, 0, 1, 207, 88, 126, 238,
    ];

    #[test]
    fn test_parse_format_description() {
        let header = BinlogParser::parse_header(FORMAT_DESCRIPTION_5_7_29).unwrap();
        assert_eq!(header.event_type, EventType::FormatDescriptionEvent);
        assert_eq!(header.event_size as usize, FORMAT_DESCRIPTION_5_7_29.len());

        let fde =
            BinlogParser::parse_format_description(&FORMAT_DESCRIPTION_5_7_29[EVENT_HEADER_SIZE..])
                .unwrap();
        assert_eq!(fde.binlog_version, 4);
        assert_eq!(fde.server_version, "5.7.29-log");
        assert_eq!(fde.create_timestamp, 1593679068);
        assert_eq!(fde.event_header_length, EVENT_HEADER_SIZE as u8);
        assert_eq!(fde.checksum_algorithm, ChecksumAlgorithm::Crc32);
        // 전체 본문 100 bytes에서 고정부 57, 꼬리 5를 뺀 테이블
        assert_eq!(fde.event_type_header_lengths.len(), 38);
    }

    #[test]
    fn test_parse_format_description_old_server() {
        // 체크섬 하한 미만 서버: 꼬리 전체가 헤더 길이 테이블
        let mut payload = Vec::new();
        payload.write_u16::<LittleEndian>(4).unwrap();
        let mut version = [0u8; 50];
        version[..5].copy_from_slice(b"5.5.8");
        payload.write_all(&version).unwrap();
        payload.write_u32::<LittleEndian>(0).unwrap();
        payload.write_u8(19).unwrap();
        payload.write_all(&[56, 13, 0, 8, 0]).unwrap();

        let fde = BinlogParser::parse_format_description(&payload).unwrap();
        assert_eq!(fde.server_version, "5.5.8");
        assert_eq!(fde.checksum_algorithm, ChecksumAlgorithm::Undefined);
        assert_eq!(fde.event_type_header_lengths, vec![56, 13, 0, 8, 0]);
    }

    #[test]
    fn test_parse_format_description_truncated() {
        let err = BinlogParser::parse_format_description(&[4, 0, 53]).unwrap_err();
        assert!(matches!(err, MonitorError::TruncatedBody(_)));
    }

    #[test]
    fn test_parse_rotate() {
        let mut payload = Vec::new();
        payload.write_u64::<LittleEndian>(4).unwrap();
        payload.write_all(b"bin.000002").unwrap();

        let rotate = BinlogParser::parse_rotate(&payload, ChecksumAlgorithm::Off).unwrap();
        assert_eq!(rotate.position, 4);
        assert_eq!(rotate.next_binlog_name, "bin.000002");
    }

    #[test]
    fn test_parse_rotate_strips_checksum() {
        let mut payload = Vec::new();
        payload.write_u64::<LittleEndian>(4).unwrap();
        payload.write_all(b"bin.000002").unwrap();

        let plain = BinlogParser::parse_rotate(&payload, ChecksumAlgorithm::Off).unwrap();

        // CRC32 상태에서는 꼬리 4 bytes만 더 소비하고 나머지 필드는 동일해야 함
        payload.write_all(&[0, 0, 0, 0]).unwrap();
        let stripped = BinlogParser::parse_rotate(&payload, ChecksumAlgorithm::Crc32).unwrap();
        assert_eq!(stripped, plain);
    }

    #[test]
    fn test_parse_rotate_truncated() {
        let err = BinlogParser::parse_rotate(&[1, 2, 3], ChecksumAlgorithm::Off).unwrap_err();
        assert!(matches!(err, MonitorError::TruncatedBody(_)));
    }

    #[test]
    fn test_parse_query() {
        let payload = encode_query_payload(
            7,
            2,
            0,
            &[0x00, 0x04, 0x08],
            "test",
            "CREATE TABLE t (id INT)",
        );

        let query = BinlogParser::parse_query(&payload, ChecksumAlgorithm::Off).unwrap();
        assert_eq!(query.slave_proxy_id, 7);
        assert_eq!(query.execution_time, 2);
        assert_eq!(query.error_code, 0);
        assert_eq!(query.status_vars, vec![0x00, 0x04, 0x08]);
        assert_eq!(query.schema, "test");
        assert_eq!(query.query, "CREATE TABLE t (id INT)");
    }

    #[test]
    fn test_parse_query_strips_checksum() {
        let mut payload = encode_query_payload(7, 0, 0, &[], "test", "DROP TABLE t");
        let plain = BinlogParser::parse_query(&payload, ChecksumAlgorithm::Off).unwrap();

        payload.extend_from_slice(&[0, 0, 0, 0]);
        let stripped = BinlogParser::parse_query(&payload, ChecksumAlgorithm::Crc32).unwrap();
        assert_eq!(stripped, plain);
    }

    #[test]
    fn test_parse_query_underrun() {
        let payload = encode_query_payload(7, 0, 0, &[1, 2, 3], "test", "SELECT 1");

        // 고정부 직후에서 잘린 버퍼: 상태 변수를 읽을 수 없어야 함
        let err = BinlogParser::parse_query(&payload[..QUERY_FIXED_SIZE], ChecksumAlgorithm::Off)
            .unwrap_err();
        assert!(matches!(err, MonitorError::TruncatedBody(_)));

        let err = BinlogParser::parse_query(&payload[..5], ChecksumAlgorithm::Off).unwrap_err();
        assert!(matches!(err, MonitorError::TruncatedBody(_)));
    }

    #[test]
    fn test_strip_checksum_too_short() {
        let err = strip_checksum(&[1, 2], ChecksumAlgorithm::Crc32).unwrap_err();
        assert!(matches!(err, MonitorError::TruncatedBody(_)));
    }
}
