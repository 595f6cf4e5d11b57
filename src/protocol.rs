//! MySQL 프로토콜 패킷 처리 및 핸드셰이크
//!
//! 복제 연결에 필요한 최소한의 클라이언트 프로토콜:
//! 패킷 프레이밍 (3 byte 길이 + 1 byte 시퀀스), greeting 파싱,
//! mysql_native_password 인증 응답, COM_* 명령 프레이밍.

use crate::error::{MonitorError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// COM_QUERY 명령어 코드
pub const COM_QUERY: u8 = 0x03;

/// COM_BINLOG_DUMP 명령어 코드
pub const COM_BINLOG_DUMP: u8 = 0x12;

/// Client capability flags (핸드셰이크에 쓰는 부분만)
mod capability {
    pub const LONG_PASSWORD: u32 = 1;
    pub const LONG_FLAG: u32 = 4;
    pub const CONNECT_WITH_DB: u32 = 8;
    pub const PROTOCOL_41: u32 = 512;
    pub const SECURE_CONNECTION: u32 = 32768;
    pub const PLUGIN_AUTH: u32 = 1 << 19;
}

/// MySQL 패킷 채널
pub struct PacketChannel {
    stream: TcpStream,
}

impl PacketChannel {
    /// TCP 연결 후 채널 생성
    pub async fn connect(hostname: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", hostname, port);
        let stream = TcpStream::connect(&addr).await.map_err(|e| {
            MonitorError::ConnectionError(format!("Failed to connect to {}: {}", addr, e))
        })?;

        debug!("Connected to MySQL at {}", addr);

        Ok(PacketChannel { stream })
    }

    /// 패킷 하나 읽기 (헤더 제외 본문 반환)
    pub async fn read_packet(&mut self) -> Result<Vec<u8>> {
        let mut header = [0u8; 4];
        self.stream
            .read_exact(&mut header)
            .await
            .map_err(|e| MonitorError::IoError(format!("Failed to read packet header: {}", e)))?;

        let length = u32::from_le_bytes([header[0], header[1], header[2], 0]);
        // header[3]은 시퀀스 번호, 응답 검증에는 쓰지 않음

        let mut buffer = vec![0u8; length as usize];
        self.stream
            .read_exact(&mut buffer)
            .await
            .map_err(|e| MonitorError::IoError(format!("Failed to read packet body: {}", e)))?;

        Ok(buffer)
    }

    /// 패킷 쓰기
    pub async fn write_packet(&mut self, data: &[u8], sequence: u8) -> Result<()> {
        let mut header = Vec::with_capacity(4);
        header
            .write_u24::<LittleEndian>(data.len() as u32)
            .map_err(|e| MonitorError::IoError(format!("Failed to write length: {}", e)))?;
        WriteBytesExt::write_u8(&mut header, sequence)
            .map_err(|e| MonitorError::IoError(format!("Failed to write sequence: {}", e)))?;

        self.stream
            .write_all(&header)
            .await
            .map_err(|e| MonitorError::IoError(format!("Failed to write header: {}", e)))?;
        self.stream
            .write_all(data)
            .await
            .map_err(|e| MonitorError::IoError(format!("Failed to write data: {}", e)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| MonitorError::IoError(format!("Failed to flush: {}", e)))?;

        Ok(())
    }

    /// 명령 패킷 쓰기 (명령은 항상 시퀀스 0에서 시작)
    pub async fn write_command(&mut self, data: &[u8]) -> Result<()> {
        self.write_packet(data, 0).await
    }
}

/// 서버 greeting 패킷
#[derive(Debug)]
pub struct Greeting {
    pub protocol_version: u8,
    pub server_version: String,
    pub thread_id: u32,
    pub scramble: Vec<u8>,
    pub server_capabilities: u32,
    pub server_collation: u8,
    pub server_status: u16,
}

impl Greeting {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let protocol_version = ReadBytesExt::read_u8(&mut cursor)
            .map_err(|e| MonitorError::ProtocolError(format!("Failed to read protocol version: {}", e)))?;

        let server_version = read_null_terminated_string(&mut cursor)?;

        let thread_id = ReadBytesExt::read_u32::<LittleEndian>(&mut cursor)
            .map_err(|e| MonitorError::ProtocolError(format!("Failed to read thread id: {}", e)))?;

        // Auth plugin data part 1 (8 bytes) + filler
        let mut scramble_part1 = [0u8; 8];
        std::io::Read::read_exact(&mut cursor, &mut scramble_part1)
            .map_err(|e| MonitorError::ProtocolError(format!("Failed to read scramble: {}", e)))?;
        ReadBytesExt::read_u8(&mut cursor)
            .map_err(|e| MonitorError::ProtocolError(format!("Failed to read filler: {}", e)))?;

        let capabilities_lower = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)
            .map_err(|e| MonitorError::ProtocolError(format!("Failed to read capabilities: {}", e)))?;
        let server_collation = ReadBytesExt::read_u8(&mut cursor)
            .map_err(|e| MonitorError::ProtocolError(format!("Failed to read collation: {}", e)))?;
        let server_status = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)
            .map_err(|e| MonitorError::ProtocolError(format!("Failed to read status: {}", e)))?;
        let capabilities_upper = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)
            .map_err(|e| MonitorError::ProtocolError(format!("Failed to read capabilities: {}", e)))?;

        let server_capabilities = (capabilities_upper as u32) << 16 | capabilities_lower as u32;

        let auth_data_len = ReadBytesExt::read_u8(&mut cursor)
            .map_err(|e| MonitorError::ProtocolError(format!("Failed to read auth data length: {}", e)))?;

        let mut reserved = [0u8; 10];
        std::io::Read::read_exact(&mut cursor, &mut reserved)
            .map_err(|e| MonitorError::ProtocolError(format!("Failed to read reserved: {}", e)))?;

        // Auth plugin data part 2: 최소 13 bytes, 마지막 NUL 제외
        let part2_len = std::cmp::max(13, auth_data_len.saturating_sub(8)) as usize;
        let mut scramble_part2 = vec![0u8; part2_len];
        std::io::Read::read_exact(&mut cursor, &mut scramble_part2)
            .map_err(|e| MonitorError::ProtocolError(format!("Failed to read scramble: {}", e)))?;

        let mut scramble = scramble_part1.to_vec();
        scramble.extend_from_slice(&scramble_part2[..part2_len - 1]);

        Ok(Greeting {
            protocol_version,
            server_version,
            thread_id,
            scramble,
            server_capabilities,
            server_collation,
            server_status,
        })
    }
}

/// mysql_native_password 스크램블:
/// XOR(SHA1(password), SHA1(scramble + SHA1(SHA1(password))))
pub fn scramble_password(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = sha1(password.as_bytes());
    let stage2 = sha1(&stage1);

    let mut combined = scramble.to_vec();
    combined.extend_from_slice(&stage2);
    let stage3 = sha1(&combined);

    stage1
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

fn sha1(data: &[u8]) -> Vec<u8> {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// 핸드셰이크 응답 패킷 생성
pub fn handshake_response(
    username: &str,
    password: &str,
    database: Option<&str>,
    scramble: &[u8],
    collation: u8,
) -> Result<Vec<u8>> {
    let mut capabilities = capability::LONG_PASSWORD
        | capability::LONG_FLAG
        | capability::PROTOCOL_41
        | capability::SECURE_CONNECTION
        | capability::PLUGIN_AUTH;

    if database.is_some() {
        capabilities |= capability::CONNECT_WITH_DB;
    }

    let mut buffer = Vec::new();
    WriteBytesExt::write_u32::<LittleEndian>(&mut buffer, capabilities)?;
    // Max packet size: 0 = 서버 기본값
    WriteBytesExt::write_u32::<LittleEndian>(&mut buffer, 0)?;
    WriteBytesExt::write_u8(&mut buffer, collation)?;
    std::io::Write::write_all(&mut buffer, &[0u8; 23])?;

    std::io::Write::write_all(&mut buffer, username.as_bytes())?;
    WriteBytesExt::write_u8(&mut buffer, 0)?;

    let auth_response = scramble_password(password, scramble);
    WriteBytesExt::write_u8(&mut buffer, auth_response.len() as u8)?;
    std::io::Write::write_all(&mut buffer, &auth_response)?;

    if let Some(db) = database {
        std::io::Write::write_all(&mut buffer, db.as_bytes())?;
        WriteBytesExt::write_u8(&mut buffer, 0)?;
    }

    std::io::Write::write_all(&mut buffer, b"mysql_native_password")?;
    WriteBytesExt::write_u8(&mut buffer, 0)?;

    Ok(buffer)
}

/// COM_QUERY 패킷 본문 생성
pub fn com_query(sql: &str) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(1 + sql.len());
    buffer.push(COM_QUERY);
    buffer.extend_from_slice(sql.as_bytes());
    buffer
}

/// null로 끝나는 문자열 읽기
fn read_null_terminated_string<R: Read>(reader: &mut R) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        let byte = reader
            .read_u8()
            .map_err(|e| MonitorError::ProtocolError(format!("Failed to read string byte: {}", e)))?;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }

    String::from_utf8(bytes)
        .map_err(|e| MonitorError::ProtocolError(format!("Invalid UTF-8 in string: {}", e)))
}

/// ERR 패킷 여부
pub fn is_error_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0xFF
}

/// OK 패킷 여부
pub fn is_ok_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0x00
}

/// EOF 패킷 여부 (0xFE, 본문 9 bytes 미만)
pub fn is_eof_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0xFE && data.len() < 9
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_classifiers() {
        assert!(is_error_packet(&[0xFF, 0x01, 0x02]));
        assert!(!is_error_packet(&[0x00, 0x01, 0x02]));
        assert!(is_ok_packet(&[0x00, 0x01, 0x02]));
        assert!(is_eof_packet(&[0xFE, 0x00, 0x00]));
        assert!(!is_eof_packet(&[0xFE; 9]));
    }

    #[test]
    fn test_scramble_password() {
        let scramble = [0x40, 0x3B, 0x57, 0x68, 0x3A, 0x77, 0x23, 0x29];
        let response = scramble_password("password", &scramble);
        // SHA1은 20 byte 다이제스트
        assert_eq!(response.len(), 20);

        assert!(scramble_password("", &scramble).is_empty());
    }

    #[test]
    fn test_handshake_response() {
        let scramble = [0x40, 0x3B, 0x57, 0x68, 0x3A, 0x77, 0x23, 0x29];
        let packet =
            handshake_response("repl", "password", Some("testdb"), &scramble, 33).unwrap();

        // capabilities(4) + max packet(4) + collation(1) + reserved(23)
        // + username + auth + db + plugin name
        assert!(packet.len() > 50);
        assert_eq!(&packet[packet.len() - 22..packet.len() - 1], b"mysql_native_password");
    }

    #[test]
    fn test_com_query() {
        let packet = com_query("SELECT 1");
        assert_eq!(packet[0], COM_QUERY);
        assert_eq!(&packet[1..], b"SELECT 1");
    }
}
