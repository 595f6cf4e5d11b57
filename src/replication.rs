//! MySQL 복제 스트림 클라이언트
//!
//! 핸드셰이크 → 인증 → 체크섬 협상 → COM_BINLOG_DUMP 순서로 스트림을 열고,
//! 수신한 raw 이벤트 버퍼를 채널로 전달합니다. 채널이 닫히는 것이 곧
//! 디스패치 루프에 대한 소스 종료 신호입니다.

use crate::config::ServerFlavor;
use crate::connection::ConnectionConfig;
use crate::error::{MonitorError, Result};
use crate::offset::BinlogPosition;
use crate::protocol::{self, Greeting, PacketChannel, COM_BINLOG_DUMP};
use byteorder::{LittleEndian, WriteBytesExt};
use bytes::Bytes;
use std::io::Write;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Binlog 복제 스트림 클라이언트
pub struct ReplicationClient {
    config: ConnectionConfig,
    flavor: ServerFlavor,
    start: BinlogPosition,
}

impl ReplicationClient {
    pub fn new(config: ConnectionConfig, flavor: ServerFlavor, start: BinlogPosition) -> Self {
        ReplicationClient {
            config,
            flavor,
            start,
        }
    }

    /// 스트리밍 시작. 수신자가 raw 이벤트 버퍼(19 byte 헤더로 시작)를 받습니다.
    pub async fn start_streaming(&self) -> Result<mpsc::UnboundedReceiver<Bytes>> {
        let (tx, rx) = mpsc::unbounded_channel();

        info!(
            "Starting binlog streaming from {}:{}",
            self.start.filename, self.start.position
        );

        let config = self.config.clone();
        let flavor = self.flavor;
        let start = self.start.clone();

        tokio::spawn(async move {
            match Self::stream_events(config, flavor, start, tx).await {
                Ok(_) => info!("Binlog streaming ended"),
                Err(e) => error!("Binlog streaming error: {}", e),
            }
            // 여기서 tx가 drop되어 소스 종료가 모니터에 전달됨
        });

        Ok(rx)
    }

    async fn stream_events(
        config: ConnectionConfig,
        flavor: ServerFlavor,
        start: BinlogPosition,
        tx: mpsc::UnboundedSender<Bytes>,
    ) -> Result<()> {
        let mut channel = PacketChannel::connect(&config.hostname, config.port).await?;

        let greeting_packet = channel.read_packet().await?;
        let greeting = Greeting::parse(&greeting_packet)?;

        info!(
            "MySQL server version: {}, thread id: {}",
            greeting.server_version, greeting.thread_id
        );

        let auth_response = protocol::handshake_response(
            &config.username,
            &config.password,
            config.database.as_deref(),
            &greeting.scramble,
            greeting.server_collation,
        )?;
        channel.write_packet(&auth_response, 1).await?;

        let auth_result = channel.read_packet().await?;
        if protocol::is_error_packet(&auth_result) {
            return Err(MonitorError::ConnectionError(
                "Authentication failed".to_string(),
            ));
        }

        info!("Authentication successful");

        // 체크섬 지원 서버는 이 변수 없이는 dump 요청을 거부함.
        // 체크섬을 끄지 않고 그대로 받아 디코딩 단계에서 제거함.
        Self::run_query(
            &mut channel,
            "SET @master_binlog_checksum = @@global.binlog_checksum",
        )
        .await?;

        if flavor == ServerFlavor::MariaDb {
            Self::run_query(&mut channel, "SET @mariadb_slave_capability = 4").await?;
        }

        let dump_command = Self::binlog_dump_command(config.server_id, &start)?;
        channel.write_command(&dump_command).await?;

        info!(
            "Sent COM_BINLOG_DUMP: file={}, position={}",
            start.filename, start.position
        );

        loop {
            let packet = channel.read_packet().await?;

            if protocol::is_error_packet(&packet) {
                return Err(Self::server_error(&packet));
            }

            if protocol::is_eof_packet(&packet) {
                info!("Received EOF packet, stream ended");
                return Ok(());
            }

            // 이벤트 패킷: OK 바이트(0x00) 뒤가 raw 이벤트
            if packet.len() <= 1 {
                continue;
            }

            let event = Bytes::copy_from_slice(&packet[1..]);
            if tx.send(event).is_err() {
                info!("Event consumer dropped, stopping stream");
                return Ok(());
            }
        }
    }

    /// 세션 변수 설정 등 단순 쿼리 실행. 거부되어도 스트림 시도는 계속합니다.
    async fn run_query(channel: &mut PacketChannel, sql: &str) -> Result<()> {
        channel.write_command(&protocol::com_query(sql)).await?;

        let result = channel.read_packet().await?;
        if protocol::is_error_packet(&result) {
            warn!("Query rejected by server, continuing anyway: {}", sql);
        }

        Ok(())
    }

    /// COM_BINLOG_DUMP 명령어 생성
    fn binlog_dump_command(server_id: u32, start: &BinlogPosition) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();

        buffer.write_u8(COM_BINLOG_DUMP)?;
        buffer.write_u32::<LittleEndian>(start.position as u32)?;
        // flags 0 = 블로킹 모드, 새 이벤트를 기다리며 스트림 유지
        buffer.write_u16::<LittleEndian>(0)?;
        buffer.write_u32::<LittleEndian>(server_id)?;
        buffer.write_all(start.filename.as_bytes())?;

        Ok(buffer)
    }

    /// ERR 패킷을 에러로 변환 (0xFF + code 2 bytes + sql state 6 bytes + 메시지)
    fn server_error(packet: &[u8]) -> MonitorError {
        if packet.len() > 9 {
            let code = u16::from_le_bytes([packet[1], packet[2]]);
            let message = String::from_utf8_lossy(&packet[9..]);
            MonitorError::ProtocolError(format!("Server error {}: {}", code, message))
        } else {
            MonitorError::ProtocolError("Server returned an error packet".to_string())
        }
    }
}
