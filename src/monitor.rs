//! DDL 모니터 - 이벤트 디스패치 루프
//!
//! 이벤트 소스에서 raw 이벤트를 하나씩 꺼내 처리합니다:
//! 1. 헤더 디코딩 및 타입 분류
//! 2. format description 이벤트에서 체크섬 알고리즘 상태 갱신
//! 3. rotate / query 이벤트 본문 디코딩 (현재 체크섬 상태 적용)
//! 4. 노이즈 필터링 후 구조화 레코드 방출
//!
//! 디코드 실패는 해당 이벤트에 국한되고 루프는 계속됩니다.
//! 소스가 닫히면 루프는 에러로 종료되며, 셧다운 신호로는 정상 종료됩니다.

use crate::binlog::{BinlogParser, EVENT_HEADER_SIZE};
use crate::checksum::ChecksumAlgorithm;
use crate::error::{MonitorError, Result};
use crate::events::{DdlRecord, EventHeader, EventType};
use crate::offset::BinlogPosition;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// 임시 파일 생성 쿼리 이벤트의 헤더 플래그 값 (로그에서 제외)
const QUERY_TMP_FILE_FLAGS: u16 = 8;

/// 권한 캐시 갱신 구문 (노이즈로 제외)
const FLUSH_PRIVILEGES: &str = "FLUSH PRIVILEGES";

/// 모니터 설정
#[derive(Debug, Clone, Default)]
pub struct MonitorConfig {
    /// true면 DDL 키워드로 시작하는 구문만 방출
    pub ddl_only: bool,
}

/// DDL 레코드 수신자
pub type DdlRecordReceiver = mpsc::UnboundedReceiver<DdlRecord>;

/// DDL 모니터 디스패치 루프
pub struct DdlMonitor {
    config: MonitorConfig,
    /// 마지막 format description 이벤트가 알려준 체크섬 알고리즘.
    /// 이후의 모든 본문 디코딩에 파라미터로 전달됩니다.
    checksum_algorithm: ChecksumAlgorithm,
    saw_first_rotate: bool,
    position: Arc<RwLock<BinlogPosition>>,
    records_tx: mpsc::UnboundedSender<DdlRecord>,
}

impl DdlMonitor {
    pub fn new(config: MonitorConfig) -> (Self, DdlRecordReceiver) {
        let (records_tx, records_rx) = mpsc::unbounded_channel();

        let monitor = DdlMonitor {
            config,
            checksum_algorithm: ChecksumAlgorithm::Off,
            saw_first_rotate: false,
            position: Arc::new(RwLock::new(BinlogPosition::new(String::new(), 0))),
            records_tx,
        };

        (monitor, records_rx)
    }

    /// 시작 위치 설정 (부트스트랩에서 한 번 호출)
    pub fn set_position(&self, filename: String, position: u64) {
        *self.position.write() = BinlogPosition::new(filename, position);
    }

    /// 처리 위치 공유 핸들 (루프 실행 중 외부 관찰용)
    pub fn position_handle(&self) -> Arc<RwLock<BinlogPosition>> {
        Arc::clone(&self.position)
    }

    /// 디스패치 루프 실행
    ///
    /// `events`가 닫히면 `SourceClosed`로 종료하고, `shutdown` 신호가 오면
    /// 정상 종료합니다. 신호 시점에 수신 중이던 이벤트는 처리하지 않습니다.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<Bytes>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!("Starting DDL monitor loop from {}", self.position.read());

        loop {
            let raw = tokio::select! {
                _ = shutdown.changed() => {
                    info!("Shutdown requested, stopping DDL monitor loop");
                    return Ok(());
                }
                event = events.recv() => match event {
                    Some(raw) => raw,
                    None => {
                        warn!("Event source closed");
                        return Err(MonitorError::SourceClosed);
                    }
                },
            };

            if let Err(e) = self.dispatch(&raw) {
                warn!("Failed to decode event, skipping: {}", e);
            }
        }
    }

    /// 이벤트 한 건 처리
    fn dispatch(&mut self, raw: &[u8]) -> Result<()> {
        let header = BinlogParser::parse_header(raw)?;
        let body = &raw[EVENT_HEADER_SIZE..];

        match header.event_type {
            EventType::FormatDescriptionEvent => self.handle_format_description(body),
            EventType::RotateEvent => self.handle_rotate(body),
            EventType::QueryEvent => self.handle_query(&header, body),
            // 다른 타입은 디코드 없이 무시
            _ => Ok(()),
        }
    }

    fn handle_format_description(&mut self, body: &[u8]) -> Result<()> {
        let fde = BinlogParser::parse_format_description(body)?;

        if fde.event_header_length as usize != EVENT_HEADER_SIZE {
            // 경고만 하고 고정 19 byte 가정으로 계속 진행
            warn!(
                "invalid event header length {}, must {}",
                fde.event_header_length, EVENT_HEADER_SIZE
            );
        }

        info!(
            "Format description: server version {}, binlog version {}, checksum {}",
            fde.server_version, fde.binlog_version, fde.checksum_algorithm
        );

        self.checksum_algorithm = fde.checksum_algorithm;
        Ok(())
    }

    fn handle_rotate(&mut self, body: &[u8]) -> Result<()> {
        let rotate = BinlogParser::parse_rotate(body, self.checksum_algorithm)?;

        if !self.saw_first_rotate {
            self.saw_first_rotate = true;
            debug!("First rotate event in this stream");
        }

        info!(
            "rotate to ({}, {})",
            rotate.next_binlog_name, rotate.position
        );

        self.position
            .write()
            .rotate(rotate.next_binlog_name, rotate.position);
        Ok(())
    }

    fn handle_query(&mut self, header: &EventHeader, body: &[u8]) -> Result<()> {
        // 임시 파일 생성 이벤트는 본문 디코딩 없이 건너뜀
        if header.flags == QUERY_TMP_FILE_FLAGS {
            debug!("Skipping temporary file query event");
            return Ok(());
        }

        let query_event = BinlogParser::parse_query(body, self.checksum_algorithm)?;

        // 억제 여부와 무관하게 처리 위치는 전진
        self.position.write().advance(header.log_pos as u64);

        if query_event.query.trim().to_uppercase() == FLUSH_PRIVILEGES {
            debug!("Skipping FLUSH PRIVILEGES");
            return Ok(());
        }

        if self.config.ddl_only && !is_ddl_statement(&query_event.query) {
            return Ok(());
        }

        let record = DdlRecord::new(header, &query_event);
        info!("{}", record);

        // 수신자가 사라져도 루프는 계속됨
        if self.records_tx.send(record).is_err() {
            warn!("Record receiver dropped, emission skipped");
        }

        Ok(())
    }
}

/// 선행 키워드 기준의 DDL 구문 판별
fn is_ddl_statement(query: &str) -> bool {
    let upper = query.trim_start().to_uppercase();
    ["CREATE", "ALTER", "DROP", "RENAME", "TRUNCATE"]
        .iter()
        .any(|keyword| upper.starts_with(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::io::Write;

    fn build_event(event_type: u8, flags: u16, payload: &[u8]) -> Bytes {
        let mut raw = Vec::new();
        raw.write_u32::<LittleEndian>(1593679068).unwrap();
        raw.write_u8(event_type).unwrap();
        raw.write_u32::<LittleEndian>(1).unwrap();
        raw.write_u32::<LittleEndian>((EVENT_HEADER_SIZE + payload.len()) as u32)
            .unwrap();
        raw.write_u32::<LittleEndian>(500).unwrap();
        raw.write_u16::<LittleEndian>(flags).unwrap();
        raw.write_all(payload).unwrap();
        Bytes::from(raw)
    }

    fn build_format_description(server_version: &str, algorithm: u8) -> Bytes {
        let mut payload = Vec::new();
        payload.write_u16::<LittleEndian>(4).unwrap();
        let mut version = [0u8; 50];
        version[..server_version.len()].copy_from_slice(server_version.as_bytes());
        payload.write_all(&version).unwrap();
        payload.write_u32::<LittleEndian>(0).unwrap();
        payload.write_u8(EVENT_HEADER_SIZE as u8).unwrap();
        payload.write_all(&[0u8; 38]).unwrap();
        payload.write_u8(algorithm).unwrap();
        payload.write_all(&[0, 0, 0, 0]).unwrap();
        build_event(15, 0, &payload)
    }

    fn build_query(flags: u16, schema: &str, query: &str, with_checksum: bool) -> Bytes {
        let mut payload = Vec::new();
        payload.write_u32::<LittleEndian>(7).unwrap();
        payload.write_u32::<LittleEndian>(0).unwrap();
        payload.write_u8(schema.len() as u8).unwrap();
        payload.write_u16::<LittleEndian>(0).unwrap();
        payload.write_u16::<LittleEndian>(0).unwrap();
        payload.write_all(schema.as_bytes()).unwrap();
        payload.write_u8(0).unwrap();
        payload.write_all(query.as_bytes()).unwrap();
        if with_checksum {
            payload.write_all(&[0, 0, 0, 0]).unwrap();
        }
        build_event(2, flags, &payload)
    }

    fn build_rotate(position: u64, next_name: &str) -> Bytes {
        let mut payload = Vec::new();
        payload.write_u64::<LittleEndian>(position).unwrap();
        payload.write_all(next_name.as_bytes()).unwrap();
        build_event(4, 0, &payload)
    }

    async fn run_to_exhaustion(
        monitor: DdlMonitor,
        events: Vec<Bytes>,
    ) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        for event in events {
            tx.send(event).unwrap();
        }
        drop(tx);

        monitor.run(rx, shutdown_rx).await
    }

    #[tokio::test]
    async fn test_query_decoded_with_crc32_state() {
        let (monitor, mut records) = DdlMonitor::new(MonitorConfig::default());

        let result = run_to_exhaustion(
            monitor,
            vec![
                build_format_description("5.7.30", 1),
                build_query(0, "test", "CREATE TABLE t (id INT)", true),
            ],
        )
        .await;
        assert!(matches!(result, Err(MonitorError::SourceClosed)));

        let record = records.recv().await.unwrap();
        assert_eq!(record.event_type, EventType::QueryEvent);
        assert_eq!(record.schema, "test");
        assert_eq!(record.query, "CREATE TABLE t (id INT)");
        assert!(records.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_flush_privileges_suppressed() {
        let (monitor, mut records) = DdlMonitor::new(MonitorConfig::default());
        let position = monitor.position_handle();

        let result = run_to_exhaustion(
            monitor,
            vec![build_query(0, "mysql", "  flush privileges  ", false)],
        )
        .await;
        assert!(matches!(result, Err(MonitorError::SourceClosed)));
        assert!(records.recv().await.is_none());

        // 억제된 이벤트도 처리 위치는 전진
        assert_eq!(position.read().position, 500);
    }

    #[tokio::test]
    async fn test_tmp_file_flags_suppressed() {
        let (monitor, mut records) = DdlMonitor::new(MonitorConfig::default());

        // 본문이 깨져 있어도 플래그만으로 버려져야 함
        let result =
            run_to_exhaustion(monitor, vec![build_event(2, 8, &[1, 2, 3])]).await;
        assert!(matches!(result, Err(MonitorError::SourceClosed)));
        assert!(records.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_rotate_updates_position() {
        let (monitor, _records) = DdlMonitor::new(MonitorConfig::default());
        monitor.set_position("bin.000001".to_string(), 154);
        let position = monitor.position_handle();

        let result = run_to_exhaustion(monitor, vec![build_rotate(4, "bin.000002")]).await;
        assert!(matches!(result, Err(MonitorError::SourceClosed)));

        assert_eq!(
            *position.read(),
            BinlogPosition::new("bin.000002".to_string(), 4)
        );
    }

    #[tokio::test]
    async fn test_malformed_event_does_not_stop_loop() {
        let (monitor, mut records) = DdlMonitor::new(MonitorConfig::default());

        let result = run_to_exhaustion(
            monitor,
            vec![
                Bytes::from_static(&[1, 2, 3]),
                build_query(0, "test", "DROP TABLE t", false),
            ],
        )
        .await;
        assert!(matches!(result, Err(MonitorError::SourceClosed)));

        // 깨진 이벤트 다음의 정상 이벤트는 그대로 처리됨
        let record = records.recv().await.unwrap();
        assert_eq!(record.query, "DROP TABLE t");
    }

    #[tokio::test]
    async fn test_ddl_only_filter() {
        let config = MonitorConfig { ddl_only: true };
        let (monitor, mut records) = DdlMonitor::new(config);

        let result = run_to_exhaustion(
            monitor,
            vec![
                build_query(0, "test", "INSERT INTO t VALUES (1)", false),
                build_query(0, "test", "ALTER TABLE t ADD COLUMN c INT", false),
            ],
        )
        .await;
        assert!(matches!(result, Err(MonitorError::SourceClosed)));

        let record = records.recv().await.unwrap();
        assert_eq!(record.query, "ALTER TABLE t ADD COLUMN c INT");
        assert!(records.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_loop() {
        let (monitor, _records) = DdlMonitor::new(MonitorConfig::default());
        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(monitor.run(rx, shutdown_rx));
        shutdown_tx.send(true).unwrap();

        {
            use tokio_test::assert_ok;
            assert_ok!(handle.await.unwrap());
        }
        drop(tx);
    }

    #[test]
    fn test_is_ddl_statement() {
        assert!(is_ddl_statement("CREATE TABLE t (id INT)"));
        assert!(is_ddl_statement("  alter table t drop column c"));
        assert!(is_ddl_statement("TRUNCATE t"));
        assert!(!is_ddl_statement("INSERT INTO t VALUES (1)"));
        assert!(!is_ddl_statement("BEGIN"));
    }
}
