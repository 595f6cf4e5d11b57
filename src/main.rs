/// MySQL DDL 모니터
///
/// 대상 서버의 binlog 복제 스트림을 구독하여 스키마 변경 구문을
/// 롤링 로그 파일과 콘솔에 기록합니다.
use mysql_ddl_monitor::config::MonitorSettings;
use mysql_ddl_monitor::connection::MySqlConnection;
use mysql_ddl_monitor::monitor::{DdlMonitor, MonitorConfig};
use mysql_ddl_monitor::offset::BinlogPosition;
use mysql_ddl_monitor::replication::ReplicationClient;
use std::env;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 설정: 인자로 받은 경로 → ./config.toml → 환경 변수 순서
    let (settings, settings_source) = match env::args().nth(1) {
        Some(path) => (MonitorSettings::from_file(&path)?, path),
        None => match MonitorSettings::from_file("config.toml") {
            Ok(settings) => (settings, "config.toml".to_string()),
            Err(_) => (MonitorSettings::from_env(), "environment".to_string()),
        },
    };

    // DDL 로그: 일 단위 롤링 파일 + 콘솔
    let file_appender =
        tracing_appender::rolling::daily(&settings.log.directory, &settings.log.file_name);
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(file_writer.and(std::io::stdout))
        .with_ansi(false)
        .init();

    info!(
        "Starting MySQL DDL monitor ({} flavor, settings from {})",
        settings.server.flavor, settings_source
    );

    // 부트스트랩: 시작 binlog 위치와 서버 메타데이터 조회
    let mut conn = MySqlConnection::connect(settings.connection_config()).await?;

    let server_version = conn.get_server_version().await?;
    let server_id = conn.get_server_id().await?;
    info!(
        "Connected to {}:{} (version {}, server_id {})",
        settings.server.host, settings.server.port, server_version, server_id
    );

    if server_id == settings.server.server_id {
        warn!(
            "Replication server_id {} collides with the monitored server",
            settings.server.server_id
        );
    }

    match conn.get_binlog_format().await {
        Ok(format) => {
            info!("Binlog format: {}", format);
            if format != "STATEMENT" {
                info!("Row-based DML will not appear as query events, DDL still will");
            }
        }
        Err(e) => warn!("Failed to query binlog format: {}", e),
    }

    let status = conn.get_binlog_status().await?;
    info!(
        "Current binlog: {} at position {}",
        status.file, status.position
    );
    conn.close().await?;

    let start = BinlogPosition::new(status.file, status.position);

    // 디스패치 루프 + 이벤트 소스
    let (monitor, mut records) = DdlMonitor::new(MonitorConfig {
        ddl_only: settings.monitor.ddl_only,
    });
    monitor.set_position(start.filename.clone(), start.position);
    let position = monitor.position_handle();

    let client = ReplicationClient::new(
        settings.connection_config(),
        settings.server.flavor,
        start,
    );
    let events = client.start_streaming().await?;

    // Ctrl-C → 셧다운 신호
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    // 레코드 싱크: 구조화 레코드의 JSON 사본
    let sink = tokio::spawn(async move {
        while let Some(record) = records.recv().await {
            debug!("{}", record.to_json());
        }
    });

    let result = monitor.run(events, shutdown_rx).await;
    let _ = sink.await;

    info!("Last observed position: {}", position.read());

    match result {
        Ok(()) => {
            info!("DDL monitor stopped");
            Ok(())
        }
        Err(e) => {
            error!("DDL monitor terminated: {}", e);
            Err(e.into())
        }
    }
}
