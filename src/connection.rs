//! MySQL 데이터베이스 연결 관리
//!
//! 복제 스트림을 열기 전에 한 번 사용하는 부트스트랩 연결입니다.
//! 시작 binlog 위치와 서버 메타데이터 조회만 담당합니다.

use crate::error::{MonitorError, Result};
use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder};
use std::time::Duration;

/// MySQL 연결 설정
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: Option<String>,
    /// 복제 클라이언트가 자신을 식별하는 server_id.
    /// 모니터 대상 서버의 server_id와 달라야 합니다.
    pub server_id: u32,
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            hostname: "localhost".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: String::new(),
            database: None,
            server_id: 1001,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectionConfig {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>) -> Self {
        ConnectionConfig {
            hostname: hostname.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    fn build_opts(&self) -> OptsBuilder {
        OptsBuilder::default()
            .ip_or_hostname(self.hostname.clone())
            .tcp_port(self.port)
            .user(Some(self.username.clone()))
            .pass(Some(self.password.clone()))
            .db_name(self.database.clone())
    }
}

/// 현재 binlog 상태 (시작 위치)
#[derive(Debug, Clone)]
pub struct BinlogStatus {
    pub file: String,
    pub position: u64,
}

/// MySQL 연결 래퍼
pub struct MySqlConnection {
    conn: Conn,
    config: ConnectionConfig,
}

impl MySqlConnection {
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        let mut conn = Conn::new(config.build_opts())
            .await
            .map_err(|e| MonitorError::ConnectionError(format!("Failed to connect to MySQL: {}", e)))?;

        conn.ping()
            .await
            .map_err(|e| MonitorError::ConnectionError(format!("Ping failed: {}", e)))?;

        Ok(MySqlConnection { conn, config })
    }

    /// Binlog 상태 조회 (시작 위치)
    ///
    /// MariaDB는 Executed_Gtid_Set 컬럼이 없어 행 단위로 접근합니다.
    pub async fn get_binlog_status(&mut self) -> Result<BinlogStatus> {
        let row: Option<mysql_async::Row> = self
            .conn
            .query_first("SHOW MASTER STATUS")
            .await
            .map_err(|e| MonitorError::QueryError(format!("Failed to query binlog status: {}", e)))?;

        let row = row.ok_or_else(|| {
            MonitorError::QueryError(
                "No binlog status available (is log_bin enabled?)".to_string(),
            )
        })?;

        let file: Option<String> = row.get("File");
        let position: Option<u64> = row.get("Position");

        match (file, position) {
            (Some(file), Some(position)) => Ok(BinlogStatus { file, position }),
            _ => Err(MonitorError::QueryError(
                "Malformed binlog status row".to_string(),
            )),
        }
    }

    /// 서버 버전 문자열 조회 (flavor 확인용)
    pub async fn get_server_version(&mut self) -> Result<String> {
        let result: Option<(String,)> = self
            .conn
            .query_first("SELECT VERSION()")
            .await
            .map_err(|e| MonitorError::QueryError(format!("Failed to query version: {}", e)))?;

        result
            .map(|(version,)| version)
            .ok_or_else(|| MonitorError::QueryError("Server version not available".to_string()))
    }

    /// 모니터 대상 서버의 server_id 조회
    pub async fn get_server_id(&mut self) -> Result<u32> {
        let result: Option<(u32,)> = self
            .conn
            .query_first("SELECT @@server_id")
            .await
            .map_err(|e| MonitorError::QueryError(format!("Failed to query server_id: {}", e)))?;

        Ok(result.map(|(id,)| id).unwrap_or(self.config.server_id))
    }

    /// 전역 변수 조회
    pub async fn get_variable(&mut self, name: &str) -> Result<Option<String>> {
        let query = format!("SHOW GLOBAL VARIABLES LIKE '{}'", name);
        let result: Vec<(String, String)> = self
            .conn
            .query(&query)
            .await
            .map_err(|e| MonitorError::QueryError(format!("Failed to query {}: {}", name, e)))?;

        Ok(result.into_iter().next().map(|(_, value)| value))
    }

    /// Binlog 형식 확인 (STATEMENT, ROW, MIXED)
    ///
    /// DDL은 어느 형식에서든 쿼리 이벤트로 기록되지만, STATEMENT가 아니면
    /// DML은 행 이벤트로 흘러 이 모니터의 관찰 대상에서 제외됩니다.
    pub async fn get_binlog_format(&mut self) -> Result<String> {
        self.get_variable("binlog_format")
            .await?
            .ok_or_else(|| MonitorError::QueryError("Binlog format not found".to_string()))
    }

    pub async fn close(self) -> Result<()> {
        self.conn
            .disconnect()
            .await
            .map_err(|e| MonitorError::ConnectionError(format!("Failed to disconnect: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_default() {
        let config = ConnectionConfig::default();
        assert_eq!(config.hostname, "localhost");
        assert_eq!(config.port, 3306);
        assert_eq!(config.database, None);
    }

    #[test]
    fn test_connection_config_new() {
        let config = ConnectionConfig::new("127.0.0.1", "repl");
        assert_eq!(config.hostname, "127.0.0.1");
        assert_eq!(config.username, "repl");
    }
}
