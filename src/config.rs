//! 모니터 설정 로딩
//!
//! TOML 설정 파일 (`[server]`, `[monitor]`, `[log]`)을 읽고,
//! 파일이 없는 환경을 위해 환경 변수 폴백을 제공합니다.

use crate::connection::ConnectionConfig;
use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// 복제 프로토콜 flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerFlavor {
    MySql,
    MariaDb,
}

impl Default for ServerFlavor {
    fn default() -> Self {
        ServerFlavor::MySql
    }
}

impl FromStr for ServerFlavor {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mysql" => Ok(ServerFlavor::MySql),
            "mariadb" => Ok(ServerFlavor::MariaDb),
            _ => Err(MonitorError::ConfigError(format!(
                "unknown flavor '{}', must be mysql or mariadb",
                s
            ))),
        }
    }
}

impl fmt::Display for ServerFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerFlavor::MySql => write!(f, "mysql"),
            ServerFlavor::MariaDb => write!(f, "mariadb"),
        }
    }
}

/// 모니터 대상 서버 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default)]
    pub flavor: ServerFlavor,
    /// 복제 클라이언트의 server_id (대상 서버와 달라야 함)
    pub server_id: u32,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub database: Option<String>,
}

/// 필터링 옵션
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorOptions {
    /// true면 DDL 키워드로 시작하는 구문만 기록
    #[serde(default)]
    pub ddl_only: bool,
}

/// DDL 로그 파일 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_directory")]
    pub directory: String,
    #[serde(default = "default_log_file")]
    pub file_name: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            directory: default_log_directory(),
            file_name: default_log_file(),
        }
    }
}

fn default_port() -> u16 {
    3306
}

fn default_log_directory() -> String {
    "logs".to_string()
}

fn default_log_file() -> String {
    "ddl.log".to_string()
}

/// 전체 모니터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    pub server: ServerSettings,
    #[serde(default)]
    pub monitor: MonitorOptions,
    #[serde(default)]
    pub log: LogSettings,
}

impl MonitorSettings {
    /// TOML 설정 파일 읽기
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            MonitorError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        toml::from_str(&text).map_err(|e| {
            MonitorError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// 환경 변수 폴백 (설정 파일이 없을 때)
    pub fn from_env() -> Self {
        let flavor = env::var("DB_FLAVOR")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        MonitorSettings {
            server: ServerSettings {
                flavor,
                server_id: env::var("DB_SERVER_ID")
                    .unwrap_or_else(|_| "1001".to_string())
                    .parse()
                    .unwrap_or(1001),
                host: env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: env::var("DB_PORT")
                    .unwrap_or_else(|_| "3306".to_string())
                    .parse()
                    .unwrap_or(3306),
                username: env::var("DB_USER").unwrap_or_else(|_| "root".to_string()),
                password: env::var("DB_PASSWORD").unwrap_or_default(),
                database: env::var("DB_NAME").ok(),
            },
            monitor: MonitorOptions::default(),
            log: LogSettings::default(),
        }
    }

    /// 부트스트랩/복제 연결 설정으로 변환
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            hostname: self.server.host.clone(),
            port: self.server.port,
            username: self.server.username.clone(),
            password: self.server.password.clone(),
            database: self.server.database.clone(),
            server_id: self.server.server_id,
            timeout: Duration::from_secs(30),
        }
    }
}
