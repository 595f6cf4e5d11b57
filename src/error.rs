//! 모니터 관련 에러 타입

use thiserror::Error;
use std::io;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("MySQL 연결 에러: {0}")]
    ConnectionError(String),

    #[error("이벤트 헤더 에러: {0}")]
    MalformedHeader(String),

    #[error("이벤트 본문이 잘렸습니다: {0}")]
    TruncatedBody(String),

    #[error("쿼리 실행 에러: {0}")]
    QueryError(String),

    #[error("설정 에러: {0}")]
    ConfigError(String),

    #[error("I/O 에러: {0}")]
    IoError(String),

    #[error("프로토콜 에러: {0}")]
    ProtocolError(String),

    #[error("직렬화 에러: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("이벤트 소스가 종료되었습니다")]
    SourceClosed,

    #[error("예상치 못한 에러: {0}")]
    Other(String),
}

impl From<io::Error> for MonitorError {
    fn from(err: io::Error) -> Self {
        MonitorError::IoError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
