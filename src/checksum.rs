//! Binlog 체크섬 정책
//!
//! 서버가 이벤트 꼬리에 체크섬을 붙이는지 여부는 서버 버전에 따라 결정됩니다:
//! MySQL >= 5.6.1, MariaDB >= 5.3.0 부터 체크섬이 존재합니다.
//! 실제 사용 중인 알고리즘은 format description 이벤트 안의 바이트가 권위적이며,
//! 버전 비교는 해당 바이트의 존재 여부를 판정하는 데만 쓰입니다.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 이벤트 꼬리의 체크섬 길이 (4 bytes)
pub const BINLOG_CHECKSUM_LENGTH: usize = 4;

/// 체크섬 없이 생성된 이벤트
pub const BINLOG_CHECKSUM_ALG_OFF: u8 = 0;
/// zlib 계열 CRC32
pub const BINLOG_CHECKSUM_ALG_CRC32: u8 = 1;
/// 아직 결정되지 않았거나 체크섬을 모르는 서버의 이벤트
pub const BINLOG_CHECKSUM_ALG_UNDEF: u8 = 255;

/// 체크섬 버전 하한 (MySQL): 5.6.1
const CHECKSUM_VERSION_SPLIT_MYSQL: (u32, u32, u32) = (5, 6, 1);

/// 체크섬 버전 하한 (MariaDB): 5.3.0
const CHECKSUM_VERSION_SPLIT_MARIADB: (u32, u32, u32) = (5, 3, 0);

/// Binlog 이벤트 체크섬 알고리즘
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChecksumAlgorithm {
    /// 체크섬 비활성
    Off = BINLOG_CHECKSUM_ALG_OFF,
    /// CRC32 체크섬 (꼬리 4 bytes)
    Crc32 = BINLOG_CHECKSUM_ALG_CRC32,
    /// 미확정
    Undefined = BINLOG_CHECKSUM_ALG_UNDEF,
}

impl ChecksumAlgorithm {
    /// format description 이벤트의 알고리즘 바이트에서 변환.
    /// 알 수 없는 코드는 Undefined로 취급하여 꼬리를 제거하지 않습니다.
    pub fn from_u8(val: u8) -> Self {
        match val {
            BINLOG_CHECKSUM_ALG_OFF => ChecksumAlgorithm::Off,
            BINLOG_CHECKSUM_ALG_CRC32 => ChecksumAlgorithm::Crc32,
            _ => ChecksumAlgorithm::Undefined,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Off => "OFF",
            ChecksumAlgorithm::Crc32 => "CRC32",
            ChecksumAlgorithm::Undefined => "UNDEFINED",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 서버 버전 문자열을 (major, minor, patch)로 분해.
/// patch는 첫 비숫자 문자에서 파싱을 멈춥니다 ("5.7.30-log", "10.4.12-MariaDB" 등).
/// 구성 요소가 3개 미만이면 (0, 0, 0).
pub fn split_server_version(server: &str) -> (u32, u32, u32) {
    let mut parts = server.split('.');

    let (Some(major), Some(minor), Some(patch)) = (parts.next(), parts.next(), parts.next())
    else {
        return (0, 0, 0);
    };

    let major = major.parse().unwrap_or(0);
    let minor = minor.parse().unwrap_or(0);
    let digits: String = patch.chars().take_while(|c| c.is_ascii_digit()).collect();
    let patch = digits.parse().unwrap_or(0);

    (major, minor, patch)
}

/// (major, minor, patch)를 (major*256+minor)*256+patch 로 패킹
fn version_product(version: (u32, u32, u32)) -> u32 {
    (version.0 * 256 + version.1) * 256 + version.2
}

/// 서버 버전 문자열의 패킹된 버전 값 계산
pub fn calc_version_product(server: &str) -> u32 {
    version_product(split_server_version(server))
}

/// 해당 서버에서 체크섬이 존재하기 시작하는 버전 하한 (패킹 값).
/// 버전 문자열에 "mariadb"가 포함되면 MariaDB 하한을 사용합니다.
pub fn checksum_version_product(server: &str) -> u32 {
    if server.to_lowercase().contains("mariadb") {
        version_product(CHECKSUM_VERSION_SPLIT_MARIADB)
    } else {
        version_product(CHECKSUM_VERSION_SPLIT_MYSQL)
    }
}

/// 서버 버전이 체크섬 하한을 충족하는지 여부
pub fn version_supports_checksum(server: &str) -> bool {
    calc_version_product(server) >= checksum_version_product(server)
}
