use std::net::Ipv4Addr;

use chrono::Utc;
use uuid::Uuid;

const BASE62_ALPHABET: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

const PREFIX_LEN: usize = 6;
const TIME_LEN: usize = 6;
const RANDOM_LEN: usize = 6;
const RANDOM_COUNT: usize = 3;

/// 请求 ID 的固定长度
pub const REQUEST_ID_LEN: usize = PREFIX_LEN + TIME_LEN + RANDOM_LEN * RANDOM_COUNT;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestIdError {
    #[error("Invalid request id length: expected {REQUEST_ID_LEN}, got {0}")]
    InvalidLength(usize),
    #[error("Invalid base62 character: {0:?}")]
    InvalidCharacter(char),
    #[error("Request id segment overflows: {0}")]
    Overflow(String),
}

/// 短请求 ID 生成器
///
/// 格式（base62，共 30 位）：6 位前缀（通常是本机 IPv4）+ 6 位秒级时间戳 + 3 组 6 位随机数。
#[derive(Debug, Clone)]
pub struct RequestIdGenerator {
    prefix: String,
}

impl RequestIdGenerator {
    pub fn new(prefix: [u8; 4]) -> Self {
        let prefix_num = u32::from_be_bytes(prefix);
        Self {
            prefix: pad_left(&encode_base62(u64::from(prefix_num)), PREFIX_LEN),
        }
    }

    pub fn generate(&self) -> String {
        let now = Utc::now().timestamp().max(0) as u64;

        let mut id = String::with_capacity(REQUEST_ID_LEN);
        id.push_str(&self.prefix);
        id.push_str(&pad_left(&encode_base62(now), TIME_LEN));

        let random = Uuid::new_v4();
        for chunk in random.as_bytes().chunks_exact(4).take(RANDOM_COUNT) {
            let n = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            id.push_str(&pad_left(&encode_base62(u64::from(n)), RANDOM_LEN));
        }
        id
    }

    /// 解析出生成时的前缀字节与秒级时间戳
    pub fn decode(id: &str) -> Result<([u8; 4], i64), RequestIdError> {
        if id.len() != REQUEST_ID_LEN || !id.is_ascii() {
            return Err(RequestIdError::InvalidLength(id.chars().count()));
        }

        let prefix = decode_base62(&id[..PREFIX_LEN])?;
        let prefix =
            u32::try_from(prefix).map_err(|_| RequestIdError::Overflow(id[..PREFIX_LEN].to_string()))?;
        let timestamp = decode_base62(&id[PREFIX_LEN..PREFIX_LEN + TIME_LEN])?;

        Ok((prefix.to_be_bytes(), timestamp as i64))
    }
}

impl From<Ipv4Addr> for RequestIdGenerator {
    fn from(addr: Ipv4Addr) -> Self {
        Self::new(addr.octets())
    }
}

fn encode_base62(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE62_ALPHABET[(n % 62) as usize]);
        n /= 62;
    }
    digits.reverse();
    digits.into_iter().map(char::from).collect()
}

fn decode_base62(s: &str) -> Result<u64, RequestIdError> {
    s.chars().try_fold(0u64, |acc, c| {
        let digit = BASE62_ALPHABET
            .iter()
            .position(|&b| char::from(b) == c)
            .ok_or(RequestIdError::InvalidCharacter(c))?;
        acc.checked_mul(62)
            .and_then(|v| v.checked_add(digit as u64))
            .ok_or_else(|| RequestIdError::Overflow(s.to_string()))
    })
}

fn pad_left(s: &str, len: usize) -> String {
    format!("{s:0>len$}")
}
