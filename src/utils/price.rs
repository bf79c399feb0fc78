use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

const TIMESTAMP_LEN: usize = 4;
const PRICE_LEN: usize = 8;
const SIGNATURE_LEN: usize = 4;
const PAYLOAD_LEN: usize = TIMESTAMP_LEN + PRICE_LEN + SIGNATURE_LEN;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PriceError {
    #[error("Invalid hex key: {0}")]
    InvalidKey(#[from] hex::FromHexError),
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Invalid payload length: expected {PAYLOAD_LEN} bytes, got {0}")]
    InvalidLength(usize),
    #[error("Price signature mismatch")]
    InvalidSignature,
}

/// 价格加密
///
/// 密文为 URL 安全、无填充的 base64，解码后 16 字节：
/// 4 字节小端秒级时间戳 + 8 字节价格（f64 小端与 HMAC-SHA1(时间戳, 加密密钥) 前 8 字节异或）
/// + 4 字节签名（HMAC-SHA1(价格 ‖ 时间戳, 签名密钥) 前 4 字节）。
#[derive(Clone)]
pub struct PriceCodec {
    encryption: HmacSha1,
    signing: HmacSha1,
}

impl std::fmt::Debug for PriceCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceCodec").finish_non_exhaustive()
    }
}

impl PriceCodec {
    /// 两个密钥均为十六进制字符串
    pub fn new(encryption_key: &str, signing_key: &str) -> Result<Self, PriceError> {
        Ok(Self::from_keys(
            &hex::decode(encryption_key)?,
            &hex::decode(signing_key)?,
        ))
    }

    pub fn from_keys(encryption_key: &[u8], signing_key: &[u8]) -> Self {
        Self {
            encryption: hmac_with_key(encryption_key),
            signing: hmac_with_key(signing_key),
        }
    }

    pub fn encode(&self, price: f64) -> String {
        // 与已有实现一致，时间戳截断为 u32
        self.encode_at(price, Utc::now().timestamp() as u32)
    }

    pub fn encode_at(&self, price: f64, timestamp: u32) -> String {
        let timestamp = timestamp.to_le_bytes();
        let price = price.to_le_bytes();

        let mut payload = Vec::with_capacity(PAYLOAD_LEN);
        payload.extend_from_slice(&timestamp);
        payload.extend_from_slice(&self.mask(&timestamp, &price));
        payload.extend_from_slice(&self.signature(&price, &timestamp)[..SIGNATURE_LEN]);

        URL_SAFE_NO_PAD.encode(payload)
    }

    pub fn decode(&self, token: &str) -> Result<f64, PriceError> {
        self.decode_with_timestamp(token).map(|(price, _)| price)
    }

    /// 解密并校验签名，同时返回加密时的时间戳
    pub fn decode_with_timestamp(&self, token: &str) -> Result<(f64, u32), PriceError> {
        let data = URL_SAFE_NO_PAD.decode(token.trim_end_matches('='))?;
        if data.len() != PAYLOAD_LEN {
            return Err(PriceError::InvalidLength(data.len()));
        }

        let (timestamp, rest) = data.split_at(TIMESTAMP_LEN);
        let (encrypted, signature) = rest.split_at(PRICE_LEN);

        let price = self.mask(timestamp, encrypted);

        let mut mac = self.signing.clone();
        mac.update(&price);
        mac.update(timestamp);
        mac.verify_truncated_left(signature)
            .map_err(|_| PriceError::InvalidSignature)?;

        let mut ts = [0u8; TIMESTAMP_LEN];
        ts.copy_from_slice(timestamp);
        Ok((f64::from_le_bytes(price), u32::from_le_bytes(ts)))
    }

    // 价格与时间戳派生的密钥流异或
    fn mask(&self, timestamp: &[u8], price: &[u8]) -> [u8; PRICE_LEN] {
        let mut mac = self.encryption.clone();
        mac.update(timestamp);
        let pad = mac.finalize().into_bytes();

        let mut masked = [0u8; PRICE_LEN];
        for (i, out) in masked.iter_mut().enumerate() {
            *out = price[i] ^ pad[i];
        }
        masked
    }

    fn signature(&self, price: &[u8], timestamp: &[u8]) -> Vec<u8> {
        let mut mac = self.signing.clone();
        mac.update(price);
        mac.update(timestamp);
        mac.finalize().into_bytes().to_vec()
    }
}

fn hmac_with_key(key: &[u8]) -> HmacSha1 {
    // HMAC 接受任意长度的密钥
    match HmacSha1::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENCRYPTION_KEY: &str = "6b1f2c3d4e5f60718293a4b5c6d7e8f9";
    const SIGNING_KEY: &str = "0f1e2d3c4b5a69788796a5b4c3d2e1f0";

    fn codec() -> PriceCodec {
        PriceCodec::new(ENCRYPTION_KEY, SIGNING_KEY).unwrap()
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let codec = codec();

        for price in [0.0, 0.01, 1.5, 123_456.789, -3.25] {
            let token = codec.encode_at(price, 1_709_296_200);

            assert_eq!(token.len(), 22);
            assert!(!token.contains(['+', '/', '=']));
            assert_eq!(
                codec.decode_with_timestamp(&token).unwrap(),
                (price, 1_709_296_200)
            );
        }

        let token = codec.encode(8.8);
        assert_eq!(codec.decode(&token).unwrap(), 8.8);
    }

    #[test]
    fn test_payload_layout() {
        let token = codec().encode_at(2.0, 0x0102_0304);
        let data = URL_SAFE_NO_PAD.decode(&token).unwrap();

        assert_eq!(data.len(), PAYLOAD_LEN);
        assert_eq!(&data[..TIMESTAMP_LEN], &[0x04, 0x03, 0x02, 0x01]);
        // 价格经过异或，不应以明文出现
        assert_ne!(&data[TIMESTAMP_LEN..TIMESTAMP_LEN + PRICE_LEN], &2.0f64.to_le_bytes());
    }

    #[test]
    fn test_padded_token_is_accepted() {
        let codec = codec();
        let token = codec.encode_at(42.0, 7);

        assert_eq!(codec.decode(&format!("{token}==")).unwrap(), 42.0);
    }

    #[test]
    fn test_tampered_signature_is_rejected() {
        let codec = codec();
        let token = codec.encode_at(9.99, 1_700_000_000);

        let mut data = URL_SAFE_NO_PAD.decode(&token).unwrap();
        data[PAYLOAD_LEN - 1] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(&data);
        assert_eq!(codec.decode(&tampered), Err(PriceError::InvalidSignature));

        let mut data = URL_SAFE_NO_PAD.decode(&token).unwrap();
        data[TIMESTAMP_LEN] ^= 0x80;
        let tampered = URL_SAFE_NO_PAD.encode(&data);
        assert_eq!(codec.decode(&tampered), Err(PriceError::InvalidSignature));
    }

    #[test]
    fn test_wrong_keys_are_rejected() {
        let token = codec().encode_at(1.0, 1);
        let other = PriceCodec::new(ENCRYPTION_KEY, "00").unwrap();

        assert_eq!(other.decode(&token), Err(PriceError::InvalidSignature));
    }

    #[test]
    fn test_malformed_input() {
        let codec = codec();

        assert!(matches!(PriceCodec::new("zz", SIGNING_KEY), Err(PriceError::InvalidKey(_))));
        assert!(matches!(codec.decode("not*base64"), Err(PriceError::Base64(_))));
        assert_eq!(
            codec.decode(&URL_SAFE_NO_PAD.encode([0u8; 12])),
            Err(PriceError::InvalidLength(12))
        );
    }
}
