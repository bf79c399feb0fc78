use super::error::{KeyError, RegistryError};
use super::types::{ServiceKey, ServiceRecord};

/// 默认键空间根前缀
pub const DEFAULT_KEY_PREFIX: &str = "/services";

/// 键空间编解码
///
/// 布局：
/// - `<root>/<environment>/<name>/<id>` 保存序列化后的实例信息
/// - `<root>/<environment>/<name>` 保存服务名本身，使服务名可以按前缀发现
///
/// 键的层级（斜杠数量）用于在前缀扫描中区分实例键和服务名标记键。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCodec {
    root: String,
    instance_depth: usize,
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self {
            root: DEFAULT_KEY_PREFIX.to_string(),
            instance_depth: 4,
        }
    }
}

impl KeyCodec {
    pub fn new(root: impl Into<String>) -> Result<Self, KeyError> {
        let raw = root.into();
        let root = raw.trim_end_matches('/');

        if !root.starts_with('/') || root.split('/').skip(1).any(str::is_empty) {
            return Err(KeyError::InvalidPrefix(raw));
        }

        Ok(Self {
            root: root.to_string(),
            instance_depth: root.matches('/').count() + 3,
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// 实例键的斜杠数量
    pub fn instance_depth(&self) -> usize {
        self.instance_depth
    }

    pub fn root_prefix(&self) -> String {
        format!("{}/", self.root)
    }

    pub fn environment_prefix(&self, environment: &str) -> String {
        format!("{}/{}/", self.root, environment)
    }

    pub fn name_key(&self, environment: &str, name: &str) -> String {
        format!("{}/{}/{}", self.root, environment, name)
    }

    pub fn name_prefix(&self, environment: &str, name: &str) -> String {
        format!("{}/{}/{}/", self.root, environment, name)
    }

    pub fn instance_key(&self, environment: &str, name: &str, id: &str) -> String {
        format!("{}/{}/{}/{}", self.root, environment, name, id)
    }

    pub fn record_key(&self, record: &ServiceRecord) -> String {
        self.instance_key(&record.environment, &record.name, &record.id)
    }

    // 比实例键浅的键都是服务名标记
    pub fn is_instance_key(&self, key: &str) -> bool {
        key.matches('/').count() >= self.instance_depth
    }

    pub fn decode_instance_key(&self, key: &str) -> Result<ServiceKey, KeyError> {
        let rest = key
            .strip_prefix(self.root.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| KeyError::OutsideRoot {
                key: key.to_string(),
                root: self.root.clone(),
            })?;

        let parts: Vec<&str> = rest.split('/').collect();
        let [environment, name, id] = parts.as_slice() else {
            return Err(KeyError::NotInstanceKey(key.to_string()));
        };
        if [environment, name, id].iter().any(|part| part.is_empty()) {
            return Err(KeyError::NotInstanceKey(key.to_string()));
        }

        Ok(ServiceKey {
            environment: environment.to_string(),
            name: name.to_string(),
            id: id.to_string(),
        })
    }

    /// 键的每一段必须非空且不含 `/`，否则编码会产生歧义
    pub fn validate_component(field: &'static str, value: &str) -> Result<(), KeyError> {
        if value.is_empty() || value.contains('/') {
            return Err(KeyError::InvalidComponent {
                field,
                value: value.to_string(),
            });
        }
        Ok(())
    }

    pub fn validate_record(record: &ServiceRecord) -> Result<(), KeyError> {
        Self::validate_component("environment", &record.environment)?;
        Self::validate_component("name", &record.name)?;
        Self::validate_component("id", &record.id)
    }
}

pub fn serialize_record(record: &ServiceRecord) -> Result<Vec<u8>, RegistryError> {
    serde_json::to_vec(record).map_err(RegistryError::Encode)
}

pub fn deserialize_record(key: &str, bytes: &[u8]) -> Result<ServiceRecord, RegistryError> {
    serde_json::from_slice(bytes).map_err(|source| RegistryError::Decode {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_instance_key_round_trip() {
        let codec = KeyCodec::default();
        let key = codec.instance_key("production", "billing", "10.0.0.5:8080");

        assert_eq!(key, "/services/production/billing/10.0.0.5:8080");
        assert_eq!(
            codec.decode_instance_key(&key).unwrap(),
            ServiceKey {
                environment: "production".to_string(),
                name: "billing".to_string(),
                id: "10.0.0.5:8080".to_string(),
            }
        );
    }

    #[test]
    fn test_instance_key_round_trip_for_varied_components() {
        let triples = [
            ("production", "billing", "10.0.0.5:8080"),
            ("staging", "search-indexer", "a-b_c"),
            ("dev", "api.v2", "[::1]:443"),
            ("testing", "网关", "实例-1"),
            ("prod-eu", "auth", "host.example.com:65535"),
            ("e", "n", "i"),
        ];

        for root in [DEFAULT_KEY_PREFIX, "/fleet/registry"] {
            let codec = KeyCodec::new(root).unwrap();
            for (environment, name, id) in triples {
                let key = codec.instance_key(environment, name, id);

                assert!(key.starts_with(&codec.name_prefix(environment, name)));
                assert!(codec.is_instance_key(&key));
                assert_eq!(
                    codec.decode_instance_key(&key).unwrap(),
                    ServiceKey {
                        environment: environment.to_string(),
                        name: name.to_string(),
                        id: id.to_string(),
                    },
                    "key {key}"
                );
            }
        }
    }

    #[test]
    fn test_name_key_prefixes_instance_keys() {
        let codec = KeyCodec::default();
        let name_key = codec.name_key("staging", "api");
        let instance_key = codec.instance_key("staging", "api", "a");

        assert!(instance_key.starts_with(&name_key));
        assert_ne!(instance_key, name_key);
        assert!(instance_key.starts_with(&codec.name_prefix("staging", "api")));
        assert!(!codec.is_instance_key(&name_key));
        assert!(codec.is_instance_key(&instance_key));
    }

    #[test]
    fn test_decode_rejects_foreign_and_shallow_keys() {
        let codec = KeyCodec::default();

        assert!(matches!(
            codec.decode_instance_key("/other/prod/api/1"),
            Err(KeyError::OutsideRoot { .. })
        ));
        assert!(matches!(
            codec.decode_instance_key("/services2/prod/api/1"),
            Err(KeyError::OutsideRoot { .. })
        ));
        assert!(matches!(
            codec.decode_instance_key("/services/prod/api"),
            Err(KeyError::NotInstanceKey(_))
        ));
        assert!(matches!(
            codec.decode_instance_key("/services/prod/api/"),
            Err(KeyError::NotInstanceKey(_))
        ));
    }

    #[test]
    fn test_custom_root() {
        let codec = KeyCodec::new("/fleet/registry/").unwrap();

        assert_eq!(codec.root(), "/fleet/registry");
        assert_eq!(codec.instance_depth(), 5);
        let key = codec.instance_key("dev", "api", "1");
        assert_eq!(codec.decode_instance_key(&key).unwrap().id, "1");

        assert!(KeyCodec::new("services").is_err());
        assert!(KeyCodec::new("/").is_err());
        assert!(KeyCodec::new("/a//b").is_err());
    }

    #[test]
    fn test_validate_component() {
        assert!(KeyCodec::validate_component("id", "10.0.0.1:80").is_ok());
        assert!(KeyCodec::validate_component("id", "").is_err());
        assert!(KeyCodec::validate_component("name", "a/b").is_err());
    }

    #[test]
    fn test_minimal_record_omits_optional_fields() {
        let record = ServiceRecord::new("production", "billing", "10.0.0.5:8080", "");
        let bytes = serialize_record(&record).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        let object = json.as_object().unwrap();
        let mut fields: Vec<&str> = object.keys().map(String::as_str).collect();
        fields.sort();
        assert_eq!(fields, vec!["environment", "id", "name", "reload_url"]);

        let decoded = deserialize_record("k", &bytes).unwrap();
        assert_eq!(decoded, record);
        assert!(decoded.port.is_none());
        assert!(decoded.has_metrics_endpoint.is_none());
    }

    #[test]
    fn test_full_record_round_trip() {
        let record = ServiceRecord::new("staging", "search", "10.1.0.2:9000", "http://10.1.0.2:9000/reload")
            .with_internal_address("10.1.0.2")
            .with_public_address("203.0.113.7")
            .with_port(0)
            .with_url("http://10.1.0.2:9000")
            .with_version("v1.4.2")
            .with_registered_at(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap())
            .with_metrics_endpoint(false)
            .with_attribute("zone", "a");

        let bytes = serialize_record(&record).unwrap();
        let decoded = deserialize_record("k", &bytes).unwrap();

        // 显式的零值不能与缺省混淆
        assert_eq!(decoded.port, Some(0));
        assert_eq!(decoded.has_metrics_endpoint, Some(false));
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_every_optional_field_subset_round_trips() {
        const OPTIONAL_FIELDS: [&str; 8] = [
            "internal_ip",
            "public_ip",
            "port",
            "url",
            "git_version",
            "time",
            "is_metrics_api",
            "data",
        ];
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();

        for mask in 0u32..(1 << OPTIONAL_FIELDS.len()) {
            let present = |bit: usize| mask & (1 << bit) != 0;

            let mut record = ServiceRecord::new("production", "billing", "10.0.0.5:8080", "");
            if present(0) {
                record = record.with_internal_address("10.0.0.5");
            }
            if present(1) {
                record = record.with_public_address("203.0.113.7");
            }
            if present(2) {
                record = record.with_port(mask as i32 % 2);
            }
            if present(3) {
                record = record.with_url("http://10.0.0.5:8080");
            }
            if present(4) {
                record = record.with_version("v1.0.0");
            }
            if present(5) {
                record = record.with_registered_at(at);
            }
            if present(6) {
                record = record.with_metrics_endpoint(mask % 3 == 0);
            }
            if present(7) {
                record = record.with_attribute("zone", "a");
            }

            let bytes = serialize_record(&record).unwrap();
            let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            let object = json.as_object().unwrap();
            for (bit, field) in OPTIONAL_FIELDS.iter().enumerate() {
                assert_eq!(
                    object.contains_key(*field),
                    present(bit),
                    "field {field} with mask {mask:#010b}"
                );
            }
            assert_eq!(object.len(), 4 + mask.count_ones() as usize);

            assert_eq!(deserialize_record("k", &bytes).unwrap(), record, "mask {mask:#010b}");
        }
    }

    #[test]
    fn test_decodes_existing_wire_format() {
        let raw = br#"{"id":"10.0.0.5:8080","name":"billing","environment":"production","internal_ip":"10.0.0.5","port":8080,"reload_url":"http://10.0.0.5:8080/reload","git_version":"abc123","time":"2024-03-01T12:30:00.123456789+08:00","is_metrics_api":true,"data":{"role":"primary"}}"#;

        let record = deserialize_record("k", raw).unwrap();

        assert_eq!(record.internal_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(record.port, Some(8080));
        assert_eq!(record.version.as_deref(), Some("abc123"));
        assert_eq!(record.has_metrics_endpoint, Some(true));
        assert_eq!(
            record.attributes.unwrap().get("role").map(String::as_str),
            Some("primary")
        );
        assert!(record.registered_at.is_some());
        assert!(record.public_address.is_none());
    }

    #[test]
    fn test_malformed_bytes_fail_with_decode_error() {
        let err = deserialize_record("/services/p/n/1", b"{\"id\": 1").unwrap_err();
        assert!(matches!(err, RegistryError::Decode { ref key, .. } if key == "/services/p/n/1"));

        let err = deserialize_record("k", b"\xff\xfe").unwrap_err();
        assert!(matches!(err, RegistryError::Decode { .. }));
    }
}
