macro_rules! define_id {
    ($name:ident) => {
        /// Typed wrapper around UUID v7 for entity identification.
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        pub struct $name(pub uuid::Uuid);

        #[allow(clippy::new_without_default)]
        impl $name {
            /// Generate a new time-sortable UUID v7 identifier.
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(uuid::Uuid::parse_str(s)?))
            }
        }
    };
}

define_id!(UserId);
define_id!(DeviceId);
define_id!(PreKeyId);
define_id!(ConversationId);
define_id!(MessageId);

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn user_id_new_creates_valid_uuid() {
        let id = UserId::new();
        assert_eq!(id.0.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn user_id_serializes_to_uuid_string() {
        let id = UserId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.starts_with('"'));
        assert!(json.ends_with('"'));
        let inner = &json[1..json.len() - 1];
        uuid::Uuid::parse_str(inner).unwrap();
    }

    #[test]
    fn user_id_roundtrip_serde() {
        let id = UserId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn device_id_works_as_json_map_key() {
        let id = DeviceId::new();
        let mut map = std::collections::BTreeMap::new();
        map.insert(id, "wrapped-key".to_string());

        let json = serde_json::to_string(&map).unwrap();
        let back: std::collections::BTreeMap<DeviceId, String> =
            serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(&id).map(String::as_str), Some("wrapped-key"));
    }

    #[test]
    fn device_id_from_str_valid() {
        let id = DeviceId::new();
        let parsed = DeviceId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn device_id_from_str_invalid() {
        assert!(DeviceId::from_str("not-a-uuid").is_err());
    }

    #[test]
    fn pre_key_id_new_produces_unique_ids() {
        let a = PreKeyId::new();
        let b = PreKeyId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn user_id_new_is_time_sortable() {
        let a = UserId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = UserId::new();
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn conversation_id_roundtrip_serde() {
        let id = ConversationId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: ConversationId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn message_id_roundtrip_serde() {
        let id = MessageId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
