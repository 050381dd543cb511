use crate::error::{NacosError, Result};

pub const FIELD_SEPARATOR: char = '\u{2}';
pub const ARTICLE_SEPARATOR: char = '\u{1}';

/// One watched config file in the long-poll protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ListenKey {
    pub data_id: String,
    pub group: String,
    pub tenant: String,
    pub content_md5: String,
}

impl ListenKey {
    pub fn new(
        data_id: impl Into<String>,
        group: impl Into<String>,
        tenant: impl Into<String>,
    ) -> Self {
        Self {
            data_id: data_id.into(),
            group: group.into(),
            tenant: tenant.into(),
            content_md5: String::new(),
        }
    }

    pub fn with_md5(mut self, md5: impl Into<String>) -> Self {
        self.content_md5 = md5.into();
        self
    }

    /// The key with its fingerprint cleared, used as a table key.
    pub fn without_md5(&self) -> Self {
        Self {
            content_md5: String::new(),
            ..self.clone()
        }
    }

    /// `dataId 0x02 group 0x02 md5 0x02 tenant 0x01`
    pub fn line(&self) -> String {
        let separator = FIELD_SEPARATOR.to_string();
        let mut line = [
            self.data_id.as_str(),
            self.group.as_str(),
            self.content_md5.as_str(),
            self.tenant.as_str(),
        ]
        .join(separator.as_str());
        line.push(ARTICLE_SEPARATOR);
        line
    }
}

/// Parses one entry. Accepts `dataId,group`, `dataId,group,tenant` and
/// `dataId,group,md5,tenant`.
pub fn parse_listen_key(line: &str) -> Result<ListenKey> {
    let trimmed = line.trim_matches(ARTICLE_SEPARATOR);
    let parts: Vec<&str> = trimmed.split(FIELD_SEPARATOR).collect();
    let key = match parts.as_slice() {
        [data_id, group] => ListenKey::new(*data_id, *group, ""),
        [data_id, group, tenant] => ListenKey::new(*data_id, *group, *tenant),
        [data_id, group, md5, tenant] => ListenKey::new(*data_id, *group, *tenant).with_md5(*md5),
        _ => return Err(NacosError::InvalidListenKey(line.to_string())),
    };
    if key.data_id.is_empty() || key.group.is_empty() {
        return Err(NacosError::InvalidListenKey(line.to_string()));
    }
    Ok(key)
}

/// Parses a concatenation of entries. Malformed entries are logged and
/// skipped.
pub fn parse_listen_keys(body: &str) -> Vec<ListenKey> {
    body.split(ARTICLE_SEPARATOR)
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match parse_listen_key(entry) {
            Ok(key) => Some(key),
            Err(e) => {
                log::warn!("skip changed config entry: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_round_trip() {
        let keys = [
            ListenKey::new("app.properties", "DEFAULT_GROUP", "dev").with_md5("abc"),
            ListenKey::new("app.properties", "DEFAULT_GROUP", ""),
            ListenKey::new("a.yaml", "g:sub", "").with_md5("0f"),
        ];
        for key in keys {
            assert_eq!(parse_listen_key(&key.line()).unwrap(), key);
        }
    }

    #[test]
    fn test_line_format() {
        let key = ListenKey::new("d", "g", "t").with_md5("m");
        assert_eq!(key.line(), "d\u{2}g\u{2}m\u{2}t\u{1}");
    }

    #[test]
    fn test_short_forms() {
        let key = parse_listen_key("d\u{2}g\u{2}t\u{1}").unwrap();
        assert_eq!(key.tenant, "t");
        assert_eq!(key.content_md5, "");
        let key = parse_listen_key("d\u{2}g").unwrap();
        assert_eq!(key.tenant, "");
    }

    #[test]
    fn test_invalid_keys() {
        assert!(matches!(
            parse_listen_key("only-data-id"),
            Err(NacosError::InvalidListenKey(_))
        ));
        assert!(parse_listen_key("a\u{2}b\u{2}c\u{2}d\u{2}e").is_err());
        assert!(parse_listen_key("\u{2}g").is_err());
    }

    #[test]
    fn test_parse_many() {
        let body = "a\u{2}g\u{1}broken\u{1}b\u{2}g\u{2}t\u{1}\n";
        let keys = parse_listen_keys(body);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].data_id, "a");
        assert_eq!(keys[1].tenant, "t");
    }
}
