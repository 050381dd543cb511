use crate::config::loader::FileDesc;
use crate::config::map_file::{FileConverter, MapFile};
use crate::error::{NacosError, Result};
use crate::pool::TaskPool;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Flattens a YAML document: nested keys are joined by `.`, sequence items
/// become `key[i]`.
pub fn parse_yaml(content: &[u8]) -> Result<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    if content.iter().all(u8::is_ascii_whitespace) {
        return Ok(params);
    }
    match serde_yaml::from_slice::<Value>(content)? {
        Value::Null => {}
        value @ Value::Mapping(_) => flatten(&mut params, "", &value),
        _ => {
            return Err(NacosError::InvalidValue {
                key: "<root>".to_string(),
                message: "yaml document is not a mapping".to_string(),
            });
        }
    }
    Ok(params)
}

fn flatten(result: &mut BTreeMap<String, String>, prefix: &str, value: &Value) {
    match value {
        Value::Mapping(mapping) => {
            for (key, val) in mapping {
                let key = match key {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => {
                        log::warn!("skip unsupported yaml key under {:?}", prefix);
                        continue;
                    }
                };
                let path = if prefix.is_empty() {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(result, &path, val);
            }
        }
        Value::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten(result, &format!("{}[{}]", prefix, i), item);
            }
        }
        Value::Tagged(tagged) => flatten(result, prefix, &tagged.value),
        Value::String(s) => {
            result.insert(prefix.to_string(), s.clone());
        }
        Value::Number(n) => {
            result.insert(prefix.to_string(), n.to_string());
        }
        Value::Bool(b) => {
            result.insert(prefix.to_string(), b.to_string());
        }
        Value::Null => {
            result.insert(prefix.to_string(), String::new());
        }
    }
}

/// Builds [`MapFile`]s from YAML content.
#[derive(Clone, Default)]
pub struct YamlConverter {
    pool: TaskPool,
}

impl YamlConverter {
    pub fn new(pool: TaskPool) -> Self {
        Self { pool }
    }
}

impl FileConverter for YamlConverter {
    type File = MapFile;

    fn convert(&self, desc: FileDesc, content: Vec<u8>) -> Result<Arc<MapFile>> {
        Ok(Arc::new(MapFile::new(
            desc,
            content,
            parse_yaml,
            self.pool.clone(),
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::map_file::FileMirror;

    #[test]
    fn test_flatten() {
        let params = parse_yaml(
            br#"
a: 1
c:
  d: 3
  f:
    g: x
h:
  - 1
  - name: n
1: -1
on: true
empty:
"#,
        )
        .unwrap();
        let expected: BTreeMap<String, String> = [
            ("a", "1"),
            ("c.d", "3"),
            ("c.f.g", "x"),
            ("h[0]", "1"),
            ("h[1].name", "n"),
            ("1", "-1"),
            ("on", "true"),
            ("empty", ""),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(params, expected);
    }

    #[test]
    fn test_empty_and_invalid_documents() {
        assert!(parse_yaml(b"").unwrap().is_empty());
        assert!(parse_yaml(b"  \n").unwrap().is_empty());
        assert!(parse_yaml(b"~").unwrap().is_empty());
        assert!(parse_yaml(b"- 1\n- 2\n").is_err());
        assert!(matches!(parse_yaml(b"a: [1"), Err(NacosError::Yaml(_))));
    }

    #[tokio::test]
    async fn test_yaml_map_file_diffs_like_properties() {
        let file = YamlConverter::default()
            .convert(
                FileDesc::new("", "G", "app.yaml"),
                b"server:\n  port: 8080\n".to_vec(),
            )
            .unwrap();
        assert_eq!(file.get_int("server.port").unwrap(), 8080);
        file.apply(b"server:\n  port: 9090\n  host: a\n".to_vec());
        assert_eq!(file.get_int("server.port").unwrap(), 9090);
        assert_eq!(file.get("server.host").unwrap(), "a");
    }
}
