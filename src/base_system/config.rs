//! YAML 配置文件读写：缺省生成、用户值合并、带注释回写。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid yaml at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldMeta {
    pub name: &'static str,
    pub description: &'static str,
}

/// 对应一个独立 YAML 文件的配置结构。
///
/// `fields()` 同时用于回写每个键上方的注释，以及加载时检查文件是否缺字段。
pub trait ConfigSpec: Serialize + DeserializeOwned + Default {
    const FILE_NAME: &'static str;

    fn fields() -> &'static [FieldMeta];

    /// 反序列化后修正越界取值。
    fn normalized(self) -> Self {
        self
    }
}

pub fn load_or_create<T: ConfigSpec>(config_path: Option<&Path>) -> Result<T, ConfigError> {
    load_or_create_with_base::<T>(config_path, None)
}

/// 依次读取 `config_path`、`<base_dir>/FILE_NAME`、`./FILE_NAME`，不存在时写入默认值。
pub fn load_or_create_with_base<T: ConfigSpec>(
    config_path: Option<&Path>,
    base_dir: Option<&Path>,
) -> Result<T, ConfigError> {
    let path = resolve_path::<T>(config_path, base_dir);
    ensure_parent(&path)?;

    if !path.exists() {
        let fresh = T::default();
        write_with_comments(&fresh, &path)?;
        return Ok(fresh);
    }

    let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let user: Value = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;

    let incomplete = missing_fields::<T>(&user);
    let config = merge_over_defaults::<T>(user)?;
    if incomplete {
        write_with_comments(&config, &path)?;
    }
    Ok(config)
}

/// 把 YAML 文本叠加到 `T::default()` 上，不读写磁盘。
pub fn from_yaml_str<T: ConfigSpec>(raw: &str) -> Result<T, ConfigError> {
    let user: Value = serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: PathBuf::from("<inline>"),
        source,
    })?;
    merge_over_defaults::<T>(user)
}

pub fn write_with_comments<T: ConfigSpec>(config: &T, path: &Path) -> Result<(), ConfigError> {
    ensure_parent(path)?;
    let yaml = render_with_comments(config)?;
    fs::write(path, yaml).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn render_with_comments<T: ConfigSpec>(config: &T) -> Result<String, ConfigError> {
    let Value::Mapping(mapping) = to_value(config)? else {
        return Err(ConfigError::Validation(
            "config must serialize to a mapping".to_string(),
        ));
    };

    let mut out = String::new();
    for field in T::fields() {
        if !field.description.is_empty() {
            for line in field.description.lines() {
                out.push_str("# ");
                out.push_str(line);
                out.push('\n');
            }
        }
        let key = Value::String(field.name.to_string());
        let val = mapping.get(&key).cloned().unwrap_or(Value::Null);
        let entry = serde_yaml::to_string(&Mapping::from_iter([(key, val)]))
            .map_err(|err| ConfigError::Validation(err.to_string()))?;
        out.push_str(entry.trim_end());
        out.push('\n');
    }
    Ok(out)
}

fn merge_over_defaults<T: ConfigSpec>(user: Value) -> Result<T, ConfigError> {
    let mut merged = to_value(&T::default())?;
    overlay(&mut merged, user);
    let config: T =
        serde_yaml::from_value(merged).map_err(|err| ConfigError::Validation(err.to_string()))?;
    Ok(config.normalized())
}

fn to_value<T: Serialize>(config: &T) -> Result<Value, ConfigError> {
    serde_yaml::to_value(config).map_err(|err| ConfigError::Validation(err.to_string()))
}

fn missing_fields<T: ConfigSpec>(user: &Value) -> bool {
    let Value::Mapping(map) = user else {
        return true;
    };
    T::fields()
        .iter()
        .any(|f| !map.contains_key(Value::String(f.name.to_string())))
}

// 用户值覆盖默认值；映射递归合并，其余类型整体替换。
fn overlay(base: &mut Value, user: Value) {
    match (base, user) {
        (Value::Mapping(dest), Value::Mapping(src)) => {
            for (key, user_val) in src {
                let nested = dest.get(&key).is_some_and(Value::is_mapping);
                if nested && let Some(dest_val) = dest.get_mut(&key) {
                    overlay(dest_val, user_val);
                } else {
                    dest.insert(key, user_val);
                }
            }
        }
        (_, Value::Null) => {}
        (dest, other) => *dest = other,
    }
}

fn resolve_path<T: ConfigSpec>(path: Option<&Path>, base_dir: Option<&Path>) -> PathBuf {
    match (path, base_dir) {
        (Some(p), _) => p.to_path_buf(),
        (None, Some(base)) => base.join(T::FILE_NAME),
        (None, None) => PathBuf::from(T::FILE_NAME),
    }
}

fn ensure_parent(path: &Path) -> Result<(), ConfigError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}
