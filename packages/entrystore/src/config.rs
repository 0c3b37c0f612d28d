use serde::{Deserialize, Serialize};

use crate::{DynRoot, Error, OpenMode};

/// Where a store lives, as found in configuration files.
///
/// ```json
/// {"type": "memory", "name": "scratch"}
/// {"type": "local", "path": "/data/experiment"}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// A named store of the process-wide `memory` driver.
    Memory { name: String },
    /// A directory on the local filesystem.
    Local { path: String },
}

impl StoreConfig {
    pub fn protocol(&self) -> &'static str {
        match self {
            StoreConfig::Memory { .. } => "memory",
            StoreConfig::Local { .. } => "file",
        }
    }

    /// The URI handed to the driver.
    pub fn uri(&self) -> String {
        match self {
            StoreConfig::Memory { name } => format!("memory:{}", name),
            StoreConfig::Local { path } => path.clone(),
        }
    }

    /// Open the configured store through the process-wide registry.
    pub fn open(&self, mode: OpenMode) -> Result<DynRoot, Error> {
        crate::open_with(&self.uri(), mode, Some(self.protocol()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tagged_layout() {
        let memory: StoreConfig =
            serde_json::from_value(json!({"type": "memory", "name": "scratch"})).unwrap();
        assert_eq!(
            memory,
            StoreConfig::Memory {
                name: "scratch".to_string()
            }
        );
        assert_eq!(memory.uri(), "memory:scratch");

        let local = StoreConfig::Local {
            path: "/data/run".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&local).unwrap(),
            json!({"type": "local", "path": "/data/run"})
        );
        assert_eq!(local.protocol(), "file");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let http = json!({"type": "http", "url": "x"});
        assert!(serde_json::from_value::<StoreConfig>(http).is_err());
    }

    #[test]
    fn open_memory_store() {
        let config = StoreConfig::Memory {
            name: "config-open".to_string(),
        };
        let root = config.open(OpenMode::Exclusive).unwrap();
        root.at("a").unwrap().write_binary(&b"abc"[..]).unwrap();
        root.close().unwrap();

        let root = config.open(OpenMode::Read).unwrap();
        assert_eq!(root.at("a").unwrap().read_binary().unwrap(), &b"abc"[..]);
        drop(root);
        assert!(matches!(
            config.open(OpenMode::Exclusive),
            Err(Error::AlreadyExists { .. })
        ));
    }

    #[test]
    fn open_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::Local {
            path: dir.path().join("store").display().to_string(),
        };
        let root = config.open(OpenMode::Append).unwrap();
        root.at("g").unwrap().create_group().unwrap();
        root.close().unwrap();
        assert!(dir.path().join("store").join("g").is_dir());
    }
}
