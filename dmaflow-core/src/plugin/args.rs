use crate::error::{Error, Result};

use std::collections::HashMap;
use std::convert::TryFrom;

/// Argument wrapper for device plugins
///
/// # Examples
///
/// Construct from a string:
/// ```
/// use dmaflow_core::plugin::DeviceArgs;
/// use std::convert::TryFrom;
///
/// let argstr = "opt1=test1,opt2=test2,opt3=test3";
/// let args = DeviceArgs::try_from(argstr).unwrap();
/// ```
///
/// Construct as builder:
/// ```
/// use dmaflow_core::plugin::DeviceArgs;
///
/// let args = DeviceArgs::new()
///     .insert("arg1", "test1")
///     .insert("arg2", "test2");
/// ```
#[derive(Clone, Debug, Default)]
pub struct DeviceArgs {
    map: HashMap<String, String>,
}

impl DeviceArgs {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn with_default(value: &str) -> Self {
        Self::new().insert("default", value)
    }

    pub fn try_parse_str(args: &str) -> Result<Self> {
        let mut map = HashMap::new();

        for (i, kv) in args.split(',').enumerate() {
            let kvsplit = kv.split('=').collect::<Vec<_>>();
            if kvsplit.len() == 2 {
                map.insert(kvsplit[0].to_string(), kvsplit[1].to_string());
            } else if i == 0 && !kv.is_empty() {
                map.insert("default".to_string(), kv.to_string());
            }
        }

        Ok(Self { map })
    }

    pub fn insert(mut self, key: &str, value: &str) -> Self {
        self.map.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.map.get(key)
    }

    pub fn get_default(&self) -> Option<&String> {
        self.get("default")
    }
}

impl TryFrom<&str> for DeviceArgs {
    type Error = Error;

    fn try_from(args: &str) -> Result<Self> {
        DeviceArgs::try_parse_str(args)
    }
}
