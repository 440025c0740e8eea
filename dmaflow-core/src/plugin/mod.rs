/*!
Device plugin interface.
*/

pub mod args;
#[doc(hidden)]
pub use args::DeviceArgs;

use crate::error::{Error, Result};
use crate::mem::DeviceMemory;

use log::debug;

/// Exported dmaflow plugin api version
pub const PLUGIN_API_VERSION: i32 = 1;

/// Type of a single boxed device instance
pub type DeviceMemoryBox = Box<dyn DeviceMemory>;

/// Describes a device plugin
pub struct PluginDescriptor {
    /// The plugin api version for when the plugin was built.
    /// This has to be set to `PLUGIN_API_VERSION` of dmaflow_core.
    ///
    /// If the versions mismatch the plugin will refuse to load.
    pub api_version: i32,

    /// The name of the device plugin.
    pub name: &'static str,

    /// The factory function for the device.
    /// Calling this function will produce a new device instance.
    pub factory: fn(args: &DeviceArgs) -> Result<DeviceMemoryBox>,
}

/// Creates a new device instance from the given descriptor.
///
/// The descriptor's api version is checked before the factory is called;
/// a mismatch is rejected immediately with `Error::ApiVersion`.
pub fn create_device(desc: &PluginDescriptor, args: &DeviceArgs) -> Result<DeviceMemoryBox> {
    if desc.api_version != PLUGIN_API_VERSION {
        debug!(
            "plugin {} has a different api version ({} vs {})",
            desc.name, desc.api_version, PLUGIN_API_VERSION
        );
        return Err(Error::ApiVersion(desc.api_version));
    }
    (desc.factory)(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{DeviceMetadata, ScatterRequest};

    struct NullDevice;

    impl DeviceMemory for NullDevice {
        fn read_scatter(&mut self, _reqs: &mut [ScatterRequest]) -> Result<()> {
            Ok(())
        }

        fn write_scatter(&mut self, _reqs: &mut [ScatterRequest]) -> Result<()> {
            Ok(())
        }

        fn metadata(&self) -> DeviceMetadata {
            DeviceMetadata {
                max_address: crate::types::Address::NULL,
                volatile: true,
            }
        }
    }

    fn null_factory(_args: &DeviceArgs) -> Result<DeviceMemoryBox> {
        Ok(Box::new(NullDevice))
    }

    #[test]
    fn test_api_version_reject() {
        let desc = PluginDescriptor {
            api_version: PLUGIN_API_VERSION + 1,
            name: "null",
            factory: null_factory,
        };
        assert_eq!(
            create_device(&desc, &DeviceArgs::new()).err(),
            Some(Error::ApiVersion(PLUGIN_API_VERSION + 1))
        );
    }

    #[test]
    fn test_api_version_accept() {
        let desc = PluginDescriptor {
            api_version: PLUGIN_API_VERSION,
            name: "null",
            factory: null_factory,
        };
        assert!(create_device(&desc, &DeviceArgs::new()).is_ok());
    }
}
