/*!
FT60x chip configuration structures.

The layouts mirror the hardware configuration block of the FT601/FT600
chips and must not be changed.
*/

use dataview::Pod;

/// Chip configuration - FIFO Mode
#[allow(unused)]
pub enum FifoMode {
    Mode245 = 0,
    Mode600 = 1,
    Max = 2,
}

/// Chip configuration - Channel Configuration
#[allow(unused)]
pub enum ChannelConfig {
    Config4 = 0,
    Config2 = 1,
    Config1 = 2,
    Config1OutPipe = 3,
    Config1InPipe = 4,
    Max = 5,
}

/// Chip configuration - Optional Feature Support
#[allow(unused)]
pub enum OptionalFeatureSupport {
    DisableAll = 0,
    EnableBatteryCharging = 1,
    DisableCancelSessionUnderrun = 2,
    EnableNotificationMessageInch1 = 4,
    EnableNotificationMessageInch2 = 8,
    EnableNotificationMessageInch3 = 0x10,
    EnableNotificationMessageInch4 = 0x20,
    EnableNotificationMessageInchAll = 0x3C,
    DisableUnderrunInch1 = 0x1 << 6,
    DisableUnderrunInch2 = 0x1 << 7,
    DisableUnderrunInch3 = 0x1 << 8,
    DisableUnderrunInch4 = 0x1 << 9,
    DisableUnderrunInchAll = 0xF << 6,
}

/// Chip configuration - Config structure
#[repr(C)]
#[derive(Clone, Pod)]
pub struct Config {
    // Device Descriptor
    pub vendor_id: i16,
    pub product_id: i16,

    // String Descriptors
    pub string_descriptors: [i8; 128],

    // Configuration Descriptor
    reserved1: i8,
    pub power_attributes: i8,
    pub power_consumption: i16,

    // Data Transfer Configuration
    reserved2: i8,
    pub fifo_clock: i8,
    pub fifo_mode: i8,
    pub channel_config: i8,

    // Optional Feature Support
    pub optional_feature_support: i16,
    pub battery_charging_gpio_config: i8,
    pub flash_eeprom_detection: i8, // Read-only

    // MSIO and GPIO Configuration
    pub msio_control: u32,
    pub gpio_control: u32,
}

impl Config {
    /// Checks whether the chip is configured the way the fpga bitstreams
    /// expect it: FIFO 245 mode, a single channel and all optional
    /// features disabled.
    pub fn is_valid_fpga_config(&self) -> bool {
        self.fifo_mode == FifoMode::Mode245 as i8
            && self.channel_config == ChannelConfig::Config1 as i8
            && self.optional_feature_support == OptionalFeatureSupport::DisableAll as i16
    }

    /// Rewrites the transfer configuration to the values the fpga
    /// bitstreams expect. The remaining fields are left untouched.
    pub fn set_fpga_defaults(&mut self) {
        self.fifo_mode = FifoMode::Mode245 as i8;
        self.channel_config = ChannelConfig::Config1 as i8;
        self.optional_feature_support = OptionalFeatureSupport::DisableAll as i16;
    }
}

/// Read command sent over the session endpoint ahead of each bulk read.
#[repr(C, packed)]
#[derive(Copy, Clone, Pod)]
pub struct ControlRequest {
    pub idx: u32,
    pub pipe: u8,
    pub cmd: u8,
    unknown1: u8,
    unknown2: u8,
    pub len: u32,
    unknown3: u32,
    unknown4: u32,
}

impl ControlRequest {
    pub fn new(idx: u32, pipe: u8, cmd: u8, len: u32) -> Self {
        Self {
            idx,
            pipe,
            cmd,
            unknown1: 0,
            unknown2: 0,
            len,
            unknown3: 0,
            unknown4: 0,
        }
    }
}
