//! Serial device enumeration and `auto[:criterion=value,...]` resolution
//!
//! A transport can name its device with a query instead of a fixed path:
//!
//! ```text
//! auto
//! auto:product=T-Beam
//! auto:vendor_id=10c4,serial=0001A2B3
//! ```
//!
//! Recognized criteria are `product`, `manufacturer`, `serial`, `vendor_id`
//! and `product_id` (ids in hex, optional `0x`). Product and manufacturer
//! match case-insensitive substrings; the others match exactly. A query must
//! select exactly one device; zero or several matches fail with
//! [`BridgeError::DeviceNotFound`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{BridgeError, Result};

/// USB vendor ids of the UART bridges and native-USB MCUs radios ship with
/// (Silicon Labs CP210x, FTDI, Espressif, WCH CH34x, Nordic)
pub const KNOWN_RADIO_VENDOR_IDS: &[u16] = &[0x10C4, 0x0403, 0x303A, 0x1A86, 0x239A];

/// Device paths probed when enumeration yields no USB devices
const COMMON_DEVICE_PATHS: &[&str] = &[
    // Linux
    "/dev/ttyUSB*",
    "/dev/ttyACM*",
    // macOS
    "/dev/cu.usbserial-*",
    "/dev/cu.SLAB_USBtoUART*",
    "/dev/cu.usbmodem*",
];

/// One selection criterion of an auto-detect query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCriterion {
    /// Substring of the USB product string
    Product(String),
    /// Substring of the USB manufacturer string
    Manufacturer(String),
    /// Exact USB serial number
    Serial(String),
    /// USB vendor id
    VendorId(u16),
    /// USB product id
    ProductId(u16),
}

impl DeviceCriterion {
    fn parse(pair: &str) -> std::result::Result<Self, String> {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected criterion=value, got {pair:?}"))?;
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if value.is_empty() {
            return Err(format!("empty value for {key}"));
        }
        match key.as_str() {
            "product" => Ok(DeviceCriterion::Product(value.to_string())),
            "manufacturer" => Ok(DeviceCriterion::Manufacturer(value.to_string())),
            "serial" => Ok(DeviceCriterion::Serial(value.to_string())),
            "vendor_id" | "vid" => parse_usb_id(value).map(DeviceCriterion::VendorId),
            "product_id" | "pid" => parse_usb_id(value).map(DeviceCriterion::ProductId),
            other => Err(format!(
                "unknown criterion {other:?} (expected product, manufacturer, serial, vendor_id, product_id)"
            )),
        }
    }

    /// Whether a device satisfies this criterion
    pub fn matches(&self, device: &DeviceInfo) -> bool {
        fn contains(field: &Option<String>, needle: &str) -> bool {
            field
                .as_deref()
                .is_some_and(|s| s.to_lowercase().contains(&needle.to_lowercase()))
        }
        match self {
            DeviceCriterion::Product(p) => contains(&device.product_name, p),
            DeviceCriterion::Manufacturer(m) => contains(&device.manufacturer, m),
            DeviceCriterion::Serial(s) => device
                .serial_number
                .as_deref()
                .is_some_and(|sn| sn.eq_ignore_ascii_case(s)),
            DeviceCriterion::VendorId(v) => device.vendor_id == Some(*v),
            DeviceCriterion::ProductId(p) => device.product_id == Some(*p),
        }
    }
}

impl fmt::Display for DeviceCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCriterion::Product(v) => write!(f, "product={v}"),
            DeviceCriterion::Manufacturer(v) => write!(f, "manufacturer={v}"),
            DeviceCriterion::Serial(v) => write!(f, "serial={v}"),
            DeviceCriterion::VendorId(v) => write!(f, "vendor_id={v:04x}"),
            DeviceCriterion::ProductId(v) => write!(f, "product_id={v:04x}"),
        }
    }
}

fn parse_usb_id(value: &str) -> std::result::Result<u16, String> {
    let hex = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u16::from_str_radix(hex, 16).map_err(|_| format!("invalid USB id {value:?}"))
}

/// Parsed `auto[:criterion=value,...]` query
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AutoDetectQuery {
    /// Criteria, all of which must match
    pub criteria: Vec<DeviceCriterion>,
}

impl AutoDetectQuery {
    /// Whether the query has no criteria (bare `auto`)
    pub fn is_bare(&self) -> bool {
        self.criteria.is_empty()
    }

    /// Whether every criterion matches the device.
    ///
    /// A bare query matches devices from known radio vendors.
    pub fn matches(&self, device: &DeviceInfo) -> bool {
        if self.is_bare() {
            return device.is_likely_radio();
        }
        self.criteria.iter().all(|c| c.matches(device))
    }

    /// Pick the single device this query selects
    pub fn select<'a>(&self, devices: &'a [DeviceInfo]) -> Result<&'a DeviceInfo> {
        let matches: Vec<&DeviceInfo> = devices.iter().filter(|d| self.matches(d)).collect();
        match matches.as_slice() {
            [one] => Ok(one),
            [] => Err(BridgeError::DeviceNotFound {
                query: self.to_string(),
                reason: format!("no device matched among {} enumerated", devices.len()),
            }),
            many => {
                let candidates = many
                    .iter()
                    .map(|d| d.describe())
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(BridgeError::DeviceNotFound {
                    query: self.to_string(),
                    reason: format!(
                        "{} devices matched, add serial= to disambiguate: {}",
                        many.len(),
                        candidates
                    ),
                })
            }
        }
    }
}

impl FromStr for AutoDetectQuery {
    type Err = String;

    /// Parse the full specifier, including the leading `auto`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let rest = s
            .strip_prefix("auto")
            .ok_or_else(|| format!("{s:?} is not an auto-detect query"))?;
        let rest = match rest {
            "" => return Ok(Self::default()),
            r => r
                .strip_prefix(':')
                .ok_or_else(|| format!("expected ':' after auto in {s:?}"))?,
        };
        let criteria = rest
            .split(',')
            .filter(|p| !p.trim().is_empty())
            .map(DeviceCriterion::parse)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { criteria })
    }
}

impl fmt::Display for AutoDetectQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("auto")?;
        for (i, c) in self.criteria.iter().enumerate() {
            f.write_str(if i == 0 { ":" } else { "," })?;
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// Information about an enumerated serial device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Path to the device (e.g., /dev/ttyUSB0)
    pub path: String,
    /// Device type description
    pub device_type: String,
    /// USB vendor id (if available)
    pub vendor_id: Option<u16>,
    /// USB product id (if available)
    pub product_id: Option<u16>,
    /// Product name (if available)
    pub product_name: Option<String>,
    /// Manufacturer (if available)
    pub manufacturer: Option<String>,
    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl DeviceInfo {
    /// Device known only by its path
    pub fn from_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            device_type: "Unknown".to_string(),
            ..Default::default()
        }
    }

    /// Whether the device looks like a radio (known USB vendor or product name)
    pub fn is_likely_radio(&self) -> bool {
        if self
            .vendor_id
            .is_some_and(|vid| KNOWN_RADIO_VENDOR_IDS.contains(&vid))
        {
            return true;
        }
        self.product_name.as_deref().is_some_and(|p| {
            let p = p.to_lowercase();
            ["meshtastic", "meshcore", "t-beam", "t-echo", "heltec", "rak", "lora"]
                .iter()
                .any(|needle| p.contains(needle))
        })
    }

    /// One-line summary for diagnostics
    pub fn describe(&self) -> String {
        let ids = match (self.vendor_id, self.product_id) {
            (Some(v), Some(p)) => format!(" {v:04x}:{p:04x}"),
            _ => String::new(),
        };
        format!(
            "{}{} product={} serial={}",
            self.path,
            ids,
            self.product_name.as_deref().unwrap_or("?"),
            self.serial_number.as_deref().unwrap_or("?"),
        )
    }

    #[cfg(feature = "serial")]
    fn from_serial_port(port: &serialport::SerialPortInfo) -> Self {
        use serialport::SerialPortType;

        let base = Self::from_path(port.port_name.clone());
        match &port.port_type {
            SerialPortType::UsbPort(usb) => Self {
                device_type: "USB".to_string(),
                vendor_id: Some(usb.vid),
                product_id: Some(usb.pid),
                product_name: usb.product.clone(),
                manufacturer: usb.manufacturer.clone(),
                serial_number: usb.serial_number.clone(),
                ..base
            },
            SerialPortType::PciPort => Self {
                device_type: "PCI".to_string(),
                ..base
            },
            SerialPortType::BluetoothPort => Self {
                device_type: "Bluetooth".to_string(),
                ..base
            },
            SerialPortType::Unknown => base,
        }
    }
}

/// Enumerate serial devices present on this system
pub fn enumerate_devices() -> Vec<DeviceInfo> {
    #[cfg(feature = "serial")]
    {
        match serialport::available_ports() {
            Ok(ports) => ports.iter().map(DeviceInfo::from_serial_port).collect(),
            Err(e) => {
                debug!(error = %e, "Serial port enumeration failed");
                Vec::new()
            }
        }
    }

    #[cfg(not(feature = "serial"))]
    {
        debug!("Serial feature not enabled, no devices enumerated");
        Vec::new()
    }
}

/// Devices found by globbing well-known paths
pub fn probe_common_paths() -> Vec<DeviceInfo> {
    let mut found = Vec::new();
    for pattern in COMMON_DEVICE_PATHS {
        let Ok(entries) = glob::glob(pattern) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.to_string_lossy().to_string();
            if !found.iter().any(|d: &DeviceInfo| d.path == path) {
                found.push(DeviceInfo::from_path(path));
            }
        }
    }
    found
}

/// Resolve a query against an explicit device list
pub fn resolve_among(query: &AutoDetectQuery, devices: &[DeviceInfo]) -> Result<PathBuf> {
    let device = query.select(devices)?;
    info!(query = %query, device = %device.describe(), "Auto-detected radio");
    Ok(PathBuf::from(&device.path))
}

/// Resolve a query against the devices present right now.
///
/// A bare `auto` falls back to well-known device paths when USB enumeration
/// finds no radio.
pub fn resolve_port(query: &AutoDetectQuery) -> Result<PathBuf> {
    let devices = enumerate_devices();
    if query.is_bare() && !devices.iter().any(DeviceInfo::is_likely_radio) {
        let probed = probe_common_paths();
        if let [only] = probed.as_slice() {
            info!(path = %only.path, "Auto-detected radio by path");
            return Ok(PathBuf::from(&only.path));
        }
        if !probed.is_empty() {
            return Err(BridgeError::DeviceNotFound {
                query: query.to_string(),
                reason: format!(
                    "{} candidate paths and no USB metadata: {}",
                    probed.len(),
                    probed.iter().map(|d| d.path.as_str()).collect::<Vec<_>>().join(", ")
                ),
            });
        }
    }
    resolve_among(query, &devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb(path: &str, vid: u16, pid: u16, product: &str, serial: &str) -> DeviceInfo {
        DeviceInfo {
            path: path.to_string(),
            device_type: "USB".to_string(),
            vendor_id: Some(vid),
            product_id: Some(pid),
            product_name: Some(product.to_string()),
            manufacturer: Some("Silicon Labs".to_string()),
            serial_number: Some(serial.to_string()),
        }
    }

    fn bench() -> Vec<DeviceInfo> {
        vec![
            usb("/dev/ttyUSB0", 0x10c4, 0xea60, "CP2102 USB to UART", "0001"),
            usb("/dev/ttyUSB1", 0x10c4, 0xea60, "CP2102 USB to UART", "0002"),
            usb("/dev/ttyACM0", 0x239a, 0x8029, "T-Echo MeshCore", "F00D"),
        ]
    }

    #[test]
    fn test_parse_query() {
        let q: AutoDetectQuery = "auto:product=T-Echo,vendor_id=0x239A".parse().unwrap();
        assert_eq!(
            q.criteria,
            vec![
                DeviceCriterion::Product("T-Echo".into()),
                DeviceCriterion::VendorId(0x239a)
            ]
        );
        assert_eq!(q.to_string(), "auto:product=T-Echo,vendor_id=239a");

        let bare: AutoDetectQuery = "auto".parse().unwrap();
        assert!(bare.is_bare());
    }

    #[test]
    fn test_parse_rejects_unknown_criterion() {
        let err = "auto:color=blue".parse::<AutoDetectQuery>().unwrap_err();
        assert!(err.contains("color"));
        assert!("auto:vendor_id=zz".parse::<AutoDetectQuery>().is_err());
        assert!("autox".parse::<AutoDetectQuery>().is_err());
    }

    #[test]
    fn test_single_match_resolves() {
        let q: AutoDetectQuery = "auto:product=t-echo".parse().unwrap();
        let path = resolve_among(&q, &bench()).unwrap();
        assert_eq!(path, PathBuf::from("/dev/ttyACM0"));
    }

    #[test]
    fn test_serial_disambiguates() {
        let q: AutoDetectQuery = "auto:vendor_id=10c4,serial=0002".parse().unwrap();
        assert_eq!(
            resolve_among(&q, &bench()).unwrap(),
            PathBuf::from("/dev/ttyUSB1")
        );
    }

    #[test]
    fn test_ambiguous_is_device_not_found() {
        let q: AutoDetectQuery = "auto:vendor_id=10c4".parse().unwrap();
        let err = resolve_among(&q, &bench()).unwrap_err();
        match err {
            BridgeError::DeviceNotFound { reason, .. } => {
                assert!(reason.contains("2 devices matched"));
                assert!(reason.contains("/dev/ttyUSB0"));
                assert!(reason.contains("/dev/ttyUSB1"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_no_match_is_device_not_found() {
        let q: AutoDetectQuery = "auto:serial=ABSENT".parse().unwrap();
        let err = resolve_among(&q, &bench()).unwrap_err();
        assert!(matches!(err, BridgeError::DeviceNotFound { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_bare_query_matches_known_vendors() {
        let q = AutoDetectQuery::default();
        let devices = vec![
            DeviceInfo::from_path("/dev/ttyS0"),
            usb("/dev/ttyACM0", 0x303a, 0x1001, "USB JTAG/serial debug unit", "AA"),
        ];
        assert_eq!(
            resolve_among(&q, &devices).unwrap(),
            PathBuf::from("/dev/ttyACM0")
        );
    }
}
