//! Device domain types: addresses, classes, keys and device-list parsing

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Six colon-separated hex octets, any case.
static ADDRESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)[0-9a-f]{2}(?::[0-9a-f]{2}){5}$").expect("Address regex pattern is valid")
});

const FNV_OFFSET_BASIS: u32 = 0x811C_9DC5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Canonical textual form of a hardware address: trimmed and upper-cased.
pub fn canonical_address(address: &str) -> String {
    address.trim().to_ascii_uppercase()
}

/// Check whether `address` looks like `AA:BB:CC:DD:EE:FF` (any case).
pub fn is_valid_address(address: &str) -> bool {
    ADDRESS_PATTERN.is_match(address.trim())
}

/// Validate and canonicalize an address supplied to an operation.
pub fn validate_address(address: &str) -> Result<String> {
    if is_valid_address(address) {
        Ok(canonical_address(address))
    } else {
        Err(Error::invalid_argument(
            "address",
            format!("expected AA:BB:CC:DD:EE:FF, got '{}'", address),
        ))
    }
}

// ─────────────────────────────────────────────────────────────────
// DeviceKey
// ─────────────────────────────────────────────────────────────────

/// Compact digest of a hardware address stored in the shared device sets.
///
/// 32-bit FNV-1a over the canonical (upper-case) address, so every process
/// derives the same key regardless of how the address was typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey(u32);

impl DeviceKey {
    pub fn from_address(address: &str) -> Self {
        let canonical = canonical_address(address);
        let hash = canonical.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
            (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
        });
        Self(hash)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────
// DeviceClass
// ─────────────────────────────────────────────────────────────────

/// Device class filter understood by the control interpreter's `devices` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceClass {
    #[default]
    Unknown,
    Paired,
    Trusted,
    Bonded,
    Connected,
}

impl DeviceClass {
    /// Classes that can be used as a `devices <Class>` filter.
    pub const FILTERS: [DeviceClass; 4] = [
        DeviceClass::Paired,
        DeviceClass::Trusted,
        DeviceClass::Bonded,
        DeviceClass::Connected,
    ];

    /// Argument passed to `bluetoothctl devices`, `None` for "all devices".
    pub fn filter_arg(self) -> Option<&'static str> {
        match self {
            DeviceClass::Unknown => None,
            DeviceClass::Paired => Some("Paired"),
            DeviceClass::Trusted => Some("Trusted"),
            DeviceClass::Bonded => Some("Bonded"),
            DeviceClass::Connected => Some("Connected"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceClass::Unknown => "unknown",
            DeviceClass::Paired => "paired",
            DeviceClass::Trusted => "trusted",
            DeviceClass::Bonded => "bonded",
            DeviceClass::Connected => "connected",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceClass {
    type Err = Error;

    /// Case-insensitive; only the four filter classes are accepted.
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        DeviceClass::FILTERS
            .into_iter()
            .find(|class| class.as_str() == lower)
            .ok_or_else(|| {
                Error::invalid_argument(
                    "class",
                    format!(
                        "expected one of 'paired', 'trusted', 'bonded', 'connected', got '{}'",
                        s
                    ),
                )
            })
    }
}

// ─────────────────────────────────────────────────────────────────
// Device
// ─────────────────────────────────────────────────────────────────

/// A device as reported by one query of the control interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Canonical hardware address
    pub address: String,

    /// Advertised name, empty when the device reports none
    pub name: String,

    /// Class of the query that produced this device
    pub class: DeviceClass,
}

impl Device {
    pub fn new(address: impl AsRef<str>, name: impl Into<String>, class: DeviceClass) -> Self {
        Self {
            address: canonical_address(address.as_ref()),
            name: name.into(),
            class,
        }
    }

    pub fn key(&self) -> DeviceKey {
        DeviceKey::from_address(&self.address)
    }

    /// Name for messages: the advertised name, or the address if there is none.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.address
        } else {
            &self.name
        }
    }
}

/// Parse `devices` output into devices of `class`.
///
/// Each line is split at its first two whitespace characters: the token
/// between them is the address and the remainder is the name
/// (`Device AA:BB:CC:DD:EE:FF My Phone`).
/// Lines without two distinct split points are discarded. Order is kept and a
/// repeated address keeps its first occurrence.
pub fn parse_device_list(output: &str, class: DeviceClass) -> Vec<Device> {
    let mut devices: Vec<Device> = Vec::new();

    for line in output.lines() {
        let line = crate::ansi::clean_line(line);
        if line.is_empty() {
            continue;
        }

        let mut boundaries = line.char_indices().filter(|(_, c)| c.is_whitespace());
        let (Some((first, a)), Some((second, b))) = (boundaries.next(), boundaries.next()) else {
            continue;
        };

        let address = &line[first + a.len_utf8()..second];
        if address.is_empty() {
            continue;
        }
        let name = &line[second + b.len_utf8()..];

        let device = Device::new(address, name, class);
        if devices.iter().all(|d| d.address != device.address) {
            devices.push(device);
        }
    }

    devices
}

/// Check whether `address` appears in `devices`.
pub fn contains_address(devices: &[Device], address: &str) -> bool {
    let canonical = canonical_address(address);
    devices.iter().any(|d| d.address == canonical)
}
