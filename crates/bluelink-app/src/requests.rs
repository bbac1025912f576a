//! Validated request structures for lifecycle operations
//!
//! Each operation takes one request value. When an attempt fails, the retry
//! wrapper calls [`Sanitize::sanitize`] before trying again:
//!
//! | field     | rule                                                          |
//! |-----------|---------------------------------------------------------------|
//! | `process` | negative ids become [`ProcessHandle::UNASSIGNED`] (warning)   |
//! | `address` | trimmed and upper-cased                                       |
//! | `name`    | blank names become `None`                                     |
//! | `class`   | unknown class strings become `None` (warning)                 |

use bluelink_core::prelude::*;
use bluelink_core::{canonical_address, Device, DeviceClass};

use crate::exceptions::ProcessHandle;

/// Argument normalization applied between retry attempts.
pub trait Sanitize {
    fn sanitize(&mut self);

    /// The process the request was made on behalf of.
    fn process(&self) -> ProcessHandle;
}

fn sanitize_process(process: &mut ProcessHandle) {
    if process.raw() < 0 && *process != ProcessHandle::UNASSIGNED {
        warn!(
            "Process id {} is not valid, using {}",
            process,
            ProcessHandle::UNASSIGNED
        );
        *process = ProcessHandle::UNASSIGNED;
    } else if *process == ProcessHandle::UNASSIGNED {
        warn!("Request has no process id assigned");
    }
}

/// Request for pair, unpair, connect and disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRequest {
    pub process: ProcessHandle,
    pub address: String,
    pub name: Option<String>,
}

impl DeviceRequest {
    pub fn new(process: ProcessHandle, address: impl Into<String>) -> Self {
        Self {
            process,
            address: address.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// `'name'. MAC: 'address'` fragment for log lines.
    pub fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!("'{}'. MAC: '{}'", name, self.address),
            None => format!("MAC: '{}'", self.address),
        }
    }
}

impl Sanitize for DeviceRequest {
    fn sanitize(&mut self) {
        sanitize_process(&mut self.process);
        self.address = canonical_address(&self.address);
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            self.name = None;
        }
    }

    fn process(&self) -> ProcessHandle {
        self.process
    }
}

/// Request for `list_devices`. `class` is kept as the caller's text so a bad
/// filter can be corrected by sanitization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub process: ProcessHandle,
    pub class: Option<String>,
}

impl ListRequest {
    pub fn all(process: ProcessHandle) -> Self {
        Self {
            process,
            class: None,
        }
    }

    pub fn of_class(process: ProcessHandle, class: impl Into<String>) -> Self {
        Self {
            process,
            class: Some(class.into()),
        }
    }

    /// The parsed filter, [`DeviceClass::Unknown`] (all devices) when unset.
    pub fn device_class(&self) -> Result<DeviceClass> {
        match &self.class {
            None => Ok(DeviceClass::Unknown),
            Some(class) => class.parse(),
        }
    }
}

impl Sanitize for ListRequest {
    fn sanitize(&mut self) {
        sanitize_process(&mut self.process);
        if let Some(class) = &self.class {
            if class.parse::<DeviceClass>().is_err() {
                warn!("Device class '{}' is not valid, listing all devices", class);
                self.class = None;
            }
        }
    }

    fn process(&self) -> ProcessHandle {
        self.process
    }
}

/// Request for `auto_connect`: the devices found by the last scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoConnectRequest {
    pub process: ProcessHandle,
    pub devices: Vec<Device>,
}

impl Sanitize for AutoConnectRequest {
    fn sanitize(&mut self) {
        sanitize_process(&mut self.process);
    }

    fn process(&self) -> ProcessHandle {
        self.process
    }
}

/// Request carrying only the caller's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessRequest {
    pub process: ProcessHandle,
}

impl Sanitize for ProcessRequest {
    fn sanitize(&mut self) {
        sanitize_process(&mut self.process);
    }

    fn process(&self) -> ProcessHandle {
        self.process
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_request_sanitize() {
        let mut request = DeviceRequest::new(ProcessHandle::from_raw(-7), "  aa:bb:cc:dd:ee:ff ")
            .with_name("   ");
        request.sanitize();

        assert_eq!(request.process, ProcessHandle::UNASSIGNED);
        assert_eq!(request.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(request.name, None);
    }

    #[test]
    fn test_valid_request_unchanged() {
        let original = DeviceRequest::new(ProcessHandle::from_raw(3), "AA:BB:CC:DD:EE:FF")
            .with_name("Headphones");
        let mut request = original.clone();
        request.sanitize();
        assert_eq!(request, original);
    }

    #[test]
    fn test_list_request_invalid_class_normalized() {
        let mut request = ListRequest::of_class(ProcessHandle::from_raw(0), "favourite");
        assert!(request.device_class().is_err());

        request.sanitize();
        assert_eq!(request.class, None);
        assert_eq!(request.device_class().unwrap(), DeviceClass::Unknown);
    }

    #[test]
    fn test_list_request_valid_class_kept() {
        let mut request = ListRequest::of_class(ProcessHandle::from_raw(0), "Paired");
        request.sanitize();
        assert_eq!(request.device_class().unwrap(), DeviceClass::Paired);
    }

    #[test]
    fn test_describe() {
        let request = DeviceRequest::new(ProcessHandle::from_raw(0), "AA:BB:CC:DD:EE:FF");
        assert_eq!(request.describe(), "MAC: 'AA:BB:CC:DD:EE:FF'");
        assert_eq!(
            request.with_name("Phone").describe(),
            "'Phone'. MAC: 'AA:BB:CC:DD:EE:FF'"
        );
    }
}
