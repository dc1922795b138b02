//! Admission gate applied after zone and device resolution.

use std::fmt;

use crate::configs::PolicyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    UnknownDevice,
    UnknownZone,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::UnknownDevice => f.write_str("unknown device"),
            DropReason::UnknownZone => f.write_str("unknown zone"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Drop(DropReason),
}

#[derive(Debug, Clone, Copy)]
pub struct AdmissionPolicy {
    allow_unknown_devices: bool,
    allow_unknown_zones: bool,
}

impl AdmissionPolicy {
    pub fn new(policy: &PolicyConfig) -> Self {
        Self {
            allow_unknown_devices: policy.allow_unknown_devices,
            allow_unknown_zones: policy.allow_unknown_zones,
        }
    }

    /// Both checks must pass. The device check runs first, so a record
    /// missing both is reported as an unknown device.
    pub fn evaluate(&self, device_resolved: bool, zone_resolved: bool) -> Admission {
        if !device_resolved && !self.allow_unknown_devices {
            return Admission::Drop(DropReason::UnknownDevice);
        }
        if !zone_resolved && !self.allow_unknown_zones {
            return Admission::Drop(DropReason::UnknownZone);
        }
        Admission::Admit
    }
}
