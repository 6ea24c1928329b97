// SafetyGuard - Classifies target devices and gates every destructive call.
//
// The guard never erases anything. Its single output is an auditable
// decision record that the orchestrator embeds in the certificate, including
// override attempts that did not result in an erasure.

use crate::{Device, MediaClass, WipeError, WipeRequest, WipeResult};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClassification {
    SystemDisk,
    RemovableOk,
    FixedOk,
}

/// Operator-supplied policy. The allow/deny lists let operators pre-register
/// known-safe or known-critical devices; list loading is the caller's job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafetyPolicy {
    /// Device paths that are always wipeable, overriding the system-disk
    /// heuristic.
    pub allow_list: Vec<String>,
    /// Device paths that are always treated as system-critical.
    pub deny_list: Vec<String>,
}

/// Immutable record of one authorization decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    pub device_path: String,
    pub classification: DeviceClassification,
    pub allowed: bool,
    pub reason: String,
    pub override_attempted: bool,
    pub override_granted: bool,
    pub operator_id: Option<String>,
}

impl DecisionRecord {
    pub fn as_result(&self) -> WipeResult<()> {
        if self.allowed {
            Ok(())
        } else {
            Err(WipeError::AuthorizationDenied(self.reason.clone()))
        }
    }
}

pub struct SafetyGuard {
    policy: SafetyPolicy,
}

impl SafetyGuard {
    pub fn new(policy: SafetyPolicy) -> Self {
        Self { policy }
    }

    /// Classify a device. Deny list beats allow list beats the snapshot's
    /// system-disk flag.
    pub fn classify(&self, device: &Device) -> DeviceClassification {
        if self.policy.deny_list.iter().any(|p| p == &device.path) {
            return DeviceClassification::SystemDisk;
        }
        let pre_registered = self.policy.allow_list.iter().any(|p| p == &device.path);
        if device.is_system_disk && !pre_registered {
            return DeviceClassification::SystemDisk;
        }
        match device.media_class {
            MediaClass::Removable => DeviceClassification::RemovableOk,
            _ => DeviceClassification::FixedOk,
        }
    }

    /// Expected primary confirmation token: the device path, typed back.
    pub fn expected_confirmation(device: &Device) -> String {
        device.path.clone()
    }

    /// Expected second factor for a system-disk override. Distinct from the
    /// primary token by construction, and checked to be so anyway.
    pub fn expected_override(device: &Device) -> String {
        format!("OVERRIDE {}", device.path)
    }

    /// Decide whether the request may proceed. Always returns a record, even
    /// for denials, so override attempts land in the certificate.
    pub fn authorize(
        &self,
        request: &WipeRequest,
        classification: DeviceClassification,
    ) -> DecisionRecord {
        let device = &request.device;
        let override_attempted = request.system_override.is_some();
        let mut record = DecisionRecord {
            timestamp: crate::now_utc(),
            device_path: device.path.clone(),
            classification,
            allowed: false,
            reason: String::new(),
            override_attempted,
            override_granted: false,
            operator_id: request.operator_id.clone(),
        };

        if request.confirmation_token != Self::expected_confirmation(device) {
            record.reason = "confirmation token does not match target device".to_string();
            return record;
        }

        match classification {
            DeviceClassification::RemovableOk | DeviceClassification::FixedOk => {
                record.allowed = true;
                record.reason = "device classified wipeable".to_string();
                record
            }
            DeviceClassification::SystemDisk => {
                let Some(ref override_req) = request.system_override else {
                    record.reason = "system-critical device; no override supplied".to_string();
                    return record;
                };
                warn!(
                    "system-disk override attempted for {} by {:?}",
                    device.path, request.operator_id
                );
                if override_req.second_token == request.confirmation_token {
                    record.reason =
                        "override token must differ from the confirmation token".to_string();
                    return record;
                }
                if override_req.second_token != Self::expected_override(device) {
                    record.reason = "override token does not match target device".to_string();
                    return record;
                }
                record.allowed = true;
                record.override_granted = true;
                record.reason = "system-critical device; two-factor override granted".to_string();
                record
            }
        }
    }
}
