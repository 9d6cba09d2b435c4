//! Host and VM snapshots.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer};

// ============================================================================
// Host types
// ============================================================================

/// Host lifecycle state as reported by the cluster manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Init,
    MonitoringMonitored,
    Monitored,
    /// Monitoring failed; the host is suspected down.
    Error,
    Disabled,
    /// Monitoring of a host already in error failed again.
    MonitoringError,
    MonitoringInit,
    MonitoringDisabled,
    Offline,
    /// A code this hook does not know.
    Other(u32),
}

impl HostState {
    /// Map a numeric state code.
    #[must_use]
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Init,
            1 => Self::MonitoringMonitored,
            2 => Self::Monitored,
            3 => Self::Error,
            4 => Self::Disabled,
            5 => Self::MonitoringError,
            6 => Self::MonitoringInit,
            7 => Self::MonitoringDisabled,
            8 => Self::Offline,
            other => Self::Other(other),
        }
    }

    /// Whether the host is still considered down.
    #[must_use]
    pub fn is_down(self) -> bool {
        matches!(self, Self::Error | Self::MonitoringError)
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::MonitoringMonitored => write!(f, "MONITORING_MONITORED"),
            Self::Monitored => write!(f, "MONITORED"),
            Self::Error => write!(f, "ERROR"),
            Self::Disabled => write!(f, "DISABLED"),
            Self::MonitoringError => write!(f, "MONITORING_ERROR"),
            Self::MonitoringInit => write!(f, "MONITORING_INIT"),
            Self::MonitoringDisabled => write!(f, "MONITORING_DISABLED"),
            Self::Offline => write!(f, "OFFLINE"),
            Self::Other(code) => write!(f, "STATE_{code}"),
        }
    }
}

/// Point-in-time host snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub id: u32,
    pub name: String,
    pub state: HostState,
    /// Flat string attributes of the host template.
    pub template: HashMap<String, String>,
}

// ============================================================================
// VM types
// ============================================================================

/// Coarse VM state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Init,
    Pending,
    Hold,
    Active,
    Stopped,
    Suspended,
    Done,
    Poweroff,
    Undeployed,
    Other(u32),
}

impl VmState {
    /// Map a numeric state code.
    #[must_use]
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Init,
            1 => Self::Pending,
            2 => Self::Hold,
            3 => Self::Active,
            4 => Self::Stopped,
            5 => Self::Suspended,
            6 => Self::Done,
            8 => Self::Poweroff,
            9 => Self::Undeployed,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::Pending => write!(f, "PENDING"),
            Self::Hold => write!(f, "HOLD"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Suspended => write!(f, "SUSPENDED"),
            Self::Done => write!(f, "DONE"),
            Self::Poweroff => write!(f, "POWEROFF"),
            Self::Undeployed => write!(f, "UNDEPLOYED"),
            Self::Other(code) => write!(f, "STATE_{code}"),
        }
    }
}

/// Fine-grained lifecycle manager state of an ACTIVE VM. Unnamed codes
/// display as `LCM_<code>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LcmState(pub u32);

impl LcmState {
    pub const LCM_INIT: Self = Self(0);
    pub const BOOT: Self = Self(2);
    pub const RUNNING: Self = Self(3);
    /// The VM was running on a host that stopped reporting.
    pub const UNKNOWN: Self = Self(16);

    /// Whether the VM is wedged and needs a recovery escalation.
    #[must_use]
    pub fn is_stuck(self) -> bool {
        self == Self::UNKNOWN
    }
}

impl fmt::Display for LcmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::LCM_INIT => "LCM_INIT",
            Self::BOOT => "BOOT",
            Self::RUNNING => "RUNNING",
            Self::UNKNOWN => "UNKNOWN",
            Self(code) => return write!(f, "LCM_{code}"),
        };
        f.write_str(name)
    }
}

/// Point-in-time VM snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachine {
    pub id: u32,
    pub name: String,
    pub state: VmState,
    pub lcm_state: LcmState,
    /// Host of the most recent history record.
    pub last_host: Option<String>,
}

impl VirtualMachine {
    /// Whether this VM must be remediated after `host_name` is fenced.
    #[must_use]
    pub fn is_remediation_target(&self, host_name: &str, include_suspended: bool) -> bool {
        let state_matches = match self.state {
            VmState::Active => true,
            VmState::Suspended => include_suspended,
            _ => false,
        };
        state_matches && self.last_host.as_deref() == Some(host_name)
    }
}

// ============================================================================
// CLI JSON documents
// ============================================================================

/// `onehost show --json`.
#[derive(Debug, Deserialize)]
pub(crate) struct HostDocument {
    #[serde(rename = "HOST")]
    pub host: RawHost,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawHost {
    #[serde(rename = "ID", deserialize_with = "de_code")]
    pub id: u32,
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "STATE", deserialize_with = "de_code")]
    pub state: u32,
    #[serde(rename = "TEMPLATE", default)]
    pub template: HashMap<String, serde_json::Value>,
}

impl From<RawHost> for Host {
    fn from(raw: RawHost) -> Self {
        let template = raw
            .template
            .into_iter()
            .filter_map(|(key, value)| match value {
                serde_json::Value::String(s) => Some((key, s)),
                serde_json::Value::Number(n) => Some((key, n.to_string())),
                _ => None,
            })
            .collect();

        Self {
            id: raw.id,
            name: raw.name,
            state: HostState::from_code(raw.state),
            template,
        }
    }
}

/// `onevm show --json`.
#[derive(Debug, Deserialize)]
pub(crate) struct VmDocument {
    #[serde(rename = "VM")]
    pub vm: RawVm,
}

/// `onevm list --json`.
#[derive(Debug, Deserialize)]
pub(crate) struct VmPoolDocument {
    #[serde(rename = "VM_POOL")]
    pub pool: RawVmPool,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawVmPool {
    #[serde(rename = "VM", default)]
    pub vms: OneOrMany<RawVm>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawVm {
    #[serde(rename = "ID", deserialize_with = "de_code")]
    pub id: u32,
    #[serde(rename = "NAME", default)]
    pub name: String,
    #[serde(rename = "STATE", deserialize_with = "de_code")]
    pub state: u32,
    #[serde(rename = "LCM_STATE", deserialize_with = "de_code")]
    pub lcm_state: u32,
    #[serde(rename = "HISTORY_RECORDS", default)]
    pub history_records: Option<RawHistoryRecords>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawHistoryRecords {
    #[serde(rename = "HISTORY", default)]
    pub history: OneOrMany<RawHistory>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawHistory {
    #[serde(rename = "HOSTNAME", default)]
    pub hostname: Option<String>,
}

impl From<RawVm> for VirtualMachine {
    fn from(raw: RawVm) -> Self {
        let last_host = raw
            .history_records
            .map(|records| records.history.into_vec())
            .and_then(|mut history| history.pop())
            .and_then(|record| record.hostname);

        Self {
            id: raw.id,
            name: raw.name,
            state: VmState::from_code(raw.state),
            lcm_state: LcmState(raw.lcm_state),
            last_host,
        }
    }
}

/// The CLI emits a bare object for one element and an array for several.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

/// Numeric codes arrive as strings or numbers depending on the CLI version.
fn de_code<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Num(u32),
        Text(String),
    }

    match Code::deserialize(deserializer)? {
        Code::Num(n) => Ok(n),
        Code::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(state: VmState, host: Option<&str>) -> VirtualMachine {
        VirtualMachine {
            id: 1,
            name: "vm".into(),
            state,
            lcm_state: LcmState::RUNNING,
            last_host: host.map(str::to_string),
        }
    }

    #[test]
    fn test_down_states() {
        assert!(HostState::from_code(3).is_down());
        assert!(HostState::from_code(5).is_down());
        assert!(!HostState::from_code(2).is_down());
        assert!(!HostState::from_code(42).is_down());
    }

    #[test]
    fn test_target_selection() {
        assert!(vm(VmState::Active, Some("node07")).is_remediation_target("node07", false));
        assert!(!vm(VmState::Active, Some("node08")).is_remediation_target("node07", false));
        assert!(!vm(VmState::Active, None).is_remediation_target("node07", true));
        assert!(!vm(VmState::Suspended, Some("node07")).is_remediation_target("node07", false));
        assert!(vm(VmState::Suspended, Some("node07")).is_remediation_target("node07", true));
        assert!(!vm(VmState::Poweroff, Some("node07")).is_remediation_target("node07", true));
    }

    #[test]
    fn test_parse_host_document() {
        let json = r#"{"HOST":{"ID":"7","NAME":"node07","STATE":"3",
            "TEMPLATE":{"IPMI_IP":"10.1.0.7","CPUSPEED":"2400","PCI":[{"A":"1"}]}}}"#;
        let host: Host = serde_json::from_str::<HostDocument>(json).unwrap().host.into();

        assert_eq!(host.id, 7);
        assert_eq!(host.state, HostState::Error);
        assert_eq!(host.template.get("IPMI_IP").map(String::as_str), Some("10.1.0.7"));
        assert!(!host.template.contains_key("PCI"));
    }

    #[test]
    fn test_last_history_record_wins() {
        let json = r#"{"VM":{"ID":"12","NAME":"web","STATE":"3","LCM_STATE":"16",
            "HISTORY_RECORDS":{"HISTORY":[{"SEQ":"0","HOSTNAME":"node01"},{"SEQ":"1","HOSTNAME":"node07"}]}}}"#;
        let vm: VirtualMachine = serde_json::from_str::<VmDocument>(json).unwrap().vm.into();

        assert_eq!(vm.id, 12);
        assert_eq!(vm.last_host.as_deref(), Some("node07"));
        assert!(vm.lcm_state.is_stuck());
    }

    #[test]
    fn test_pool_single_and_empty() {
        let single = r#"{"VM_POOL":{"VM":{"ID":1,"STATE":3,"LCM_STATE":3,
            "HISTORY_RECORDS":{"HISTORY":{"HOSTNAME":"node07"}}}}}"#;
        let pool = serde_json::from_str::<VmPoolDocument>(single).unwrap();
        assert_eq!(pool.pool.vms.into_vec().len(), 1);

        let empty = r#"{"VM_POOL":{}}"#;
        let pool = serde_json::from_str::<VmPoolDocument>(empty).unwrap();
        assert!(pool.pool.vms.into_vec().is_empty());
    }

    #[test]
    fn test_vm_without_history() {
        let json = r#"{"VM":{"ID":"3","STATE":"1","LCM_STATE":"0","HISTORY_RECORDS":{}}}"#;
        let vm: VirtualMachine = serde_json::from_str::<VmDocument>(json).unwrap().vm.into();
        assert_eq!(vm.state, VmState::Pending);
        assert!(vm.last_host.is_none());
    }

    #[test]
    fn test_lcm_display() {
        assert_eq!(LcmState::UNKNOWN.to_string(), "UNKNOWN");
        assert_eq!(LcmState(21).to_string(), "LCM_21");
        assert_eq!(LcmState(4).to_string(), "LCM_4");
        assert!(!LcmState(4).is_stuck());
    }
}
