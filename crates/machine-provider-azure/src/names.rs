//! Deterministic naming of the resources that make up one machine.
//!
//! No backend object enumerates a machine's VM, NIC and disks together; they
//! are tied to each other purely by the names derived here.

use crate::error::MachineError;
use crate::spec::DataDiskSpec;

/// Scheme of provider IDs handed to the calling layer.
pub const PROVIDER_ID_SCHEME: &str = "azure";

/// Suffix of NIC names.
pub const NIC_SUFFIX: &str = "-nic";

/// Suffix of OS disk names.
pub const OS_DISK_SUFFIX: &str = "-os-disk";

/// Suffix of data disk names.
pub const DATA_DISK_SUFFIX: &str = "-data-disk";

/// Names of every resource belonging to one machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineResourceNames {
    /// VM name (also the node name).
    pub vm: String,
    /// NIC name.
    pub nic: String,
    /// OS disk name.
    pub os_disk: String,
    /// Data disk names, in spec order.
    pub data_disks: Vec<String>,
}

impl MachineResourceNames {
    /// Derive all resource names from the VM name and the configured data disks.
    #[must_use]
    pub fn new(vm_name: &str, data_disks: &[DataDiskSpec]) -> Self {
        Self {
            vm: vm_name.to_string(),
            nic: nic_name(vm_name),
            os_disk: format!("{vm_name}{OS_DISK_SUFFIX}"),
            data_disks: data_disks
                .iter()
                .map(|disk| data_disk_name(vm_name, disk))
                .collect(),
        }
    }

    /// OS disk followed by data disks.
    pub fn disks(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.os_disk.as_str()).chain(self.data_disks.iter().map(String::as_str))
    }
}

/// NIC name for a VM.
#[must_use]
pub fn nic_name(vm_name: &str) -> String {
    format!("{vm_name}{NIC_SUFFIX}")
}

/// VM name a NIC name was derived from, if it follows the convention.
#[must_use]
pub fn vm_name_from_nic(nic_name: &str) -> Option<&str> {
    nic_name
        .strip_suffix(NIC_SUFFIX)
        .filter(|vm_name| !vm_name.is_empty())
}

/// Data disk name: `<vm>-<name>-<lun>-data-disk`, or `<vm>-<lun>-data-disk`
/// when the disk has no name.
#[must_use]
pub fn data_disk_name(vm_name: &str, disk: &DataDiskSpec) -> String {
    match disk.name.as_deref().filter(|name| !name.is_empty()) {
        Some(name) => format!("{vm_name}-{name}-{}{DATA_DISK_SUFFIX}", disk.lun),
        None => format!("{vm_name}-{}{DATA_DISK_SUFFIX}", disk.lun),
    }
}

/// Provider ID for a VM: `azure:///<location>/<vmName>`.
#[must_use]
pub fn provider_id(location: &str, vm_name: &str) -> String {
    format!("{PROVIDER_ID_SCHEME}:///{location}/{vm_name}")
}

/// Identity of a machine as reported to the calling layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineInfo {
    /// `azure:///<location>/<vmName>`.
    pub provider_id: String,
    /// Node name, equal to the VM name.
    pub node_name: String,
}

impl MachineInfo {
    /// Identity of VM `vm_name` in `location`.
    #[must_use]
    pub fn new(location: &str, vm_name: &str) -> Self {
        Self {
            provider_id: provider_id(location, vm_name),
            node_name: vm_name.to_string(),
        }
    }
}

/// Split a provider ID into location and VM name.
///
/// # Errors
/// Returns [`MachineError::InvalidArgument`] if the ID is not of the form
/// `azure:///<location>/<vmName>`.
pub fn parse_provider_id(provider_id: &str) -> Result<(&str, &str), MachineError> {
    provider_id
        .strip_prefix(PROVIDER_ID_SCHEME)
        .and_then(|rest| rest.strip_prefix(":///"))
        .and_then(|rest| rest.split_once('/'))
        .filter(|(location, vm)| !location.is_empty() && !vm.is_empty() && !vm.contains('/'))
        .ok_or_else(|| {
            MachineError::InvalidArgument(format!("malformed provider ID {provider_id:?}"))
        })
}
