//! Azure Resource Manager request and response models.
//!
//! One model serves both directions for resources that ARM accepts back in
//! the shape it returns them (VM, NIC, agreement). Read-only fields are
//! optional and skipped when empty.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// Common types
// ============================================================================

/// Reference to another resource by ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubResource {
    /// Resource ID.
    pub id: String,
}

impl SubResource {
    /// Reference `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// What happens to a dependent resource when its VM is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteOption {
    /// Delete together with the VM.
    Delete,
    /// Detach and keep.
    Detach,
}

/// Error body returned by ARM.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudErrorBody {
    /// Error details.
    pub error: Option<CloudErrorDetail>,
}

/// Error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudErrorDetail {
    /// Error code.
    pub code: Option<String>,
    /// Error message.
    pub message: Option<String>,
}

/// Status document of a long-running operation.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationStatus {
    /// `InProgress`, `Succeeded`, `Failed` or `Canceled`.
    pub status: String,
    /// Failure details.
    pub error: Option<CloudErrorDetail>,
}

// ============================================================================
// Virtual machine types
// ============================================================================

/// Azure virtual machine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachine {
    /// Resource ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// VM name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Location.
    pub location: String,
    /// Tags.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
    /// Availability zones.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,
    /// Marketplace purchase plan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    /// Managed identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<VirtualMachineIdentity>,
    /// VM properties.
    #[serde(default)]
    pub properties: VirtualMachineProperties,
}

/// Marketplace purchase plan attached to a VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan name.
    pub name: String,
    /// Publisher.
    pub publisher: String,
    /// Product (offer).
    pub product: String,
}

/// VM managed identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineIdentity {
    /// Identity type.
    #[serde(rename = "type")]
    pub identity_type: String,
    /// User-assigned identities keyed by resource ID.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub user_assigned_identities: HashMap<String, serde_json::Value>,
}

/// Azure VM properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineProperties {
    /// Provisioning state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
    /// VM ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_id: Option<String>,
    /// Hardware profile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware_profile: Option<HardwareProfile>,
    /// Storage profile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_profile: Option<StorageProfile>,
    /// OS profile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_profile: Option<OsProfile>,
    /// Network profile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_profile: Option<NetworkProfile>,
    /// Availability set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_set: Option<SubResource>,
    /// Scale set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_machine_scale_set: Option<SubResource>,
    /// Diagnostics profile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics_profile: Option<DiagnosticsProfile>,
}

/// Hardware profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareProfile {
    /// VM size.
    pub vm_size: String,
}

/// Storage profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfile {
    /// Image reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_reference: Option<ImageReference>,
    /// OS disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_disk: Option<OsDisk>,
    /// Data disks.
    #[serde(default)]
    pub data_disks: Vec<DataDisk>,
}

/// Image reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReference {
    /// Publisher.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    /// Offer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer: Option<String>,
    /// SKU.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    /// Version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Image ID (for custom images).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Shared gallery image ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_gallery_image_id: Option<String>,
    /// Community gallery image ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community_gallery_image_id: Option<String>,
}

/// OS disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsDisk {
    /// Disk name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// OS type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_type: Option<String>,
    /// Caching mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caching: Option<String>,
    /// Create option.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_option: Option<String>,
    /// Disk size in GB.
    #[serde(rename = "diskSizeGB", skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<i32>,
    /// Managed disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_disk: Option<ManagedDiskParameters>,
    /// Cascade delete behaviour.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_option: Option<DeleteOption>,
}

/// Data disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDisk {
    /// Logical unit number.
    pub lun: i32,
    /// Disk name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Caching mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caching: Option<String>,
    /// Create option.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_option: Option<String>,
    /// Disk size in GB.
    #[serde(rename = "diskSizeGB", skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<i32>,
    /// Managed disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_disk: Option<ManagedDiskParameters>,
    /// Cascade delete behaviour.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_option: Option<DeleteOption>,
    /// Set while a detach is pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_be_detached: Option<bool>,
}

/// Managed disk parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedDiskParameters {
    /// Disk resource ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Storage account type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_account_type: Option<String>,
}

/// OS profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsProfile {
    /// Computer name.
    pub computer_name: String,
    /// Admin username.
    pub admin_username: String,
    /// Custom data (cloud-init, base64 encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<String>,
    /// Linux configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linux_configuration: Option<LinuxConfiguration>,
}

/// Linux configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinuxConfiguration {
    /// Disable password authentication.
    pub disable_password_authentication: bool,
    /// SSH configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshConfiguration>,
}

/// SSH configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfiguration {
    /// Public keys.
    pub public_keys: Vec<SshPublicKey>,
}

/// SSH public key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshPublicKey {
    /// Path (e.g., `/home/core/.ssh/authorized_keys`).
    pub path: String,
    /// Key data.
    pub key_data: String,
}

/// Network profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProfile {
    /// Network interfaces.
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterfaceReference>,
}

/// Network interface reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInterfaceReference {
    /// Network interface ID.
    pub id: String,
    /// Properties.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<NetworkInterfaceReferenceProperties>,
}

/// Network interface reference properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceReferenceProperties {
    /// Primary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<bool>,
    /// Cascade delete behaviour.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_option: Option<DeleteOption>,
}

/// Diagnostics profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsProfile {
    /// Boot diagnostics.
    pub boot_diagnostics: BootDiagnostics,
}

/// Boot diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootDiagnostics {
    /// Enabled.
    pub enabled: bool,
    /// Storage blob endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_uri: Option<String>,
}

/// Partial VM update (PATCH body).
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineUpdate {
    /// Properties to change.
    pub properties: VirtualMachineUpdateProperties,
}

/// Properties of a partial VM update.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineUpdateProperties {
    /// Storage profile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_profile: Option<StorageProfile>,
    /// Network profile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_profile: Option<NetworkProfile>,
}

// ============================================================================
// Network types
// ============================================================================

/// Network interface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// Resource ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Location.
    pub location: String,
    /// Tags.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
    /// Properties.
    #[serde(default)]
    pub properties: NetworkInterfaceProperties,
}

/// Network interface properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceProperties {
    /// IP configurations.
    #[serde(default)]
    pub ip_configurations: Vec<IpConfiguration>,
    /// Accelerated networking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_accelerated_networking: Option<bool>,
    /// IP forwarding.
    #[serde(rename = "enableIPForwarding", skip_serializing_if = "Option::is_none")]
    pub enable_ip_forwarding: Option<bool>,
    /// VM this NIC is attached to (read-only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_machine: Option<SubResource>,
    /// Provisioning state (read-only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

/// IP configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfiguration {
    /// Name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Properties.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<IpConfigurationProperties>,
}

/// IP configuration properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfigurationProperties {
    /// Subnet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet: Option<SubResource>,
    /// `Dynamic` or `Static`.
    #[serde(rename = "privateIPAllocationMethod", skip_serializing_if = "Option::is_none")]
    pub private_ip_allocation_method: Option<String>,
    /// Private IP address (read-only).
    #[serde(rename = "privateIPAddress", skip_serializing_if = "Option::is_none")]
    pub private_ip_address: Option<String>,
    /// Primary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<bool>,
}

/// Subnet.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    /// Resource ID.
    pub id: String,
    /// Name.
    pub name: Option<String>,
    /// Properties.
    #[serde(default)]
    pub properties: SubnetProperties,
}

/// Subnet properties.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetProperties {
    /// Address prefix.
    pub address_prefix: Option<String>,
}

// ============================================================================
// Disk types
// ============================================================================

/// Managed disk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    /// Resource ID.
    pub id: Option<String>,
    /// Name.
    pub name: Option<String>,
    /// ID of the VM the disk is attached to.
    pub managed_by: Option<String>,
    /// Properties.
    #[serde(default)]
    pub properties: DiskProperties,
}

/// Disk properties.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskProperties {
    /// `Attached`, `Unattached`, ...
    pub disk_state: Option<String>,
    /// Provisioning state.
    pub provisioning_state: Option<String>,
}

// ============================================================================
// Marketplace types
// ============================================================================

/// Marketplace terms agreement for one plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementTerms {
    /// Resource ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Properties.
    #[serde(default)]
    pub properties: AgreementProperties,
}

/// Agreement properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementProperties {
    /// Publisher.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    /// Product (offer).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    /// Plan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    /// License text link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_text_link: Option<String>,
    /// Privacy policy link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy_policy_link: Option<String>,
    /// Retrieve datetime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieve_datetime: Option<String>,
    /// Signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Whether the terms are accepted.
    #[serde(default)]
    pub accepted: bool,
}

/// Marketplace VM image version.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineImage {
    /// Resource ID.
    pub id: Option<String>,
    /// Version name.
    pub name: String,
    /// Properties.
    #[serde(default)]
    pub properties: VirtualMachineImageProperties,
}

/// Marketplace VM image properties.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineImageProperties {
    /// Purchase plan, present for commercially licensed images.
    pub plan: Option<PurchasePlan>,
}

/// Image purchase plan.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PurchasePlan {
    /// Plan name.
    pub name: String,
    /// Publisher.
    pub publisher: String,
    /// Product (offer).
    pub product: String,
}

impl From<PurchasePlan> for Plan {
    fn from(plan: PurchasePlan) -> Self {
        Self {
            name: plan.name,
            publisher: plan.publisher,
            product: plan.product,
        }
    }
}

/// Entry of a VM image version listing.
#[derive(Debug, Clone, Deserialize)]
pub struct VirtualMachineImageResource {
    /// Version name.
    pub name: String,
    /// Resource ID.
    pub id: Option<String>,
}

// ============================================================================
// Resource Graph types
// ============================================================================

/// Resource Graph query request.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRequest {
    /// Subscriptions to query.
    pub subscriptions: Vec<String>,
    /// Kusto query.
    pub query: String,
    /// Options.
    pub options: QueryRequestOptions,
}

/// Resource Graph query options.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryRequestOptions {
    /// Continuation token from the previous page.
    #[serde(rename = "$skipToken", skip_serializing_if = "Option::is_none")]
    pub skip_token: Option<String>,
    /// Result format.
    #[serde(rename = "resultFormat")]
    pub result_format: String,
}

/// Resource Graph query response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    /// Total records matching the query.
    #[serde(default)]
    pub total_records: i64,
    /// Records in this page.
    #[serde(default)]
    pub count: i64,
    /// Rows (object array format).
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
    /// Continuation token.
    #[serde(rename = "$skipToken")]
    pub skip_token: Option<String>,
}
