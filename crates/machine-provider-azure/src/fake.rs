//! In-memory Azure backend for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::azure::{
    AgreementTerms, ClientFactory, Clients, DeleteOption, Disk, DisksApi,
    MarketplaceAgreementsApi, NetworkInterface, NetworkInterfacesApi, Poller, PurchasePlan,
    QueryRequest, QueryResponse, ResourceGraphApi, ResourceGroupsApi, SubResource, Subnet,
    SubnetProperties, SubnetsApi, VirtualMachine, VirtualMachineImage,
    VirtualMachineImageProperties, VirtualMachineImageResource, VirtualMachineImagesApi,
    VirtualMachineUpdate, VirtualMachinesApi,
};
use crate::config::{ConnectConfig, SecretData};
use crate::error::CloudError;

/// Subscription every fake resource lives in.
pub(crate) const SUBSCRIPTION_ID: &str = "sub-1";

type Key = (String, String);

fn key(resource_group: &str, name: &str) -> Key {
    (resource_group.to_string(), name.to_string())
}

fn api_error(status: u16, code: &str) -> CloudError {
    CloudError::Api {
        status,
        code: Some(code.to_string()),
        message: format!("injected {code}"),
        request_id: Some("fake-request".to_string()),
        correlation_id: Some("fake-correlation".to_string()),
    }
}

fn not_found(what: &str) -> CloudError {
    CloudError::Api {
        status: 404,
        code: Some("ResourceNotFound".to_string()),
        message: format!("{what} not found"),
        request_id: None,
        correlation_id: None,
    }
}

fn resource_id(resource_group: &str, provider: &str, name: &str) -> String {
    format!("/subscriptions/{SUBSCRIPTION_ID}/resourceGroups/{resource_group}/providers/{provider}/{name}")
}

struct Failure {
    status: u16,
    code: String,
    once: bool,
}

#[derive(Default)]
struct State {
    missing_groups: Vec<String>,
    vms: HashMap<Key, VirtualMachine>,
    nics: HashMap<Key, NetworkInterface>,
    disks: HashMap<Key, Disk>,
    subnets: HashMap<String, Subnet>,
    images: HashMap<String, VirtualMachineImage>,
    agreements: HashMap<String, AgreementTerms>,
    graph_pages: HashMap<String, VecDeque<QueryResponse>>,
    graph_skip_tokens: Vec<Option<String>>,
    calls: Vec<String>,
    failures: HashMap<String, Failure>,
    long_running_delay: Option<Duration>,
}

/// Mutex-guarded resource map with a call log and failure injection.
///
/// Calls are logged as `<kind>.<operation> <name>`, e.g. `vm.create vm-0`.
/// Failures are injected for an exact call string.
#[derive(Default)]
pub(crate) struct FakeCloud {
    state: Mutex<State>,
}

impl FakeCloud {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Log `call` and return the injected failure for it, if any.
    fn record(&self, call: String) -> Result<(), CloudError> {
        let mut state = self.lock();
        state.calls.push(call.clone());
        let Some(failure) = state.failures.get(&call) else {
            return Ok(());
        };
        let err = api_error(failure.status, &failure.code);
        if failure.once {
            state.failures.remove(&call);
        }
        Err(err)
    }

    async fn long_running(&self) {
        let delay = self.lock().long_running_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub(crate) fn fail(&self, call: &str, status: u16, code: &str) {
        self.lock().failures.insert(
            call.to_string(),
            Failure {
                status,
                code: code.to_string(),
                once: false,
            },
        );
    }

    pub(crate) fn fail_once(&self, call: &str, status: u16, code: &str) {
        self.lock().failures.insert(
            call.to_string(),
            Failure {
                status,
                code: code.to_string(),
                once: true,
            },
        );
    }

    pub(crate) fn delay_long_running(&self, delay: Duration) {
        self.lock().long_running_delay = Some(delay);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of logged calls starting with `prefix`.
    pub(crate) fn calls_matching(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub(crate) fn set_resource_group(&self, resource_group: &str, exists: bool) {
        let mut state = self.lock();
        state.missing_groups.retain(|rg| rg != resource_group);
        if !exists {
            state.missing_groups.push(resource_group.to_string());
        }
    }

    pub(crate) fn insert_vm(&self, resource_group: &str, mut vm: VirtualMachine) {
        let name = vm.name.clone().unwrap_or_default();
        vm.id.get_or_insert_with(|| {
            resource_id(resource_group, "Microsoft.Compute/virtualMachines", &name)
        });
        self.lock().vms.insert(key(resource_group, &name), vm);
    }

    pub(crate) fn insert_nic(&self, resource_group: &str, mut nic: NetworkInterface) {
        let name = nic.name.clone().unwrap_or_default();
        nic.id.get_or_insert_with(|| {
            resource_id(resource_group, "Microsoft.Network/networkInterfaces", &name)
        });
        self.lock().nics.insert(key(resource_group, &name), nic);
    }

    pub(crate) fn insert_disk(&self, resource_group: &str, disk: Disk) {
        let name = disk.name.clone().unwrap_or_default();
        self.lock().disks.insert(key(resource_group, &name), disk);
    }

    pub(crate) fn insert_subnet(&self, resource_group: &str, vnet: &str, subnet: &str) {
        let id = resource_id(
            resource_group,
            "Microsoft.Network/virtualNetworks",
            &format!("{vnet}/subnets/{subnet}"),
        );
        self.lock().subnets.insert(
            format!("{resource_group}/{vnet}/{subnet}"),
            Subnet {
                id,
                name: Some(subnet.to_string()),
                properties: SubnetProperties {
                    address_prefix: Some("10.250.0.0/16".to_string()),
                },
            },
        );
    }

    /// Publish image `urn` (`publisher:offer:sku:version`) in `location`.
    pub(crate) fn insert_image(&self, location: &str, urn: &str, plan: Option<PurchasePlan>) {
        let version = urn.rsplit(':').next().unwrap_or_default().to_string();
        self.lock().images.insert(
            format!("{location}/{urn}"),
            VirtualMachineImage {
                id: None,
                name: version,
                properties: VirtualMachineImageProperties { plan },
            },
        );
    }

    pub(crate) fn insert_agreement(&self, terms: AgreementTerms) {
        let props = &terms.properties;
        let key = format!(
            "{}/{}/{}",
            props.publisher.as_deref().unwrap_or_default(),
            props.product.as_deref().unwrap_or_default(),
            props.plan.as_deref().unwrap_or_default()
        );
        self.lock().agreements.insert(key, terms);
    }

    pub(crate) fn agreement_accepted(&self, publisher: &str, offer: &str, plan: &str) -> bool {
        self.lock()
            .agreements
            .get(&format!("{publisher}/{offer}/{plan}"))
            .is_some_and(|terms| terms.properties.accepted)
    }

    /// Queue a result page for queries over `resource_type`.
    pub(crate) fn push_graph_page(&self, resource_type: &str, page: QueryResponse) {
        self.lock()
            .graph_pages
            .entry(resource_type.to_string())
            .or_default()
            .push_back(page);
    }

    /// Skip token sent with each graph query, in call order.
    pub(crate) fn graph_skip_tokens(&self) -> Vec<Option<String>> {
        self.lock().graph_skip_tokens.clone()
    }

    pub(crate) fn vm(&self, resource_group: &str, name: &str) -> Option<VirtualMachine> {
        self.lock().vms.get(&key(resource_group, name)).cloned()
    }

    pub(crate) fn nic(&self, resource_group: &str, name: &str) -> Option<NetworkInterface> {
        self.lock().nics.get(&key(resource_group, name)).cloned()
    }

    pub(crate) fn disk(&self, resource_group: &str, name: &str) -> Option<Disk> {
        self.lock().disks.get(&key(resource_group, name)).cloned()
    }
}

impl State {
    /// Attach the VM's NIC and create its disks, as the backend does on create.
    fn attach(&mut self, resource_group: &str, vm: &VirtualMachine) {
        let vm_id = vm.id.clone().unwrap_or_default();
        if let Some(network) = &vm.properties.network_profile {
            for reference in &network.network_interfaces {
                if let Some(nic) = self
                    .nics
                    .iter_mut()
                    .find(|((rg, _), nic)| rg == resource_group && nic.id.as_deref() == Some(reference.id.as_str()))
                    .map(|(_, nic)| nic)
                {
                    nic.properties.virtual_machine = Some(SubResource::new(&vm_id));
                }
            }
        }
        if let Some(storage) = &vm.properties.storage_profile {
            let names = storage
                .os_disk
                .iter()
                .filter_map(|disk| disk.name.clone())
                .chain(storage.data_disks.iter().filter_map(|disk| disk.name.clone()));
            for name in names {
                self.disks.insert(
                    key(resource_group, &name),
                    Disk {
                        id: Some(resource_id(resource_group, "Microsoft.Compute/disks", &name)),
                        name: Some(name.clone()),
                        managed_by: Some(vm_id.clone()),
                        ..Disk::default()
                    },
                );
            }
        }
    }

    /// Delete or detach the VM's NIC and disks according to their delete options.
    fn release(&mut self, resource_group: &str, vm: &VirtualMachine) {
        if let Some(network) = &vm.properties.network_profile {
            for reference in &network.network_interfaces {
                let cascade = reference
                    .properties
                    .as_ref()
                    .is_some_and(|p| p.delete_option == Some(DeleteOption::Delete));
                let found = self
                    .nics
                    .iter()
                    .find(|((rg, _), nic)| rg == resource_group && nic.id.as_deref() == Some(reference.id.as_str()))
                    .map(|(key, _)| key.clone());
                let Some(nic_key) = found else { continue };
                if cascade {
                    self.nics.remove(&nic_key);
                } else if let Some(nic) = self.nics.get_mut(&nic_key) {
                    nic.properties.virtual_machine = None;
                }
            }
        }
        if let Some(storage) = &vm.properties.storage_profile {
            let disks = storage
                .os_disk
                .iter()
                .map(|d| (d.name.clone(), d.delete_option))
                .chain(storage.data_disks.iter().map(|d| (d.name.clone(), d.delete_option)));
            for (name, delete_option) in disks {
                let disk_key = key(resource_group, &name.unwrap_or_default());
                if delete_option == Some(DeleteOption::Delete) {
                    self.disks.remove(&disk_key);
                } else if let Some(disk) = self.disks.get_mut(&disk_key) {
                    disk.managed_by = None;
                }
            }
        }
    }
}

#[async_trait]
impl VirtualMachinesApi for FakeCloud {
    async fn get(&self, resource_group: &str, name: &str) -> Result<VirtualMachine, CloudError> {
        self.record(format!("vm.get {name}"))?;
        self.vm(resource_group, name)
            .ok_or_else(|| not_found("virtual machine"))
    }

    async fn begin_create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        vm: &VirtualMachine,
    ) -> Result<Poller<VirtualMachine>, CloudError> {
        self.record(format!("vm.create {name}"))?;
        self.long_running().await;

        let mut created = vm.clone();
        created.id = Some(resource_id(resource_group, "Microsoft.Compute/virtualMachines", name));
        created.name = Some(name.to_string());
        created.properties.provisioning_state = Some("Succeeded".to_string());

        let mut state = self.lock();
        state.attach(resource_group, &created);
        state.vms.insert(key(resource_group, name), created.clone());
        Ok(Poller::done(created))
    }

    async fn begin_update(
        &self,
        resource_group: &str,
        name: &str,
        update: &VirtualMachineUpdate,
    ) -> Result<Poller<VirtualMachine>, CloudError> {
        self.record(format!("vm.update {name}"))?;
        self.long_running().await;

        let mut state = self.lock();
        let vm = state
            .vms
            .get_mut(&key(resource_group, name))
            .ok_or_else(|| not_found("virtual machine"))?;
        if let Some(network) = &update.properties.network_profile {
            vm.properties.network_profile = Some(network.clone());
        }
        if let Some(changes) = &update.properties.storage_profile {
            let storage = vm.properties.storage_profile.get_or_insert_with(Default::default);
            if changes.os_disk.is_some() {
                storage.os_disk.clone_from(&changes.os_disk);
            }
            storage.data_disks.clone_from(&changes.data_disks);
        }
        Ok(Poller::done(vm.clone()))
    }

    async fn begin_delete(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Poller<()>, CloudError> {
        self.record(format!("vm.delete {name}"))?;
        self.long_running().await;

        let mut state = self.lock();
        let vm = state
            .vms
            .remove(&key(resource_group, name))
            .ok_or_else(|| not_found("virtual machine"))?;
        state.release(resource_group, &vm);
        Ok(Poller::done(()))
    }
}

#[async_trait]
impl NetworkInterfacesApi for FakeCloud {
    async fn get(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<NetworkInterface, CloudError> {
        self.record(format!("nic.get {name}"))?;
        self.nic(resource_group, name)
            .ok_or_else(|| not_found("network interface"))
    }

    async fn begin_create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        nic: &NetworkInterface,
    ) -> Result<Poller<NetworkInterface>, CloudError> {
        self.record(format!("nic.create {name}"))?;
        self.long_running().await;

        let mut created = nic.clone();
        created.id = Some(resource_id(resource_group, "Microsoft.Network/networkInterfaces", name));
        created.name = Some(name.to_string());
        created.properties.provisioning_state = Some("Succeeded".to_string());
        self.lock()
            .nics
            .insert(key(resource_group, name), created.clone());
        Ok(Poller::done(created))
    }

    async fn begin_delete(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Poller<()>, CloudError> {
        self.record(format!("nic.delete {name}"))?;
        self.long_running().await;
        self.lock()
            .nics
            .remove(&key(resource_group, name))
            .map(|_| Poller::done(()))
            .ok_or_else(|| not_found("network interface"))
    }
}

#[async_trait]
impl DisksApi for FakeCloud {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Disk, CloudError> {
        self.record(format!("disk.get {name}"))?;
        self.disk(resource_group, name)
            .ok_or_else(|| not_found("disk"))
    }

    async fn begin_delete(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Poller<()>, CloudError> {
        self.record(format!("disk.delete {name}"))?;
        self.long_running().await;
        self.lock()
            .disks
            .remove(&key(resource_group, name))
            .map(|_| Poller::done(()))
            .ok_or_else(|| not_found("disk"))
    }
}

#[async_trait]
impl ResourceGroupsApi for FakeCloud {
    async fn check_existence(&self, resource_group: &str) -> Result<bool, CloudError> {
        self.record(format!("group.exists {resource_group}"))?;
        Ok(!self
            .lock()
            .missing_groups
            .iter()
            .any(|rg| rg == resource_group))
    }
}

#[async_trait]
impl SubnetsApi for FakeCloud {
    async fn get(
        &self,
        resource_group: &str,
        vnet_name: &str,
        subnet_name: &str,
    ) -> Result<Subnet, CloudError> {
        self.record(format!("subnet.get {vnet_name}/{subnet_name}"))?;
        self.lock()
            .subnets
            .get(&format!("{resource_group}/{vnet_name}/{subnet_name}"))
            .cloned()
            .ok_or_else(|| not_found("subnet"))
    }
}

#[async_trait]
impl ResourceGraphApi for FakeCloud {
    async fn resources(&self, request: &QueryRequest) -> Result<QueryResponse, CloudError> {
        self.record("graph.resources".to_string())?;
        let mut state = self.lock();
        state
            .graph_skip_tokens
            .push(request.options.skip_token.clone());
        let page = state
            .graph_pages
            .iter_mut()
            .find(|(resource_type, _)| request.query.contains(resource_type.as_str()))
            .and_then(|(_, pages)| pages.pop_front());
        Ok(page.unwrap_or_default())
    }
}

#[async_trait]
impl MarketplaceAgreementsApi for FakeCloud {
    async fn get(
        &self,
        publisher: &str,
        offer: &str,
        plan: &str,
    ) -> Result<AgreementTerms, CloudError> {
        let id = format!("{publisher}/{offer}/{plan}");
        self.record(format!("agreement.get {id}"))?;
        self.lock()
            .agreements
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("agreement"))
    }

    async fn create(
        &self,
        publisher: &str,
        offer: &str,
        plan: &str,
        terms: &AgreementTerms,
    ) -> Result<AgreementTerms, CloudError> {
        let id = format!("{publisher}/{offer}/{plan}");
        self.record(format!("agreement.create {id}"))?;
        self.lock().agreements.insert(id, terms.clone());
        Ok(terms.clone())
    }
}

#[async_trait]
impl VirtualMachineImagesApi for FakeCloud {
    async fn get(
        &self,
        location: &str,
        publisher: &str,
        offer: &str,
        sku: &str,
        version: &str,
    ) -> Result<VirtualMachineImage, CloudError> {
        let id = format!("{location}/{publisher}:{offer}:{sku}:{version}");
        self.record(format!("image.get {id}"))?;
        self.lock()
            .images
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("image"))
    }

    async fn list_versions(
        &self,
        location: &str,
        publisher: &str,
        offer: &str,
        sku: &str,
    ) -> Result<Vec<VirtualMachineImageResource>, CloudError> {
        let prefix = format!("{location}/{publisher}:{offer}:{sku}:");
        self.record(format!("image.list {prefix}"))?;
        Ok(self
            .lock()
            .images
            .iter()
            .filter(|(id, _)| id.starts_with(&prefix))
            .map(|(_, image)| VirtualMachineImageResource {
                name: image.name.clone(),
                id: None,
            })
            .collect())
    }
}

/// Client factory serving every request from one [`FakeCloud`].
pub(crate) struct FakeClientFactory(pub(crate) Arc<FakeCloud>);

impl ClientFactory for FakeClientFactory {
    fn clients(&self, connect: &ConnectConfig) -> Result<Clients, CloudError> {
        Ok(Clients::from_backend(
            connect.subscription_id.clone(),
            self.0.clone(),
        ))
    }
}

/// Credential secret with a client secret and user data.
pub(crate) fn secret() -> SecretData {
    [
        ("azureSubscriptionId", SUBSCRIPTION_ID),
        ("azureTenantId", "tenant-1"),
        ("azureClientId", "client-1"),
        ("azureClientSecret", "hunter2"),
        ("userData", "#cloud-config"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
    .collect()
}

/// Route tracing output through the test harness.
pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::{
        NetworkInterfaceReference, NetworkInterfaceReferenceProperties, NetworkProfile,
        VirtualMachineProperties,
    };

    #[tokio::test]
    async fn test_vm_delete_detaches_resources_without_cascade() {
        let cloud = FakeCloud::new();
        cloud.insert_nic("rg", NetworkInterface {
            name: Some("vm-0-nic".to_string()),
            ..NetworkInterface::default()
        });
        let nic_id = cloud.nic("rg", "vm-0-nic").unwrap().id.unwrap();
        let vm = VirtualMachine {
            properties: VirtualMachineProperties {
                network_profile: Some(NetworkProfile {
                    network_interfaces: vec![NetworkInterfaceReference {
                        id: nic_id,
                        properties: Some(NetworkInterfaceReferenceProperties {
                            primary: Some(true),
                            delete_option: Some(DeleteOption::Detach),
                        }),
                    }],
                }),
                ..VirtualMachineProperties::default()
            },
            ..VirtualMachine::default()
        };

        VirtualMachinesApi::begin_create_or_update(&cloud, "rg", "vm-0", &vm)
            .await
            .unwrap();
        assert!(cloud
            .nic("rg", "vm-0-nic")
            .unwrap()
            .properties
            .virtual_machine
            .is_some());

        VirtualMachinesApi::begin_delete(&cloud, "rg", "vm-0")
            .await
            .unwrap();
        let nic = cloud.nic("rg", "vm-0-nic").unwrap();
        assert!(nic.properties.virtual_machine.is_none());
    }
}
