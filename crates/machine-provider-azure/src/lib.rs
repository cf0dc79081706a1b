//! Azure machine driver.
//!
//! Creates, deletes, inspects and lists the Azure virtual machines backing
//! cluster worker nodes. A machine is a VM together with its network
//! interface, OS disk and data disks, tied to each other by deterministic
//! names derived from the VM name.
//!
//! # Example
//!
//! ```rust,ignore
//! use machine_provider_azure::{ApiMetrics, CreateMachineRequest, Driver, DriverConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let metrics = ApiMetrics::new(prometheus::default_registry())?;
//! let driver = Driver::with_arm(DriverConfig::default(), metrics);
//!
//! let machine = driver
//!     .create_machine(&CancellationToken::new(), &CreateMachineRequest {
//!         machine_name: "shoot-worker-z1-abc".into(),
//!         machine_class,
//!         secret,
//!     })
//!     .await?;
//! println!("{} -> {}", machine.provider_id, machine.node_name);
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod access;
pub mod azure;
pub mod config;
pub mod deprovision;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod names;
pub mod provision;
pub mod runner;
pub mod spec;

#[cfg(test)]
mod fake;

pub use access::Access;
pub use config::{ConnectConfig, CloudEnvironment, Credential, DriverConfig, OperationTimeouts, SecretData};
pub use driver::{
    get_volume_ids, CreateMachineRequest, DeleteMachineRequest, Driver, GetMachineStatusRequest,
    ListMachinesRequest, MachineClass,
};
pub use error::{CloudError, ErrorKind, MachineError};
pub use metrics::ApiMetrics;
pub use names::{MachineInfo, MachineResourceNames};
pub use runner::{run_concurrently, Task, TaskError};
pub use spec::ProviderSpec;
