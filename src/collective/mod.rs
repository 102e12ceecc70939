//! Collective operation support: device assignment, rendezvous and the
//! collectives transport.

pub mod device_assignment;
pub mod in_process;
pub mod interface;
pub mod rendezvous;

pub use device_assignment::{DeviceAssignment, LogicalId};
pub use in_process::InProcessCollectives;
pub use interface::CollectivesInterface;
pub use rendezvous::{Contributions, Rendezvous, RendezvousKey};
