//! Replica by computation grid of global device ids.

use std::fmt;

use crate::error::{Error, Result};
use crate::types::GlobalDeviceId;

/// Position of a device in a [`DeviceAssignment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogicalId {
    /// Replica index (row).
    pub replica_id: usize,
    /// Computation, i.e. partition, index (column).
    pub computation_id: usize,
}

/// Maps every (replica, computation) pair to a global device.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceAssignment {
    replica_count: usize,
    computation_count: usize,
    devices: Vec<GlobalDeviceId>,
}

impl DeviceAssignment {
    /// Builds an assignment from row-major `devices`.
    pub fn new(
        replica_count: usize,
        computation_count: usize,
        devices: Vec<GlobalDeviceId>,
    ) -> Result<Self> {
        if replica_count == 0 || computation_count == 0 {
            return Err(Error::invalid_argument(
                "device assignment needs at least one replica and one computation",
            ));
        }
        if devices.len() != replica_count * computation_count {
            return Err(Error::invalid_argument(format!(
                "device assignment of {replica_count}x{computation_count} got {} devices",
                devices.len()
            )));
        }
        for (i, d) in devices.iter().enumerate() {
            if devices[..i].contains(d) {
                return Err(Error::invalid_argument(format!(
                    "device {d} appears twice in the assignment"
                )));
            }
        }
        Ok(Self {
            replica_count,
            computation_count,
            devices,
        })
    }

    /// One computation per replica with devices `0..replicas`.
    pub fn replicated(replicas: usize) -> Result<Self> {
        Self::new(
            replicas,
            1,
            (0..replicas as i64).map(GlobalDeviceId).collect(),
        )
    }

    /// Number of replicas.
    #[must_use]
    pub const fn replica_count(&self) -> usize {
        self.replica_count
    }

    /// Number of computations (partitions).
    #[must_use]
    pub const fn computation_count(&self) -> usize {
        self.computation_count
    }

    /// Device at (`replica`, `computation`).
    #[must_use]
    pub fn get(&self, replica: usize, computation: usize) -> Option<GlobalDeviceId> {
        if replica >= self.replica_count || computation >= self.computation_count {
            return None;
        }
        self.devices
            .get(replica * self.computation_count + computation)
            .copied()
    }

    /// Where `device` sits in the grid.
    pub fn logical_id(&self, device: GlobalDeviceId) -> Result<LogicalId> {
        self.devices
            .iter()
            .position(|d| *d == device)
            .map(|i| LogicalId {
                replica_id: i / self.computation_count,
                computation_id: i % self.computation_count,
            })
            .ok_or_else(|| {
                Error::configuration(format!("device {device} is not in the device assignment"))
            })
    }

    /// Replica index of `device`.
    pub fn replica_id(&self, device: GlobalDeviceId) -> Result<usize> {
        self.logical_id(device).map(|id| id.replica_id)
    }

    /// Partition index of `device`.
    pub fn partition_id(&self, device: GlobalDeviceId) -> Result<usize> {
        self.logical_id(device).map(|id| id.computation_id)
    }

    /// Every device in row-major order.
    #[must_use]
    pub fn devices(&self) -> &[GlobalDeviceId] {
        &self.devices
    }
}

impl fmt::Debug for DeviceAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DeviceAssignment({}x{}: ",
            self.replica_count, self.computation_count
        )?;
        f.debug_list().entries(&self.devices).finish()?;
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn grid() -> DeviceAssignment {
        DeviceAssignment::new(
            2,
            2,
            vec![
                GlobalDeviceId(10),
                GlobalDeviceId(11),
                GlobalDeviceId(12),
                GlobalDeviceId(13),
            ],
        )
        .expect("assignment")
    }

    #[test]
    fn logical_ids() {
        let da = grid();
        assert_eq!(
            da.logical_id(GlobalDeviceId(12)).expect("id"),
            LogicalId {
                replica_id: 1,
                computation_id: 0
            }
        );
        assert_eq!(da.partition_id(GlobalDeviceId(11)).expect("pid"), 1);
        assert_eq!(da.get(1, 1), Some(GlobalDeviceId(13)));
        assert_eq!(da.get(2, 0), None);
    }

    #[test]
    fn unknown_device_is_configuration_error() {
        let err = grid().replica_id(GlobalDeviceId(99)).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn rejects_malformed_grids() {
        assert!(DeviceAssignment::new(2, 2, vec![GlobalDeviceId(0)]).is_err());
        assert!(
            DeviceAssignment::new(2, 1, vec![GlobalDeviceId(0), GlobalDeviceId(0)]).is_err()
        );
        assert!(DeviceAssignment::replicated(0).is_err());
    }
}
