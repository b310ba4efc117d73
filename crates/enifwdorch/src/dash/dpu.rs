//! DPU registry loaded from the DPU table.

use log::{debug, warn};
use sonic_types::IpAddress;
use std::collections::BTreeMap;

use super::types::{
    DpuType, DPU_NPU_V4, DPU_NPU_V6, DPU_PA_V4, DPU_PA_V6, DPU_STATE, DPU_TYPE,
};
use sonic_orch_common::{FieldValue, KeyOpFieldsValues};

/// One DPU of the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DpuInfo {
    pub id: u64,
    pub dpu_type: DpuType,
    pub state: Option<String>,
    pub pa_v4: Option<IpAddress>,
    pub pa_v6: Option<IpAddress>,
    pub npu_v4: Option<IpAddress>,
    pub npu_v6: Option<IpAddress>,
}

impl DpuInfo {
    pub fn is_local(&self) -> bool {
        self.dpu_type == DpuType::Local
    }

    /// Provider address, IPv4 preferred.
    pub fn pa(&self) -> Option<IpAddress> {
        self.pa_v4.or(self.pa_v6)
    }

    /// Address of the NPU fronting this DPU, IPv4 preferred.
    pub fn npu(&self) -> Option<IpAddress> {
        self.npu_v4.or(self.npu_v6)
    }

    fn from_row(key: &str, fvs: &[FieldValue]) -> Result<Self, String> {
        let row = KeyOpFieldsValues::set(key.trim(), fvs.to_vec());
        let id: u64 = row
            .key
            .parse()
            .map_err(|_| format!("non numeric DPU id {}", key))?;

        // An empty address field means the address family is not configured.
        let addr = |name: &str| -> Result<Option<IpAddress>, String> {
            if row.get_field(name).is_some_and(str::is_empty) {
                return Ok(None);
            }
            row.parse_field(name).map_err(|e| e.to_string())
        };

        let info = DpuInfo {
            id,
            dpu_type: DpuType::from_config(row.get_field(DPU_TYPE)),
            state: row.get_field(DPU_STATE).map(str::to_string),
            pa_v4: addr(DPU_PA_V4)?,
            pa_v6: addr(DPU_PA_V6)?,
            npu_v4: addr(DPU_NPU_V4)?,
            npu_v6: addr(DPU_NPU_V6)?,
        };

        if info.pa().is_none() {
            return Err(format!("DPU {} has no PA address", id));
        }
        Ok(info)
    }
}

/// Inventory of DPUs, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct DpuRegistry {
    dpus: BTreeMap<u64, DpuInfo>,
}

impl DpuRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads DPU rows, skipping malformed ones.
    ///
    /// Returns the number of DPUs registered by this call.
    pub fn populate<'a, I>(&mut self, rows: I) -> usize
    where
        I: IntoIterator<Item = (&'a str, &'a [FieldValue])>,
    {
        let mut added = 0;
        for (key, fvs) in rows {
            match DpuInfo::from_row(key, fvs) {
                Ok(info) => {
                    debug!("Registered DPU {} ({}) pa={:?}", info.id, info.dpu_type, info.pa());
                    self.dpus.insert(info.id, info);
                    added += 1;
                }
                Err(e) => warn!("Skipping DPU entry {}: {}", key, e),
            }
        }
        added
    }

    pub fn get(&self, id: u64) -> Option<&DpuInfo> {
        self.dpus.get(&id)
    }

    pub fn dpu_type(&self, id: u64) -> Option<DpuType> {
        self.get(id).map(|d| d.dpu_type)
    }

    pub fn pa(&self, id: u64) -> Option<IpAddress> {
        self.get(id).and_then(DpuInfo::pa)
    }

    pub fn npu(&self, id: u64) -> Option<IpAddress> {
        self.get(id).and_then(DpuInfo::npu)
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.dpus.keys().copied()
    }

    pub fn locals(&self) -> impl Iterator<Item = &DpuInfo> {
        self.dpus.values().filter(|d| d.is_local())
    }

    pub fn len(&self) -> usize {
        self.dpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dpus.is_empty()
    }
}
