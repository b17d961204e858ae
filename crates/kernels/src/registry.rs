//! Workload registry for lookup and discovery.

use crate::matmul::MatmulWorkload;
use crate::memory::MemoryWorkload;
use crate::reduce::ReduceWorkload;
use crate::vecadd::VecAddWorkload;
use crate::workload::{DynWorkload, Suite, Workload};
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct WorkloadRegistry {
    workloads: Vec<DynWorkload>,
}

impl WorkloadRegistry {
    pub fn new() -> Self {
        Self {
            workloads: Vec::new(),
        }
    }

    pub fn with_default_workloads() -> Self {
        let mut registry = Self::new();
        registry.register(MemoryWorkload::new());
        registry.register(MatmulWorkload::new());
        registry.register(ReduceWorkload::new());
        registry.register(VecAddWorkload::new());
        registry
    }

    /// Later registrations for the same suite shadow earlier ones.
    pub fn register<W>(&mut self, workload: W)
    where
        W: Workload + 'static,
    {
        self.workloads.push(Arc::new(workload));
    }

    pub fn workloads(&self) -> &[DynWorkload] {
        &self.workloads
    }

    pub fn find(&self, suite: Suite) -> Option<DynWorkload> {
        self.workloads
            .iter()
            .rev()
            .find(|workload| workload.suite() == suite)
            .map(Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_suite_is_registered_once() {
        let registry = WorkloadRegistry::with_default_workloads();
        for suite in [Suite::Memory, Suite::Matmul, Suite::Reduce, Suite::VecAdd] {
            let workload = registry.find(suite).unwrap();
            assert_eq!(workload.suite(), suite);
        }
        assert_eq!(registry.workloads().len(), 4);
    }

    #[test]
    fn every_suite_has_exactly_one_leading_reference() {
        let registry = WorkloadRegistry::with_default_workloads();
        for workload in registry.workloads() {
            let variants = workload.variants(&workload.default_params());
            assert!(variants[0].reference, "{}", workload.suite());
            assert_eq!(variants.iter().filter(|v| v.reference).count(), 1);
        }
    }
}
