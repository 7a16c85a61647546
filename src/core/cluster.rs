use crate::config::ClusterConfig;
use crate::core::{Gpu, GpuId, Rack};
use compact_str::{format_compact, CompactString};
use std::ops::Range;

/// The modeled GPU cluster: an ordered list of uniform racks with a flat,
/// rack-major GPU index and the two-tier locality penalty.
///
/// The penalty function here is the single authoritative cost of
/// locality; schedulers and the simulator both consult it.
#[derive(Debug, Clone)]
pub struct Cluster {
    racks: Vec<Rack>,
    gpus_per_rack: usize,
    intra_rack_penalty: f64,
    inter_rack_penalty: f64,
}

impl Cluster {
    pub fn new(
        num_racks: usize,
        gpus_per_rack: usize,
        gpu_memory_gb: f64,
        intra_rack_penalty: f64,
        inter_rack_penalty: f64,
    ) -> anyhow::Result<Self> {
        if num_racks == 0 || gpus_per_rack == 0 {
            anyhow::bail!("cluster must have at least one rack and one GPU per rack");
        }
        if gpu_memory_gb <= 0.0 {
            anyhow::bail!("GPU memory must be positive, got {gpu_memory_gb} GB");
        }
        if intra_rack_penalty < 1.0 || inter_rack_penalty < intra_rack_penalty {
            anyhow::bail!(
                "penalties must satisfy 1.0 <= intra ({intra_rack_penalty}) <= inter ({inter_rack_penalty})"
            );
        }

        let racks = (0..num_racks)
            .map(|r| Rack::new(r, gpus_per_rack, gpu_memory_gb))
            .collect();
        Ok(Self {
            racks,
            gpus_per_rack,
            intra_rack_penalty,
            inter_rack_penalty,
        })
    }

    pub fn from_config(config: &ClusterConfig) -> anyhow::Result<Self> {
        Self::new(
            config.num_racks,
            config.gpus_per_rack,
            config.gpu_memory_gb,
            config.intra_rack_penalty,
            config.inter_rack_penalty,
        )
    }

    pub fn racks(&self) -> &[Rack] {
        &self.racks
    }

    pub fn total_gpus(&self) -> usize {
        self.racks.len() * self.gpus_per_rack
    }

    pub fn intra_rack_penalty(&self) -> f64 {
        self.intra_rack_penalty
    }

    pub fn inter_rack_penalty(&self) -> f64 {
        self.inter_rack_penalty
    }

    /// Rack ordinal of a flat GPU id.
    pub fn rack_of(&self, id: GpuId) -> usize {
        id / self.gpus_per_rack
    }

    /// Flat ids of the GPUs in one rack.
    pub fn rack_gpu_ids(&self, rack: usize) -> Range<GpuId> {
        rack * self.gpus_per_rack..(rack + 1) * self.gpus_per_rack
    }

    pub fn gpu(&self, id: GpuId) -> &Gpu {
        &self.racks[id / self.gpus_per_rack].gpus()[id % self.gpus_per_rack]
    }

    pub fn gpu_mut(&mut self, id: GpuId) -> &mut Gpu {
        let per_rack = self.gpus_per_rack;
        &mut self.racks[id / per_rack].gpus_mut()[id % per_rack]
    }

    /// The canonical `rack-R-G` name, rendered at the reporting boundary.
    pub fn gpu_name(&self, id: GpuId) -> CompactString {
        format_compact!(
            "rack-{}-{}",
            id / self.gpus_per_rack,
            id % self.gpus_per_rack
        )
    }

    /// All GPUs in deterministic flat order (rack ordinal, then GPU
    /// ordinal within the rack).
    pub fn gpus(&self) -> impl Iterator<Item = (GpuId, &Gpu)> + '_ {
        self.racks
            .iter()
            .flat_map(|rack| rack.gpus().iter())
            .enumerate()
    }

    /// Flat ids of GPUs with free memory left, in flat order.
    pub fn available_gpus(&self) -> Vec<GpuId> {
        self.gpus()
            .filter(|(_, gpu)| gpu.free_gb() > 0.0)
            .map(|(id, _)| id)
            .collect()
    }

    /// Locality penalty of a placement set: 1.0 for singletons, the
    /// intra-rack constant when all GPUs share a rack, the inter-rack
    /// constant otherwise.
    pub fn penalty(&self, placement: &[GpuId]) -> f64 {
        if placement.len() <= 1 {
            return 1.0;
        }
        let first = self.rack_of(placement[0]);
        if placement.iter().all(|&id| self.rack_of(id) == first) {
            self.intra_rack_penalty
        } else {
            self.inter_rack_penalty
        }
    }

    pub fn total_memory_gb(&self) -> f64 {
        self.racks.iter().map(Rack::total_memory_gb).sum()
    }

    pub fn used_memory_gb(&self) -> f64 {
        self.racks.iter().map(Rack::used_memory_gb).sum()
    }

    /// Memory-based cluster utilization in `[0, 1]`.
    pub fn utilization(&self) -> f64 {
        let total = self.total_memory_gb();
        if total > 0.0 {
            self.used_memory_gb() / total
        } else {
            0.0
        }
    }

    /// Sum of accumulated busy time over every GPU, in seconds.
    pub fn total_busy_time(&self) -> f64 {
        self.racks.iter().map(Rack::busy_time).sum()
    }

    /// Advance busy-time accounting on every occupied GPU.
    pub fn tick(&mut self, dt: f64) {
        for rack in &mut self.racks {
            for gpu in rack.gpus_mut() {
                gpu.tick(dt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_2x2() -> Cluster {
        Cluster::new(2, 2, 80.0, 1.2, 1.5).unwrap()
    }

    #[test]
    fn test_rejects_degenerate_shapes() {
        assert!(Cluster::new(0, 2, 80.0, 1.2, 1.5).is_err());
        assert!(Cluster::new(2, 0, 80.0, 1.2, 1.5).is_err());
        assert!(Cluster::new(2, 2, 0.0, 1.2, 1.5).is_err());
        assert!(Cluster::new(2, 2, 80.0, 0.9, 1.5).is_err());
        assert!(Cluster::new(2, 2, 80.0, 1.5, 1.2).is_err());
    }

    #[test]
    fn test_flat_order_is_rack_major() {
        let cluster = cluster_2x2();
        let names: Vec<_> = cluster
            .gpus()
            .map(|(id, _)| cluster.gpu_name(id))
            .collect();
        assert_eq!(names, ["rack-0-0", "rack-0-1", "rack-1-0", "rack-1-1"]);
        assert_eq!(cluster.rack_of(0), 0);
        assert_eq!(cluster.rack_of(3), 1);
        assert_eq!(cluster.rack_gpu_ids(1), 2..4);
    }

    #[test]
    fn test_penalty_tiers() {
        let cluster = cluster_2x2();
        assert_eq!(cluster.penalty(&[]), 1.0);
        assert_eq!(cluster.penalty(&[2]), 1.0);
        assert_eq!(cluster.penalty(&[0, 1]), 1.2);
        assert_eq!(cluster.penalty(&[2, 3]), 1.2);
        assert_eq!(cluster.penalty(&[1, 2]), 1.5);
        assert_eq!(cluster.penalty(&[0, 1, 3]), 1.5);
    }

    #[test]
    fn test_available_gpus_tracks_free_memory() {
        let mut cluster = cluster_2x2();
        assert_eq!(cluster.available_gpus(), vec![0, 1, 2, 3]);
        cluster.gpu_mut(1).allocate(0, 80.0);
        assert_eq!(cluster.available_gpus(), vec![0, 2, 3]);
    }

    #[test]
    fn test_totals() {
        let mut cluster = cluster_2x2();
        assert_eq!(cluster.total_memory_gb(), 320.0);
        cluster.gpu_mut(0).allocate(0, 40.0);
        cluster.gpu_mut(2).allocate(0, 40.0);
        assert_eq!(cluster.used_memory_gb(), 80.0);
        assert_eq!(cluster.utilization(), 0.25);

        cluster.tick(2.0);
        assert_eq!(cluster.total_busy_time(), 4.0);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// The penalty of any placement is one of the three tier
            /// values and is 1.0 exactly for singletons.
            #[test]
            fn prop_penalty_is_tiered(
                num_racks in 1usize..5,
                gpus_per_rack in 1usize..5,
                raw_ids in proptest::collection::vec(0usize..25, 0..6),
            ) {
                let cluster = Cluster::new(num_racks, gpus_per_rack, 80.0, 1.4, 2.1).unwrap();
                let total = cluster.total_gpus();
                let placement: Vec<_> = raw_ids.into_iter().map(|id| id % total).collect();

                let penalty = cluster.penalty(&placement);
                prop_assert!([1.0, 1.4, 2.1].contains(&penalty));
                if placement.len() <= 1 {
                    prop_assert_eq!(penalty, 1.0);
                } else {
                    let first = cluster.rack_of(placement[0]);
                    let one_rack = placement.iter().all(|&id| cluster.rack_of(id) == first);
                    prop_assert_eq!(penalty, if one_rack { 1.4 } else { 2.1 });
                }
            }

            /// Reserved memory never exceeds capacity no matter the
            /// allocate/deallocate interleaving.
            #[test]
            fn prop_reservation_bounded(
                ops in proptest::collection::vec((0u32..8, 0.0f64..50.0, any::<bool>()), 0..40),
            ) {
                let mut cluster = Cluster::new(1, 1, 80.0, 1.2, 1.5).unwrap();
                for (job, mem, release) in ops {
                    if release {
                        cluster.gpu_mut(0).deallocate(job, mem);
                    } else {
                        cluster.gpu_mut(0).allocate(job, mem);
                    }
                    let gpu = cluster.gpu(0);
                    prop_assert!(gpu.reserved_gb() <= gpu.memory_gb());
                    prop_assert!(gpu.reserved_gb() >= 0.0);
                }
            }
        }
    }
}
