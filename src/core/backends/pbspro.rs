//! PBS Pro backend descriptor.
//!
//! Same qsub/qstat/qdel surface as PBS/Torque, but the parallel triple goes
//! through a `select` statement that keeps MPI ranks and OpenMP threads
//! separate instead of coalescing them into `ppn`.

use crate::core::backends::{Backend, ParallelLayout};

pub fn backend() -> Backend {
  let mut backend = super::pbs::backend();
  backend.descriptor.name = "pbspro".to_string();
  backend.descriptor.parallel = ParallelLayout::NodeSelect {
    template:
      "-l select={nodes}:ncpus={cores_per_node}:mpiprocs={ppn}:ompthreads={threads}"
        .to_string(),
  };
  backend
}
