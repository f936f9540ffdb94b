//! Storage layer: byte-addressable objects (C1), the partition that groups
//! them (C2), the per-object lock table (C3), the manager that owns all
//! local partitions (C4), and the façade that routes by subtree root (C5).

pub mod abstraction;
pub mod device;
pub mod lock_table;
pub mod manager;
pub mod partition;
