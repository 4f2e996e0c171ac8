pub mod disk;
pub mod noop;
pub mod overflow;
pub mod soft;
pub mod volatile;

pub use noop::NoOpCache;
pub use overflow::DiskOverflowCache;
pub use soft::SoftReferenceCache;
pub use volatile::VolatileCache;
