//! # Logical-volume virtualization layer
//!
//! Presents virtual block devices whose address space is redirected, extent
//! by extent, to pluggable targets. The centrepiece is the table-generation
//! swap: configuration stages a new table while I/O keeps flowing against
//! the old one, promotion is a single pointer swap, and the displaced table
//! is torn down only when its last in-flight reference drains.
//!
//! ## Pieces
//!
//! - [`device`]: mapped devices and the global device list
//! - [`table`]: table generations, the active/inactive pair, promotion
//! - [`strategy`]: the I/O splitter carving requests across extents
//! - [`target`]: the pluggable target trait and its registry
//! - [`targets::crypt`]: the transparent-encryption target
//!
//! Readers never block writers' table swaps and table swaps never block
//! in-flight readers; that invariant is what the counted generation
//! references exist for.

pub mod device;
pub mod error;
pub mod strategy;
pub mod table;
pub mod target;
pub mod targets;

pub use common::{DeviceSelector, SECTOR_SIZE};
pub use device::{DeviceRegistry, IoStatsSnapshot, MappedDevice};
pub use error::{MapError, Result};
pub use strategy::{strategy, submit, Bio, BioDone, BioOp, IoSink, SubIo, SyncSink};
pub use table::{ExtentSpec, TableGeneration, TableHead, TableRef, TableSlot};
pub use target::{Target, TargetRegistry, TargetType};
pub use targets::CryptTargetType;
