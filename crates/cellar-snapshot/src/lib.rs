#![warn(missing_docs)]

//! Cellar snapshot layer: directory trees serialised through the block
//! engine, an encrypted snapshot index, and the garbage collector that
//! sweeps blocks unreachable from retained snapshots.

pub mod dir;
pub mod error;
pub mod gc;
pub mod snapshot;

pub use dir::{load_directory, restore_directory, save_directory, verify_directory, walk, DirEntry};
pub use error::{SnapshotError, SnapshotResult};
pub use gc::{collect_garbage, GcStats};
pub use snapshot::{
    create, is_valid_name, list_names, load_info, restore, verify, SnapshotInfo, NAME_LEN,
};
