// Disk layout constants
pub const SECTOR_SIZE: usize = 256;
pub const VIB_SECTOR: usize = 0;
pub const FDI_SECTOR: usize = 1;
pub const FIRST_DATA_SECTOR: usize = 34; // sectors 2..34 form the descriptor area

// VIB constants
pub const VIB_SIGNATURE: [u8; 3] = *b"DSK";
pub const VIB_SIGNATURE_OFFSET: usize = 13;
pub const ABM_OFFSET: usize = 56;
pub const ABM_SIZE: usize = SECTOR_SIZE - ABM_OFFSET;
pub const DIR_SLOTS: usize = 3;

// Name constants
pub const VOLUME_NAME_LEN: usize = 10;
pub const FILE_NAME_LEN: usize = 10;

// FDI constants
pub const FDI_MAX_ENTRIES: usize = 128;

// FDR constants
pub const DCP_ENTRY_SIZE: usize = 3;
pub const DCP_OFFSET: usize = 28;
pub const DCP_MAX_ENTRIES: usize = 76;
pub const DCP_MAX_RUN: usize = 4095;

pub mod abm;
pub mod alloc;
pub mod check;
pub mod dcp;
pub mod error;
pub mod fdi;
pub mod fdr;
pub mod fs;
pub mod geometry;
pub mod image;
pub mod records;
pub mod vib;

pub use abm::Abm;
pub use check::{CheckReport, Health, Issue, IssueKind, RepairPlan, RepairStatus};
pub use dcp::DataChainPointer;
pub use error::DskError;
pub use fdi::Fdi;
pub use fdr::{Fdr, FileType};
pub use fs::{FileData, FileEntry};
pub use geometry::{detect_format, Geometry, Preset};
pub use image::DskImage;
pub use vib::Vib;
