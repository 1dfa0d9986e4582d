/*
 * TI-99/4A Disk Image Library
 * ===========================
 *
 * This library reads, manipulates, and writes sector dumps of TI-99/4A
 * floppy disks (.dsk images).
 *
 * Components:
 * ----------
 * - Geometry presets and format detection
 * - Volume Information Block and Allocation Bitmap
 * - File Descriptor Index and File Descriptor Records
 * - Record packing (PROGRAM, DIS/INT x FIX/VAR)
 * - File operations (list, read, write, rename, delete)
 * - Volume checking and repair
 */

pub mod disk;

// Re-export commonly used types
pub use disk::{
    detect_format, Abm, CheckReport, DataChainPointer, DskError, DskImage, Fdi, Fdr, FileData,
    FileEntry, FileType, Geometry, Health, Preset, Vib,
};
