use std::path::{Path, PathBuf};

use log::{debug, info};

use super::abm::Abm;
use super::check::{self, CheckReport, RepairPlan, RepairReport};
use super::error::DskError;
use super::fdr::Fdr;
use super::fs::{self, FileData, FileEntry, FsView};
use super::geometry::{detect_format, Geometry, Preset};
use super::vib::Vib;
use super::{FDI_SECTOR, SECTOR_SIZE, VIB_SECTOR};

/// An owned disk image buffer plus the geometry it was resolved with.
///
/// All file and volume operations go through this handle. Each one rebuilds
/// the filesystem aggregate from the buffer, mutates it, and writes back only
/// the sectors it touched, so the buffer is always the single source of
/// truth.
#[derive(Debug, Clone)]
pub struct DskImage {
    bytes: Vec<u8>,
    geometry: Geometry,
    preset: Option<Preset>,
    source: Option<PathBuf>,
}

impl DskImage {
    /// A freshly formatted volume.
    pub fn create(preset: Preset, volume_name: &str) -> Result<Self, DskError> {
        let geometry = preset.geometry();
        let mut image = DskImage {
            bytes: vec![0; geometry.image_len()],
            geometry,
            preset: Some(preset),
            source: None,
        };
        image.format(preset, volume_name)?;
        Ok(image)
    }

    /// Adopt an existing raw image, resolving its format from the VIB or the
    /// byte length.
    pub fn open(bytes: Vec<u8>) -> Result<Self, DskError> {
        let (preset, geometry) = detect_format(&bytes)?;
        debug!(
            "opened {} byte image as {} ({} sectors)",
            bytes.len(),
            preset,
            geometry.total_sectors()
        );
        Ok(DskImage {
            bytes,
            geometry,
            preset: Some(preset),
            source: None,
        })
    }

    /// Adopt a raw image under a caller-supplied geometry, bypassing
    /// detection. Meant for layouts no preset covers.
    pub fn open_with_geometry(bytes: Vec<u8>, geometry: Geometry) -> Result<Self, DskError> {
        if bytes.len() != geometry.image_len() {
            return Err(DskError::UnrecognizedGeometry(bytes.len()));
        }
        let preset = Preset::from_layout(
            geometry.sides,
            geometry.tracks_per_side,
            geometry.sectors_per_track,
        );
        Ok(DskImage {
            bytes,
            geometry,
            preset,
            source: None,
        })
    }

    /// Read an image from a host file. The handle remembers the path so that
    /// `save` can write back in place.
    pub fn load(path: &Path) -> Result<Self, DskError> {
        let mut image = Self::open(std::fs::read(path)?)?;
        image.source = Some(path.to_path_buf());
        Ok(image)
    }

    /// Like `load`, but with a caller-supplied geometry instead of detection.
    pub fn load_with_geometry(path: &Path, geometry: Geometry) -> Result<Self, DskError> {
        let mut image = Self::open_with_geometry(std::fs::read(path)?, geometry)?;
        image.source = Some(path.to_path_buf());
        Ok(image)
    }

    pub fn save(&self) -> Result<(), DskError> {
        let path = self.source.as_ref().ok_or(DskError::NoSourcePath)?;
        std::fs::write(path, &self.bytes)?;
        info!("saved image to {}", path.display());
        Ok(())
    }

    pub fn save_as(&mut self, path: &Path) -> Result<(), DskError> {
        std::fs::write(path, &self.bytes)?;
        self.source = Some(path.to_path_buf());
        info!("saved image to {}", path.display());
        Ok(())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn preset(&self) -> Option<Preset> {
        self.preset
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn total_sectors(&self) -> usize {
        self.geometry.total_sectors()
    }

    pub(crate) fn sector(&self, index: usize) -> &[u8] {
        let offset = index * SECTOR_SIZE;
        &self.bytes[offset..offset + SECTOR_SIZE]
    }

    pub(crate) fn sector_mut(&mut self, index: usize) -> &mut [u8] {
        let offset = index * SECTOR_SIZE;
        &mut self.bytes[offset..offset + SECTOR_SIZE]
    }

    /// Borrow one sector, or nothing when the index runs off the volume.
    pub fn read_sector(&self, index: usize) -> Option<&[u8]> {
        if index < self.total_sectors() {
            Some(self.sector(index))
        } else {
            None
        }
    }

    pub fn cluster(&self, cluster: usize) -> &[u8] {
        let spc = self.geometry.sectors_per_cluster as usize;
        let offset = cluster * spc * SECTOR_SIZE;
        &self.bytes[offset..offset + spc * SECTOR_SIZE]
    }

    /// Re-initialize the whole image: zero everything, prime the VIB and the
    /// bitmap, leave the index empty.
    pub fn format(&mut self, preset: Preset, volume_name: &str) -> Result<(), DskError> {
        let geometry = preset.geometry();
        let mut vib = Vib::new(&geometry, volume_name)?;
        let mut abm = Abm::blank(&geometry);
        abm.set_used(VIB_SECTOR, true);
        abm.set_used(FDI_SECTOR, true);
        vib.bitmap = abm.bitmap();

        self.bytes = vec![0; geometry.image_len()];
        self.geometry = geometry;
        self.preset = Some(preset);
        self.sector_mut(VIB_SECTOR).copy_from_slice(&vib.to_bytes());
        info!("formatted volume {} as {}", vib.volume_name_str(), preset);
        Ok(())
    }

    /// Decoded VIB of the current buffer.
    pub fn vib(&self) -> Result<Vib, DskError> {
        Vib::from_bytes(self.sector(VIB_SECTOR))
    }

    /// Snapshot of the allocation bitmap. Mutating it does not touch the
    /// image.
    pub fn abm(&self) -> Result<Abm, DskError> {
        Ok(Abm::from_vib(&self.vib()?, &self.geometry))
    }

    /// Every descriptor the index points at, in catalog order.
    pub fn all_fdrs(&self) -> Result<Vec<(u16, Fdr)>, DskError> {
        let view = FsView::load(self)?;
        Ok(view
            .slots
            .iter()
            .filter_map(|slot| slot.fdr.clone().map(|fdr| (slot.sector, fdr)))
            .collect())
    }

    pub fn volume_name(&self) -> Result<String, DskError> {
        Ok(self.vib()?.volume_name_str())
    }

    pub fn set_volume_name(&mut self, name: &str) -> Result<(), DskError> {
        let mut vib = self.vib()?;
        vib.set_volume_name(name)?;
        self.sector_mut(VIB_SECTOR).copy_from_slice(&vib.to_bytes());
        Ok(())
    }

    pub fn list_files(&self) -> Result<Vec<FileEntry>, DskError> {
        fs::list_files(self)
    }

    pub fn exists(&self, name: &str) -> bool {
        fs::exists(self, name)
    }

    pub fn write_file(&mut self, name: &str, data: &FileData) -> Result<(), DskError> {
        fs::create_file(self, name, data)
    }

    pub fn read_file(&self, name: &str) -> Result<Vec<u8>, DskError> {
        fs::read_file(self, name)
    }

    pub fn rename_file(&mut self, old: &str, new: &str) -> Result<(), DskError> {
        fs::rename_file(self, old, new)
    }

    pub fn delete_file(&mut self, name: &str, safe: bool) -> Result<(), DskError> {
        fs::delete_file(self, name, safe)
    }

    /// Wrapping files in the TIFILES envelope is the business of an outer
    /// layer, never of the core.
    pub fn write_tifiles(&mut self, _name: &str, _wrapped: &[u8]) -> Result<(), DskError> {
        Err(DskError::UnsupportedInCore)
    }

    pub fn check(&self) -> Result<CheckReport, DskError> {
        check::run_checks(self)
    }

    pub fn repair_plan(&self) -> Result<RepairPlan, DskError> {
        check::plan_repair(self)
    }

    pub fn repair(&mut self) -> Result<RepairReport, DskError> {
        check::apply_repair(self)
    }
}
