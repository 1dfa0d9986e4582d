use std::collections::HashSet;

use chrono::{Local, NaiveDateTime};
use log::debug;

use super::abm::Abm;
use super::alloc;
use super::error::DskError;
use super::fdi::Fdi;
use super::fdr::{pack_timestamp, Fdr, FileType};
use super::image::DskImage;
use super::records::{self, PackedRecords};
use super::vib::{pack_name, Vib};
use super::{FDI_SECTOR, FIRST_DATA_SECTOR, SECTOR_SIZE, VIB_SECTOR};

/// A catalog entry as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub file_type: Option<FileType>,
    pub record_length: u16,
    pub sectors: u16,
    pub size_bytes: usize,
    pub protected: bool,
    pub flags: u8,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

/// Content handed to `write_file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileData {
    Program(Vec<u8>),
    Records {
        file_type: FileType,
        record_length: u8,
        records: Vec<Vec<u8>>,
    },
}

impl FileData {
    pub fn file_type(&self) -> FileType {
        match self {
            FileData::Program(_) => FileType::Program,
            FileData::Records { file_type, .. } => *file_type,
        }
    }

    /// Chop a flat byte stream into fixed records of the given length.
    pub fn fixed_from_bytes(
        file_type: FileType,
        record_length: u8,
        bytes: &[u8],
    ) -> Result<Self, DskError> {
        if record_length == 0 {
            return Err(DskError::InvalidRecordLength(0));
        }
        Ok(FileData::Records {
            file_type,
            record_length,
            records: bytes
                .chunks(record_length as usize)
                .map(|c| c.to_vec())
                .collect(),
        })
    }
}

/// One FDI slot together with the descriptor it points at. `fdr` is `None`
/// when the pointer runs off the volume.
#[derive(Debug, Clone)]
pub(crate) struct FdrSlot {
    pub sector: u16,
    pub fdr: Option<Fdr>,
}

impl FdrSlot {
    pub fn name_lower(&self) -> Option<String> {
        self.fdr.as_ref().map(|f| f.file_name_str().to_lowercase())
    }
}

/// The in-memory filesystem aggregate, rebuilt from the image buffer for
/// every public operation so that on-disk state stays authoritative.
#[derive(Debug, Clone)]
pub(crate) struct FsView {
    pub vib: Vib,
    pub abm: Abm,
    pub fdi: Fdi,
    pub fdi_sector: usize,
    pub slots: Vec<FdrSlot>,
}

impl FsView {
    pub fn load(img: &DskImage) -> Result<Self, DskError> {
        let geometry = *img.geometry();
        let vib = Vib::from_bytes(img.sector(VIB_SECTOR))?;
        let abm = Abm::from_vib(&vib, &geometry);

        // Slot 1 of the VIB overrides the default catalog location when set.
        let fdi_sector = match vib.dir_slots[0].fdr_sector {
            0 => FDI_SECTOR,
            s if (s as usize) < geometry.total_sectors() => s as usize,
            _ => FDI_SECTOR,
        };
        let fdi = Fdi::from_bytes(img.sector(fdi_sector));

        let total = geometry.total_sectors();
        let slots = fdi
            .entries()
            .iter()
            .map(|&sector| FdrSlot {
                sector,
                fdr: if (sector as usize) < total {
                    Some(Fdr::from_bytes(img.sector(sector as usize)))
                } else {
                    None
                },
            })
            .collect();

        Ok(FsView {
            vib,
            abm,
            fdi,
            fdi_sector,
            slots,
        })
    }

    pub fn find(&self, name: &str) -> Option<(usize, &FdrSlot)> {
        let wanted = name.to_lowercase();
        self.slots
            .iter()
            .enumerate()
            .find(|(_, slot)| slot.name_lower().as_deref() == Some(wanted.as_str()))
    }

    /// Position at which a name belongs to keep the index sorted.
    fn insert_position(&self, name_lower: &str) -> usize {
        self.slots
            .iter()
            .position(|slot| match slot.name_lower() {
                Some(existing) => existing.as_str() > name_lower,
                None => false,
            })
            .unwrap_or(self.slots.len())
    }

    /// Mutators refuse to work on a directory that is not internally sound.
    fn ensure_directory_consistent(&self) -> Result<(), DskError> {
        let mut seen = HashSet::new();
        let mut previous: Option<String> = None;
        for slot in &self.slots {
            let fdr = match &slot.fdr {
                Some(fdr) => fdr,
                None => return Err(DskError::CorruptDirectory),
            };
            if fdr.name_is_blank() || fdr.file_type().is_none() {
                return Err(DskError::CorruptDirectory);
            }
            let name = fdr.file_name_str().to_lowercase();
            if !seen.insert(name.clone()) {
                return Err(DskError::CorruptDirectory);
            }
            if let Some(previous) = &previous {
                if *previous > name {
                    return Err(DskError::CorruptDirectory);
                }
            }
            previous = Some(name);
        }
        Ok(())
    }

    pub(crate) fn write_vib(&mut self, img: &mut DskImage) {
        self.vib.bitmap = self.abm.bitmap();
        img.sector_mut(VIB_SECTOR).copy_from_slice(&self.vib.to_bytes());
    }

    pub(crate) fn write_fdi(&self, img: &mut DskImage) {
        img.sector_mut(self.fdi_sector)
            .copy_from_slice(&self.fdi.to_bytes());
    }
}

pub(crate) fn list_files(img: &DskImage) -> Result<Vec<FileEntry>, DskError> {
    let view = FsView::load(img)?;
    Ok(view
        .slots
        .iter()
        .filter_map(|slot| slot.fdr.as_ref())
        .map(|fdr| FileEntry {
            name: fdr.file_name_str(),
            file_type: fdr.file_type(),
            record_length: fdr.record_length(),
            sectors: fdr.total_sectors_allocated,
            size_bytes: fdr.size_bytes(),
            protected: fdr.is_protected(),
            flags: fdr.status_flags(),
            created_at: fdr.created_at(),
            updated_at: fdr.updated_at(),
        })
        .collect())
}

pub(crate) fn exists(img: &DskImage, name: &str) -> bool {
    match FsView::load(img) {
        Ok(view) => view.find(name).is_some(),
        Err(_) => false,
    }
}

pub(crate) fn read_file(img: &DskImage, name: &str) -> Result<Vec<u8>, DskError> {
    let view = FsView::load(img)?;
    let (_, slot) = view
        .find(name)
        .ok_or_else(|| DskError::FileNotFound(name.to_string()))?;
    let fdr = slot
        .fdr
        .as_ref()
        .ok_or_else(|| DskError::CorruptChain(name.to_string()))?;

    let chain = fdr.data_chain();
    validate_chain(&view, fdr, &chain).map_err(|_| DskError::CorruptChain(name.to_string()))?;
    if chain.is_empty() {
        return Ok(Vec::new());
    }

    let mut bytes = Vec::with_capacity(chain.len() * SECTOR_SIZE);
    for &sector in &chain {
        bytes.extend_from_slice(img.sector(sector));
    }
    if fdr.eof_offset > 0 {
        bytes.truncate((chain.len() - 1) * SECTOR_SIZE + fdr.eof_offset as usize);
    }
    Ok(bytes)
}

/// The structural soundness a chain must have before it is trusted: the
/// advertised sector count, no duplicates, nothing off the volume, and every
/// sector accounted for in the bitmap.
fn validate_chain(view: &FsView, fdr: &Fdr, chain: &[usize]) -> Result<(), ()> {
    if chain.len() != fdr.total_sectors_allocated as usize {
        return Err(());
    }
    let mut seen = HashSet::new();
    for &sector in chain {
        if sector >= view.abm.total_sectors() || !seen.insert(sector) || !view.abm.is_used(sector)
        {
            return Err(());
        }
    }
    Ok(())
}

pub(crate) fn create_file(
    img: &mut DskImage,
    name: &str,
    data: &FileData,
) -> Result<(), DskError> {
    let geometry = *img.geometry();
    let spc = geometry.sectors_per_cluster as usize;
    let mut view = FsView::load(img)?;
    view.ensure_directory_consistent()?;

    let packed_name = pack_name(name)?;
    if view.find(name).is_some() {
        return Err(DskError::NameExists(name.to_string()));
    }
    if view.fdi.is_full() {
        return Err(DskError::OutOfSpace);
    }

    let file_type = data.file_type();
    let (packed, record_length) = pack_data(data)?;

    // Everything that can fail happens before the first sector is written.
    // The descriptor sector is claimed first so that a large allocation
    // cannot swallow the whole descriptor area.
    let fdr_sector = pick_fdr_sector(&view)?;
    view.abm.set_used(fdr_sector, true);
    let needed_clusters = packed.total_sectors.div_ceil(spc);
    let clusters = alloc::allocate(&mut view.abm, needed_clusters)?;
    let runs = cluster_runs(&clusters, spc, packed.total_sectors);

    let mut fdr = Fdr::new(name, file_type)?;
    fdr.file_name = packed_name;
    fdr.records_per_sector = packed.records_per_sector;
    fdr.total_sectors_allocated = packed.total_sectors as u16;
    fdr.eof_offset = packed.eof_offset;
    fdr.logical_record_length = record_length;
    fdr.level3_records_used = packed.record_count;
    let now = Local::now();
    fdr.timestamp_created = pack_timestamp(&now);
    fdr.timestamp_updated = pack_timestamp(&now);
    fdr.set_chain(&runs)?;

    debug!(
        "creating {} with {} sectors in {} runs, descriptor at {}",
        fdr.file_name_str(),
        packed.total_sectors,
        runs.len(),
        fdr_sector
    );

    // Write-through order: data, then FDR, then FDI, then VIB.
    write_data(img, &clusters, spc, &packed);
    img.sector_mut(fdr_sector).copy_from_slice(&fdr.to_bytes());
    let position = view.insert_position(&name.to_lowercase());
    view.fdi.insert(position, fdr_sector as u16);
    view.write_fdi(img);
    view.write_vib(img);
    Ok(())
}

pub(crate) fn delete_file(img: &mut DskImage, name: &str, safe: bool) -> Result<(), DskError> {
    let mut view = FsView::load(img)?;
    let (_, slot) = view
        .find(name)
        .ok_or_else(|| DskError::FileNotFound(name.to_string()))?;
    let fdr_sector = slot.sector;
    let chain = match &slot.fdr {
        Some(fdr) => fdr.data_chain(),
        None => Vec::new(),
    };

    if safe {
        let total = img.geometry().total_sectors();
        for &sector in chain.iter().filter(|&&s| s < total) {
            img.sector_mut(sector).fill(0);
        }
    }

    debug!("deleting {} ({} data sectors)", name, chain.len());
    alloc::release(&mut view.abm, &chain);
    view.abm.set_used(fdr_sector as usize, false);
    view.fdi.remove(fdr_sector);
    view.slots.retain(|s| s.sector != fdr_sector);
    view.write_fdi(img);
    view.write_vib(img);
    Ok(())
}

pub(crate) fn rename_file(img: &mut DskImage, old: &str, new: &str) -> Result<(), DskError> {
    let mut view = FsView::load(img)?;
    view.ensure_directory_consistent()?;

    let packed_name = pack_name(new)?;
    let (_, slot) = view
        .find(old)
        .ok_or_else(|| DskError::FileNotFound(old.to_string()))?;
    let fdr_sector = slot.sector;
    if view.find(new).is_some() {
        return Err(DskError::NameExists(new.to_string()));
    }

    // Only the ten name bytes change; the rest of the descriptor, including
    // the status flags, is left byte for byte as it was.
    img.sector_mut(fdr_sector as usize)[0..10].copy_from_slice(&packed_name);

    view.fdi.remove(fdr_sector);
    view.slots.retain(|s| s.sector != fdr_sector);
    let position = view.insert_position(&new.to_lowercase());
    view.fdi.insert(position, fdr_sector);
    view.write_fdi(img);
    Ok(())
}

fn pack_data(data: &FileData) -> Result<(PackedRecords, u8), DskError> {
    match data {
        FileData::Program(bytes) => Ok((records::pack_program(bytes), 0)),
        FileData::Records {
            file_type,
            record_length,
            records,
        } => {
            debug_assert!(!file_type.is_program());
            let packed = if file_type.is_variable() {
                records::pack_variable(records, *record_length)?
            } else {
                records::pack_fixed(records, *record_length)?
            };
            Ok((packed, *record_length))
        }
    }
}

/// Run-length encode an ascending cluster list into `(first_sector, count)`
/// runs covering exactly `total_sectors` sectors.
fn cluster_runs(clusters: &[usize], spc: usize, total_sectors: usize) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut remaining = total_sectors;
    let mut i = 0;
    while i < clusters.len() && remaining > 0 {
        let start = clusters[i];
        let mut length = 1;
        while i + length < clusters.len() && clusters[i + length] == start + length {
            length += 1;
        }
        let sectors = (length * spc).min(remaining);
        runs.push((start * spc, sectors));
        remaining -= sectors;
        i += length;
    }
    runs
}

/// The descriptor lives on the lowest sector of the descriptor area that is
/// neither allocated nor already pointed at by the index.
fn pick_fdr_sector(view: &FsView) -> Result<usize, DskError> {
    (2..FIRST_DATA_SECTOR)
        .find(|&s| !view.abm.is_used(s) && !view.fdi.contains(s as u16))
        .ok_or(DskError::OutOfSpace)
}

fn write_data(img: &mut DskImage, clusters: &[usize], spc: usize, packed: &PackedRecords) {
    let mut offset = 0;
    for &cluster in clusters {
        for sector in cluster * spc..(cluster + 1) * spc {
            let target = img.sector_mut(sector);
            if offset < packed.bytes.len() {
                target.copy_from_slice(&packed.bytes[offset..offset + SECTOR_SIZE]);
                offset += SECTOR_SIZE;
            } else {
                target.fill(0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::geometry::Preset;
    use super::*;

    fn fresh_image() -> DskImage {
        DskImage::create(Preset::Sssd40, "TESTVOL").unwrap()
    }

    #[test]
    fn test_fresh_view_is_empty() {
        let img = fresh_image();
        let view = FsView::load(&img).unwrap();
        assert!(view.slots.is_empty());
        assert_eq!(view.fdi_sector, FDI_SECTOR);
        assert!(view.abm.is_used(0));
        assert!(view.abm.is_used(1));
        assert!(!view.abm.is_used(2));
    }

    #[test]
    fn test_create_and_read_program() {
        let mut img = fresh_image();
        create_file(&mut img, "HELLO", &FileData::Program(vec![0x55; 1000])).unwrap();

        let entries = list_files(&img).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "HELLO");
        assert_eq!(entries[0].file_type, Some(FileType::Program));
        assert_eq!(entries[0].sectors, 4);
        assert_eq!(entries[0].size_bytes, 1000);

        let bytes = read_file(&img, "hello").unwrap();
        assert_eq!(bytes, vec![0x55; 1000]);
    }

    #[test]
    fn test_create_sets_descriptor_fields() {
        let mut img = fresh_image();
        let records: Vec<Vec<u8>> = (0..10).map(|_| vec![0xAA; 80]).collect();
        let data = FileData::Records {
            file_type: FileType::DisFix,
            record_length: 80,
            records,
        };
        create_file(&mut img, "FIXED", &data).unwrap();

        let view = FsView::load(&img).unwrap();
        let fdr = view.find("FIXED").unwrap().1.fdr.clone().unwrap();
        assert_eq!(fdr.file_status, 0x02);
        assert_eq!(fdr.records_per_sector, 3);
        assert_eq!(fdr.total_sectors_allocated, 4);
        assert_eq!(fdr.level3_records_used, 10);
        assert_eq!(fdr.eof_offset, 0);
        assert!(fdr.created_at().is_some());
    }

    #[test]
    fn test_create_rejects_duplicates_and_bad_names() {
        let mut img = fresh_image();
        create_file(&mut img, "FILE", &FileData::Program(vec![1])).unwrap();
        assert!(matches!(
            create_file(&mut img, "file", &FileData::Program(vec![1])),
            Err(DskError::NameExists(_))
        ));
        assert!(matches!(
            create_file(&mut img, "TOO.LONG", &FileData::Program(vec![1])),
            Err(DskError::NameInvalid { .. })
        ));
        assert!(matches!(
            create_file(&mut img, "ELEVENCHARS", &FileData::Program(vec![1])),
            Err(DskError::NameInvalid { .. })
        ));
    }

    #[test]
    fn test_fdi_stays_sorted() {
        let mut img = fresh_image();
        for name in ["ZEBRA", "alpha", "MANGO"] {
            create_file(&mut img, name, &FileData::Program(vec![1])).unwrap();
        }
        let names: Vec<String> = list_files(&img)
            .unwrap()
            .iter()
            .map(|e| e.name.clone())
            .collect();
        assert_eq!(names, vec!["ALPHA", "MANGO", "ZEBRA"]);
    }

    #[test]
    fn test_delete_frees_space() {
        let mut img = fresh_image();
        create_file(&mut img, "DOOMED", &FileData::Program(vec![9; 600])).unwrap();
        let used_before = FsView::load(&img).unwrap().abm.used_units();
        delete_file(&mut img, "DOOMED", false).unwrap();

        let view = FsView::load(&img).unwrap();
        assert!(view.slots.is_empty());
        // data sectors and the descriptor sector are free again
        assert_eq!(view.abm.used_units(), used_before - 4);
        assert!(matches!(
            read_file(&img, "DOOMED"),
            Err(DskError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_safe_delete_zeroes_data() {
        let mut img = fresh_image();
        create_file(&mut img, "SECRET", &FileData::Program(vec![0xEE; 300])).unwrap();
        let chain = {
            let view = FsView::load(&img).unwrap();
            view.find("SECRET").unwrap().1.fdr.clone().unwrap().data_chain()
        };
        delete_file(&mut img, "SECRET", true).unwrap();
        for sector in chain {
            assert!(img.sector(sector).iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_delete_then_reuse_tight_fit() {
        let mut img = fresh_image();
        create_file(&mut img, "AAA", &FileData::Program(vec![1; 1024])).unwrap();
        create_file(&mut img, "BBB", &FileData::Program(vec![2; 1024])).unwrap();
        create_file(&mut img, "CCC", &FileData::Program(vec![3; 1024])).unwrap();

        let snapshot = FsView::load(&img).unwrap().abm.bitmap();
        delete_file(&mut img, "BBB", false).unwrap();
        create_file(&mut img, "BBB2", &FileData::Program(vec![4; 1024])).unwrap();

        // the freed block is picked again, leaving the bitmap as before
        assert_eq!(FsView::load(&img).unwrap().abm.bitmap(), snapshot);
        assert_eq!(read_file(&img, "AAA").unwrap(), vec![1; 1024]);
        assert_eq!(read_file(&img, "CCC").unwrap(), vec![3; 1024]);
    }

    #[test]
    fn test_rename_preserves_descriptor_bytes() {
        let mut img = fresh_image();
        create_file(&mut img, "OLD", &FileData::Program(vec![7; 100])).unwrap();

        // set the protection flag behind the library's back
        let view = FsView::load(&img).unwrap();
        let sector = view.find("OLD").unwrap().1.sector as usize;
        img.sector_mut(sector)[12] |= super::super::fdr::FLAG_PROTECTED;
        let before: Vec<u8> = img.sector(sector)[10..].to_vec();

        rename_file(&mut img, "OLD", "NEW").unwrap();
        assert!(exists(&img, "NEW"));
        assert!(!exists(&img, "OLD"));
        assert_eq!(&img.sector(sector)[10..], &before[..]);
        assert!(list_files(&img).unwrap()[0].protected);
    }

    #[test]
    fn test_rename_missing_and_clashing() {
        let mut img = fresh_image();
        create_file(&mut img, "ONE", &FileData::Program(vec![1])).unwrap();
        create_file(&mut img, "TWO", &FileData::Program(vec![2])).unwrap();
        assert!(matches!(
            rename_file(&mut img, "MISSING", "X"),
            Err(DskError::FileNotFound(_))
        ));
        assert!(matches!(
            rename_file(&mut img, "ONE", "two"),
            Err(DskError::NameExists(_))
        ));
    }

    #[test]
    fn test_zero_byte_file() {
        let mut img = fresh_image();
        create_file(&mut img, "EMPTY", &FileData::Program(Vec::new())).unwrap();
        assert_eq!(read_file(&img, "EMPTY").unwrap(), Vec::<u8>::new());
        let entries = list_files(&img).unwrap();
        assert_eq!(entries[0].sectors, 0);
        assert_eq!(entries[0].size_bytes, 0);
    }

    #[test]
    fn test_fill_entire_data_area() {
        let mut img = fresh_image();
        // 360 sectors minus VIB, FDI and one FDR sector
        let capacity = (360 - 3) * SECTOR_SIZE;
        create_file(&mut img, "BIG", &FileData::Program(vec![0x42; capacity])).unwrap();
        assert_eq!(read_file(&img, "BIG").unwrap().len(), capacity);
        assert!(matches!(
            create_file(&mut img, "MORE", &FileData::Program(vec![1; SECTOR_SIZE])),
            Err(DskError::OutOfSpace)
        ));
    }

    #[test]
    fn test_corrupt_chain_detected_on_read() {
        let mut img = fresh_image();
        create_file(&mut img, "HELLO", &FileData::Program(vec![0x55; 1000])).unwrap();
        let sector = {
            let view = FsView::load(&img).unwrap();
            view.find("HELLO").unwrap().1.sector as usize
        };
        // bend the chain onto sectors the bitmap says are free
        img.sector_mut(sector)[28] ^= 0x04;
        assert!(matches!(
            read_file(&img, "HELLO"),
            Err(DskError::CorruptChain(_))
        ));
    }

    #[test]
    fn test_variable_records_roundtrip() {
        let mut img = fresh_image();
        // record three is longer than the declared record length and lands
        // at the top of the second sector
        let records = vec![vec![1u8; 80], vec![2u8; 80], vec![3u8; 150]];
        let data = FileData::Records {
            file_type: FileType::DisVar,
            record_length: 80,
            records: records.clone(),
        };
        create_file(&mut img, "VAR", &data).unwrap();
        let bytes = read_file(&img, "VAR").unwrap();
        assert_eq!(records::unpack_variable(&bytes), records);
    }

    #[test]
    fn test_double_density_partial_cluster() {
        let mut img = DskImage::create(Preset::Dsdd40, "DOUBLE").unwrap();
        // 600 bytes is three sectors, which needs two 2-sector clusters
        create_file(&mut img, "ODD", &FileData::Program(vec![0x11; 600])).unwrap();

        let view = FsView::load(&img).unwrap();
        let fdr = view.find("ODD").unwrap().1.fdr.clone().unwrap();
        // the chain covers exactly the data sectors, the bitmap rounds to
        // whole allocation units
        assert_eq!(fdr.total_sectors_allocated, 3);
        assert_eq!(fdr.data_chain().len(), 3);
        let spare = fdr.data_chain()[2] + 1;
        assert!(view.abm.is_used(spare));

        assert_eq!(read_file(&img, "ODD").unwrap(), vec![0x11; 600]);

        delete_file(&mut img, "ODD", false).unwrap();
        let view = FsView::load(&img).unwrap();
        assert!(!view.abm.is_used(spare));
    }

    #[test]
    fn test_mutation_on_unsorted_directory_fails() {
        let mut img = fresh_image();
        create_file(&mut img, "AAA", &FileData::Program(vec![1])).unwrap();
        create_file(&mut img, "BBB", &FileData::Program(vec![2])).unwrap();
        // swap the two index entries behind the library's back
        let fdi_bytes: Vec<u8> = img.sector(FDI_SECTOR).to_vec();
        let swapped: Vec<u8> = [&fdi_bytes[2..4], &fdi_bytes[0..2], &fdi_bytes[4..]].concat();
        img.sector_mut(FDI_SECTOR).copy_from_slice(&swapped);
        assert!(matches!(
            create_file(&mut img, "CCC", &FileData::Program(vec![3])),
            Err(DskError::CorruptDirectory)
        ));
    }

    #[test]
    fn test_fragmentation_exceeded() {
        let mut img = fresh_image();
        // Leave sector 2 for the descriptor and a checkerboard of isolated
        // single free clusters for the data.
        let mut view = FsView::load(&img).unwrap();
        for s in 3..360 {
            view.abm.set_used(s, true);
        }
        for s in (40..360).step_by(2) {
            view.abm.set_used(s, false);
        }
        view.write_vib(&mut img);

        // 77 isolated runs cannot be described in 76 chain entries
        let result = create_file(&mut img, "FRAG", &FileData::Program(vec![1; 77 * SECTOR_SIZE]));
        assert!(matches!(result, Err(DskError::FragmentationExceeded)));
        assert!(!exists(&img, "FRAG"));

        // 76 runs just fit
        create_file(&mut img, "FITS", &FileData::Program(vec![1; 76 * SECTOR_SIZE])).unwrap();
        assert_eq!(
            read_file(&img, "FITS").unwrap(),
            vec![1; 76 * SECTOR_SIZE]
        );
    }
}
