use super::error::DskError;
use super::geometry::Geometry;
use super::{
    ABM_OFFSET, ABM_SIZE, DIR_SLOTS, FILE_NAME_LEN, SECTOR_SIZE, VIB_SIGNATURE, VOLUME_NAME_LEN,
};

/// One of the three catalog slots a volume can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirSlot {
    pub name: [u8; FILE_NAME_LEN],
    pub fdr_sector: u16,
}

impl DirSlot {
    pub fn empty() -> Self {
        DirSlot {
            name: [0x20; FILE_NAME_LEN],
            fdr_sector: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fdr_sector == 0
    }
}

/// Volume Information Block, sector 0 of every image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vib {
    pub volume_name: [u8; VOLUME_NAME_LEN],
    pub total_sectors: u16,
    pub sectors_per_track: u8,
    /// Byte 16, volume protection on real disks. Preserved verbatim.
    pub protection: u8,
    pub tracks_per_side: u8,
    pub sides: u8,
    pub density: u8,
    pub dir_slots: [DirSlot; DIR_SLOTS],
    /// Allocation bitmap region, bytes 56 to the end of the sector.
    pub bitmap: [u8; ABM_SIZE],
}

impl Vib {
    /// A fresh VIB for a newly formatted volume. The bitmap starts all free;
    /// the caller primes it through the ABM.
    pub fn new(geometry: &Geometry, volume_name: &str) -> Result<Self, DskError> {
        Ok(Vib {
            volume_name: pack_name(volume_name)?,
            total_sectors: geometry.total_sectors() as u16,
            sectors_per_track: geometry.sectors_per_track,
            protection: 0x20,
            tracks_per_side: geometry.tracks_per_side,
            sides: geometry.sides,
            density: geometry.density,
            dir_slots: [DirSlot::empty(); DIR_SLOTS],
            bitmap: [0; ABM_SIZE],
        })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DskError> {
        if data.len() != SECTOR_SIZE {
            return Err(DskError::InvalidVibSignature);
        }
        if data[13..16] != VIB_SIGNATURE {
            return Err(DskError::InvalidVibSignature);
        }

        let mut volume_name = [0u8; VOLUME_NAME_LEN];
        volume_name.copy_from_slice(&data[0..10]);

        let mut dir_slots = [DirSlot::empty(); DIR_SLOTS];
        for (i, slot) in dir_slots.iter_mut().enumerate() {
            let offset = 20 + i * 12;
            slot.name.copy_from_slice(&data[offset..offset + 10]);
            slot.fdr_sector = u16::from_be_bytes([data[offset + 10], data[offset + 11]]);
        }

        let mut bitmap = [0u8; ABM_SIZE];
        bitmap.copy_from_slice(&data[ABM_OFFSET..SECTOR_SIZE]);

        Ok(Vib {
            volume_name,
            total_sectors: u16::from_be_bytes([data[10], data[11]]),
            sectors_per_track: data[12],
            protection: data[16],
            tracks_per_side: data[17],
            sides: data[18],
            density: data[19],
            dir_slots,
            bitmap,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; SECTOR_SIZE];
        data[0..10].copy_from_slice(&self.volume_name);
        data[10..12].copy_from_slice(&self.total_sectors.to_be_bytes());
        data[12] = self.sectors_per_track;
        data[13..16].copy_from_slice(&VIB_SIGNATURE);
        data[16] = self.protection;
        data[17] = self.tracks_per_side;
        data[18] = self.sides;
        data[19] = self.density;
        for (i, slot) in self.dir_slots.iter().enumerate() {
            let offset = 20 + i * 12;
            data[offset..offset + 10].copy_from_slice(&slot.name);
            data[offset + 10..offset + 12].copy_from_slice(&slot.fdr_sector.to_be_bytes());
        }
        data[ABM_OFFSET..SECTOR_SIZE].copy_from_slice(&self.bitmap);
        data
    }

    pub fn volume_name_str(&self) -> String {
        name_to_string(&self.volume_name)
    }

    pub fn set_volume_name(&mut self, name: &str) -> Result<(), DskError> {
        self.volume_name = pack_name(name)?;
        Ok(())
    }
}

/// Pack a name into the 10-byte space-padded on-disk form, folding to
/// uppercase. Names are 1..=10 printable ASCII characters without '.' or '/'.
pub(crate) fn pack_name(name: &str) -> Result<[u8; FILE_NAME_LEN], DskError> {
    let invalid = |reason| DskError::NameInvalid {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > FILE_NAME_LEN {
        return Err(invalid("name is longer than 10 characters"));
    }
    let mut packed = [0x20u8; FILE_NAME_LEN];
    for (i, c) in name.bytes().enumerate() {
        if !c.is_ascii_graphic() {
            return Err(invalid("name contains a non-printable character"));
        }
        if c == b'.' || c == b'/' {
            return Err(invalid("name contains '.' or '/'"));
        }
        packed[i] = c.to_ascii_uppercase();
    }
    Ok(packed)
}

pub(crate) fn name_to_string(packed: &[u8]) -> String {
    let trimmed: Vec<u8> = packed
        .iter()
        .copied()
        .take_while(|&b| b != 0)
        .collect();
    String::from_utf8_lossy(&trimmed)
        .trim_end_matches(' ')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::super::geometry::Preset;
    use super::*;

    #[test]
    fn test_new_vib() {
        let vib = Vib::new(&Preset::Sssd40.geometry(), "TESTDISK").unwrap();
        assert_eq!(vib.total_sectors, 360);
        assert_eq!(vib.sectors_per_track, 9);
        assert_eq!(vib.sides, 1);
        assert_eq!(vib.volume_name_str(), "TESTDISK");
        assert!(vib.dir_slots.iter().all(|s| s.is_empty()));
    }

    #[test]
    fn test_roundtrip() {
        let mut vib = Vib::new(&Preset::Dssd40.geometry(), "VOLUME").unwrap();
        vib.bitmap[0] = 0xA5;
        vib.bitmap[ABM_SIZE - 1] = 0xFF;
        vib.dir_slots[1] = DirSlot {
            name: *b"SUBCAT    ",
            fdr_sector: 40,
        };
        let bytes = vib.to_bytes();
        assert_eq!(bytes.len(), SECTOR_SIZE);
        assert_eq!(&bytes[13..16], b"DSK");
        let decoded = Vib::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, vib);
    }

    #[test]
    fn test_bitmap_written_verbatim() {
        let mut vib = Vib::new(&Preset::Sssd40.geometry(), "V").unwrap();
        for (i, b) in vib.bitmap.iter_mut().enumerate() {
            *b = i as u8;
        }
        let bytes = vib.to_bytes();
        for i in 0..ABM_SIZE {
            assert_eq!(bytes[ABM_OFFSET + i], i as u8);
        }
    }

    #[test]
    fn test_bad_signature() {
        let vib = Vib::new(&Preset::Sssd40.geometry(), "V").unwrap();
        let mut bytes = vib.to_bytes();
        bytes[14] = b'X';
        assert!(matches!(
            Vib::from_bytes(&bytes),
            Err(DskError::InvalidVibSignature)
        ));
    }

    #[test]
    fn test_pack_name() {
        assert_eq!(&pack_name("hello").unwrap(), b"HELLO     ");
        assert_eq!(&pack_name("TENLETTERS").unwrap(), b"TENLETTERS");
        assert!(pack_name("").is_err());
        assert!(pack_name("ELEVENCHARS").is_err());
        assert!(pack_name("A.B").is_err());
        assert!(pack_name("A/B").is_err());
        assert!(pack_name("A B").is_err());
    }

    #[test]
    fn test_name_to_string() {
        assert_eq!(name_to_string(b"HELLO     "), "HELLO");
        assert_eq!(name_to_string(b"          "), "");
    }
}
