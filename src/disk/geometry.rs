use std::fmt;
use std::str::FromStr;

use super::error::DskError;
use super::{SECTOR_SIZE, VIB_SIGNATURE, VIB_SIGNATURE_OFFSET};

/// Recognized TI-99/4A floppy formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// Single sided, single density, 40 tracks (90K)
    Sssd40,
    /// Double sided, single density, 40 tracks (180K)
    Dssd40,
    /// Double sided, double density, 40 tracks (360K)
    Dsdd40,
    /// Double sided, single density, 80 tracks (400K)
    Dssd80,
    /// Double sided, double density, 80 tracks (720K)
    Dsdd80,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub sides: u8,
    pub tracks_per_side: u8,
    pub sectors_per_track: u8,
    pub density: u8,
    pub sectors_per_cluster: u8,
}

impl Preset {
    pub const ALL: [Preset; 5] = [
        Preset::Sssd40,
        Preset::Dssd40,
        Preset::Dsdd40,
        Preset::Dssd80,
        Preset::Dsdd80,
    ];

    pub fn geometry(self) -> Geometry {
        match self {
            Preset::Sssd40 => Geometry::new(1, 40, 9, 1, 1),
            Preset::Dssd40 => Geometry::new(2, 40, 9, 1, 1),
            Preset::Dsdd40 => Geometry::new(2, 40, 18, 2, 2),
            Preset::Dssd80 => Geometry::new(2, 80, 10, 1, 1),
            Preset::Dsdd80 => Geometry::new(2, 80, 18, 2, 2),
        }
    }

    /// Resolve a preset from the physical layout advertised by a VIB.
    pub fn from_layout(sides: u8, tracks_per_side: u8, sectors_per_track: u8) -> Option<Preset> {
        match (sides, tracks_per_side, sectors_per_track) {
            (1, 40, 9) => Some(Preset::Sssd40),
            (2, 40, 9) => Some(Preset::Dssd40),
            // 16 sectors per track is the older WD controller variant
            (2, 40, 16) | (2, 40, 18) => Some(Preset::Dsdd40),
            (2, 80, 10) => Some(Preset::Dssd80),
            (2, 80, 16) | (2, 80, 18) => Some(Preset::Dsdd80),
            _ => None,
        }
    }

    /// Fallback resolution from the raw image length alone.
    pub fn from_image_len(len: usize) -> Option<Preset> {
        match len / SECTOR_SIZE {
            360 => Some(Preset::Sssd40),
            720 => Some(Preset::Dssd40),
            1280 | 1440 => Some(Preset::Dsdd40),
            1600 => Some(Preset::Dssd80),
            2880 => Some(Preset::Dsdd80),
            _ => None,
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Preset::Sssd40 => "SSSD40",
            Preset::Dssd40 => "DSSD40",
            Preset::Dsdd40 => "DSDD40",
            Preset::Dssd80 => "DSSD80",
            Preset::Dsdd80 => "DSDD80",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Preset {
    type Err = DskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SSSD40" | "SSSD" => Ok(Preset::Sssd40),
            "DSSD40" | "DSSD" => Ok(Preset::Dssd40),
            "DSDD40" | "DSDD" => Ok(Preset::Dsdd40),
            "DSSD80" => Ok(Preset::Dssd80),
            "DSDD80" => Ok(Preset::Dsdd80),
            _ => Err(DskError::UnrecognizedGeometry(0)),
        }
    }
}

impl Geometry {
    pub fn new(
        sides: u8,
        tracks_per_side: u8,
        sectors_per_track: u8,
        density: u8,
        sectors_per_cluster: u8,
    ) -> Self {
        Geometry {
            sides,
            tracks_per_side,
            sectors_per_track,
            density,
            sectors_per_cluster,
        }
    }

    pub fn total_sectors(&self) -> usize {
        self.sides as usize * self.tracks_per_side as usize * self.sectors_per_track as usize
    }

    pub fn total_clusters(&self) -> usize {
        self.total_sectors() / self.sectors_per_cluster as usize
    }

    pub fn image_len(&self) -> usize {
        self.total_sectors() * SECTOR_SIZE
    }

    pub fn cluster_to_sector(&self, cluster: usize) -> usize {
        cluster * self.sectors_per_cluster as usize
    }

    pub fn sector_to_cluster(&self, sector: usize) -> usize {
        sector / self.sectors_per_cluster as usize
    }
}

/// Identify the format of a raw image, preferring the VIB over the byte length.
pub fn detect_format(bytes: &[u8]) -> Result<(Preset, Geometry), DskError> {
    if bytes.len() >= SECTOR_SIZE
        && bytes[VIB_SIGNATURE_OFFSET..VIB_SIGNATURE_OFFSET + 3] == VIB_SIGNATURE
    {
        let sectors_per_track = bytes[12];
        let tracks_per_side = bytes[17];
        let sides = bytes[18];
        let density = bytes[19];
        if let Some(preset) = Preset::from_layout(sides, tracks_per_side, sectors_per_track) {
            let mut geometry = preset.geometry();
            geometry.sectors_per_track = sectors_per_track;
            geometry.density = density;
            if geometry.image_len() == bytes.len() {
                return Ok((preset, geometry));
            }
        }
    }
    match Preset::from_image_len(bytes.len()) {
        Some(preset) if preset.geometry().image_len() == bytes.len() => {
            Ok((preset, preset.geometry()))
        }
        // the 16 sectors-per-track DSDD variants only resolve over length
        Some(preset) => {
            let mut geometry = preset.geometry();
            geometry.sectors_per_track = 16;
            if geometry.image_len() == bytes.len() {
                Ok((preset, geometry))
            } else {
                Err(DskError::UnrecognizedGeometry(bytes.len()))
            }
        }
        None => Err(DskError::UnrecognizedGeometry(bytes.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_geometries() {
        assert_eq!(Preset::Sssd40.geometry().total_sectors(), 360);
        assert_eq!(Preset::Dssd40.geometry().total_sectors(), 720);
        assert_eq!(Preset::Dsdd40.geometry().total_sectors(), 1440);
        assert_eq!(Preset::Dssd80.geometry().total_sectors(), 1600);
        assert_eq!(Preset::Dsdd80.geometry().total_sectors(), 2880);
    }

    #[test]
    fn test_cluster_mapping() {
        let single = Preset::Sssd40.geometry();
        assert_eq!(single.cluster_to_sector(5), 5);
        assert_eq!(single.sector_to_cluster(5), 5);

        let double = Preset::Dsdd40.geometry();
        assert_eq!(double.cluster_to_sector(5), 10);
        assert_eq!(double.sector_to_cluster(11), 5);
        assert_eq!(double.total_clusters(), 720);
    }

    #[test]
    fn test_detect_from_length() {
        let bytes = vec![0u8; 360 * SECTOR_SIZE];
        let (preset, geometry) = detect_format(&bytes).unwrap();
        assert_eq!(preset, Preset::Sssd40);
        assert_eq!(geometry, Preset::Sssd40.geometry());

        let bytes = vec![0u8; 2880 * SECTOR_SIZE];
        assert_eq!(detect_format(&bytes).unwrap().0, Preset::Dsdd80);
    }

    #[test]
    fn test_detect_from_vib() {
        // A DSSD80 sized image whose VIB claims DSDD40 at 18 sectors per track
        let mut bytes = vec![0u8; 1440 * SECTOR_SIZE];
        bytes[VIB_SIGNATURE_OFFSET..VIB_SIGNATURE_OFFSET + 3].copy_from_slice(b"DSK");
        bytes[12] = 18;
        bytes[17] = 40;
        bytes[18] = 2;
        bytes[19] = 2;
        let (preset, geometry) = detect_format(&bytes).unwrap();
        assert_eq!(preset, Preset::Dsdd40);
        assert_eq!(geometry.sectors_per_track, 18);
    }

    #[test]
    fn test_detect_16_sector_variant() {
        let mut bytes = vec![0u8; 1280 * SECTOR_SIZE];
        bytes[VIB_SIGNATURE_OFFSET..VIB_SIGNATURE_OFFSET + 3].copy_from_slice(b"DSK");
        bytes[12] = 16;
        bytes[17] = 40;
        bytes[18] = 2;
        bytes[19] = 2;
        let (preset, geometry) = detect_format(&bytes).unwrap();
        assert_eq!(preset, Preset::Dsdd40);
        assert_eq!(geometry.sectors_per_track, 16);
        assert_eq!(geometry.total_sectors(), 1280);
    }

    #[test]
    fn test_detect_unrecognized() {
        let bytes = vec![0u8; 12345];
        assert!(matches!(
            detect_format(&bytes),
            Err(DskError::UnrecognizedGeometry(12345))
        ));
    }

    #[test]
    fn test_preset_from_str() {
        assert_eq!("sssd40".parse::<Preset>().unwrap(), Preset::Sssd40);
        assert_eq!("DSDD80".parse::<Preset>().unwrap(), Preset::Dsdd80);
        assert!("DSHD".parse::<Preset>().is_err());
    }
}
