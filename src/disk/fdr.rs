use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, Timelike};

use super::dcp::DataChainPointer;
use super::error::DskError;
use super::vib::{name_to_string, pack_name};
use super::{DCP_ENTRY_SIZE, DCP_MAX_ENTRIES, DCP_OFFSET, FILE_NAME_LEN, SECTOR_SIZE};

/// Type and record format of a file, the low nibble of the status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Program,
    DisFix,
    DisVar,
    IntFix,
    IntVar,
}

// Upper nibble flags of the status byte.
pub const FLAG_PROTECTED: u8 = 0x10;
pub const FLAG_BACKUP: u8 = 0x20;
pub const FLAG_EMULATE: u8 = 0x40;
pub const STATUS_FLAG_MASK: u8 = 0xF0;
pub const STATUS_TYPE_MASK: u8 = 0x0F;

impl FileType {
    pub fn code(self) -> u8 {
        match self {
            FileType::Program => 0x01,
            FileType::DisFix => 0x02,
            FileType::DisVar => 0x03,
            FileType::IntFix => 0x04,
            FileType::IntVar => 0x05,
        }
    }

    pub fn from_code(code: u8) -> Option<FileType> {
        match code & STATUS_TYPE_MASK {
            0x01 => Some(FileType::Program),
            0x02 => Some(FileType::DisFix),
            0x03 => Some(FileType::DisVar),
            0x04 => Some(FileType::IntFix),
            0x05 => Some(FileType::IntVar),
            _ => None,
        }
    }

    pub fn is_program(self) -> bool {
        self == FileType::Program
    }

    pub fn is_variable(self) -> bool {
        matches!(self, FileType::DisVar | FileType::IntVar)
    }
}

/// File Descriptor Record, one sector per file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fdr {
    pub file_name: [u8; FILE_NAME_LEN],
    pub extended_record_length: u16,
    pub file_status: u8,
    pub records_per_sector: u8,
    pub total_sectors_allocated: u16,
    pub eof_offset: u8,
    pub logical_record_length: u8,
    pub level3_records_used: u16,
    pub timestamp_created: [u8; 4],
    pub timestamp_updated: [u8; 4],
    pub chain: [DataChainPointer; DCP_MAX_ENTRIES],
}

impl Fdr {
    pub fn new(name: &str, file_type: FileType) -> Result<Self, DskError> {
        Ok(Fdr {
            file_name: pack_name(name)?,
            extended_record_length: 0,
            file_status: file_type.code(),
            records_per_sector: 0,
            total_sectors_allocated: 0,
            eof_offset: 0,
            logical_record_length: 0,
            level3_records_used: 0,
            timestamp_created: [0; 4],
            timestamp_updated: [0; 4],
            chain: [DataChainPointer::default(); DCP_MAX_ENTRIES],
        })
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        debug_assert_eq!(data.len(), SECTOR_SIZE);

        let mut file_name = [0u8; FILE_NAME_LEN];
        file_name.copy_from_slice(&data[0..10]);

        let mut timestamp_created = [0u8; 4];
        timestamp_created.copy_from_slice(&data[20..24]);
        let mut timestamp_updated = [0u8; 4];
        timestamp_updated.copy_from_slice(&data[24..28]);

        let mut chain = [DataChainPointer::default(); DCP_MAX_ENTRIES];
        for (i, entry) in chain.iter_mut().enumerate() {
            let offset = DCP_OFFSET + i * DCP_ENTRY_SIZE;
            *entry = DataChainPointer::from_bytes(&[
                data[offset],
                data[offset + 1],
                data[offset + 2],
            ]);
        }

        Fdr {
            file_name,
            extended_record_length: u16::from_be_bytes([data[10], data[11]]),
            file_status: data[12],
            records_per_sector: data[13],
            total_sectors_allocated: u16::from_be_bytes([data[14], data[15]]),
            eof_offset: data[16],
            logical_record_length: data[17],
            // the one little-endian field in the structure
            level3_records_used: u16::from_le_bytes([data[18], data[19]]),
            timestamp_created,
            timestamp_updated,
            chain,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; SECTOR_SIZE];
        data[0..10].copy_from_slice(&self.file_name);
        data[10..12].copy_from_slice(&self.extended_record_length.to_be_bytes());
        data[12] = self.file_status;
        data[13] = self.records_per_sector;
        data[14..16].copy_from_slice(&self.total_sectors_allocated.to_be_bytes());
        data[16] = self.eof_offset;
        data[17] = self.logical_record_length;
        data[18..20].copy_from_slice(&self.level3_records_used.to_le_bytes());
        data[20..24].copy_from_slice(&self.timestamp_created);
        data[24..28].copy_from_slice(&self.timestamp_updated);
        for (i, entry) in self.chain.iter().enumerate() {
            let offset = DCP_OFFSET + i * DCP_ENTRY_SIZE;
            data[offset..offset + DCP_ENTRY_SIZE].copy_from_slice(&entry.to_bytes());
        }
        data
    }

    pub fn file_name_str(&self) -> String {
        name_to_string(&self.file_name)
    }

    pub fn name_is_blank(&self) -> bool {
        self.file_name.iter().all(|&b| b == 0x20 || b == 0)
    }

    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_code(self.file_status)
    }

    pub fn status_flags(&self) -> u8 {
        self.file_status & STATUS_FLAG_MASK
    }

    pub fn is_protected(&self) -> bool {
        self.file_status & FLAG_PROTECTED != 0
    }

    /// Effective record length, honoring the extended field for records
    /// larger than 255 bytes.
    pub fn record_length(&self) -> u16 {
        if self.extended_record_length != 0 {
            self.extended_record_length
        } else {
            self.logical_record_length as u16
        }
    }

    /// Expand the chain into the ordered list of data sectors, stopping at
    /// the first empty entry. No consistency judgement is made here.
    pub fn data_chain(&self) -> Vec<usize> {
        let mut sectors = Vec::new();
        for entry in &self.chain {
            if entry.is_empty() {
                break;
            }
            sectors.extend(entry.sectors().map(|s| s as usize));
        }
        sectors
    }

    /// Replace the chain with the given `(first_sector, sector_count)` runs.
    pub fn set_chain(&mut self, runs: &[(usize, usize)]) -> Result<(), DskError> {
        if runs.len() > DCP_MAX_ENTRIES {
            return Err(DskError::FragmentationExceeded);
        }
        self.chain = [DataChainPointer::default(); DCP_MAX_ENTRIES];
        for (i, &(first, count)) in runs.iter().enumerate() {
            self.chain[i] = DataChainPointer::new(first, count);
        }
        Ok(())
    }

    /// Content size in bytes once the EOF trim is applied.
    pub fn size_bytes(&self) -> usize {
        let sectors = self.total_sectors_allocated as usize;
        if sectors == 0 {
            0
        } else if self.eof_offset > 0 {
            (sectors - 1) * SECTOR_SIZE + self.eof_offset as usize
        } else {
            sectors * SECTOR_SIZE
        }
    }

    pub fn created_at(&self) -> Option<NaiveDateTime> {
        unpack_timestamp(&self.timestamp_created)
    }

    pub fn updated_at(&self) -> Option<NaiveDateTime> {
        unpack_timestamp(&self.timestamp_updated)
    }
}

/// Pack a moment into the 4-byte controller form: a big-endian time word
/// `hour << 11 | minute << 5 | second / 2` followed by a big-endian date word
/// `year << 9 | month << 5 | day` with a two-digit year.
pub fn pack_timestamp(moment: &DateTime<Local>) -> [u8; 4] {
    let time = ((moment.hour() as u16) << 11)
        | ((moment.minute() as u16) << 5)
        | (moment.second() as u16 / 2);
    let date = (((moment.year() % 100) as u16) << 9)
        | ((moment.month() as u16) << 5)
        | moment.day() as u16;
    let mut packed = [0u8; 4];
    packed[0..2].copy_from_slice(&time.to_be_bytes());
    packed[2..4].copy_from_slice(&date.to_be_bytes());
    packed
}

/// Decode a packed timestamp; all zero means never stamped. Two-digit years
/// below 70 land in the 2000s.
pub fn unpack_timestamp(packed: &[u8; 4]) -> Option<NaiveDateTime> {
    if packed.iter().all(|&b| b == 0) {
        return None;
    }
    let time = u16::from_be_bytes([packed[0], packed[1]]);
    let date = u16::from_be_bytes([packed[2], packed[3]]);
    let year = (date >> 9) as i32;
    let year = if year < 70 { 2000 + year } else { 1900 + year };
    let month = (date >> 5) as u32 & 0x0F;
    let day = date as u32 & 0x1F;
    let hour = (time >> 11) as u32;
    let minute = (time >> 5) as u32 & 0x3F;
    let second = (time as u32 & 0x1F) * 2;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_fdr() -> Fdr {
        let mut fdr = Fdr::new("REPORT", FileType::DisFix).unwrap();
        fdr.logical_record_length = 80;
        fdr.records_per_sector = 3;
        fdr.total_sectors_allocated = 4;
        fdr.level3_records_used = 10;
        fdr.set_chain(&[(34, 4)]).unwrap();
        fdr
    }

    #[test]
    fn test_roundtrip_is_byte_exact() {
        let mut fdr = sample_fdr();
        fdr.file_status |= FLAG_PROTECTED | 0x80; // reserved high bit must survive
        fdr.timestamp_created = [0x5A, 0xA5, 0x33, 0x44];
        let bytes = fdr.to_bytes();
        let decoded = Fdr::from_bytes(&bytes);
        assert_eq!(decoded, fdr);
        assert_eq!(decoded.to_bytes(), bytes);
    }

    #[test]
    fn test_field_offsets() {
        let fdr = sample_fdr();
        let bytes = fdr.to_bytes();
        assert_eq!(&bytes[0..6], b"REPORT");
        assert_eq!(bytes[12], 0x02);
        assert_eq!(bytes[13], 3);
        assert_eq!(u16::from_be_bytes([bytes[14], bytes[15]]), 4);
        assert_eq!(bytes[17], 80);
        // level3 count is little endian
        assert_eq!(bytes[18], 10);
        assert_eq!(bytes[19], 0);
    }

    #[test]
    fn test_data_chain_expansion() {
        let mut fdr = Fdr::new("CHAIN", FileType::Program).unwrap();
        fdr.set_chain(&[(34, 2), (40, 3)]).unwrap();
        assert_eq!(fdr.data_chain(), vec![34, 35, 40, 41, 42]);
    }

    #[test]
    fn test_chain_stops_at_empty_entry() {
        let mut fdr = Fdr::new("CHAIN", FileType::Program).unwrap();
        fdr.chain[0] = DataChainPointer::new(34, 2);
        fdr.chain[2] = DataChainPointer::new(50, 1); // unreachable past the gap
        assert_eq!(fdr.data_chain(), vec![34, 35]);
    }

    #[test]
    fn test_fragmentation_limit() {
        let mut fdr = Fdr::new("FRAG", FileType::Program).unwrap();
        let runs: Vec<(usize, usize)> = (0..77).map(|i| (34 + i * 2, 1)).collect();
        assert!(matches!(
            fdr.set_chain(&runs),
            Err(DskError::FragmentationExceeded)
        ));
        assert!(fdr.set_chain(&runs[0..76]).is_ok());
    }

    #[test]
    fn test_size_bytes() {
        let mut fdr = sample_fdr();
        fdr.eof_offset = 0;
        assert_eq!(fdr.size_bytes(), 4 * SECTOR_SIZE);
        fdr.eof_offset = 232;
        assert_eq!(fdr.size_bytes(), 3 * SECTOR_SIZE + 232);
        fdr.total_sectors_allocated = 0;
        assert_eq!(fdr.size_bytes(), 0);
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let moment = Local.with_ymd_and_hms(2024, 3, 15, 14, 30, 42).unwrap();
        let packed = pack_timestamp(&moment);
        let unpacked = unpack_timestamp(&packed).unwrap();
        assert_eq!(unpacked.year(), 2024);
        assert_eq!(unpacked.month(), 3);
        assert_eq!(unpacked.day(), 15);
        assert_eq!(unpacked.hour(), 14);
        assert_eq!(unpacked.minute(), 30);
        // seconds are stored in two second steps
        assert_eq!(unpacked.second(), 42);
    }

    #[test]
    fn test_timestamp_zero_is_none() {
        assert_eq!(unpack_timestamp(&[0; 4]), None);
    }

    #[test]
    fn test_type_codes() {
        assert_eq!(FileType::from_code(0x01), Some(FileType::Program));
        assert_eq!(FileType::from_code(0x15), Some(FileType::IntVar)); // flags ignored
        assert_eq!(FileType::from_code(0x06), None);
        assert!(FileType::DisVar.is_variable());
        assert!(!FileType::DisFix.is_variable());
    }

    #[test]
    fn test_record_length_extended() {
        let mut fdr = sample_fdr();
        assert_eq!(fdr.record_length(), 80);
        fdr.logical_record_length = 0;
        fdr.extended_record_length = 512;
        assert_eq!(fdr.record_length(), 512);
    }
}
