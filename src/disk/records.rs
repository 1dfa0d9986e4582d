use super::error::DskError;
use super::SECTOR_SIZE;

/// End-of-sector and end-of-file marker in variable record streams.
const VAR_EOF: u8 = 0xFF;

/// A record stream packed into sector-aligned bytes, together with the
/// descriptor fields the packing determined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedRecords {
    pub bytes: Vec<u8>,
    pub total_sectors: usize,
    pub records_per_sector: u8,
    pub eof_offset: u8,
    pub record_count: u16,
}

/// PROGRAM files are raw bytes with no record structure.
pub fn pack_program(data: &[u8]) -> PackedRecords {
    let total_sectors = data.len().div_ceil(SECTOR_SIZE);
    let mut bytes = data.to_vec();
    bytes.resize(total_sectors * SECTOR_SIZE, 0);
    PackedRecords {
        bytes,
        total_sectors,
        records_per_sector: 0,
        eof_offset: (data.len() % SECTOR_SIZE) as u8,
        record_count: 0,
    }
}

/// Fixed records never straddle a sector boundary; short records are padded
/// to the record length and each sector tail is padded with zeros.
pub fn pack_fixed(records: &[Vec<u8>], record_length: u8) -> Result<PackedRecords, DskError> {
    if record_length == 0 {
        return Err(DskError::InvalidRecordLength(0));
    }
    let record_length = record_length as usize;
    let records_per_sector = SECTOR_SIZE / record_length;

    let mut bytes = Vec::new();
    for (i, record) in records.iter().enumerate() {
        if record.len() > record_length {
            return Err(DskError::RecordTooLong {
                length: record.len(),
                max: record_length,
            });
        }
        if i % records_per_sector == 0 && i > 0 {
            bytes.resize(bytes.len().div_ceil(SECTOR_SIZE) * SECTOR_SIZE, 0);
        }
        bytes.extend_from_slice(record);
        bytes.resize(bytes.len() + record_length - record.len(), 0);
    }
    let total_sectors = bytes.len().div_ceil(SECTOR_SIZE);
    bytes.resize(total_sectors * SECTOR_SIZE, 0);

    Ok(PackedRecords {
        bytes,
        total_sectors,
        records_per_sector: records_per_sector as u8,
        eof_offset: 0,
        record_count: records.len() as u16,
    })
}

/// Variable records carry a one-byte length prefix. A record that does not
/// fit the current sector is pushed to the next one behind a 0xFF marker,
/// and a final 0xFF marks end of file unless the stream ends sector-aligned.
///
/// The declared record length only feeds the records-per-sector field; a
/// record may exceed it. What bounds a record is its one-byte prefix and
/// having to fit a sector, with 0xFF reserved for the marker.
pub fn pack_variable(records: &[Vec<u8>], record_length: u8) -> Result<PackedRecords, DskError> {
    if record_length == 0 || record_length as usize > SECTOR_SIZE - 2 {
        return Err(DskError::InvalidRecordLength(record_length as u16));
    }

    let mut bytes = Vec::new();
    let mut position = 0usize;
    for record in records {
        if record.len() > SECTOR_SIZE - 2 {
            return Err(DskError::RecordTooLong {
                length: record.len(),
                max: SECTOR_SIZE - 2,
            });
        }
        let remaining = SECTOR_SIZE - position % SECTOR_SIZE;
        if remaining < record.len() + 1 {
            bytes.push(VAR_EOF);
            let next_sector = (position / SECTOR_SIZE + 1) * SECTOR_SIZE;
            bytes.resize(next_sector, 0);
            position = next_sector;
        }
        bytes.push(record.len() as u8);
        bytes.extend_from_slice(record);
        position += record.len() + 1;
    }

    let eof_offset = (position % SECTOR_SIZE) as u8;
    if !records.is_empty() && eof_offset > 0 {
        bytes.push(VAR_EOF);
    }
    let total_sectors = bytes.len().div_ceil(SECTOR_SIZE);
    bytes.resize(total_sectors * SECTOR_SIZE, 0);

    Ok(PackedRecords {
        bytes,
        total_sectors,
        records_per_sector: (255 / (record_length as usize + 1)) as u8,
        eof_offset,
        record_count: records.len() as u16,
    })
}

/// Split a fixed record stream back into records. Accepts both the padded
/// sector convention and a stream packed to the end without sector padding.
pub fn unpack_fixed(data: &[u8], record_length: u8, record_count: usize) -> Vec<Vec<u8>> {
    if record_length == 0 {
        return Vec::new();
    }
    let record_length = record_length as usize;
    if record_count * record_length == data.len() {
        return data.chunks(record_length).map(|c| c.to_vec()).collect();
    }

    let records_per_sector = SECTOR_SIZE / record_length;
    let mut records = Vec::with_capacity(record_count);
    'sectors: for sector in data.chunks(SECTOR_SIZE) {
        for i in 0..records_per_sector {
            if records.len() == record_count {
                break 'sectors;
            }
            let start = i * record_length;
            let end = (start + record_length).min(sector.len());
            records.push(sector[start..end].to_vec());
        }
    }
    records
}

/// Split a variable record stream back into records, honoring the 0xFF
/// end-of-sector and end-of-file markers.
pub fn unpack_variable(data: &[u8]) -> Vec<Vec<u8>> {
    let mut records = Vec::new();
    let mut position = 0usize;
    while position < data.len() {
        let length = data[position];
        if length == VAR_EOF {
            let next_sector = (position / SECTOR_SIZE + 1) * SECTOR_SIZE;
            if next_sector >= data.len() {
                break;
            }
            position = next_sector;
            continue;
        }
        let start = position + 1;
        let end = (start + length as usize).min(data.len());
        records.push(data[start..end].to_vec());
        position = end;
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_program() {
        let packed = pack_program(&[0x55; 1000]);
        assert_eq!(packed.total_sectors, 4);
        assert_eq!(packed.eof_offset, 232);
        assert_eq!(packed.records_per_sector, 0);
        assert_eq!(packed.bytes.len(), 4 * SECTOR_SIZE);
        assert_eq!(&packed.bytes[0..1000], &[0x55; 1000][..]);
        assert!(packed.bytes[1000..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pack_program_aligned() {
        let packed = pack_program(&[1u8; 512]);
        assert_eq!(packed.total_sectors, 2);
        assert_eq!(packed.eof_offset, 0);
    }

    #[test]
    fn test_pack_program_empty() {
        let packed = pack_program(&[]);
        assert_eq!(packed.total_sectors, 0);
        assert_eq!(packed.eof_offset, 0);
        assert!(packed.bytes.is_empty());
    }

    #[test]
    fn test_pack_fixed() {
        // ten 80 byte records, three per sector
        let records: Vec<Vec<u8>> = (0..10).map(|i| vec![i as u8; 80]).collect();
        let packed = pack_fixed(&records, 80).unwrap();
        assert_eq!(packed.records_per_sector, 3);
        assert_eq!(packed.total_sectors, 4);
        assert_eq!(packed.record_count, 10);
        assert_eq!(packed.eof_offset, 0);
        // record 3 starts on the second sector, not at byte 240
        assert_eq!(packed.bytes[240], 0);
        assert_eq!(packed.bytes[SECTOR_SIZE], 3);
    }

    #[test]
    fn test_pack_fixed_pads_short_records() {
        let packed = pack_fixed(&[vec![7u8; 5]], 80).unwrap();
        assert_eq!(&packed.bytes[0..5], &[7; 5][..]);
        assert!(packed.bytes[5..80].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pack_fixed_rejects_long_record() {
        let result = pack_fixed(&[vec![0u8; 81]], 80);
        assert!(matches!(
            result,
            Err(DskError::RecordTooLong { length: 81, max: 80 })
        ));
    }

    #[test]
    fn test_pack_variable_sector_boundary() {
        // a record is allowed to exceed the declared record length
        let records = vec![vec![1u8; 80], vec![2u8; 80], vec![3u8; 150]];
        let packed = pack_variable(&records, 80).unwrap();
        // records one and two fill bytes 0..162 of sector 0
        assert_eq!(packed.bytes[0], 80);
        assert_eq!(packed.bytes[81], 80);
        // record three does not fit, so sector 0 ends with the marker
        assert_eq!(packed.bytes[162], VAR_EOF);
        // and record three starts at the top of sector 1
        assert_eq!(packed.bytes[SECTOR_SIZE], 150);
        assert_eq!(packed.bytes[SECTOR_SIZE + 1], 3);
        assert_eq!(packed.total_sectors, 2);
        assert_eq!(packed.eof_offset, 151);
        assert_eq!(packed.bytes[SECTOR_SIZE + 151], VAR_EOF);
        assert_eq!(packed.records_per_sector, 3);
    }

    #[test]
    fn test_variable_roundtrip() {
        let records = vec![vec![1u8; 10], vec![], vec![2u8; 200], vec![3u8; 54]];
        let packed = pack_variable(&records, 254).unwrap();
        let trimmed = if packed.eof_offset > 0 {
            &packed.bytes[..(packed.total_sectors - 1) * SECTOR_SIZE + packed.eof_offset as usize]
        } else {
            &packed.bytes[..]
        };
        assert_eq!(unpack_variable(trimmed), records);
    }

    #[test]
    fn test_fixed_roundtrip() {
        let records: Vec<Vec<u8>> = (0..7).map(|i| vec![i as u8 + 1; 100]).collect();
        let packed = pack_fixed(&records, 100).unwrap();
        assert_eq!(unpack_fixed(&packed.bytes, 100, 7), records);
    }

    #[test]
    fn test_unpack_fixed_packed_to_end() {
        // 100 byte records laid out back to back without sector padding
        let mut data = Vec::new();
        for i in 0..3u8 {
            data.extend_from_slice(&vec![i + 1; 100]);
        }
        let records = unpack_fixed(&data, 100, 3);
        assert_eq!(records.len(), 3);
        assert_eq!(records[2], vec![3u8; 100]);
    }

    #[test]
    fn test_pack_variable_rejects_bad_lengths() {
        assert!(matches!(
            pack_variable(&[], 0),
            Err(DskError::InvalidRecordLength(0))
        ));
        // a record that cannot sit behind its prefix in one sector
        assert!(matches!(
            pack_variable(&[vec![0; 255]], 80),
            Err(DskError::RecordTooLong {
                length: 255,
                max: 254
            })
        ));
    }

    #[test]
    fn test_pack_fixed_empty() {
        let packed = pack_fixed(&[], 80).unwrap();
        assert_eq!(packed.total_sectors, 0);
        assert_eq!(packed.record_count, 0);
        assert_eq!(packed.records_per_sector, 3);
    }
}
