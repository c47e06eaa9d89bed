//! Volume Recognition Sequence probing (ECMA-167 2/8.3, ECMA-119 Volume
//! Structure Descriptors). Scanned at a fixed 2048-byte sector size
//! regardless of the medium's actual logical sector size -- the VRS predates
//! UDF's own sector-size flexibility and was defined against CD-ROM's fixed
//! 2048-byte sector. Used only to corroborate an already-detected sector
//! size and to seed a floor for the minimum UDF revision from the NSR
//! identifier; never the sole basis for a conclusion.

use std::io::{Read, Seek, SeekFrom};

use log::{debug, warn};

const VRS_START_OFFSET: u64 = 16 * 2048;
const VRS_SECTOR_SIZE: usize = 2048;
/// Hard stop so a corrupt or foreign medium can't spin this forever; real
/// VRSes are a handful of descriptors long.
const MAX_VRS_DESCRIPTORS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NsrVersion {
    Nsr02,
    Nsr03,
}

/// What was found scanning the Volume Recognition Sequence starting at
/// sector 16 (2048-byte sectors). A well-formed UDF medium has `found_bea01`,
/// `nsr` set, and `found_tea01` all true; anything less is logged by the
/// caller but never treated as fatal on its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct VrsProbe {
    pub found_bea01: bool,
    pub nsr: Option<NsrVersion>,
    pub found_tea01: bool,
}

impl VrsProbe {
    /// UDF 2.1.1: NSR03 means this medium conforms to UDF 2.00 or later;
    /// NSR02 predates that and only promises 1.02. Zero means the sequence
    /// carried neither and there's no floor to assert.
    pub fn minimum_udf_revision_floor(&self) -> u16 {
        match self.nsr {
            Some(NsrVersion::Nsr03) => 0x0200,
            Some(NsrVersion::Nsr02) => 0x0102,
            None => 0,
        }
    }
}

/// Walks the Volume Recognition Sequence starting at byte offset 32768,
/// stopping at the first Terminating Extended Area Descriptor (TEA01) or the
/// first descriptor that isn't one this crate recognizes. A short read (the
/// medium ends before the VRS does) ends the scan without an error -- the
/// caller already knows the geometry from the anchor volume descriptor
/// pointer and only wants corroboration here.
pub fn probe<R: Read + Seek>(reader: &mut R) -> std::io::Result<VrsProbe> {
    let mut probe = VrsProbe::default();
    let mut buf = [0u8; VRS_SECTOR_SIZE];
    reader.seek(SeekFrom::Start(VRS_START_OFFSET))?;
    for _ in 0..MAX_VRS_DESCRIPTORS {
        if reader.read_exact(&mut buf).is_err() {
            debug!("vrs::probe: volume structure descriptor area ended early");
            break;
        }
        let identifier = &buf[1..6];
        match identifier {
            b"BEA01" => probe.found_bea01 = true,
            b"NSR02" => probe.nsr = Some(NsrVersion::Nsr02),
            b"NSR03" => probe.nsr = Some(NsrVersion::Nsr03),
            b"TEA01" => {
                probe.found_tea01 = true;
                break;
            }
            b"CD001" | b"CDW02" => {
                // ISO 9660 / ECMA-168 boot descriptors sharing the same area; skip.
            }
            other => {
                warn!(
                    "vrs::probe: unrecognized volume structure descriptor identifier {:?}; stopping",
                    String::from_utf8_lossy(other)
                );
                break;
            }
        }
    }
    Ok(probe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn vsd(identifier: &[u8; 5]) -> [u8; VRS_SECTOR_SIZE] {
        let mut sector = [0u8; VRS_SECTOR_SIZE];
        sector[1..6].copy_from_slice(identifier);
        sector
    }

    fn build_vrs(descriptors: &[[u8; VRS_SECTOR_SIZE]]) -> Cursor<Vec<u8>> {
        let mut bytes = vec![0u8; VRS_START_OFFSET as usize];
        for d in descriptors {
            bytes.extend_from_slice(d);
        }
        Cursor::new(bytes)
    }

    #[test]
    fn recognizes_a_well_formed_udf_250_sequence() {
        let mut media = build_vrs(&[vsd(b"BEA01"), vsd(b"NSR03"), vsd(b"TEA01")]);
        let probe = probe(&mut media).unwrap();
        assert!(probe.found_bea01);
        assert_eq!(probe.nsr, Some(NsrVersion::Nsr03));
        assert!(probe.found_tea01);
        assert_eq!(probe.minimum_udf_revision_floor(), 0x0200);
    }

    #[test]
    fn nsr02_floors_at_udf_102() {
        let mut media = build_vrs(&[vsd(b"BEA01"), vsd(b"NSR02"), vsd(b"TEA01")]);
        let probe = probe(&mut media).unwrap();
        assert_eq!(probe.minimum_udf_revision_floor(), 0x0102);
    }

    #[test]
    fn stops_at_an_unrecognized_descriptor() {
        let mut media = build_vrs(&[vsd(b"BEA01"), vsd(b"XXXXX")]);
        let probe = probe(&mut media).unwrap();
        assert!(probe.found_bea01);
        assert!(probe.nsr.is_none());
        assert!(!probe.found_tea01);
    }

    #[test]
    fn short_medium_ends_the_scan_without_error() {
        let mut media = Cursor::new(vec![0u8; VRS_START_OFFSET as usize + 100]);
        let probe = probe(&mut media).unwrap();
        assert!(!probe.found_bea01);
        assert_eq!(probe.minimum_udf_revision_floor(), 0);
    }
}
