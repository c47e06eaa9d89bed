//! Main/Reserve Volume Descriptor Sequence loading and reconciliation.
//!
//! ECMA-167 8.4 describes the two sequences (Main and Reserve) as redundant
//! copies of the same descriptors; a reader should fall back to the Reserve
//! sequence if the Main one fails to validate, and a repair tool should heal
//! whichever side is damaged from whichever side validates cleanly.

use std::collections::BTreeMap;
use std::io::{Read, Seek};

use log::{debug, warn};

use crate::errors::{E_DUPLICATE, E_POSITION};
use crate::udf::{
    DescriptorTag, ImplementationUseVolumeDescriptor, LogicalVolumeDescriptor, PartitionDescriptor,
    PartitionMap, PrimaryVolumeDescriptor, TerminatingDescriptor, UnallocatedSpaceDescriptor,
};
use crate::udf_parser::{position_ok, UdfError, UdfParser, Result};

/// Everything recognized while scanning one Volume Descriptor Sequence.
/// `clean` is false if any descriptor in the sequence failed tag validation,
/// disagreed with its own recorded tag location, repeated a logical kind
/// that may occur at most once, or the sequence never reached a Terminating
/// Descriptor.
#[derive(Debug, Default, Clone)]
pub struct VolumeDescriptorSequence {
    pub primary_volume_descriptor: Option<PrimaryVolumeDescriptor>,
    pub logical_volume_descriptor: Option<(LogicalVolumeDescriptor, Vec<PartitionMap>)>,
    pub partition_descriptors: BTreeMap<u16, PartitionDescriptor>,
    pub unallocated_space_descriptor: Option<UnallocatedSpaceDescriptor>,
    pub implementation_use_descriptors: Vec<ImplementationUseVolumeDescriptor>,
    pub terminated: bool,
    pub clean: bool,
    /// Bitwise-OR of every `errors::E_*` condition seen while scanning this
    /// sequence; surfaced by the caller even when this sequence still wins
    /// `reconcile` over its sibling.
    pub error_bits: u16,
}

impl<R: Read + Seek> UdfParser<R> {
    /// Scans a Volume Descriptor Sequence sector by sector starting at
    /// `start_sector` for `length_bytes` worth of sectors, dispatching on
    /// each sector's tag identifier. A Logical Volume Descriptor with a
    /// partition map table that overflows one sector advances by however
    /// many sectors its table actually occupies, not by one -- the bug in
    /// naive VDS readers that assume every entry is exactly one sector.
    pub fn read_volume_descriptor_sequence(
        &mut self,
        start_sector: u32,
        length_bytes: u32,
    ) -> Result<VolumeDescriptorSequence> {
        let mut seq = VolumeDescriptorSequence::default();
        let sector_size = self.sector_size;
        let total_sectors = length_bytes.div_ceil(sector_size);
        let mut current_sector = start_sector;
        let mut sectors_consumed = 0u32;
        let mut buf = vec![0u8; sector_size as usize];

        while sectors_consumed < total_sectors {
            self.seek_to_sector(current_sector)?;
            if self.reader.read_exact(&mut buf).is_err() {
                seq.clean = false;
                break;
            }
            let tag = DescriptorTag::read(&buf[..DescriptorTag::size()]);
            if tag.tag_identifier == 0 {
                debug!("read_volume_descriptor_sequence: unrecorded sector, stopping");
                break;
            }

            let tag_checksum_ok = crate::udf_parser::validate_descriptor_tag(&tag, &buf);
            if !tag_checksum_ok {
                warn!(
                    "read_volume_descriptor_sequence: bad tag at sector {} (identifier {})",
                    current_sector, tag.tag_identifier
                );
                seq.clean = false;
            }

            if !position_ok(&tag, current_sector) {
                warn!(
                    "read_volume_descriptor_sequence: tag at sector {} claims location {}",
                    current_sector, tag.tag_location
                );
                seq.clean = false;
                seq.error_bits |= E_POSITION;
            }

            let mut advance_sectors = 1u32;
            let mut duplicate = false;
            match tag.tag_identifier {
                PrimaryVolumeDescriptor::TAG_IDENTIFIER => {
                    if tag_checksum_ok {
                        if seq.primary_volume_descriptor.is_some() {
                            duplicate = true;
                        } else {
                            seq.primary_volume_descriptor = Some(PrimaryVolumeDescriptor::read(&buf));
                        }
                    }
                }
                LogicalVolumeDescriptor::TAG_IDENTIFIER => {
                    if seq.logical_volume_descriptor.is_some() {
                        duplicate = true;
                    } else {
                        match self.read_logical_volume_descriptor(current_sector) {
                            Ok((lvd, maps)) => {
                                let total_len =
                                    LogicalVolumeDescriptor::size() as u32 + lvd.map_table_length;
                                advance_sectors = total_len.div_ceil(sector_size).max(1);
                                seq.logical_volume_descriptor = Some((lvd, maps));
                            }
                            Err(e) => {
                                warn!("read_volume_descriptor_sequence: bad LVD: {e}");
                                seq.clean = false;
                            }
                        }
                    }
                }
                PartitionDescriptor::TAG_IDENTIFIER => {
                    if tag_checksum_ok {
                        let pd = PartitionDescriptor::read(&buf[..PartitionDescriptor::size()]);
                        if seq.partition_descriptors.contains_key(&pd.partition_number) {
                            duplicate = true;
                        } else {
                            seq.partition_descriptors.insert(pd.partition_number, pd);
                        }
                    }
                }
                UnallocatedSpaceDescriptor::TAG_IDENTIFIER => {
                    if tag_checksum_ok {
                        if seq.unallocated_space_descriptor.is_some() {
                            duplicate = true;
                        } else {
                            seq.unallocated_space_descriptor =
                                Some(UnallocatedSpaceDescriptor::read(&buf));
                        }
                    }
                }
                ImplementationUseVolumeDescriptor::TAG_IDENTIFIER => {
                    if tag_checksum_ok {
                        if !seq.implementation_use_descriptors.is_empty() {
                            duplicate = true;
                        } else {
                            seq.implementation_use_descriptors
                                .push(ImplementationUseVolumeDescriptor::read(&buf));
                        }
                    }
                }
                TerminatingDescriptor::TAG_IDENTIFIER => {
                    seq.terminated = true;
                    sectors_consumed += advance_sectors;
                    current_sector += advance_sectors;
                    break;
                }
                other => {
                    debug!(
                        "read_volume_descriptor_sequence: unrecognized tag identifier {} at sector {}",
                        other, current_sector
                    );
                }
            }

            if duplicate {
                warn!(
                    "read_volume_descriptor_sequence: duplicate descriptor (tag identifier {}) at sector {}; sequence abandoned",
                    tag.tag_identifier, current_sector
                );
                seq.clean = false;
                seq.error_bits |= E_DUPLICATE;
                break;
            }

            sectors_consumed += advance_sectors;
            current_sector += advance_sectors;
        }

        if seq.clean && !seq.terminated {
            seq.clean = false;
        }
        Ok(seq)
    }
}

/// Picks the better of the Main and Reserve Volume Descriptor Sequences.
/// Ties (both clean, or both dirty) favor Main, since there's nothing else
/// to go on.
pub fn reconcile(
    main: VolumeDescriptorSequence,
    reserve: VolumeDescriptorSequence,
) -> (VolumeDescriptorSequence, CopyDirection) {
    match (main.clean, reserve.clean) {
        (true, true) | (true, false) => (main, CopyDirection::MainToReserve),
        (false, true) => (reserve, CopyDirection::ReserveToMain),
        (false, false) => (merge_best_effort(main, reserve), CopyDirection::None),
    }
}

/// Which side needs to be overwritten from the other to repair the volume;
/// "the clean side always copies onto the damaged side", resolving the
/// ambiguity in which direction a naive byte-for-byte copy should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    MainToReserve,
    ReserveToMain,
    None,
}

fn merge_best_effort(
    mut main: VolumeDescriptorSequence,
    reserve: VolumeDescriptorSequence,
) -> VolumeDescriptorSequence {
    if main.primary_volume_descriptor.is_none() {
        main.primary_volume_descriptor = reserve.primary_volume_descriptor;
    }
    if main.logical_volume_descriptor.is_none() {
        main.logical_volume_descriptor = reserve.logical_volume_descriptor;
    }
    for (k, v) in reserve.partition_descriptors {
        main.partition_descriptors.entry(k).or_insert(v);
    }
    if main.unallocated_space_descriptor.is_none() {
        main.unallocated_space_descriptor = reserve.unallocated_space_descriptor;
    }
    if main.implementation_use_descriptors.is_empty() {
        main.implementation_use_descriptors = reserve.implementation_use_descriptors;
    }
    main.terminated = main.terminated || reserve.terminated;
    main
}

pub fn missing_descriptor_error(seq: &VolumeDescriptorSequence) -> Result<()> {
    if seq.primary_volume_descriptor.is_none() || seq.logical_volume_descriptor.is_none() {
        return Err(UdfError::VdsNotFound);
    }
    Ok(())
}
