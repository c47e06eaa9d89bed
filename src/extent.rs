//! Extent Collector: turns the raw allocation-descriptor bytes living inside
//! an FE/EFE into a flat list of logical extents, transparently following
//! chain entries (`extLength >> 30 == 3`) into Allocation Extent Descriptors.
//! Callers never see a continuation entry; they only see the leaves.

use std::collections::BTreeMap;
use std::io::{Read, Seek};

use log::debug;

use crate::cache::Cache;
use crate::udf::{
    AllocationDescriptorType, AllocationExtentDescriptor, DescriptorTag, ExtendedAllocationDescriptor,
    ExtentType, LongAd, PartitionDescriptor, ShortAllocationDescriptor,
};
use crate::udf_parser::{validate_descriptor_tag, Result, UdfError, CACHE_BYTE_SIZE};

/// One leaf extent, normalized across short/long/extended encodings.
#[derive(Debug, Clone, Copy)]
pub struct CollectedExtent {
    pub partition_reference_number: u16,
    /// logical block number within that partition
    pub logical_block_number: u32,
    pub length_bytes: u32,
    pub extent_type: ExtentType,
}

/// Result of a collection pass: the leaf extents in encounter order, plus
/// every AED sector that was traversed to produce them (the caller marks
/// these used in the observed bitmap; the collector itself does not own
/// accounting state).
#[derive(Debug, Clone, Default)]
pub struct CollectedExtents {
    pub extents: Vec<CollectedExtent>,
    pub aed_sectors: Vec<u32>,
}

fn ad_size(flavor: AllocationDescriptorType) -> usize {
    match flavor {
        AllocationDescriptorType::Short => ShortAllocationDescriptor::size(),
        AllocationDescriptorType::Long => LongAd::size(),
        AllocationDescriptorType::Extended => ExtendedAllocationDescriptor::size(),
        AllocationDescriptorType::InIcb => 0,
    }
}

/// Decodes one allocation-descriptor-sized chunk into a normalized extent,
/// filling in the partition reference for Short ADs (which don't carry one
/// of their own -- they're always relative to the ICB's own partition).
fn decode_one(
    flavor: AllocationDescriptorType,
    chunk: &[u8],
    own_partition_reference_number: u16,
) -> CollectedExtent {
    match flavor {
        AllocationDescriptorType::Short => {
            let ad = ShortAllocationDescriptor::read(chunk);
            CollectedExtent {
                partition_reference_number: own_partition_reference_number,
                logical_block_number: ad.extent_location,
                length_bytes: ad.extent_length_bytes(),
                extent_type: ad.extent_type(),
            }
        }
        AllocationDescriptorType::Long => {
            let ad = LongAd::read(chunk);
            CollectedExtent {
                partition_reference_number: ad.extent_location.partition_reference_number,
                logical_block_number: ad.extent_location.logical_block_number,
                length_bytes: ad.extent_length_bytes(),
                extent_type: ad.extent_type(),
            }
        }
        AllocationDescriptorType::Extended => {
            let ad = ExtendedAllocationDescriptor::read(chunk);
            CollectedExtent {
                partition_reference_number: ad.extent_location.partition_reference_number,
                logical_block_number: ad.extent_location.logical_block_number,
                length_bytes: ad.extent_length_bytes(),
                extent_type: ad.extent_type(),
            }
        }
        AllocationDescriptorType::InIcb => unreachable!("InIcb has no extents to collect"),
    }
}

fn read_allocation_extent_descriptor<R: Read + Seek>(
    cache: &mut Cache<&mut R, CACHE_BYTE_SIZE>,
    sector: u32,
    sector_size: usize,
) -> Result<AllocationExtentDescriptor> {
    let mut header = vec![0u8; AllocationExtentDescriptor::HEADER_SIZE];
    cache.read_exact(sector as usize * sector_size, &mut header)?;
    let tag = DescriptorTag::read(&header[0..16]);
    if tag.tag_identifier != AllocationExtentDescriptor::TAG_IDENTIFIER {
        return Err(UdfError::InvalidDescriptorTag);
    }
    let length_of_allocation_descriptors =
        u32::from_le_bytes([header[20], header[21], header[22], header[23]]);
    let mut full = vec![0u8; AllocationExtentDescriptor::HEADER_SIZE + length_of_allocation_descriptors as usize];
    full[..AllocationExtentDescriptor::HEADER_SIZE].copy_from_slice(&header);
    cache.read_exact(
        sector as usize * sector_size + AllocationExtentDescriptor::HEADER_SIZE,
        &mut full[AllocationExtentDescriptor::HEADER_SIZE..],
    )?;
    if !validate_descriptor_tag(&tag, &full) {
        return Err(UdfError::InvalidDescriptorTag);
    }
    Ok(AllocationExtentDescriptor::read(&full))
}

/// Maximum number of AED hops to follow before declaring the chain
/// pathological; guards against a corrupt volume whose AEDs point in a
/// cycle back to themselves.
const MAX_AED_CHAIN: usize = 1024;

/// Walks `raw` (the allocation-descriptor bytes copied out of an FE/EFE,
/// already past the extended-attribute region) and returns every leaf
/// extent, following continuation entries into Allocation Extent
/// Descriptors as needed.
pub fn collect_extents<R: Read + Seek>(
    cache: &mut Cache<&mut R, CACHE_BYTE_SIZE>,
    partition_descriptors: &BTreeMap<u16, PartitionDescriptor>,
    sector_size: usize,
    own_partition_reference_number: u16,
    flavor: AllocationDescriptorType,
    raw: &[u8],
) -> Result<CollectedExtents> {
    let size = ad_size(flavor);
    if size == 0 {
        return Ok(CollectedExtents::default());
    }

    let mut buf = raw.to_vec();
    let mut pos = 0usize;
    let mut result = CollectedExtents::default();
    let mut hops = 0usize;

    while pos + size <= buf.len() {
        let entry = decode_one(flavor, &buf[pos..pos + size], own_partition_reference_number);
        if entry.length_bytes == 0 {
            // "an entry whose extLength & 0x3FFFFFFF == 0 terminates the list early"
            break;
        }
        match entry.extent_type {
            ExtentType::NextExtent => {
                hops += 1;
                if hops > MAX_AED_CHAIN {
                    return Err(UdfError::AllocationExtentChainTooLong);
                }
                let partition_descriptor = partition_descriptors
                    .get(&entry.partition_reference_number)
                    .ok_or(UdfError::InvalidPartitionNumber)?;
                let aed_sector =
                    partition_descriptor.partition_starting_location + entry.logical_block_number;
                debug!("collect_extents: following AED chain to sector {}", aed_sector);
                let aed = read_allocation_extent_descriptor(cache, aed_sector, sector_size)?;
                result.aed_sectors.push(aed_sector);
                buf.splice(pos..pos + size, aed.allocation_descriptors.iter().copied());
                // don't advance pos: re-examine the spliced-in first entry
            }
            _ => {
                result.extents.push(entry);
                pos += size;
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::udf::PartitionDescriptor;
    use std::io::Cursor;

    fn short_ad_bytes(length_and_type: u32, location: u32) -> [u8; 8] {
        let mut b = [0u8; 8];
        b[0..4].copy_from_slice(&length_and_type.to_le_bytes());
        b[4..8].copy_from_slice(&location.to_le_bytes());
        b
    }

    #[test]
    fn collects_simple_recorded_extents_without_chaining() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&short_ad_bytes(2048, 10));
        raw.extend_from_slice(&short_ad_bytes(4096, 20));

        let partition_descriptors = BTreeMap::new();
        let mut backing = Cursor::new(vec![0u8; 1]);
        let mut cache = Cache::<&mut Cursor<Vec<u8>>, CACHE_BYTE_SIZE>::new(&mut backing, 2048);

        let collected = collect_extents(
            &mut cache,
            &partition_descriptors,
            2048,
            0,
            AllocationDescriptorType::Short,
            &raw,
        )
        .unwrap();

        assert_eq!(collected.extents.len(), 2);
        assert_eq!(collected.extents[0].logical_block_number, 10);
        assert_eq!(collected.extents[1].length_bytes, 4096);
        assert!(collected.aed_sectors.is_empty());
    }

    #[test]
    fn stops_at_a_zero_length_entry() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&short_ad_bytes(2048, 10));
        raw.extend_from_slice(&short_ad_bytes(0, 0));
        raw.extend_from_slice(&short_ad_bytes(2048, 99));

        let partition_descriptors = BTreeMap::new();
        let mut backing = Cursor::new(vec![0u8; 1]);
        let mut cache = Cache::<&mut Cursor<Vec<u8>>, CACHE_BYTE_SIZE>::new(&mut backing, 2048);

        let collected = collect_extents(
            &mut cache,
            &partition_descriptors,
            2048,
            0,
            AllocationDescriptorType::Short,
            &raw,
        )
        .unwrap();

        assert_eq!(collected.extents.len(), 1);
    }

    #[test]
    fn follows_a_continuation_entry_into_an_aed() {
        let sector_size = 2048usize;
        let mut disk = vec![0u8; sector_size * 4];

        // AED at sector 2, holding one short AD pointing at block 50.
        let mut aed = AllocationExtentDescriptor::default();
        aed.tag.tag_identifier = AllocationExtentDescriptor::TAG_IDENTIFIER;
        aed.tag.descriptor_crc_length = 16;
        aed.allocation_descriptors = short_ad_bytes(2048, 50).to_vec();
        aed.length_of_allocation_descriptors = 8;
        let mut aed_buf = vec![0u8; AllocationExtentDescriptor::HEADER_SIZE + 8];
        aed.write(&mut aed_buf);
        aed.tag.tag_checksum = aed_buf[0..4]
            .iter()
            .chain(&aed_buf[5..16])
            .fold(0u8, |a, &b| a.wrapping_add(b));
        aed.tag.descriptor_crc = crate::crc::cksum(&aed_buf[16..16 + 16]);
        aed.write(&mut aed_buf);
        disk[sector_size * 2..sector_size * 2 + aed_buf.len()].copy_from_slice(&aed_buf);

        let mut partition_descriptors = BTreeMap::new();
        let mut pd = PartitionDescriptor::default();
        pd.partition_number = 0;
        pd.partition_starting_location = 0;
        partition_descriptors.insert(0u16, pd);

        let mut raw = Vec::new();
        raw.extend_from_slice(&short_ad_bytes(2048 | (3 << 30), 2)); // continuation -> sector 2

        let mut backing = Cursor::new(disk);
        let mut cache = Cache::<&mut Cursor<Vec<u8>>, CACHE_BYTE_SIZE>::new(&mut backing, sector_size);

        let collected = collect_extents(
            &mut cache,
            &partition_descriptors,
            sector_size,
            0,
            AllocationDescriptorType::Short,
            &raw,
        )
        .unwrap();

        assert_eq!(collected.extents.len(), 1);
        assert_eq!(collected.extents[0].logical_block_number, 50);
        assert_eq!(collected.aed_sectors, vec![2]);
    }
}
