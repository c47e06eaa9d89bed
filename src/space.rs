//! Partition Descriptor space-accounting: reads the Partition Header
//! Descriptor out of a Partition Descriptor's contents-use field and, when
//! the partition uses a Space Bitmap for unallocated space (the only form
//! this crate can rebuild), loads and validates that bitmap.

use std::io::{Read, Seek};

use log::{debug, warn};

use crate::udf::{DescriptorTag, PartitionDescriptor, PartitionHeaderDescriptor, SpaceBitmapDescriptor};
use crate::udf_parser::{validate_descriptor_tag, Result, UdfError, UdfParser};

/// Which free-space accounting forms a partition's header declares in use.
/// Only `SpaceBitmapDescriptor` can be loaded/rebuilt; the others are
/// recognized and reported but not repaired.
#[derive(Debug, Default)]
pub struct PartitionSpaceInfo {
    pub header: PartitionHeaderDescriptor,
    pub space_bitmap: Option<SpaceBitmapDescriptor>,
    pub has_unallocated_space_table: bool,
    pub has_freed_space_table: bool,
    pub has_freed_space_bitmap: bool,
    /// True when the loaded bitmap's `numOfBits` disagrees with the
    /// partition's own `partition_length`; feeds `errors::E_FREESPACE`.
    pub bitmap_length_mismatch: bool,
}

impl<R: Read + Seek> UdfParser<R> {
    /// Parses the Partition Header Descriptor embedded in a Partition
    /// Descriptor and, if present, loads its Unallocated Space Bitmap.
    pub fn read_partition_space_info(
        &mut self,
        partition_descriptor: &PartitionDescriptor,
    ) -> Result<PartitionSpaceInfo> {
        let header = PartitionHeaderDescriptor::read(&partition_descriptor.partition_contents_use[0..128]);
        let mut info = PartitionSpaceInfo {
            has_unallocated_space_table: header.unallocated_space_table.extent_length_bytes() > 0,
            has_freed_space_table: header.freed_space_table.extent_length_bytes() > 0,
            has_freed_space_bitmap: header.freed_space_bitmap.extent_length_bytes() > 0,
            header,
            space_bitmap: None,
            bitmap_length_mismatch: false,
        };

        if info.has_unallocated_space_table {
            warn!("partition declares an Unallocated Space Table; only the Unallocated Space Bitmap form is supported");
        }
        if info.has_freed_space_table || info.has_freed_space_bitmap {
            warn!("partition declares freed-space accounting; only the Unallocated Space Bitmap form is supported");
        }

        let bitmap_ad = &info.header.unallocated_space_bitmap;
        if bitmap_ad.extent_length_bytes() > 3 {
            let sector = partition_descriptor.partition_starting_location + bitmap_ad.extent_location;
            self.seek_to_sector(sector)?;
            let mut header_buf = vec![0u8; SpaceBitmapDescriptor::HEADER_SIZE];
            self.reader.read_exact(&mut header_buf)?;
            let tag = DescriptorTag::read(&header_buf[0..16]);
            if !validate_descriptor_tag(&tag, &header_buf) || tag.tag_identifier != SpaceBitmapDescriptor::TAG_IDENTIFIER {
                return Err(UdfError::InvalidDescriptorTag);
            }
            let number_of_bytes =
                u32::from_le_bytes([header_buf[20], header_buf[21], header_buf[22], header_buf[23]]);
            let mut full_buf = vec![0u8; SpaceBitmapDescriptor::HEADER_SIZE + number_of_bytes as usize];
            full_buf[..SpaceBitmapDescriptor::HEADER_SIZE].copy_from_slice(&header_buf);
            self.reader
                .read_exact(&mut full_buf[SpaceBitmapDescriptor::HEADER_SIZE..])?;
            let sbd = SpaceBitmapDescriptor::read(&full_buf);
            if sbd.number_of_bits != partition_descriptor.partition_length {
                warn!(
                    "space bitmap numOfBits ({}) does not match partition length ({})",
                    sbd.number_of_bits, partition_descriptor.partition_length
                );
                info.bitmap_length_mismatch = true;
            }
            debug!(
                "read_partition_space_info: bitmap has {} bits over {} bytes",
                sbd.number_of_bits, sbd.number_of_bytes
            );
            info.space_bitmap = Some(sbd);
        }

        Ok(info)
    }
}

/// Counts how many blocks the bitmap marks free, masking off the padding
/// bits in the last byte the way `numOfBits` not being a multiple of 8 requires.
pub fn count_free_blocks(sbd: &SpaceBitmapDescriptor) -> u64 {
    let full_bytes = (sbd.number_of_bits / 8) as usize;
    let remaining_bits = sbd.number_of_bits % 8;
    let mut free = 0u64;
    for &byte in sbd.bitmap.iter().take(full_bytes) {
        free += byte.count_ones() as u64;
    }
    if remaining_bits > 0 {
        if let Some(&last) = sbd.bitmap.get(full_bytes) {
            let mask = (1u8 << remaining_bits) - 1;
            free += (last & mask).count_ones() as u64;
        }
    }
    free
}
