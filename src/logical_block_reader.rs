use std::io::{Read, Seek};

use log::debug;

use crate::{cache::Cache, udf::PartitionDescriptor, udf_parser::Result};

pub fn read_exact_from_partition<R: Read + Seek, const BYTE_SIZE: usize>(
    cache: &mut Cache<R, BYTE_SIZE>,
    partition_descriptor: &PartitionDescriptor,
    sector_size: usize,
    pos_in_partition: usize,
    buf: &mut [u8],
) -> Result<()> {
    debug!(
        "read_exact_from_partition: partition_starting_location={}, pos_in_partition={}, len={}",
        partition_descriptor.partition_starting_location, pos_in_partition, buf.len()
    );
    let pos = partition_descriptor.partition_starting_location as usize * sector_size + pos_in_partition;
    cache.read_exact(pos, buf)
}
