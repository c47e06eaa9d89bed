//! Directory Walker, FID Inspector, and File Entry Walker.
//!
//! Descends from the File Set Descriptor's root (and, if present, stream
//! directory) ICB through every File Identifier Descriptor and File/Extended
//! File Entry, accounting every visited block as it goes. Directory descent
//! uses an explicit work stack rather than native call recursion, so a very
//! deep or cyclic tree cannot blow the Rust call stack; a visited-ICB set
//! breaks cycles from a directory that (correctly or not) points back at an
//! ancestor.

use std::collections::{BTreeMap, HashSet};
use std::io::{Read, Seek, Write};

use log::{debug, info, warn};

use crate::accounting::{AccountingState, FileInfo};
use crate::cache::Cache;
use crate::errors::{FileOutcome, E_UUID};
use crate::extent::collect_extents;
use crate::options::RunOptions;
use crate::udf::{
    AllocationDescriptorType, ExtentType, FileIdentifierDescriptor, FileType,
    LogicalVolumeDescriptor, LongAd, PartitionDescriptor, ShortAllocationDescriptor, Timestamp,
};
use crate::udf_parser::{
    parse_file_identifiers, read_file_entries, restamp_descriptor_tag, validate_descriptor_tag,
    AnyFileEntry, Result, UdfError, CACHE_BYTE_SIZE,
};

/// Shared, read-only context for one walk.
pub struct WalkContext<'a> {
    pub logical_volume_descriptor: &'a LogicalVolumeDescriptor,
    pub partition_descriptors: &'a BTreeMap<u16, PartitionDescriptor>,
    pub sector_size: usize,
    /// Captured from the anchor that won the probe in the Anchor Locator;
    /// every FID/FE tag serial number is expected to match this.
    pub tag_serial_number: u16,
    pub run_options: &'a RunOptions,
}

/// Accumulated, cross-cutting results of a walk: status bits destined for the
/// repair driver's LVID comparison, whether anything was rewritten, and the
/// latest modification timestamp observed (compared against the LVID's
/// recording timestamp by the caller, since the LVID itself is outside the
/// walker's concern).
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub status_bits: u16,
    pub corrected: bool,
    pub latest_modification_time: Option<Timestamp>,
}

impl WalkOutcome {
    fn observe_modification_time(&mut self, ts: &Timestamp) {
        let later = match &self.latest_modification_time {
            Some(current) => timestamp_key(ts) > timestamp_key(current),
            None => true,
        };
        if later {
            self.latest_modification_time = Some(ts.clone());
        }
    }
}

fn timestamp_key(ts: &Timestamp) -> (u16, u8, u8, u8, u8, u8) {
    (ts.year, ts.month, ts.day, ts.hour, ts.minute, ts.second)
}

/// (partition reference number, logical block number): the identity of one
/// ICB, used both as the visited-set key and the directory-descent-stack key.
type IcbKey = (u16, u32);

fn icb_key(icb: &LongAd) -> IcbKey {
    (
        icb.extent_location.partition_reference_number,
        icb.extent_location.logical_block_number,
    )
}

fn resolve_partition<'a>(
    partition_descriptors: &'a BTreeMap<u16, PartitionDescriptor>,
    partition_reference_number: u16,
) -> Result<&'a PartitionDescriptor> {
    partition_descriptors
        .get(&partition_reference_number)
        .ok_or(UdfError::InvalidPartitionNumber)
}

fn icb_byte_position(
    ctx: &WalkContext,
    partition_descriptor: &PartitionDescriptor,
    icb: &LongAd,
) -> usize {
    partition_descriptor.partition_starting_location as usize * ctx.sector_size
        + icb.extent_location.logical_block_number as usize
            * ctx.logical_volume_descriptor.logical_block_size as usize
}

/// Walks the whole volume starting from the root directory ICB and,
/// if present, the stream directory ICB (root order is
/// stream directory first, then root directory).
pub fn walk_volume<R: Read + Write + Seek>(
    cache: &mut Cache<&mut R, CACHE_BYTE_SIZE>,
    ctx: &WalkContext,
    accounting: &mut AccountingState,
    root_icb: &LongAd,
    stream_directory_icb: Option<&LongAd>,
) -> Result<WalkOutcome> {
    let mut outcome = WalkOutcome::default();
    let mut visited: HashSet<IcbKey> = HashSet::new();
    let mut pending_directories: Vec<LongAd> = Vec::new();

    if let Some(stream_icb) = stream_directory_icb {
        if stream_icb.extent_length_bytes() > 0 {
            walk_root_entry(cache, ctx, accounting, &mut outcome, &mut visited, stream_icb, &mut pending_directories)?;
        }
    }
    walk_root_entry(cache, ctx, accounting, &mut outcome, &mut visited, root_icb, &mut pending_directories)?;

    while let Some(dir_icb) = pending_directories.pop() {
        walk_directory(
            cache,
            ctx,
            accounting,
            &mut outcome,
            &mut visited,
            &dir_icb,
            &mut pending_directories,
        )?;
    }

    Ok(outcome)
}

/// Walks a root-level ICB (the FSD's root or stream directory) which has no
/// owning FID and therefore no parent unique ID to compare against.
fn walk_root_entry<R: Read + Write + Seek>(
    cache: &mut Cache<&mut R, CACHE_BYTE_SIZE>,
    ctx: &WalkContext,
    accounting: &mut AccountingState,
    outcome: &mut WalkOutcome,
    visited: &mut HashSet<IcbKey>,
    icb: &LongAd,
    pending_directories: &mut Vec<LongAd>,
) -> Result<()> {
    let file_outcome = walk_file_entry(cache, ctx, accounting, outcome, visited, icb, None)?;
    if file_outcome == FileOutcome::Unfinished {
        warn!("walk_root_entry: root-level ICB {:?} is unfinished; cannot repair a rootless FID", icb);
        return Ok(());
    }
    if is_directory_icb(cache, ctx, icb)? {
        pending_directories.push(icb.clone());
    }
    Ok(())
}

fn is_directory_icb<R: Read + Write + Seek>(
    cache: &mut Cache<&mut R, CACHE_BYTE_SIZE>,
    ctx: &WalkContext,
    icb: &LongAd,
) -> Result<bool> {
    let entry = read_icb_entry(cache, ctx, icb)?;
    Ok(matches!(
        entry.icb_tag().file_type(),
        FileType::Directory | FileType::StreamDirectory
    ))
}

fn read_icb_entry<R: Read + Write + Seek>(
    cache: &mut Cache<&mut R, CACHE_BYTE_SIZE>,
    ctx: &WalkContext,
    icb: &LongAd,
) -> Result<AnyFileEntry> {
    let partition_descriptor =
        resolve_partition(ctx.partition_descriptors, icb.extent_location.partition_reference_number)?;
    let short_ad = ShortAllocationDescriptor {
        extent_length_and_type: icb.extent_length_and_type,
        extent_location: icb.extent_location.logical_block_number,
    };
    let entries = read_file_entries(
        cache,
        ctx.logical_volume_descriptor,
        ctx.partition_descriptors,
        partition_descriptor,
        ctx.sector_size,
        &short_ad,
    )?;
    entries.into_iter().last().ok_or(UdfError::InvalidDescriptorTag)
}

/// The File Entry Walker: validates the FE/EFE at `icb`, accounts its
/// own sector, classifies and counts it, tracks the latest modification
/// timestamp, reconciles its unique ID against the owning FID's, and either
/// marks its extents used (non-directory) or leaves directory descent to the
/// caller's work stack. Returns `FileOutcome::Unfinished` when the entry
/// declares content but records no extents for it.
fn walk_file_entry<R: Read + Write + Seek>(
    cache: &mut Cache<&mut R, CACHE_BYTE_SIZE>,
    ctx: &WalkContext,
    accounting: &mut AccountingState,
    outcome: &mut WalkOutcome,
    visited: &mut HashSet<IcbKey>,
    icb: &LongAd,
    parent_unique_id: Option<u64>,
) -> Result<FileOutcome> {
    let key = icb_key(icb);
    if !visited.insert(key) {
        warn!("walk_file_entry: ICB {:?} already visited; breaking cycle", key);
        return Ok(FileOutcome::Ok);
    }

    let partition_descriptor =
        resolve_partition(ctx.partition_descriptors, icb.extent_location.partition_reference_number)?;
    let entry = read_icb_entry(cache, ctx, icb)?;

    let block_size = ctx.logical_volume_descriptor.logical_block_size;
    accounting.increment_used(
        block_size as u64,
        icb.extent_location.logical_block_number,
        block_size,
    )?;

    match entry.icb_tag().file_type() {
        FileType::Directory | FileType::StreamDirectory => accounting.number_of_directories += 1,
        FileType::SequenceOfBytes
        | FileType::SymbolicLink
        | FileType::BlockSpecialDevice
        | FileType::CharacterSpecialDevice
        | FileType::Fifo
        | FileType::Socket => accounting.number_of_files += 1,
        _ => {}
    }

    if matches!(entry, AnyFileEntry::Extended(_)) {
        accounting.update_min_udf_rev(0x0200);
    }

    let modification_time = match &entry {
        AnyFileEntry::File(f) => f.modification_time.clone(),
        AnyFileEntry::Extended(f) => f.modification_time.clone(),
    };
    outcome.observe_modification_time(&modification_time);

    let icb_pos = icb_byte_position(ctx, partition_descriptor, icb);
    reconcile_unique_id(cache, ctx, accounting, outcome, icb_pos, &entry, icb, parent_unique_id)?;

    let flavor = entry.icb_tag().allocation_descriptor_type();
    let is_directory = matches!(
        entry.icb_tag().file_type(),
        FileType::Directory | FileType::StreamDirectory
    );

    if flavor == AllocationDescriptorType::InIcb {
        // Data lives inline in the ICB itself; nothing to collect or account.
        return Ok(FileOutcome::Ok);
    }

    let collected = collect_extents(
        cache,
        ctx.partition_descriptors,
        ctx.sector_size,
        icb.extent_location.partition_reference_number,
        flavor,
        entry.allocation_descriptors(),
    )?;
    for aed_sector in &collected.aed_sectors {
        accounting.increment_used(block_size as u64, *aed_sector, block_size)?;
    }

    if entry.information_length() > 0 && collected.extents.is_empty() {
        debug!("walk_file_entry: ICB {:?} declares content but has no extents; unfinished", key);
        return Ok(FileOutcome::Unfinished);
    }

    if !is_directory {
        for extent in &collected.extents {
            if extent.extent_type == ExtentType::NotRecordedNotAllocated {
                continue;
            }
            accounting.increment_used(
                extent.length_bytes as u64,
                extent.logical_block_number,
                block_size,
            )?;
        }
    }
    // Directories are left for the caller to push onto the work stack and
    // walk via `walk_directory`, which re-collects these same extents; a
    // small amount of duplicated work in exchange for not recursing here.

    Ok(FileOutcome::Ok)
}

/// Compares the FE/EFE's own unique ID against the ID carried by the owning
/// FID (`parent_unique_id`); `None` means this is a rootless entry (no
/// owning FID at all) and only the watermark bump applies.
fn reconcile_unique_id<R: Read + Write + Seek>(
    cache: &mut Cache<&mut R, CACHE_BYTE_SIZE>,
    ctx: &WalkContext,
    accounting: &mut AccountingState,
    outcome: &mut WalkOutcome,
    icb_pos: usize,
    entry: &AnyFileEntry,
    icb: &LongAd,
    parent_unique_id: Option<u64>,
) -> Result<()> {
    accounting.observe_unique_id(entry.unique_id());
    if let Some(parent_id) = parent_unique_id {
        accounting.observe_unique_id(parent_id);
    }

    let mismatch = match parent_unique_id {
        None | Some(0) => false,
        Some(expected) => expected != entry.unique_id(),
    };
    if !mismatch {
        return Ok(());
    }

    outcome.status_bits |= E_UUID;
    warn!(
        "reconcile_unique_id: FE at {:?} has unique_id={} but owning FID expects {:?}",
        icb, entry.unique_id(), parent_unique_id
    );

    if !ctx.run_options.repairs_enabled() {
        return Ok(());
    }
    let expected = parent_unique_id.unwrap();
    rewrite_unique_id(cache, icb_pos, entry, expected)?;
    outcome.corrected = true;
    info!("reconcile_unique_id: repaired FE unique_id at {:?} to {}", icb, expected);
    Ok(())
}

fn rewrite_unique_id<R: Read + Write + Seek>(
    cache: &mut Cache<&mut R, CACHE_BYTE_SIZE>,
    pos: usize,
    entry: &AnyFileEntry,
    new_unique_id: u64,
) -> Result<()> {
    match entry {
        AnyFileEntry::File(f) => {
            let mut fixed = f.clone();
            fixed.unique_id = new_unique_id;
            let mut buf = vec![0u8; fixed.get_length()];
            fixed.write(&mut buf);
            restamp_descriptor_tag(&mut buf, &mut fixed.tag);
            cache.write_at(pos, &buf)?;
        }
        AnyFileEntry::Extended(f) => {
            let mut fixed = f.clone();
            fixed.unique_id = new_unique_id;
            let mut buf = vec![0u8; fixed.get_length()];
            fixed.write(&mut buf);
            restamp_descriptor_tag(&mut buf, &mut fixed.tag);
            cache.write_at(pos, &buf)?;
        }
    }
    Ok(())
}

/// The Directory Walker: materializes the directory's recorded
/// contents into one contiguous scratch buffer (zero-filling unrecorded
/// extents), iterates its FIDs via the FID Inspector, and writes the buffer
/// back if any FID was corrected in place.
fn walk_directory<R: Read + Write + Seek>(
    cache: &mut Cache<&mut R, CACHE_BYTE_SIZE>,
    ctx: &WalkContext,
    accounting: &mut AccountingState,
    outcome: &mut WalkOutcome,
    visited: &mut HashSet<IcbKey>,
    dir_icb: &LongAd,
    pending_directories: &mut Vec<LongAd>,
) -> Result<()> {
    // validates the directory's own partition reference before descending
    resolve_partition(ctx.partition_descriptors, dir_icb.extent_location.partition_reference_number)?;
    let entry = read_icb_entry(cache, ctx, dir_icb)?;
    let flavor = entry.icb_tag().allocation_descriptor_type();

    if flavor == AllocationDescriptorType::InIcb {
        debug!("walk_directory: ICB {:?} stores directory contents in-ICB; nothing to walk", dir_icb);
        return Ok(());
    }

    let collected = collect_extents(
        cache,
        ctx.partition_descriptors,
        ctx.sector_size,
        dir_icb.extent_location.partition_reference_number,
        flavor,
        entry.allocation_descriptors(),
    )?;

    let block_size = ctx.logical_volume_descriptor.logical_block_size as usize;
    let total_len: usize = collected
        .extents
        .iter()
        .map(|e| e.length_bytes as usize)
        .sum();
    let mut buf = vec![0u8; total_len];
    let mut ranges: Vec<(usize, usize, crate::extent::CollectedExtent)> = Vec::new();
    let mut cursor = 0usize;
    for extent in &collected.extents {
        let len = extent.length_bytes as usize;
        if extent.extent_type == ExtentType::RecordedAllocated {
            let extent_partition = resolve_partition(ctx.partition_descriptors, extent.partition_reference_number)?;
            let pos = extent_partition.partition_starting_location as usize * ctx.sector_size
                + extent.logical_block_number as usize * block_size;
            cache.read_exact(pos, &mut buf[cursor..cursor + len])?;
        }
        // NotRecordedAllocated / NotRecordedNotAllocated: already zero-filled.
        ranges.push((cursor, cursor + len, *extent));
        cursor += len;
    }

    let fids = parse_file_identifiers(&buf)?;
    let mut dirty = false;
    let mut offset = 0usize;
    for (mut fid, tag_error_bits) in fids {
        let fid_len = fid.size();
        let padded_len = (fid_len + 3) & !3;
        let fid_start = offset;
        let corrected = inspect_fid(
            cache,
            ctx,
            accounting,
            outcome,
            visited,
            &mut fid,
            tag_error_bits,
            pending_directories,
        )?;
        if corrected {
            dirty = true;
            let mut fid_buf = vec![0u8; fid_len];
            fid.write(&mut fid_buf);
            restamp_descriptor_tag(&mut fid_buf, &mut fid.tag);
            buf[fid_start..fid_start + fid_len].copy_from_slice(&fid_buf);
        }
        offset += padded_len;
    }

    if dirty {
        for (start, end, extent) in &ranges {
            if extent.extent_type != ExtentType::RecordedAllocated {
                continue;
            }
            let extent_partition = resolve_partition(ctx.partition_descriptors, extent.partition_reference_number)?;
            let pos = extent_partition.partition_starting_location as usize * ctx.sector_size
                + extent.logical_block_number as usize * block_size;
            cache.write_at(pos, &buf[*start..*end])?;
        }
        outcome.corrected = true;
    }

    Ok(())
}

/// The FID Inspector. Returns whether the FID was mutated in place
/// (caller is responsible for writing the directory buffer back).
fn inspect_fid<R: Read + Write + Seek>(
    cache: &mut Cache<&mut R, CACHE_BYTE_SIZE>,
    ctx: &WalkContext,
    accounting: &mut AccountingState,
    outcome: &mut WalkOutcome,
    visited: &mut HashSet<IcbKey>,
    fid: &mut FileIdentifierDescriptor,
    tag_error_bits: u16,
    pending_directories: &mut Vec<LongAd>,
) -> Result<bool> {
    let mut corrected = false;

    if tag_error_bits != 0 {
        warn!(
            "inspect_fid: FID {:?} failed tag checksum/CRC validation (bits {:#x}); continuing best-effort",
            fid.icb, tag_error_bits
        );
        outcome.status_bits |= tag_error_bits;
    }

    if fid.tag.tag_serial_number != ctx.tag_serial_number {
        warn!(
            "inspect_fid: FID at {:?} has serial {} but volume serial is {}",
            fid.icb, fid.tag.tag_serial_number, ctx.tag_serial_number
        );
        if ctx.run_options.repairs_enabled() {
            fid.tag.tag_serial_number = ctx.tag_serial_number;
            corrected = true;
        }
    }

    if fid.file_characteristics & FileIdentifierDescriptor::FILE_CHARACTERISTIC_DELETED != 0 {
        // Deleted entries are not traversed; only their filename is worth validating.
        return Ok(corrected);
    }

    if accounting.minimum_udf_read_revision >= 0x0200 {
        match fid.embedded_unique_id() {
            Some(0) | None => {
                warn!("inspect_fid: FID {:?} has no/zero embedded unique ID under UDF >= 2.00", fid.icb);
                outcome.status_bits |= E_UUID;
            }
            Some(_) => {}
        }
    }

    if fid.file_characteristics & FileIdentifierDescriptor::FILE_CHARACTERISTIC_PARENT != 0 {
        // The "parent directory" entry every directory carries; its ICB was
        // already visited on the way down, so it's never re-walked.
        debug!("inspect_fid: FID {:?} is a parent-directory entry; not recursing", fid.icb);
        return Ok(corrected);
    }

    let parent_unique_id = fid.embedded_unique_id().map(|id| id as u64);
    let file_outcome = walk_file_entry(cache, ctx, accounting, outcome, visited, &fid.icb, parent_unique_id)?;

    if file_outcome == FileOutcome::Unfinished {
        info!("inspect_fid: marking unfinished FID {:?} deleted", fid.icb);
        fid.file_characteristics |= FileIdentifierDescriptor::FILE_CHARACTERISTIC_DELETED;
        fid.icb = LongAd::default();
        return Ok(true);
    }

    let entry = read_icb_entry(cache, ctx, &fid.icb)?;

    let info = FileInfo {
        filename: fid.file_identifier.to_string(),
        file_characteristics: fid.file_characteristics,
        permissions: entry.permissions(),
        modification_time: entry.modification_time().clone(),
        size: entry.information_length(),
    };
    debug!("inspect_fid: visited {:?}", info);

    if matches!(
        entry.icb_tag().file_type(),
        FileType::Directory | FileType::StreamDirectory
    ) {
        pending_directories.push(fid.icb.clone());
    }

    Ok(corrected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_key_orders_chronologically() {
        let mut earlier = Timestamp::default();
        earlier.year = 2020;
        earlier.month = 1;
        let mut later = Timestamp::default();
        later.year = 2021;
        later.month = 1;
        assert!(timestamp_key(&later) > timestamp_key(&earlier));
    }

    #[test]
    fn icb_key_distinguishes_partition_and_block() {
        let mut a = LongAd::default();
        a.extent_location.partition_reference_number = 0;
        a.extent_location.logical_block_number = 5;
        let mut b = a.clone();
        b.extent_location.partition_reference_number = 1;
        assert_ne!(icb_key(&a), icb_key(&b));
    }
}
