//! Repair Driver: given the divergence between observed and
//! recorded accounting, and which side of a redundant pair validated
//! cleanly, dispatches the targeted writes that bring a damaged volume back
//! into a consistent state. FID/FE in-place fixes are not here -- they
//! happen where they're detected, inside `walker`, per the same section's
//! last bullet.
//!
//! All writes flow through the `Cache`'s write-through path, which is
//! itself gated by `RunOptions::repairs_enabled`; this module assumes the
//! caller already checked that gate and only calls in when a write should
//! actually happen.

use std::io::{Read, Seek, Write};

use log::{info, warn};

use crate::cache::Cache;
use crate::lvid::IntegrityObservations;
use crate::udf::{
    AnchorVolumeDescriptorPointer, DescriptorTag, LogicalVolumeIntegrityDescriptor,
    SpaceBitmapDescriptor, Timestamp,
};
use crate::udf_parser::{restamp_descriptor_tag, Result, CACHE_BYTE_SIZE};
use crate::vds::CopyDirection;

/// ECMA-167 requires both AVDP extents to span at least this many sectors;
/// a shorter extent is widened rather than trusted as-is.
pub const MIN_AVDP_EXTENT_SECTORS: u32 = 16;

/// Copies `num_sectors` sector-for-sector from `source_sector` onto
/// `dest_sector`, retargeting each copied descriptor's tag location and
/// recomputing its checksum/CRC to match the destination position. An
/// unrecorded sector (zero tag identifier) is skipped rather than stamped,
/// since there's nothing there to retarget.
///
/// Shared by the whole-VDS copy (point 1) and the single-AVDP copy
/// (point 3); both are "copy bytes, then fix up the tag for the new home".
pub fn copy_sectors<R: Read + Write + Seek>(
    cache: &mut Cache<&mut R, CACHE_BYTE_SIZE>,
    source_sector: u32,
    dest_sector: u32,
    num_sectors: u32,
    sector_size: usize,
) -> Result<()> {
    let mut buf = vec![0u8; sector_size];
    for i in 0..num_sectors {
        cache.read_exact((source_sector + i) as usize * sector_size, &mut buf)?;
        let mut tag = DescriptorTag::read(&buf[0..16]);
        if tag.tag_identifier == 0 {
            continue;
        }
        tag.tag_location = dest_sector + i;
        tag.write(&mut buf[0..16]);
        restamp_descriptor_tag(&mut buf, &mut tag);
        cache.write_at((dest_sector + i) as usize * sector_size, &buf)?;
    }
    Ok(())
}

/// Overwrites a damaged VDS with its clean sibling. The copy
/// direction always flows from the validated side to the damaged one; see
/// `vds::reconcile`.
pub fn repair_vds<R: Read + Write + Seek>(
    cache: &mut Cache<&mut R, CACHE_BYTE_SIZE>,
    direction: CopyDirection,
    main_start_sector: u32,
    reserve_start_sector: u32,
    num_sectors: u32,
    sector_size: usize,
) -> Result<bool> {
    match direction {
        CopyDirection::MainToReserve => {
            info!(
                "repair_vds: copying Main VDS (sector {main_start_sector}) onto Reserve (sector {reserve_start_sector})"
            );
            copy_sectors(cache, main_start_sector, reserve_start_sector, num_sectors, sector_size)?;
            Ok(true)
        }
        CopyDirection::ReserveToMain => {
            info!(
                "repair_vds: copying Reserve VDS (sector {reserve_start_sector}) onto Main (sector {main_start_sector})"
            );
            copy_sectors(cache, reserve_start_sector, main_start_sector, num_sectors, sector_size)?;
            Ok(true)
        }
        CopyDirection::None => {
            warn!("repair_vds: neither Main nor Reserve VDS validated cleanly; nothing to copy");
            Ok(false)
        }
    }
}

/// Copies the known-good AVDP onto a missing or corrupt
/// sibling location, retargeting the copy's tag location to `dest_sector`.
pub fn copy_avdp<R: Read + Write + Seek>(
    cache: &mut Cache<&mut R, CACHE_BYTE_SIZE>,
    good: &AnchorVolumeDescriptorPointer,
    dest_sector: u32,
    sector_size: u32,
) -> Result<()> {
    write_avdp(cache, dest_sector, sector_size, good)?;
    info!("copy_avdp: wrote anchor to sector {dest_sector} from known-good copy");
    Ok(())
}

/// Widens both AVDP extent lengths to the larger of the two
/// if that value is at least `MIN_AVDP_EXTENT_SECTORS` sectors. Returns
/// whether either field actually changed.
pub fn widen_avdp_extents(avdp: &mut AnchorVolumeDescriptorPointer, sector_size: u32) -> bool {
    let widest = avdp
        .main_volume_descriptor_sequence_location
        .length_bytes
        .max(avdp.reserve_volume_descriptor_sequence_location.length_bytes);
    if widest < MIN_AVDP_EXTENT_SECTORS * sector_size {
        return false;
    }
    let mut changed = false;
    if avdp.main_volume_descriptor_sequence_location.length_bytes != widest {
        avdp.main_volume_descriptor_sequence_location.length_bytes = widest;
        changed = true;
    }
    if avdp.reserve_volume_descriptor_sequence_location.length_bytes != widest {
        avdp.reserve_volume_descriptor_sequence_location.length_bytes = widest;
        changed = true;
    }
    changed
}

/// Writes `avdp` to `sector`, retargeting its tag location and recomputing
/// checksum/CRC. Shared by the extent-length fix and the missing-sibling
/// copy, since both end with "stamp this AVDP onto this sector".
pub fn write_avdp<R: Read + Write + Seek>(
    cache: &mut Cache<&mut R, CACHE_BYTE_SIZE>,
    sector: u32,
    sector_size: u32,
    avdp: &AnchorVolumeDescriptorPointer,
) -> Result<()> {
    let mut fixed = avdp.clone();
    fixed.tag.tag_location = sector;
    let mut buf = vec![0u8; AnchorVolumeDescriptorPointer::size()];
    fixed.write(&mut buf);
    restamp_descriptor_tag(&mut buf, &mut fixed.tag);
    cache.write_at(sector as usize * sector_size as usize, &buf)?;
    Ok(())
}

/// Overwrites the recorded bitmap with what the walk
/// observed. Lengths are expected to already agree (the caller is
/// responsible for E_FREESPACE when `numOfBits` disagreed with the
/// partition length); only the bytes in common are copied.
pub fn rebuild_space_bitmap(sbd: &SpaceBitmapDescriptor, observed_bitmap: &[u8]) -> SpaceBitmapDescriptor {
    let mut fixed = sbd.clone();
    let len = fixed.bitmap.len().min(observed_bitmap.len());
    fixed.bitmap[..len].copy_from_slice(&observed_bitmap[..len]);
    fixed
}

pub fn write_space_bitmap<R: Read + Write + Seek>(
    cache: &mut Cache<&mut R, CACHE_BYTE_SIZE>,
    sector: u32,
    sector_size: u32,
    sbd: &SpaceBitmapDescriptor,
) -> Result<()> {
    let mut fixed = sbd.clone();
    let mut buf = vec![0u8; SpaceBitmapDescriptor::HEADER_SIZE + fixed.bitmap.len()];
    fixed.write(&mut buf);
    restamp_descriptor_tag(&mut buf, &mut fixed.tag);
    cache.write_at(sector as usize * sector_size as usize, &buf)?;
    info!("write_space_bitmap: rewrote space bitmap at sector {sector}");
    Ok(())
}

/// Repairs the LVID. `lvid_tag_valid` selects between the
/// counter-drift-only overwrite and a full rebuild from scratch; either way
/// the integrity type is closed as the last field touched (inside
/// `lvid::rebuild`, which both paths funnel through).
pub fn repair_lvid<R: Read + Write + Seek>(
    cache: &mut Cache<&mut R, CACHE_BYTE_SIZE>,
    lvid: LogicalVolumeIntegrityDescriptor,
    lvid_sector: u32,
    sector_size: u32,
    lvid_tag_valid: bool,
    observed: &IntegrityObservations,
    minimum_udf_read_revision: u16,
    now: &Timestamp,
) -> Result<LogicalVolumeIntegrityDescriptor> {
    let rebuilt = if lvid_tag_valid {
        crate::lvid::rebuild(lvid, observed)
    } else {
        warn!("repair_lvid: LVID tag/CRC damaged at sector {lvid_sector}; rebuilding from scratch");
        crate::lvid::rebuild_from_scratch(lvid_sector, observed, minimum_udf_read_revision, now)
    };
    write_lvid(cache, lvid_sector, sector_size, &rebuilt)?;
    info!("repair_lvid: wrote LVID at sector {lvid_sector}");
    Ok(rebuilt)
}

fn write_lvid<R: Read + Write + Seek>(
    cache: &mut Cache<&mut R, CACHE_BYTE_SIZE>,
    sector: u32,
    sector_size: u32,
    lvid: &LogicalVolumeIntegrityDescriptor,
) -> Result<()> {
    let mut fixed = lvid.clone();
    let total_len = LogicalVolumeIntegrityDescriptor::HEADER_SIZE
        + fixed.free_space_table.len() * 4
        + fixed.size_table.len() * 4
        + fixed.implementation_use.len();
    let mut buf = vec![0u8; total_len];
    fixed.write(&mut buf);
    restamp_descriptor_tag(&mut buf, &mut fixed.tag);
    cache.write_at(sector as usize * sector_size as usize, &buf)?;
    Ok(())
}

/// The current moment encoded as a UDF `Timestamp` in UTC, used to stamp a
/// rewritten LVID's recording time.
/// `time` is the stack's choice here (matching the `smb-rs`-family example
/// in the retrieval pack) since the inherited dependency set has no
/// calendar-aware clock of its own.
pub fn now_timestamp() -> Timestamp {
    let now = time::OffsetDateTime::now_utc();
    Timestamp {
        // bits 12-15 = 1 ("time relative to Coordinated Universal Time"),
        // bits 0-11 = signed offset from GMT in 15-minute units (0 here).
        type_and_timezone: 0x1000,
        year: now.year() as u16,
        month: now.month() as u8,
        day: now.day(),
        hour: now.hour(),
        minute: now.minute(),
        second: now.second(),
        centiseconds: 0,
        hundreds_of_microseconds: 0,
        microseconds: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::udf::ExtentAd;

    #[test]
    fn widen_avdp_extents_only_widens_at_or_above_the_floor() {
        let mut avdp = AnchorVolumeDescriptorPointer::default();
        avdp.main_volume_descriptor_sequence_location = ExtentAd {
            length_bytes: 15 * 2048,
            location_sector: 257,
        };
        avdp.reserve_volume_descriptor_sequence_location = ExtentAd {
            length_bytes: 10 * 2048,
            location_sector: 300,
        };
        assert!(!widen_avdp_extents(&mut avdp, 2048));
        assert_eq!(avdp.main_volume_descriptor_sequence_location.length_bytes, 15 * 2048);

        avdp.main_volume_descriptor_sequence_location.length_bytes = 20 * 2048;
        assert!(widen_avdp_extents(&mut avdp, 2048));
        assert_eq!(avdp.reserve_volume_descriptor_sequence_location.length_bytes, 20 * 2048);
    }

    #[test]
    fn rebuild_space_bitmap_copies_only_overlapping_bytes() {
        let mut sbd = SpaceBitmapDescriptor::default();
        sbd.bitmap = vec![0x00, 0x00, 0x00];
        let observed = vec![0xFFu8, 0x0F];
        let fixed = rebuild_space_bitmap(&sbd, &observed);
        assert_eq!(fixed.bitmap, vec![0xFF, 0x0F, 0x00]);
    }

    #[test]
    fn repair_vds_direction_none_does_not_write() {
        let mut backing = std::io::Cursor::new(vec![0u8; 2048 * 4]);
        let mut cache = Cache::<&mut std::io::Cursor<Vec<u8>>, CACHE_BYTE_SIZE>::new(&mut backing, 2048);
        let wrote = repair_vds(&mut cache, CopyDirection::None, 0, 2, 1, 2048).unwrap();
        assert!(!wrote);
    }
}
