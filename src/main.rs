use std::fs::OpenOptions;
use std::path::PathBuf;

use clap::Parser;
use log::{debug, error, info, warn, LevelFilter};

use udffsck_rs::accounting::AccountingState;
use udffsck_rs::cache::Cache;
use udffsck_rs::errors::{
    E_DSTRING, E_EXTLEN, E_FREESPACE, E_TIMESTAMP, E_WRONGDESC, EXIT_CORRECTED_ERRORS, EXIT_OK,
    EXIT_OPERATIONAL_ERROR, EXIT_UNCORRECTED_ERRORS, EXIT_USAGE,
};
use udffsck_rs::lvid::IntegrityObservations;
use udffsck_rs::options::RunOptions;
use udffsck_rs::repair;
use udffsck_rs::space::count_free_blocks;
use udffsck_rs::udf::{FileSetDescriptor, PartitionMap};
use udffsck_rs::udf_parser::{osta, Result, UdfError, UdfParser, CACHE_BYTE_SIZE};
use udffsck_rs::vds::{self, CopyDirection};
use udffsck_rs::vrs;
use udffsck_rs::walker::{self, WalkContext};

/// A UDF (ECMA-167 / UDF 2.x) filesystem consistency checker and repair
/// tool, in the vein of `fsck` for other on-disk formats.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Device or disk image to check
    device: PathBuf,

    /// Force a specific sector size instead of auto-detecting one
    #[arg(short = 'b', long = "blocksize")]
    blocksize: Option<u32>,

    /// Prompt before applying each repair
    #[arg(short, long)]
    interactive: bool,

    /// Apply all repairs without prompting
    #[arg(short, long)]
    autofix: bool,

    /// Increase logging verbosity; stackable (-v, -vv, -vvv)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all but error-level logging
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

fn main() {
    let args = Args::parse();

    let level = if args.quiet {
        LevelFilter::Error
    } else {
        match args.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };
    env_logger::Builder::new().filter_level(level).init();

    if args.interactive && args.autofix {
        error!("-i/--interactive and -a/--autofix are mutually exclusive");
        std::process::exit(EXIT_USAGE as i32);
    }

    let run_options = RunOptions {
        forced_sector_size: args.blocksize,
        interactive: args.interactive,
        autofix: args.autofix,
        verbosity: args.verbose as i8 - if args.quiet { 1 } else { 0 },
    };

    let code = match run(&args.device, &run_options) {
        Ok(code) => code,
        Err(UdfError::Usage(msg)) => {
            error!("usage error: {msg}");
            EXIT_USAGE
        }
        Err(e) => {
            error!("operational error: {e}");
            EXIT_OPERATIONAL_ERROR
        }
    };

    println!(
        "udffsck-rs: {} (exit code {})",
        if code == EXIT_OK { "clean" } else { "issues found" },
        code
    );
    std::process::exit(code as i32);
}

fn run(device: &PathBuf, run_options: &RunOptions) -> Result<u8> {
    let file = OpenOptions::new()
        .read(true)
        .write(run_options.repairs_enabled())
        .open(device)
        .map_err(UdfError::Io)?;

    let mut status_bits: u16 = 0;
    let mut corrected = false;
    let mut uncorrected = false;

    let (mut parser, anchor_sector, mut anchor) = match run_options.forced_sector_size {
        Some(sector_size) => {
            let mut parser = UdfParser::new_with_sector_size(file, sector_size, 0);
            let (sector, anchor) = parser.read_anchor_with_sector()?;
            (parser, sector, anchor)
        }
        None => {
            let (mut parser, _) = UdfParser::detect_sector_size(file)?;
            let (sector, anchor) = parser.read_anchor_with_sector()?;
            (parser, sector, anchor)
        }
    };
    let sector_size = parser.sector_size;
    info!(
        "detected sector size {} bytes, anchor at sector {}",
        sector_size, anchor_sector
    );

    let vrs_probe = vrs::probe(&mut parser.reader).unwrap_or_default();
    if !vrs_probe.found_bea01 || vrs_probe.nsr.is_none() || !vrs_probe.found_tea01 {
        warn!("volume recognition sequence incomplete: {vrs_probe:?}");
    } else {
        debug!("volume recognition sequence: {vrs_probe:?}");
    }

    if repair::widen_avdp_extents(&mut anchor, sector_size) {
        status_bits |= E_EXTLEN;
        warn!("anchor's main/reserve VDS extents disagree in length");
        if run_options.repairs_enabled() {
            let mut cache = Cache::<&mut std::fs::File, CACHE_BYTE_SIZE>::new(
                &mut parser.reader,
                sector_size as usize,
            );
            repair::write_avdp(&mut cache, anchor_sector, sector_size, &anchor)?;
            corrected = true;
            info!("widened AVDP extent lengths and wrote anchor back to sector {anchor_sector}");
        }
    }

    // A secondary AVDP (last sector, or last-256) missing
    // or unreadable while the primary validated is independently repairable
    // by copying the primary over. If any secondary disagrees with the
    // primary's tag serial number, recovery support is disabled for the run
    // (serial treated as 0) since we can no longer trust which copy is current.
    let secondary_anchors = parser.probe_secondary_anchors(anchor_sector)?;
    let mut reference_serial = anchor.tag.tag_serial_number;
    for (sector, found) in &secondary_anchors {
        match found {
            Some(other) if other.tag.tag_serial_number == reference_serial => {
                debug!("secondary anchor at sector {sector} agrees with primary");
            }
            Some(other) => {
                warn!(
                    "secondary anchor at sector {sector} has serial {} but primary has {}; disabling recovery",
                    other.tag.tag_serial_number, reference_serial
                );
                reference_serial = 0;
            }
            None => {
                status_bits |= E_WRONGDESC;
                warn!("secondary anchor at sector {sector} is missing or corrupt");
                if run_options.repairs_enabled() {
                    let mut cache = Cache::<&mut std::fs::File, CACHE_BYTE_SIZE>::new(
                        &mut parser.reader,
                        sector_size as usize,
                    );
                    repair::copy_avdp(&mut cache, &anchor, *sector, sector_size)?;
                    corrected = true;
                    info!("copied primary anchor onto missing/corrupt secondary at sector {sector}");
                } else {
                    uncorrected = true;
                }
            }
        }
    }

    let main_loc = &anchor.main_volume_descriptor_sequence_location;
    let reserve_loc = &anchor.reserve_volume_descriptor_sequence_location;
    let main_seq = parser.read_volume_descriptor_sequence(main_loc.location_sector, main_loc.length_bytes)?;
    let reserve_seq =
        parser.read_volume_descriptor_sequence(reserve_loc.location_sector, reserve_loc.length_bytes)?;

    let (seq, direction) = vds::reconcile(main_seq, reserve_seq);
    if direction != CopyDirection::None {
        warn!("main and reserve volume descriptor sequences disagree; repairable via {direction:?}");
        if run_options.repairs_enabled() {
            let main_sectors = main_loc.length_bytes.div_ceil(sector_size);
            let reserve_sectors = reserve_loc.length_bytes.div_ceil(sector_size);
            let num_sectors = main_sectors.min(reserve_sectors);
            let mut cache = Cache::<&mut std::fs::File, CACHE_BYTE_SIZE>::new(
                &mut parser.reader,
                sector_size as usize,
            );
            if repair::repair_vds(
                &mut cache,
                direction,
                main_loc.location_sector,
                reserve_loc.location_sector,
                num_sectors,
                sector_size as usize,
            )? {
                corrected = true;
            }
        } else {
            uncorrected = true;
        }
    }
    status_bits |= seq.error_bits;
    vds::missing_descriptor_error(&seq)?;

    let pvd = seq.primary_volume_descriptor.as_ref().unwrap();
    let (lvd, partition_maps) = seq.logical_volume_descriptor.as_ref().unwrap();
    debug!("volume identifier: {:?}", pvd.volume_identifier);

    let type1_map = partition_maps
        .iter()
        .find_map(|m| match m {
            PartitionMap::Type1(m) => Some(m),
            _ => None,
        })
        .ok_or_else(|| UdfError::Usage("no Type 1 partition map found; virtual/sparable partitions are not supported".into()))?;

    let partition_descriptor = seq
        .partition_descriptors
        .get(&type1_map.partition_number)
        .ok_or(UdfError::InvalidPartitionNumber)?
        .clone();

    let fsds = parser.read_fileset_descriptors(lvd, &partition_descriptor, type1_map)?;
    let fsd: &FileSetDescriptor = fsds.first().ok_or(UdfError::VdsNotFound)?;

    if fsd_dstring_errors(fsd) != 0 {
        status_bits |= E_DSTRING;
        warn!("file set descriptor carries a malformed dstring field");
    }

    let space_info = parser.read_partition_space_info(&partition_descriptor)?;
    if space_info.bitmap_length_mismatch {
        status_bits |= E_FREESPACE;
    }

    let (lvid, lvid_tag_valid) = parser.read_logical_volume_integrity_descriptor(
        lvd.integrity_sequence_extent.location_sector,
    )?;
    let recorded_min_udf_read_revision = lvid
        .implementation_use_parsed()
        .map(|iu| iu.minimum_udf_read_revision)
        .unwrap_or(0x0150);

    let mut accounting = AccountingState::new(partition_descriptor.partition_length);
    accounting.update_min_udf_rev(recorded_min_udf_read_revision);
    accounting.update_min_udf_rev(vrs_probe.minimum_udf_revision_floor());
    // UDF 2.1.5.3: a domain identifier's suffix carries the UDF revision that
    // wrote this volume as a little-endian u16 in its first two bytes.
    let fsd_domain_revision = u16::from_le_bytes([
        fsd.domain_identifier.identifier_suffix[0],
        fsd.domain_identifier.identifier_suffix[1],
    ]);
    accounting.update_min_udf_rev(fsd_domain_revision);

    let ctx = WalkContext {
        logical_volume_descriptor: lvd,
        partition_descriptors: &seq.partition_descriptors,
        sector_size: sector_size as usize,
        tag_serial_number: reference_serial,
        run_options,
    };

    let stream_icb = if fsd.system_stream_directory_icb.extent_length_bytes() > 0 {
        Some(&fsd.system_stream_directory_icb)
    } else {
        None
    };

    let walk_outcome = {
        let mut cache = Cache::<&mut std::fs::File, CACHE_BYTE_SIZE>::new(
            &mut parser.reader,
            sector_size as usize,
        );
        walker::walk_volume(&mut cache, &ctx, &mut accounting, &fsd.root_directory_icb, stream_icb)?
    };
    status_bits |= walk_outcome.status_bits;
    corrected |= walk_outcome.corrected;

    if let Some(latest) = &walk_outcome.latest_modification_time {
        if timestamp_tuple(latest) > timestamp_tuple(&lvid.recording_date_and_time) {
            status_bits |= E_TIMESTAMP;
            warn!("a file's modification time is later than the volume's recorded integrity timestamp");
        }
    }

    if let Some(sbd) = &space_info.space_bitmap {
        if sbd.bitmap != accounting.observed_bitmap() {
            status_bits |= E_FREESPACE;
            warn!(
                "recorded free-space bitmap ({} free blocks) disagrees with the walk's observed bitmap ({} free blocks)",
                count_free_blocks(sbd), accounting.free_blocks
            );
            if run_options.repairs_enabled() {
                let fixed = repair::rebuild_space_bitmap(sbd, accounting.observed_bitmap());
                let bitmap_sector = partition_descriptor.partition_starting_location
                    + space_info.header.unallocated_space_bitmap.extent_location;
                let mut cache = Cache::<&mut std::fs::File, CACHE_BYTE_SIZE>::new(
                    &mut parser.reader,
                    sector_size as usize,
                );
                repair::write_space_bitmap(&mut cache, bitmap_sector, sector_size, &fixed)?;
                corrected = true;
            }
        }
    }

    let lvid_dirty = lvid.integrity_type != udffsck_rs::udf::LogicalVolumeIntegrityDescriptor::INTEGRITY_TYPE_CLOSE;
    if lvid_dirty || !lvid_tag_valid || status_bits & (E_TIMESTAMP | E_FREESPACE) != 0 {
        if lvid_dirty {
            warn!("logical volume integrity descriptor was left open; volume was not cleanly unmounted");
        }
        if run_options.repairs_enabled() {
            let observed = IntegrityObservations {
                number_of_files: accounting.number_of_files,
                number_of_directories: accounting.number_of_directories,
                next_unique_id: accounting.next_unique_id,
                free_blocks_by_partition: [accounting.free_blocks],
                size_blocks_by_partition: [partition_descriptor.partition_length],
            };
            let mut cache = Cache::<&mut std::fs::File, CACHE_BYTE_SIZE>::new(
                &mut parser.reader,
                sector_size as usize,
            );
            repair::repair_lvid(
                &mut cache,
                lvid,
                lvd.integrity_sequence_extent.location_sector,
                sector_size,
                lvid_tag_valid,
                &observed,
                accounting.minimum_udf_read_revision,
                &repair::now_timestamp(),
            )?;
            corrected = true;
        } else {
            uncorrected = true;
        }
    }

    // Conservative: any detected problem counts as uncorrected unless a repair
    // pass specifically claimed it (`corrected`); the two bits can coexist
    // when some issues were fixed but others (e.g. a malformed dstring, which
    // this tool only detects) were not.
    let mut exit_code = EXIT_OK;
    if status_bits != 0 || uncorrected {
        exit_code |= EXIT_UNCORRECTED_ERRORS;
    }
    if corrected {
        exit_code |= EXIT_CORRECTED_ERRORS;
    }
    info!(
        "check complete: status_bits=0x{:04x} corrected={} files={} directories={} free_blocks={}",
        status_bits, corrected, accounting.number_of_files, accounting.number_of_directories, accounting.free_blocks
    );
    Ok(exit_code)
}

fn timestamp_tuple(ts: &udffsck_rs::udf::Timestamp) -> (u16, u8, u8, u8, u8, u8) {
    (ts.year, ts.month, ts.day, ts.hour, ts.minute, ts.second)
}

/// Validates the four fixed-size dstring fields a File Set Descriptor
/// carries. Returns a bitmask of `osta::DSTRING_E_*`; zero means all clean.
fn fsd_dstring_errors(fsd: &FileSetDescriptor) -> u32 {
    osta::check_dstring(&fsd.logical_volume_identifier.0, 128)
        | osta::check_dstring(&fsd.file_set_identifier.0, 32)
        | osta::check_dstring(&fsd.copyright_file_identifier.0, 32)
        | osta::check_dstring(&fsd.abstract_file_identifier.0, 32)
}
