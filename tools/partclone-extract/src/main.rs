mod config;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{anyhow, Context};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use partclone_image::{ExportCatalog, ImageBackend, Session, StdFileBackend};
use serde::Serialize;

use config::{Cli, Command};

/// Largest single read issued while extracting.
const EXTRACT_CHUNK_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, Serialize)]
struct ImageInfo<'a> {
    export: &'a str,
    header: &'a partclone_image::ImageHeader,
    bitmap_crc: u32,
    block_start: u64,
    extents: usize,
    mapped_bytes: u64,
    checksum_records: u64,
    expected_image_len: u64,
    image_len: u64,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    config::init_logging(&cli.log_level, cli.log_json);
    run(cli)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Info { image, json } => {
            let session = open_session(&cli, image)?;
            print_info(&session, *json)
        }
        Command::Extents { image, json } => {
            let session = open_session(&cli, image)?;
            print_extents(&session, *json)
        }
        Command::Read {
            image,
            offset,
            length,
            output,
        } => {
            let session = open_session(&cli, image)?;
            let out = session
                .read(*offset, *length)
                .with_context(|| format!("read offset={offset} length={length}"))?;
            if !out.truncated.is_empty() {
                tracing::warn!(
                    segments = out.truncated.len(),
                    "image is truncated; part of the output was zero-filled"
                );
            }
            match output {
                Some(path) => fs::write(path, &out.data)
                    .with_context(|| format!("write {}", path.display()))?,
                None => {
                    let mut stdout = io::stdout().lock();
                    stdout.write_all(&out.data)?;
                    stdout.flush()?;
                }
            }
            Ok(())
        }
        Command::Extract {
            image,
            output,
            force,
            quiet,
        } => {
            let session = open_session(&cli, image)?;
            extract(&session, output, *force, *quiet)
        }
        Command::List { json } => {
            let root = cli
                .catalog
                .as_ref()
                .ok_or_else(|| anyhow!("list requires --catalog (or PARTCLONE_CATALOG)"))?;
            let entries = ExportCatalog::new(root)
                .list()
                .with_context(|| format!("list catalog {}", root.display()))?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in entries {
                    println!("{}\t{}", entry.name, entry.file);
                }
            }
            Ok(())
        }
    }
}

fn open_session(cli: &Cli, image: &str) -> anyhow::Result<Session<StdFileBackend>> {
    let options = cli.open.options();
    if let Some(root) = &cli.catalog {
        return ExportCatalog::new(root)
            .with_options(options)
            .open(image)
            .with_context(|| format!("open export {image:?} in {}", root.display()));
    }

    let backend = StdFileBackend::open_read_only(image).with_context(|| format!("open {image}"))?;
    let export = Path::new(image)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(image);
    let session = Session::with_options(export, backend, options);
    session
        .prepare()
        .with_context(|| format!("parse partclone image {image}"))?;
    Ok(session)
}

fn print_info(session: &Session<StdFileBackend>, json: bool) -> anyhow::Result<()> {
    let header = session.header()?;
    let extents = session.extents()?;
    let info = ImageInfo {
        export: session.export(),
        header,
        bitmap_crc: session.bitmap_crc()?,
        block_start: session.block_start()?,
        extents: extents.len(),
        mapped_bytes: extents.mapped_bytes(),
        checksum_records: extents.checksum_records(),
        expected_image_len: extents.physical_end(),
        image_len: session.backend().len()?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("export:             {}", info.export);
    println!("partclone version:  {}", header.partclone_version);
    println!("image version:      {}", header.image_version);
    println!("filesystem:         {}", header.filesystem_type);
    println!("byte order:         {:?}", header.byte_order);
    println!("device size:        {} bytes", header.device_size);
    println!("block size:         {} bytes", header.block_size);
    println!(
        "blocks:             {} used / {} total",
        header.used_block, header.total_block
    );
    println!(
        "checksums:          {} bytes every {} blocks ({} records)",
        header.checksum_size, header.blocks_per_checksum, info.checksum_records
    );
    println!("block start:        {}", info.block_start);
    println!("extents:            {}", info.extents);
    println!("mapped bytes:       {}", info.mapped_bytes);
    println!(
        "image length:       {} (expected {})",
        info.image_len, info.expected_image_len
    );
    if info.image_len < info.expected_image_len {
        println!("warning:            image is truncated");
    }
    Ok(())
}

fn print_extents(session: &Session<StdFileBackend>, json: bool) -> anyhow::Result<()> {
    let extents = session.extents()?;
    if json {
        println!("{}", serde_json::to_string_pretty(extents.as_slice())?);
        return Ok(());
    }
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "start_block\tvirtual_offset\tphysical_offset\tlength")?;
    for e in extents {
        writeln!(
            stdout,
            "{}\t{}\t{}\t{}",
            e.start_block, e.virtual_offset, e.physical_offset, e.length
        )?;
    }
    Ok(())
}

fn open_output_file(path: &Path, force: bool) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.write(true);
    if force {
        opts.create(true).truncate(true);
    } else {
        opts.create_new(true);
    }
    opts.open(path)
}

/// Write every extent to `output` at its device offset; unused blocks stay as holes.
fn extract(
    session: &Session<StdFileBackend>,
    output: &Path,
    force: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    let device_size = session.virtual_size()?;
    let extents = session.extents()?;

    let mut file = open_output_file(output, force).with_context(|| {
        if force {
            format!("create {}", output.display())
        } else {
            format!("create {} (use --force to overwrite)", output.display())
        }
    })?;
    file.set_len(device_size)
        .with_context(|| format!("size {} to {device_size} bytes", output.display()))?;

    // The last used block may run past a device_size that is not block aligned.
    let runs: Vec<(u64, u64)> = extents
        .iter()
        .filter(|extent| extent.virtual_offset < device_size)
        .map(|extent| (extent.virtual_offset, extent.virtual_end().min(device_size)))
        .collect();
    let mapped: u64 = runs.iter().map(|(start, end)| end - start).sum();

    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(mapped);
        pb.set_style(
            ProgressStyle::with_template(
                "[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("##-"),
        );
        pb
    };

    let mut buf = vec![0u8; EXTRACT_CHUNK_BYTES as usize];
    let mut truncated = 0usize;
    for (start, end) in runs {
        let mut pos = start;
        while pos < end {
            let len = (end - pos).min(EXTRACT_CHUNK_BYTES) as usize;
            let chunk = &mut buf[..len];
            let report = session
                .read_into(pos, chunk)
                .with_context(|| format!("read offset={pos} length={len}"))?;
            truncated += report.truncated.len();

            file.seek(SeekFrom::Start(pos))?;
            file.write_all(chunk)
                .with_context(|| format!("write offset={pos}"))?;
            pos += len as u64;
            pb.inc(len as u64);
        }
    }
    file.sync_all().context("flush output")?;
    pb.finish_and_clear();

    if truncated > 0 {
        tracing::warn!(
            segments = truncated,
            "image is truncated; missing block data was written as zeros"
        );
    }
    if !quiet {
        eprintln!(
            "extracted {} bytes ({} mapped) to {}",
            device_size,
            mapped,
            output.display()
        );
    }
    Ok(())
}
