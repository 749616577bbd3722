//! Command-line front end for inspecting ZIP-packaged model artifacts.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use modelzip::zip::member_path;
use modelzip::{ArchiveConfig, Cli, LocalFile, ZipArchive, ZipInfo};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let mut config = ArchiveConfig::new().close_source(true);
    if let Some(password) = &cli.password {
        config = config.password(password.as_bytes());
    }
    if let Some(label) = &cli.encoding {
        config = config.metadata_encoding(label)?;
    }

    let archive = ZipArchive::open_path_with_config(&cli.file, config)
        .with_context(|| format!("cannot open {}", cli.file))?;

    if cli.list || cli.verbose {
        return list_members(&archive, &cli);
    }
    if cli.test {
        return test_archive(&archive, &cli);
    }
    extract_members(&archive, &cli)
}

/// List members, either names only (`-l`) or as a table (`-v`).
fn list_members(archive: &ZipArchive<LocalFile>, cli: &Cli) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if !cli.verbose {
        for name in archive.namelist().into_iter().filter(|n| cli.selects(n)) {
            writeln!(out, "{name}")?;
        }
        return Ok(());
    }

    writeln!(
        out,
        "{:>10}  {:>10}  {:>5}  {:>8}  {:>19}  {:>8}  Name",
        "Length", "Size", "Cmpr", "Method", "Modified", "CRC-32"
    )?;
    writeln!(out, "{}", "-".repeat(78))?;

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;
    for info in archive.infolist().iter().filter(|i| cli.selects(&i.filename)) {
        let method = if info.is_encrypted() {
            format!("{}*", info.method().name())
        } else {
            info.method().name().to_string()
        };
        writeln!(
            out,
            "{:>10}  {:>10}  {}  {:>8}  {}  {:08x}  {}",
            info.file_size,
            info.compress_size,
            ratio(info.compress_size, info.file_size),
            method,
            info.date_time,
            info.crc,
            info.filename
        )?;
        if !info.is_dir() {
            total_uncompressed += info.file_size;
            total_compressed += info.compress_size;
            file_count += 1;
        }
    }

    writeln!(out, "{}", "-".repeat(78))?;
    writeln!(
        out,
        "{:>10}  {:>10}  {}  {:>41}  {} files",
        total_uncompressed,
        total_compressed,
        ratio(total_compressed, total_uncompressed),
        "",
        file_count
    )?;
    if !archive.comment().is_empty() {
        writeln!(out, "{}", String::from_utf8_lossy(archive.comment()))?;
    }
    Ok(())
}

/// Percentage saved by compression, right-aligned to five columns.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed == 0 || compressed >= uncompressed {
        return "   0%".to_string();
    }
    format!("{:>4}%", 100 - compressed * 100 / uncompressed)
}

/// Decompress every member and check it against its CRC.
fn test_archive(archive: &ZipArchive<LocalFile>, cli: &Cli) -> Result<()> {
    match archive.testzip()? {
        None => {
            if !cli.is_very_quiet() {
                println!("No errors detected in compressed data of {}.", cli.file);
            }
            Ok(())
        }
        Some(name) => bail!("First bad member in {}: {}", cli.file, name),
    }
}

fn extract_members(archive: &ZipArchive<LocalFile>, cli: &Cli) -> Result<()> {
    let selected: Vec<&ZipInfo> = archive
        .infolist()
        .iter()
        .filter(|i| !(cli.pipe && i.is_dir()) && cli.selects(&i.filename))
        .collect();

    if !cli.members.is_empty() && selected.is_empty() {
        bail!("no members of {} match {:?}", cli.file, cli.members);
    }

    let show_names = cli.pipe && selected.len() > 1;
    for info in selected {
        if cli.pipe {
            pipe_member(archive, info, show_names)?;
        } else {
            extract_member(archive, info, cli)?;
        }
    }
    Ok(())
}

fn pipe_member(archive: &ZipArchive<LocalFile>, info: &ZipInfo, show_name: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if show_name {
        writeln!(out, "--- {} ---", info.filename)?;
    }
    let mut reader = archive.open_info(info, None)?;
    io::copy(&mut reader, &mut out).with_context(|| format!("reading {}", info.filename))?;
    out.flush()?;
    Ok(())
}

/// Where `info` lands on disk, honouring `-d` and `-j`.
fn output_path(info: &ZipInfo, cli: &Cli) -> PathBuf {
    let base = cli.extract_dir.as_deref().map(PathBuf::from).unwrap_or_default();
    let relative = member_path(&info.filename);
    if cli.junk_paths {
        match relative.file_name() {
            Some(file_name) => base.join(file_name),
            None => base,
        }
    } else {
        base.join(relative)
    }
}

fn extract_member(archive: &ZipArchive<LocalFile>, info: &ZipInfo, cli: &Cli) -> Result<()> {
    if info.is_dir() {
        if !cli.junk_paths {
            let dir = output_path(info, cli);
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(&dir)?;
            }
        }
        return Ok(());
    }

    if member_path(&info.filename).as_os_str().is_empty() {
        if !cli.is_quiet() {
            eprintln!("Skipping: {:?} (no usable path)", info.filename);
        }
        return Ok(());
    }

    let target = output_path(info, cli);
    if target.exists() {
        if cli.never_overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (file exists)", info.filename);
            }
            return Ok(());
        }
        if !cli.overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (use -o to overwrite)", info.filename);
            }
            return Ok(());
        }
    }

    if !cli.is_quiet() {
        println!("  extracting: {}", target.display());
    }

    if cli.junk_paths {
        write_member(archive, info, &target)
    } else {
        let dir = cli.extract_dir.as_deref().unwrap_or(".");
        archive
            .extract_member(info, Path::new(dir), None)
            .with_context(|| format!("extracting {}", info.filename))?;
        Ok(())
    }
}

/// Stream one member to `target`, creating parent directories as needed.
fn write_member(archive: &ZipArchive<LocalFile>, info: &ZipInfo, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut reader = archive.open_info(info, None)?;
    let mut file = fs::File::create(target)
        .with_context(|| format!("cannot create {}", target.display()))?;
    io::copy(&mut reader, &mut file).with_context(|| format!("extracting {}", info.filename))?;
    Ok(())
}
