//! Dump, read, verify and write command implementations.

use anyhow::{Context, Result};
use console::style;
use eeprommer::{
    AckCheck, FileSink, FileSource, NativePort, OperationRequest, Programmer, VerifyOutcome,
    WriteMode,
};
use std::io::{self, Write as _};
use std::path::Path;

use crate::config::Config;
use crate::{Cli, CliError, ReadArgs, RegionArgs, open_programmer, progress_bar};

/// Report a trailer that was not the expected ack.
fn note_trailer(cli: &Cli, trailer: AckCheck) {
    if !trailer.is_matched() && !cli.quiet {
        eprintln!(
            "{} Device did not end the transfer cleanly ({trailer})",
            style("⚠").yellow()
        );
    }
}

/// Dump command implementation.
pub(crate) fn cmd_dump(cli: &Cli, config: &Config, region: &RegionArgs) -> Result<()> {
    let path = region.require_file("dump")?;
    let request = region.request(WriteMode::Unpaged);

    let mut programmer = open_programmer(cli, config)?;
    let mut sink = FileSink::new(path);

    let pb = progress_bar(cli, request.byte_len(), "Dumping");
    let report = programmer
        .dump(&request, Some(&mut sink), |done, _| {
            pb.set_position(done as u64);
        })
        .with_context(|| format!("Dump to {} failed", path.display()))?;
    pb.finish_and_clear();

    note_trailer(cli, report.trailer);
    if !cli.quiet {
        eprintln!(
            "{} Dumped {} bytes from 0x{:08x} to {}",
            style("✓").green(),
            report.bytes,
            request.address,
            style(path.display()).yellow()
        );
    }

    Ok(())
}

/// Read command implementation. Lines go to stdout.
pub(crate) fn cmd_read(cli: &Cli, config: &Config, range: &ReadArgs) -> Result<()> {
    let request = range.request();
    let mut programmer = open_programmer(cli, config)?;

    let mut out = io::stdout().lock();
    for line in programmer.read_ascii(&request)? {
        writeln!(out, "{}", line?)?;
    }
    out.flush()?;

    Ok(())
}

/// Verify command implementation.
pub(crate) fn cmd_verify(cli: &Cli, config: &Config, region: &RegionArgs) -> Result<()> {
    let path = region.require_file("verify")?;
    let request = region.request(WriteMode::Unpaged);
    let mut source = FileSource::open(path)?;

    let mut programmer = open_programmer(cli, config)?;
    verify_region(cli, &mut programmer, &request, &mut source, path)
}

/// Write and write-paged command implementation.
pub(crate) fn cmd_write(
    cli: &Cli,
    config: &Config,
    region: &RegionArgs,
    write_mode: WriteMode,
    verify: bool,
) -> Result<()> {
    let path = region.require_file("write")?;
    let request = region.request(write_mode);
    let mut source = FileSource::open(path)?;

    if !cli.quiet {
        let mode = match write_mode {
            WriteMode::Unpaged => String::new(),
            WriteMode::Paged { page_size } => format!(" ({page_size}-byte pages)"),
        };
        eprintln!(
            "{} Writing {} KiB of {} at offset 0x{:x} to 0x{:08x}{mode}",
            style("📦").cyan(),
            request.kbytes,
            style(path.display()).yellow(),
            request.offset,
            request.address
        );
    }

    let mut programmer = open_programmer(cli, config)?;

    let pb = progress_bar(cli, request.byte_len(), "Writing");
    let report = programmer
        .write(&request, Some(&mut source), |done, _| {
            pb.set_position(done as u64);
        })
        .context("Write failed")?;
    pb.finish_and_clear();

    if !cli.quiet {
        eprintln!(
            "{} Wrote {} bytes in {:.2} seconds",
            style("✓").green(),
            report.bytes,
            report.elapsed.as_secs_f64()
        );
    }

    if verify {
        verify_region(cli, &mut programmer, &request, &mut source, path)?;
    }

    Ok(())
}

fn verify_region(
    cli: &Cli,
    programmer: &mut Programmer<NativePort>,
    request: &OperationRequest,
    source: &mut FileSource,
    path: &Path,
) -> Result<()> {
    let pb = progress_bar(cli, request.byte_len(), "Verifying");
    let report = programmer
        .verify(request, Some(source), |done, _| {
            pb.set_position(done as u64);
        })
        .context("Verify failed")?;
    pb.finish_and_clear();

    note_trailer(cli, report.trailer);
    match report.outcome {
        VerifyOutcome::Equal => {
            if !cli.quiet {
                eprintln!(
                    "{} Contents match {}",
                    style("✓").green(),
                    style(path.display()).yellow()
                );
            }
            Ok(())
        },
        VerifyOutcome::NotEqual(count) => Err(CliError::Mismatch(count).into()),
    }
}
