// SPDX-License-Identifier: GPL-2.0

//! Demo driver for the image metadata resource library: reads an
//! already-decompressed metadata resource from disk and prints its
//! directory tree. Decompression itself stays a caller responsibility —
//! this binary exists to give the logging/CLI stack a real call site, not
//! to be a WIM tool.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::Parser;
use owo_colors::OwoColorize;

use wim_metadata::{CollectingSink, DentryId, ImageMetadata, ParseOptions, StreamType};

#[derive(Parser)]
#[command(about = "Dump a WIM image metadata resource's directory tree")]
struct Args {
    /// Path to an already-decompressed metadata resource file.
    resource: PathBuf,

    /// Emit the tree as JSON instead of a colored listing.
    #[arg(long)]
    json: bool,

    /// Tolerate directories with an unnamed DATA stream instead of
    /// rejecting them.
    #[arg(long)]
    lenient_directory_streams: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let bytes = std::fs::read(&args.resource)
        .with_context(|| format!("reading {}", args.resource.display()))?;

    let options = ParseOptions {
        strict_directory_streams: !args.lenient_directory_streams,
        ..ParseOptions::default()
    };
    let mut warnings = CollectingSink::default();
    let md = ImageMetadata::parse(&bytes, None, None, &options, &mut warnings)
        .context("parsing metadata resource")?;

    for w in &warnings.0 {
        log::warn!("tolerated anomaly: {w:?}");
    }

    if args.json {
        print_json(&md)?;
    } else {
        print_tree(&md);
    }

    Ok(())
}

fn print_json(md: &ImageMetadata) -> Result<()> {
    let json = serde_json::to_string_pretty(&md.dentries)?;
    println!("{json}");
    Ok(())
}

fn print_tree(md: &ImageMetadata) {
    let Some(root) = md.root else {
        println!("{}", "(empty image)".dimmed());
        return;
    };
    print_node(md, root, 0);
}

fn print_node(md: &ImageMetadata, id: DentryId, depth: usize) {
    let node = &md.dentries[id.0 as usize];
    let inode = &md.inodes[node.inode.0 as usize];
    let indent = "  ".repeat(depth);
    let name = if node.file_name.is_empty() {
        "/".to_string()
    } else {
        node.file_name_string()
    };

    if inode.is_directory() {
        println!("{indent}{}", name.blue().bold());
    } else {
        let size_hint = inode
            .streams
            .iter()
            .find(|s| s.stream_type == StreamType::Data)
            .map(|s| if s.hash.is_some() { "data" } else { "empty" })
            .unwrap_or("no-data");
        let modified = filetime_to_utc(inode.last_write_time)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "?".to_string());
        println!(
            "{indent}{} {} {}",
            name.green(),
            format!("[{size_hint}, nlink={}]", inode.nlink()).dimmed(),
            modified.dimmed()
        );
    }

    for &child in &node.children {
        print_node(md, child, depth + 1);
    }
}

/// FILETIME (100ns intervals since 1601-01-01) to a UTC timestamp.
fn filetime_to_utc(ft: u64) -> Option<chrono::DateTime<Utc>> {
    const FILETIME_UNIX_EPOCH_DIFF_100NS: i64 = 116_444_736_000_000_000;
    let unix_100ns = ft as i64 - FILETIME_UNIX_EPOCH_DIFF_100NS;
    let secs = unix_100ns.div_euclid(10_000_000);
    let nanos = unix_100ns.rem_euclid(10_000_000) * 100;
    Utc.timestamp_opt(secs, nanos as u32).single()
}
