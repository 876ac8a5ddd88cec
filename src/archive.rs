//! Zip archive construction for directory and multi-path shares.
//!
//! The server only ever serves a single file, so directories and multi-path
//! inputs are bundled into one zip in the working directory before serving.

use anyhow::{Context, Result};
use rand::seq::IndexedRandom;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const ADJECTIVES: &[&str] = &[
    "quick", "silent", "bright", "dark", "clear", "calm", "swift", "deep", "soft", "loud",
    "fresh", "frozen", "warm", "shining", "gentle", "smooth", "rough", "hollow", "solid", "vivid",
];

const NOUNS: &[&str] = &[
    "fox", "owl", "star", "cloud", "tree", "river", "moon", "sun", "rock", "wave", "breeze",
    "shard", "gem", "mist", "dawn", "dusk", "flame", "peak", "canyon", "echo",
];

/// Bundle a single directory into `dest`, warning when it contains no files.
pub fn zip_directory(source_dir: &Path, dest: &Path) -> Result<()> {
    let count = zip_paths(std::slice::from_ref(&source_dir.to_path_buf()), dest)?;
    if count == 0 {
        warn!("the directory is empty, the archive contains no files");
    }
    Ok(())
}

/// Bundle one or more paths into a zip at `dest`. Each input's base name
/// becomes a top-level entry; directories are walked recursively with their
/// layout preserved. Returns the number of regular-file entries written
/// (directory entries do not count).
pub fn zip_paths(sources: &[PathBuf], dest: &Path) -> Result<usize> {
    let out = File::create(dest)
        .with_context(|| format!("creating archive {}", dest.display()))?;
    let mut writer = ZipWriter::new(out);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut file_count = 0usize;
    for source in sources {
        let meta = std::fs::metadata(source)
            .with_context(|| format!("reading source path {}", source.display()))?;
        let base = source
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("resolving base name of {}", source.display()))?;

        if meta.is_dir() {
            add_directory(&mut writer, source, base, options, &mut file_count)?;
        } else {
            add_file(&mut writer, source, base, options, &mut file_count)?;
        }
    }

    writer.finish().context("finalizing archive")?;
    Ok(file_count)
}

fn add_directory(
    writer: &mut ZipWriter<File>,
    dir: &Path,
    base: &str,
    options: SimpleFileOptions,
    file_count: &mut usize,
) -> Result<()> {
    for entry in WalkDir::new(dir) {
        let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
        let rel = entry
            .path()
            .strip_prefix(dir)
            .with_context(|| format!("relativizing {}", entry.path().display()))?;

        let name = if rel.as_os_str().is_empty() {
            base.to_string()
        } else {
            format!("{base}/{}", rel.to_string_lossy())
        };

        if entry.file_type().is_dir() {
            writer
                .add_directory(name.as_str(), options)
                .with_context(|| format!("adding directory {name} to archive"))?;
        } else {
            add_file(writer, entry.path(), &name, options, file_count)?;
        }
    }
    Ok(())
}

fn add_file(
    writer: &mut ZipWriter<File>,
    path: &Path,
    name: &str,
    options: SimpleFileOptions,
    file_count: &mut usize,
) -> Result<()> {
    writer
        .start_file(name, options)
        .with_context(|| format!("adding {name} to archive"))?;
    let mut file =
        File::open(path).with_context(|| format!("opening {}", path.display()))?;
    io::copy(&mut file, writer)
        .with_context(|| format!("copying {} into archive", path.display()))?;
    *file_count += 1;
    Ok(())
}

/// Generate an `adjective-noun` name for archives built from multiple inputs,
/// where no single base name applies.
pub fn random_archive_name() -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quick");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("fox");
    format!("{adjective}-{noun}")
}
