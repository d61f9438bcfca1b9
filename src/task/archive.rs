//! Archive creation: zip, tar, or gzipped tar.
//!
//! Directory nodes add their contents (not the directory itself) at the
//! archive root, file nodes are stored under their base name, and string
//! nodes store inline content under `name`.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::core::error::{GatewayError, GatewayResult};
use crate::task::node::{ArchiveFormat, ArchiveNode, ArchiveNodeKind, ArchiveOptions};

const DEFAULT_LEVEL: u32 = 6;

/// Archive path with the format's extension added when `filename` has none
pub fn archive_path(filename: &Path, options: &ArchiveOptions) -> PathBuf {
    let raw = filename.to_string_lossy();
    let trimmed = raw.trim_end_matches('.');
    let mut path = PathBuf::from(trimmed);
    if path.extension().is_none() {
        let ext = match (options.format, options.gzip) {
            (ArchiveFormat::Zip, _) => "zip",
            (ArchiveFormat::Tar, false) => "tar",
            (ArchiveFormat::Tar, true) => "tar.gz",
        };
        path = PathBuf::from(format!("{}.{}", trimmed, ext));
    }
    path
}

/// One file to store: source on disk or inline bytes, and its name in the archive
enum Item {
    Directory(String),
    File { source: PathBuf, name: String },
    Inline { content: Vec<u8>, name: String },
}

impl Item {
    fn name(&self) -> &str {
        match self {
            Item::Directory(name) => name,
            Item::File { name, .. } | Item::Inline { name, .. } => name,
        }
    }

    fn kind(&self) -> ArchiveNodeKind {
        match self {
            Item::Directory(_) => ArchiveNodeKind::Directory,
            Item::File { .. } => ArchiveNodeKind::File,
            Item::Inline { .. } => ArchiveNodeKind::String,
        }
    }
}

/// Build an archive, reporting each stored entry
///
/// Returns the node describing the finished archive file.
pub fn create_archive<F>(filename: &Path, options: &ArchiveOptions, mut on_entry: F) -> GatewayResult<ArchiveNode>
where
    F: FnMut(&ArchiveNode),
{
    let path = archive_path(filename, options);
    let items = collect_items(&options.content)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let level = options.level.unwrap_or(DEFAULT_LEVEL).min(9);
    let file = File::create(&path)?;

    let mut report = |item: &Item| {
        debug!(entry = %item.name(), "Archived entry");
        on_entry(&ArchiveNode {
            kind: item.kind(),
            name: item.name().to_string(),
            content: None,
        });
    };

    match options.format {
        ArchiveFormat::Zip => write_zip(file, &items, level, options.comment.as_deref(), &mut report)?,
        ArchiveFormat::Tar if options.gzip => {
            let encoder = GzEncoder::new(file, Compression::new(level));
            write_tar(encoder, &items, &mut report)?.finish()?;
        }
        ArchiveFormat::Tar => {
            write_tar(file, &items, &mut report)?;
        }
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(ArchiveNode {
        kind: ArchiveNodeKind::File,
        name,
        content: None,
    })
}

fn collect_items(nodes: &[ArchiveNode]) -> GatewayResult<Vec<Item>> {
    let mut items = Vec::new();
    for node in nodes {
        match node.kind {
            ArchiveNodeKind::Directory => {
                let root = PathBuf::from(&node.name);
                if !root.is_dir() {
                    return Err(GatewayError::not_found(format!("directory {}", node.name)));
                }
                walk(&root, &root, &mut items)?;
            }
            ArchiveNodeKind::File => {
                let source = PathBuf::from(&node.name);
                if !source.is_file() {
                    return Err(GatewayError::not_found(format!("file {}", node.name)));
                }
                let name = source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| node.name.clone());
                items.push(Item::File { source, name });
            }
            ArchiveNodeKind::String => items.push(Item::Inline {
                content: node.content.clone().unwrap_or_default().into_bytes(),
                name: node.name.clone(),
            }),
        }
    }
    Ok(items)
}

/// Depth-first listing of `dir` with names relative to `root`, sorted per level
fn walk(root: &Path, dir: &Path, items: &mut Vec<Item>) -> GatewayResult<()> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, io::Error>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .map_err(|e| GatewayError::internal(e.to_string()))?
            .to_string_lossy()
            .replace('\\', "/");
        if entry.file_type()?.is_dir() {
            items.push(Item::Directory(format!("{}/", relative)));
            walk(root, &path, items)?;
        } else {
            items.push(Item::File {
                source: path,
                name: relative,
            });
        }
    }
    Ok(())
}

fn write_zip<F>(file: File, items: &[Item], level: u32, comment: Option<&str>, report: &mut F) -> GatewayResult<()>
where
    F: FnMut(&Item),
{
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(level as i32));

    for item in items {
        match item {
            Item::Directory(name) => writer.add_directory(name.as_str(), options)?,
            Item::File { source, name } => {
                writer.start_file(name.as_str(), options)?;
                io::copy(&mut File::open(source)?, &mut writer)?;
            }
            Item::Inline { content, name } => {
                writer.start_file(name.as_str(), options)?;
                writer.write_all(content)?;
            }
        }
        report(item);
    }

    if let Some(comment) = comment {
        writer.set_comment(comment);
    }
    writer.finish()?;
    Ok(())
}

fn write_tar<W, F>(out: W, items: &[Item], report: &mut F) -> GatewayResult<W>
where
    W: Write,
    F: FnMut(&Item),
{
    let mut builder = tar::Builder::new(out);
    for item in items {
        match item {
            Item::Directory(name) => {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                header.set_mtime(now_secs());
                builder.append_data(&mut header, name, io::empty())?;
            }
            Item::File { source, name } => {
                builder.append_path_with_name(source, name)?;
            }
            Item::Inline { content, name } => {
                let mut header = tar::Header::new_gnu();
                header.set_mode(0o644);
                header.set_size(content.len() as u64);
                header.set_mtime(now_secs());
                builder.append_data(&mut header, name, content.as_slice())?;
            }
        }
        report(item);
    }
    Ok(builder.into_inner()?)
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
