//! Zip extraction with byte-based progress.
//!
//! Member names are stored as UTF-8 by modern tools and as GBK by older
//! Windows archivers without marking which; names that are not valid UTF-8
//! are decoded as GBK. Members that would land outside the output directory
//! fail the extraction.

use encoding_rs::GBK;
use std::borrow::Cow;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;

use crate::core::error::{GatewayError, GatewayResult};
use crate::task::node::ProgressResult;

/// Extract `zipfile` into `output`, reporting progress after every member
///
/// Returns the completion result; it is the only one that reports 100%.
pub fn extract_zip<F>(zipfile: &Path, output: &Path, mut on_progress: F) -> GatewayResult<ProgressResult>
where
    F: FnMut(&ProgressResult),
{
    let file = File::open(zipfile)?;
    let mut archive = ZipArchive::new(file).map_err(|_| GatewayError::NotZipFile {
        path: zipfile.display().to_string(),
    })?;

    let total = uncompressed_size(&mut archive)?;
    fs::create_dir_all(output)?;

    let mut current = 0u64;
    for index in 0..archive.len() {
        let mut member = archive.by_index(index)?;
        let name = decode_name(member.name_raw()).into_owned();
        let relative = safe_relative(&name).ok_or_else(|| {
            GatewayError::validation("zipfile", format!("archive member escapes the output directory: {}", name))
        })?;
        let target = output.join(&relative);

        if member.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            current += io::copy(&mut member, &mut out)?;
        }

        debug!(entry = %name, current, total, "Extracted archive member");
        on_progress(&ProgressResult::running(current, total, name));
    }

    Ok(ProgressResult::done(current, total))
}

fn uncompressed_size(archive: &mut ZipArchive<File>) -> GatewayResult<u64> {
    let mut total = 0;
    for index in 0..archive.len() {
        total += archive.by_index(index)?.size();
    }
    Ok(total)
}

/// UTF-8 when valid, GBK otherwise
pub fn decode_name(raw: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(raw) {
        Ok(name) => Cow::Borrowed(name),
        Err(_) => {
            let (decoded, _, _) = GBK.decode(raw);
            decoded
        }
    }
}

/// Relative path of a member, or `None` when it is absolute or climbs out
pub(crate) fn safe_relative(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    let mut relative = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}
