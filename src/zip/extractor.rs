use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::archive::ZipArchive;
use super::info::ZipInfo;
use crate::error::{Result, ZipError};
use crate::io::Source;

/// Characters Windows does not allow in file names.
const WINDOWS_ILLEGAL: &[char] = &[':', '<', '>', '|', '"', '?', '*'];

/// Turn an archive member name into a relative path that stays inside the
/// extraction directory.
///
/// Drive letters, UNC prefixes, empty segments, `.` and `..` are dropped,
/// so an absolute or climbing name is reinterpreted as relative. May return
/// an empty path.
pub fn member_path(filename: &str) -> PathBuf {
    member_path_for(filename, cfg!(windows))
}

fn member_path_for(filename: &str, windows: bool) -> PathBuf {
    let mut name = filename.replace('\\', "/");
    if let Some(rest) = strip_drive(&name) {
        name = rest.to_string();
    }

    let mut path = PathBuf::new();
    for part in name.split('/') {
        if part.is_empty() || part == "." || part == ".." {
            continue;
        }
        if windows {
            let cleaned: String = part
                .chars()
                .map(|c| if WINDOWS_ILLEGAL.contains(&c) { '_' } else { c })
                .collect();
            let cleaned = cleaned.trim_end_matches([' ', '.']);
            if !cleaned.is_empty() {
                path.push(cleaned);
            }
        } else {
            path.push(part);
        }
    }
    path
}

/// Drop a `C:` drive or `//server/share` prefix.
fn strip_drive(name: &str) -> Option<&str> {
    let bytes = name.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Some(&name[2..]);
    }
    let unc = name.strip_prefix("//")?;
    let mut parts = unc.splitn(3, '/');
    let server = parts.next()?;
    let share = parts.next()?;
    if server.is_empty() || share.is_empty() {
        return None;
    }
    Some(parts.next().unwrap_or(""))
}

impl<R: Source> ZipArchive<R> {
    /// Extract one member below `dir`. Returns the path written.
    pub fn extract(
        &self,
        name: &str,
        dir: impl AsRef<Path>,
        password: Option<&[u8]>,
    ) -> Result<PathBuf> {
        let info = self.getinfo(name)?;
        self.extract_member(info, dir.as_ref(), password)
    }

    /// Extract `members`, or every member when `None`, below `dir`.
    pub fn extract_all(
        &self,
        dir: impl AsRef<Path>,
        members: Option<&[&str]>,
        password: Option<&[u8]>,
    ) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        let mut written = Vec::new();
        match members {
            Some(names) => {
                for name in names {
                    let info = self.getinfo(name)?;
                    written.push(self.extract_member(info, dir, password)?);
                }
            }
            None => {
                for info in self.infolist() {
                    written.push(self.extract_member(info, dir, password)?);
                }
            }
        }
        Ok(written)
    }

    /// Extract the member described by `info` below `dir`.
    pub fn extract_member(
        &self,
        info: &ZipInfo,
        dir: &Path,
        password: Option<&[u8]>,
    ) -> Result<PathBuf> {
        let relative = member_path(&info.filename);
        if relative.as_os_str().is_empty() && !info.is_dir() {
            return Err(ZipError::EmptyFilename(info.filename.clone()));
        }
        let target = dir.join(&relative);

        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        if info.is_dir() {
            if !target.is_dir() {
                fs::create_dir_all(&target)?;
            }
            return Ok(target);
        }

        let mut reader = self.open_info(info, password)?;
        let mut out = fs::File::create(&target)?;
        let copied = std::io::copy(&mut reader, &mut out)?;
        debug!(name = %info.filename, path = %target.display(), bytes = copied, "extracted member");
        Ok(target)
    }
}
