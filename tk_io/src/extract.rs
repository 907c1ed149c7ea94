//! Archive expansion for downloaded software.
//!
//! Formats are detected from the leading bytes of the file, never from its
//! name, because download URLs often carry no extension.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::read::GzDecoder;
use tar::Archive;
use xz2::read::XzDecoder;

use tk_core::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    TarXz,
    TarZst,
    Tar,
}

impl ArchiveFormat {
    /// Identify an archive from its first bytes.
    pub fn sniff(header: &[u8]) -> Option<Self> {
        if header.starts_with(b"PK\x03\x04") || header.starts_with(b"PK\x05\x06") {
            Some(ArchiveFormat::Zip)
        } else if header.starts_with(&[0x1f, 0x8b]) {
            Some(ArchiveFormat::TarGz)
        } else if header.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Some(ArchiveFormat::TarXz)
        } else if header.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Some(ArchiveFormat::TarZst)
        } else if header.len() >= 262 && &header[257..262] == b"ustar" {
            Some(ArchiveFormat::Tar)
        } else {
            None
        }
    }
}

/// Expand `archive` into `dest`, creating `dest` if needed.
///
/// Blocking; run it on a blocking thread from async code.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<ArchiveFormat, Error> {
    let failed = |message: String| Error::ExtractionFailed {
        path: archive.to_path_buf(),
        message,
    };

    let mut file = File::open(archive).map_err(|e| Error::io(archive, e))?;
    let mut header = Vec::with_capacity(512);
    (&mut file)
        .take(512)
        .read_to_end(&mut header)
        .map_err(|e| Error::io(archive, e))?;
    file.seek(SeekFrom::Start(0))
        .map_err(|e| Error::io(archive, e))?;

    let format = ArchiveFormat::sniff(&header)
        .ok_or_else(|| failed("unrecognised archive format".to_string()))?;

    fs::create_dir_all(dest).map_err(|e| Error::io(dest, e))?;

    match format {
        ArchiveFormat::Zip => extract_zip(file, dest).map_err(failed)?,
        ArchiveFormat::TarGz => unpack_tar(GzDecoder::new(file), dest).map_err(|e| failed(e.to_string()))?,
        ArchiveFormat::TarXz => unpack_tar(XzDecoder::new(file), dest).map_err(|e| failed(e.to_string()))?,
        ArchiveFormat::TarZst => {
            let decoder = zstd::stream::read::Decoder::new(file).map_err(|e| failed(e.to_string()))?;
            unpack_tar(decoder, dest).map_err(|e| failed(e.to_string()))?
        }
        ArchiveFormat::Tar => unpack_tar(file, dest).map_err(|e| failed(e.to_string()))?,
    }

    Ok(format)
}

fn unpack_tar<R: Read>(reader: R, dest: &Path) -> io::Result<()> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.unpack(dest)
}

fn extract_zip(file: File, dest: &Path) -> Result<(), String> {
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| format!("failed to open archive: {e}"))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| format!("failed to read archive entry: {e}"))?;

        // Entries escaping the destination are skipped.
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let outpath = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&outpath)
                .map_err(|e| format!("{}: {e}", outpath.display()))?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("{}: {e}", parent.display()))?;
        }
        let mut outfile =
            File::create(&outpath).map_err(|e| format!("{}: {e}", outpath.display()))?;
        io::copy(&mut entry, &mut outfile).map_err(|e| format!("{}: {e}", outpath.display()))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&outpath, fs::Permissions::from_mode(mode))
                .map_err(|e| format!("{}: {e}", outpath.display()))?;
        }
    }

    Ok(())
}
