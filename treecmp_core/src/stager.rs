use crate::lifecycle::RequestScope;
use bzip2::read::BzDecoder;
use filetime::{set_file_mtime, FileTime};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use treecmp_common::CompareError;
use xz2::read::XzDecoder;
use zip::ZipArchive;

const SNIFF_LEN: usize = 262;

/// Archive container formats that can be staged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    SevenZ,
}

impl ArchiveKind {
    /// Detect the format from the file name extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") || name.ends_with(".tbz") {
            Some(ArchiveKind::TarBz2)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(ArchiveKind::TarXz)
        } else if name.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else if name.ends_with(".7z") {
            Some(ArchiveKind::SevenZ)
        } else {
            None
        }
    }

    /// Detect the format from the leading bytes of the file
    pub fn from_magic(header: &[u8]) -> Option<Self> {
        if header.starts_with(b"PK\x03\x04")
            || header.starts_with(b"PK\x05\x06")
            || header.starts_with(b"PK\x07\x08")
        {
            Some(ArchiveKind::Zip)
        } else if header.starts_with(&[0x1f, 0x8b]) {
            Some(ArchiveKind::TarGz)
        } else if header.starts_with(b"BZh") {
            Some(ArchiveKind::TarBz2)
        } else if header.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Some(ArchiveKind::TarXz)
        } else if header.starts_with(&[b'7', b'z', 0xbc, 0xaf, 0x27, 0x1c]) {
            Some(ArchiveKind::SevenZ)
        } else if header.len() >= 262 && &header[257..262] == b"ustar" {
            Some(ArchiveKind::Tar)
        } else {
            None
        }
    }

    /// Content sniffing first (uploads often have no extension), then the name
    pub fn detect(path: &Path) -> Result<Self, CompareError> {
        let mut header = Vec::with_capacity(SNIFF_LEN);
        File::open(path)
            .and_then(|file| file.take(SNIFF_LEN as u64).read_to_end(&mut header))
            .map_err(|e| CompareError::archive(path, e))?;

        Self::from_magic(&header)
            .or_else(|| Self::from_path(path))
            .ok_or_else(|| CompareError::archive(path, "unsupported or unrecognized archive format"))
    }
}

/// An archive extracted into a scope-owned staging directory
#[derive(Debug, Clone)]
pub struct StagedArchive {
    pub kind: ArchiveKind,
    pub root: PathBuf,
    pub archive_size: u64,
}

/// Extracts archives so they can be walked like ordinary directories
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveStager;

impl ArchiveStager {
    pub fn new() -> Self {
        Self
    }

    /// Extract `archive_path` into a new directory owned by `scope`
    pub fn stage(
        &self,
        scope: &mut RequestScope,
        archive_path: &Path,
        label: &str,
    ) -> Result<StagedArchive, CompareError> {
        let meta = fs::metadata(archive_path).map_err(|e| CompareError::archive(archive_path, e))?;
        if !meta.is_file() {
            return Err(CompareError::archive(archive_path, "not a regular file"));
        }

        let kind = ArchiveKind::detect(archive_path)?;
        let root = scope.create_dir(label)?;
        info!("Staging {:?} archive {:?} into {:?}", kind, archive_path, root);

        match kind {
            ArchiveKind::Zip => extract_zip(archive_path, &root)?,
            ArchiveKind::Tar => extract_tar(open_archive(archive_path)?, archive_path, &root)?,
            ArchiveKind::TarGz => extract_tar(
                GzDecoder::new(open_archive(archive_path)?),
                archive_path,
                &root,
            )?,
            ArchiveKind::TarBz2 => extract_tar(
                BzDecoder::new(open_archive(archive_path)?),
                archive_path,
                &root,
            )?,
            ArchiveKind::TarXz => extract_tar(
                XzDecoder::new(open_archive(archive_path)?),
                archive_path,
                &root,
            )?,
            ArchiveKind::SevenZ => extract_sevenz(archive_path, &root)?,
        }

        Ok(StagedArchive {
            kind,
            root,
            archive_size: meta.len(),
        })
    }
}

fn open_archive(path: &Path) -> Result<BufReader<File>, CompareError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| CompareError::archive(path, e))
}

fn extract_zip(archive_path: &Path, dest: &Path) -> Result<(), CompareError> {
    let mut archive = ZipArchive::new(open_archive(archive_path)?)
        .map_err(|e| CompareError::archive(archive_path, e))?;
    let mut files = 0usize;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| CompareError::archive(archive_path, e))?;

        let relative = entry.enclosed_name().map(Path::to_path_buf).ok_or_else(|| {
            CompareError::archive(
                archive_path,
                format!("entry escapes staging directory: {}", entry.name()),
            )
        })?;
        let out_path = dest.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| CompareError::io_at(&out_path, e))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| CompareError::io_at(parent, e))?;
        }

        {
            let mut out_file =
                File::create(&out_path).map_err(|e| CompareError::io_at(&out_path, e))?;
            // Decompression and CRC failures surface here
            io::copy(&mut entry, &mut out_file)
                .map_err(|e| CompareError::archive(archive_path, format!("{}: {}", entry.name(), e)))?;
        }

        if let Ok(modified) = entry.last_modified().to_time() {
            let mtime = FileTime::from_unix_time(modified.unix_timestamp(), 0);
            set_file_mtime(&out_path, mtime).map_err(|e| CompareError::io_at(&out_path, e))?;
        }
        files += 1;
    }

    debug!("Extracted {} files from {:?}", files, archive_path);
    Ok(())
}

fn extract_sevenz(archive_path: &Path, dest: &Path) -> Result<(), CompareError> {
    let mut escaped = None;
    let mut files = 0usize;

    let outcome = sevenz_rust::decompress_file_with_extract_fn(
        archive_path,
        dest,
        |entry, reader, out_path| {
            if !is_enclosed(entry.name()) {
                escaped = Some(entry.name().to_string());
                return Err(sevenz_rust::Error::other("entry escapes staging directory"));
            }
            if !entry.is_directory() {
                files += 1;
            }
            sevenz_rust::default_entry_extract_fn(entry, reader, out_path)
        },
    );

    if let Some(name) = escaped {
        return Err(CompareError::archive(
            archive_path,
            format!("entry escapes staging directory: {}", name),
        ));
    }
    outcome.map_err(|e| CompareError::archive(archive_path, e))?;

    debug!("Extracted {} files from {:?}", files, archive_path);
    Ok(())
}

/// True when `name` stays below the directory it is joined onto
fn is_enclosed(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn extract_tar<R: Read>(reader: R, archive_path: &Path, dest: &Path) -> Result<(), CompareError> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_mtime(true);
    archive.set_overwrite(true);

    let entries = archive
        .entries()
        .map_err(|e| CompareError::archive(archive_path, e))?;
    let mut files = 0usize;

    for entry in entries {
        let mut entry = entry.map_err(|e| CompareError::archive(archive_path, e))?;
        let name = entry
            .path()
            .map(|p| p.display().to_string())
            .map_err(|e| CompareError::archive(archive_path, e))?;
        let is_file = entry.header().entry_type().is_file();

        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| CompareError::archive(archive_path, format!("{}: {}", name, e)))?;
        if !unpacked {
            return Err(CompareError::archive(
                archive_path,
                format!("entry escapes staging directory: {}", name),
            ));
        }

        if is_file {
            files += 1;
        }
    }

    debug!("Extracted {} files from {:?}", files, archive_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        for (name, data) in files {
            zip.start_file(*name, FileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(1_600_000_000);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn write_7z(path: &Path, files: &[(&str, &[u8])]) {
        let mut writer = sevenz_rust::SevenZWriter::create(path).unwrap();
        for (name, data) in files {
            let mut entry = sevenz_rust::SevenZArchiveEntry::new();
            entry.name = name.to_string();
            writer.push_archive_entry(entry, Some(*data)).unwrap();
        }
        writer.finish().unwrap();
    }

    fn stage_in(temp: &TempDir, archive: &Path) -> Result<(RequestScope, StagedArchive), CompareError> {
        let mut scope = RequestScope::new(temp.path().join("staging"))?;
        let staged = ArchiveStager::new().stage(&mut scope, archive, "extracted1")?;
        Ok((scope, staged))
    }

    #[test]
    fn test_detect_by_name() {
        assert_eq!(ArchiveKind::from_path(Path::new("a.ZIP")), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_path(Path::new("a.tar")), Some(ArchiveKind::Tar));
        assert_eq!(ArchiveKind::from_path(Path::new("a.tar.gz")), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_path(Path::new("a.tgz")), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_path(Path::new("a.tar.bz2")), Some(ArchiveKind::TarBz2));
        assert_eq!(ArchiveKind::from_path(Path::new("a.txz")), Some(ArchiveKind::TarXz));
        assert_eq!(ArchiveKind::from_path(Path::new("a.7z")), Some(ArchiveKind::SevenZ));
        assert_eq!(ArchiveKind::from_path(Path::new("a.rar")), None);
        assert_eq!(ArchiveKind::from_path(Path::new("")), None);
    }

    #[test]
    fn test_detect_by_magic_without_extension() {
        let temp = TempDir::new().unwrap();
        let upload = temp.path().join("3f9a1c0d");
        write_zip(&upload, &[("a.txt", b"hi")]);
        assert_eq!(ArchiveKind::detect(&upload).unwrap(), ArchiveKind::Zip);

        let tar_upload = temp.path().join("b71e22aa");
        fs::write(&tar_upload, tar_bytes(&[("x", b"x")])).unwrap();
        assert_eq!(ArchiveKind::detect(&tar_upload).unwrap(), ArchiveKind::Tar);
    }

    #[test]
    fn test_stage_zip_preserves_relative_paths() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("left.zip");
        write_zip(&archive, &[("a.txt", b"hi"), ("dir/sub/b.txt", b"yo")]);

        let (scope, staged) = stage_in(&temp, &archive).unwrap();
        assert_eq!(staged.kind, ArchiveKind::Zip);
        assert_eq!(staged.archive_size, fs::metadata(&archive).unwrap().len());
        assert_eq!(fs::read(staged.root.join("a.txt")).unwrap(), b"hi");
        assert_eq!(fs::read(staged.root.join("dir/sub/b.txt")).unwrap(), b"yo");

        let root = staged.root.clone();
        scope.release();
        assert!(!root.exists());
    }

    #[test]
    fn test_stage_zip_keeps_entry_mtime() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("dated.zip");
        let file = File::create(&archive).unwrap();
        let mut zip = ZipWriter::new(file);
        let stamp = zip::DateTime::from_date_and_time(2020, 1, 2, 3, 4, 6).unwrap();
        zip.start_file("dated.txt", FileOptions::default().last_modified_time(stamp))
            .unwrap();
        zip.write_all(b"old").unwrap();
        zip.finish().unwrap();

        let (_scope, staged) = stage_in(&temp, &archive).unwrap();
        let meta = fs::metadata(staged.root.join("dated.txt")).unwrap();
        let mtime = FileTime::from_last_modification_time(&meta);
        assert_eq!(mtime.unix_seconds(), 1_577_934_246);
    }

    #[test]
    fn test_stage_tar_variants() {
        let temp = TempDir::new().unwrap();
        let files: &[(&str, &[u8])] = &[("a.txt", b"hi"), ("nested/c.txt", b"yo")];
        let raw = tar_bytes(files);

        let plain = temp.path().join("plain.tar");
        fs::write(&plain, &raw).unwrap();

        let gz = temp.path().join("packed.tar.gz");
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&raw).unwrap();
        fs::write(&gz, enc.finish().unwrap()).unwrap();

        let bz = temp.path().join("packed.tar.bz2");
        let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        enc.write_all(&raw).unwrap();
        fs::write(&bz, enc.finish().unwrap()).unwrap();

        let xz = temp.path().join("packed.tar.xz");
        let mut enc = xz2::write::XzEncoder::new(Vec::new(), 6);
        enc.write_all(&raw).unwrap();
        fs::write(&xz, enc.finish().unwrap()).unwrap();

        for (path, kind) in [
            (&plain, ArchiveKind::Tar),
            (&gz, ArchiveKind::TarGz),
            (&bz, ArchiveKind::TarBz2),
            (&xz, ArchiveKind::TarXz),
        ] {
            let (_scope, staged) = stage_in(&temp, path).unwrap();
            assert_eq!(staged.kind, kind);
            assert_eq!(fs::read(staged.root.join("a.txt")).unwrap(), b"hi");
            assert_eq!(fs::read(staged.root.join("nested/c.txt")).unwrap(), b"yo");
        }
    }

    #[test]
    fn test_corrupt_archive_fails() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("broken.zip");
        fs::write(&archive, b"this is not a zip file at all").unwrap();

        let result = stage_in(&temp, &archive);
        assert!(matches!(result, Err(CompareError::Archive(_))));
        let staging = temp.path().join("staging");
        assert_eq!(fs::read_dir(&staging).unwrap().count(), 0, "failed stage leaked a directory");
    }

    #[test]
    fn test_truncated_gzip_fails() {
        let temp = TempDir::new().unwrap();
        let raw = tar_bytes(&[("a.txt", &[b'x'; 4096])]);
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&raw).unwrap();
        let packed = enc.finish().unwrap();

        let archive = temp.path().join("cut.tar.gz");
        fs::write(&archive, &packed[..packed.len() / 2]).unwrap();
        assert!(matches!(stage_in(&temp, &archive), Err(CompareError::Archive(_))));
    }

    #[test]
    fn test_unknown_format_fails() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("notes.txt");
        fs::write(&archive, b"plain text").unwrap();
        assert!(matches!(stage_in(&temp, &archive), Err(CompareError::Archive(_))));
    }

    #[test]
    fn test_missing_archive_fails() {
        let temp = TempDir::new().unwrap();
        let result = stage_in(&temp, &temp.path().join("absent.zip"));
        assert!(matches!(result, Err(CompareError::Archive(_))));
    }

    #[test]
    fn test_zip_traversal_is_rejected() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("evil.zip");
        write_zip(&archive, &[("../escaped.txt", b"x")]);

        assert!(matches!(stage_in(&temp, &archive), Err(CompareError::Archive(_))));
        assert!(!temp.path().join("escaped.txt").exists());
    }

    #[test]
    fn test_tar_traversal_is_rejected() {
        let temp = TempDir::new().unwrap();
        let data = b"x";
        let mut header = tar::Header::new_gnu();
        {
            let name = b"../escaped.txt";
            let gnu = header.as_gnu_mut().unwrap();
            gnu.name[..name.len()].copy_from_slice(name);
        }
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        let mut builder = tar::Builder::new(Vec::new());
        builder.append(&header, &data[..]).unwrap();
        let archive = temp.path().join("evil.tar");
        fs::write(&archive, builder.into_inner().unwrap()).unwrap();

        assert!(matches!(stage_in(&temp, &archive), Err(CompareError::Archive(_))));
        assert!(!temp.path().join("staging").join("escaped.txt").exists());
    }

    #[test]
    fn test_stage_sevenz() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("bundle.7z");
        write_7z(&archive, &[("a.txt", b"hi"), ("dir/sub/b.txt", b"yo")]);
        assert_eq!(ArchiveKind::detect(&archive).unwrap(), ArchiveKind::SevenZ);

        let (scope, staged) = stage_in(&temp, &archive).unwrap();
        assert_eq!(staged.kind, ArchiveKind::SevenZ);
        assert_eq!(fs::read(staged.root.join("a.txt")).unwrap(), b"hi");
        assert_eq!(fs::read(staged.root.join("dir/sub/b.txt")).unwrap(), b"yo");

        let root = staged.root.clone();
        scope.release();
        assert!(!root.exists());
    }

    #[test]
    fn test_truncated_sevenz_fails() {
        let temp = TempDir::new().unwrap();
        let full = temp.path().join("full.7z");
        write_7z(&full, &[("a.txt", &[b'x'; 4096]), ("b.txt", b"yo")]);
        let packed = fs::read(&full).unwrap();

        let archive = temp.path().join("cut.7z");
        fs::write(&archive, &packed[..packed.len() / 2]).unwrap();
        assert!(matches!(stage_in(&temp, &archive), Err(CompareError::Archive(_))));
        let staging = temp.path().join("staging");
        assert_eq!(fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[test]
    fn test_sevenz_traversal_is_rejected() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("evil.7z");
        write_7z(&archive, &[("../escaped.txt", b"x")]);

        assert!(matches!(stage_in(&temp, &archive), Err(CompareError::Archive(_))));
        assert!(!temp.path().join("staging").join("escaped.txt").exists());
        assert!(!temp.path().join("escaped.txt").exists());
    }

    #[test]
    fn test_enclosed_names() {
        assert!(is_enclosed("a.txt"));
        assert!(is_enclosed("dir/./b.txt"));
        assert!(!is_enclosed("../up.txt"));
        assert!(!is_enclosed("dir/../../up.txt"));
        assert!(!is_enclosed("/etc/passwd"));
        assert!(!is_enclosed(""));
    }
}
