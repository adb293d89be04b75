use crate::config::{normalize_extensions, FingerprintSettings};
use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, BufReader, Read};
use std::path::Path;
use twox_hash::XxHash64;

const READ_CHUNK: usize = 64 * 1024;

/// Content fingerprints for change detection. Text subtitle files are small
/// and hashed in full; large media files are hashed over a bounded prefix.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    prefix_bytes: usize,
    full_hash_extensions: Vec<String>,
}

impl Fingerprinter {
    pub fn new(settings: &FingerprintSettings) -> Self {
        Self {
            prefix_bytes: settings.prefix_bytes,
            full_hash_extensions: normalize_extensions(&settings.full_hash_extensions),
        }
    }

    pub fn hashes_in_full(&self, path: &Path) -> bool {
        let ext = extension_of(path);
        self.full_hash_extensions.iter().any(|e| *e == ext)
    }

    /// Hex-encoded XxHash64 of the file (or of its prefix).
    pub fn fingerprint(&self, path: &Path) -> io::Result<String> {
        let hash = if self.hashes_in_full(path) {
            hash_full_file(path)?
        } else {
            hash_data(&read_portion(path, self.prefix_bytes)?)
        };
        Ok(format!("{:016x}", hash))
    }
}

/// `.ext` in lower case, or an empty string when the path has none.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

fn read_portion(file: &Path, length: usize) -> io::Result<Vec<u8>> {
    let f = File::open(file)?;
    let mut buffer = Vec::with_capacity(length.min(READ_CHUNK));
    f.take(length as u64).read_to_end(&mut buffer)?;
    Ok(buffer)
}

fn hash_full_file(file: &Path) -> io::Result<u64> {
    let mut reader = BufReader::new(File::open(file)?);
    let mut hasher = XxHash64::with_seed(0);
    let mut buffer = vec![0; READ_CHUNK];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.write(&buffer[..n]);
    }
    Ok(hasher.finish())
}

pub fn hash_data(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn fingerprinter(prefix_bytes: usize) -> Fingerprinter {
        Fingerprinter::new(&FingerprintSettings {
            prefix_bytes,
            ..FingerprintSettings::default()
        })
    }

    #[test]
    fn test_subtitle_changes_past_prefix_are_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("episode.srt");
        let fp = fingerprinter(4);

        fs::write(&path, b"1234-first").unwrap();
        let before = fp.fingerprint(&path).unwrap();
        fs::write(&path, b"1234-second").unwrap();
        let after = fp.fingerprint(&path).unwrap();

        assert_ne!(before, after);
        assert_eq!(before.len(), 16);
    }

    #[test]
    fn test_media_files_hash_only_the_prefix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("movie.MKV");
        let fp = fingerprinter(4);

        fs::write(&path, b"1234-first").unwrap();
        let before = fp.fingerprint(&path).unwrap();
        fs::write(&path, b"1234-second").unwrap();
        let after = fp.fingerprint(&path).unwrap();

        assert!(!fp.hashes_in_full(&path));
        assert_eq!(before, after);
    }

    #[test]
    fn test_full_hash_matches_in_memory_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.vtt");
        let data = vec![7u8; READ_CHUNK * 2 + 13];
        fs::write(&path, &data).unwrap();

        assert_eq!(hash_full_file(&path).unwrap(), hash_data(&data));
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(Path::new("/a/B.SRT")), ".srt");
        assert_eq!(extension_of(Path::new("/a/noext")), "");
    }
}
