use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use treecmp_common::{CompareError, ContentDigest};

const BUFFER_SIZE: usize = 64 * 1024;

/// Streaming BLAKE3 content hasher
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher;

impl ContentHasher {
    pub fn new() -> Self {
        Self
    }

    /// Hash the complete contents of a file
    pub fn digest(&self, path: &Path) -> Result<ContentDigest, CompareError> {
        let file = File::open(path).map_err(|e| CompareError::hash(path, e))?;
        self.digest_reader(file)
            .map_err(|e| CompareError::hash(path, e))
    }

    /// Hash everything a reader yields until EOF
    pub fn digest_reader<R: Read>(&self, mut reader: R) -> std::io::Result<ContentDigest> {
        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0; BUFFER_SIZE];

        loop {
            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..n]);
        }

        Ok(hasher.finalize().into())
    }
}
