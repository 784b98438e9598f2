use std::io::Read;
use std::{fs, io, path::Path};

use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Streaming hasher over the digest algorithms catalogs publish.
pub(crate) enum ContentHasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl ContentHasher {
    pub(crate) fn sha1() -> Self {
        Self::Sha1(Sha1::new())
    }

    pub(crate) fn sha256() -> Self {
        Self::Sha256(Sha256::new())
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    pub(crate) fn finalize_hex(self) -> String {
        match self {
            Self::Sha1(h) => hex_encode(&h.finalize()),
            Self::Sha256(h) => hex_encode(&h.finalize()),
        }
    }
}

/// Hashes `path` and returns `(size_in_bytes, hex_digest)`.
pub(crate) fn hash_file(path: &Path, mut hasher: ContentHasher) -> io::Result<(u64, String)> {
    let mut file = fs::File::open(path)?;
    let mut buf = [0u8; 8192];
    let mut total = 0u64;
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        total += read as u64;
        hasher.update(&buf[..read]);
    }
    Ok((total, hasher.finalize_hex()))
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(nibble_to_hex(b >> 4));
        out.push(nibble_to_hex(b & 0x0f));
    }
    out
}

fn nibble_to_hex(n: u8) -> char {
    match n {
        0..=9 => (b'0' + n) as char,
        10..=15 => (b'a' + (n - 10)) as char,
        _ => '0',
    }
}
