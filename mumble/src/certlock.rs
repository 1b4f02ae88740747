//! Certificate pinning collaborator: first connection to a server writes
//! its chain to a file, every later connection is checked against it.
//!
//! A later mismatch is a hard failure rather than an appended trust
//! anchor — pinning that silently grows its trust store on every mismatch
//! isn't pinning.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use rustls::Certificate;
use rustls_pemfile::Item;

use crate::config::TlsVerify;
use crate::error::{Error, Result};

pub struct CertLock {
    path: PathBuf,
}

impl CertLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CertLock { path: path.into() }
    }

    /// Wraps this lock as a [`TlsVerify`] hook for [`crate::config::MumbleConfig`].
    pub fn into_verify(self) -> TlsVerify {
        std::sync::Arc::new(move |chain: &[Certificate]| self.check(chain))
    }

    fn check(&self, chain: &[Certificate]) -> Result<()> {
        match fs::read(&self.path) {
            Ok(pinned_pem) => {
                let pinned = parse_chain(&pinned_pem)?;
                if pinned != chain {
                    return Err(Error::Config(format!(
                        "certificate chain for this server no longer matches the one pinned at {}",
                        self.path.display()
                    )));
                }
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::write(&self.path, encode_chain(chain)).map_err(|e| {
                    Error::Config(format!(
                        "failed to write certificate lock to {}: {e}",
                        self.path.display()
                    ))
                })
            }
            Err(e) => Err(Error::Config(format!(
                "failed to read certificate lock at {}: {e}",
                self.path.display()
            ))),
        }
    }
}

fn parse_chain(pem: &[u8]) -> Result<Vec<Certificate>> {
    let mut cursor = Cursor::new(pem);
    let mut out = Vec::new();
    while let Some(item) =
        rustls_pemfile::read_one(&mut cursor).map_err(|e| Error::Config(format!("invalid pinned certificate file: {e}")))?
    {
        if let Item::X509Certificate(der) = item {
            out.push(Certificate(der));
        }
    }
    Ok(out)
}

fn encode_chain(chain: &[Certificate]) -> Vec<u8> {
    let mut out = Vec::new();
    for cert in chain {
        let pem = pem_encode(&cert.0);
        out.extend_from_slice(pem.as_bytes());
    }
    out
}

fn pem_encode(der: &[u8]) -> String {
    use std::fmt::Write;
    let encoded = base64_lines(der);
    let mut out = String::from("-----BEGIN CERTIFICATE-----\n");
    for line in encoded {
        let _ = writeln!(out, "{line}");
    }
    out.push_str("-----END CERTIFICATE-----\n");
    out
}

/// Minimal base64 encoder wrapped to 64-character lines, matching the PEM
/// convention `pem.Encode` follows on the Go side. No base64 crate is in
/// the dependency stack, so this hand-rolls the standard alphabet rather
/// than pulling one in for a handful of lines.
fn base64_lines(data: &[u8]) -> Vec<String> {
    const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    let mut encoded = String::new();
    for chunk in data.chunks(3) {
        let b0 = chunk[0];
        let b1 = chunk.get(1).copied();
        let b2 = chunk.get(2).copied();

        encoded.push(ALPHABET[(b0 >> 2) as usize] as char);
        encoded.push(ALPHABET[(((b0 & 0x03) << 4) | (b1.unwrap_or(0) >> 4)) as usize] as char);
        encoded.push(match b1 {
            Some(b1) => ALPHABET[(((b1 & 0x0F) << 2) | (b2.unwrap_or(0) >> 6)) as usize] as char,
            None => '=',
        });
        encoded.push(match b2 {
            Some(b2) => ALPHABET[(b2 & 0x3F) as usize] as char,
            None => '=',
        });
    }

    encoded
        .as_bytes()
        .chunks(64)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect()
}

#[allow(dead_code)]
fn exists(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_connection_writes_the_chain() {
        let dir = std::env::temp_dir().join(format!("mumble-certlock-test-{}", std::process::id()));
        let _ = fs::create_dir_all(&dir);
        let path = dir.join("pin.pem");
        let _ = fs::remove_file(&path);

        let lock = CertLock::new(&path);
        let chain = vec![Certificate(vec![1, 2, 3, 4, 5])];
        lock.check(&chain).unwrap();
        assert!(path.exists());

        // second connection with the same chain succeeds
        let lock = CertLock::new(&path);
        lock.check(&chain).unwrap();

        // a different chain is rejected
        let lock = CertLock::new(&path);
        let other = vec![Certificate(vec![9, 9, 9])];
        assert!(lock.check(&other).is_err());

        let _ = fs::remove_file(&path);
    }
}
