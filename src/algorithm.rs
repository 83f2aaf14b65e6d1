use crate::checksum::Checksum;
use digest::Digest;
use std::fmt::Display;
use std::str::FromStr;

/// Checksum algorithms allowed in manifest filenames.
///
/// The BagIt allowlist, see <https://tools.ietf.org/html/rfc8493#section-2.4>
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Algorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha512,
}

/// Every supported algorithm, strongest first.
pub const ALGORITHMS: [Algorithm; 5] = [
    Algorithm::Sha512,
    Algorithm::Sha256,
    Algorithm::Sha224,
    Algorithm::Sha1,
    Algorithm::Md5,
];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown checksum algorithm: {0}")]
pub struct UnknownAlgorithm(pub String);

impl Algorithm {
    /// Returns the token used in manifest filenames (`manifest-<name>.txt`).
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Md5 => "md5",
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha224 => "sha224",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }

    pub fn hasher(&self) -> Hasher {
        match self {
            Algorithm::Md5 => Hasher::Md5(md5::Md5::new()),
            Algorithm::Sha1 => Hasher::Sha1(sha1::Sha1::new()),
            Algorithm::Sha224 => Hasher::Sha224(sha2::Sha224::new()),
            Algorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
            Algorithm::Sha512 => Hasher::Sha512(sha2::Sha512::new()),
        }
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Algorithm {
    type Err = UnknownAlgorithm;

    /// Accepts identifiers as they appear in the wild: case-insensitive,
    /// with at most one `-` separator (`SHA-512` == `sha512`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.replacen('-', "", 1).to_lowercase();
        ALGORITHMS
            .into_iter()
            .find(|alg| alg.name() == token)
            .ok_or_else(|| UnknownAlgorithm(s.to_string()))
    }
}

/// Incremental digest state for a runtime-selected [Algorithm].
pub enum Hasher {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha224(sha2::Sha224),
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
}

impl Hasher {
    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(bytes),
            Hasher::Sha1(h) => h.update(bytes),
            Hasher::Sha224(h) => h.update(bytes),
            Hasher::Sha256(h) => h.update(bytes),
            Hasher::Sha512(h) => h.update(bytes),
        }
    }

    pub fn finalize(self) -> Checksum {
        let bytes = match self {
            Hasher::Md5(h) => h.finalize().to_vec(),
            Hasher::Sha1(h) => h.finalize().to_vec(),
            Hasher::Sha224(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
        };
        Checksum::from(bytes)
    }
}
