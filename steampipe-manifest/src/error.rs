use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("File has incorrect magic - possibly wrong file format")]
    BadMagic,

    #[error("Unsupported manifest version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unsupported package index version: {0}")]
    UnsupportedPackageVersion(u32),

    #[error("Package index tree is truncated")]
    TruncatedIndex,

    #[error("Filenames are encrypted and no depot key was applied")]
    FilenamesEncrypted,

    #[error("Invalid depot key: {0}")]
    InvalidKey(String),

    #[error("Filename decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("String field is not valid UTF-8")]
    InvalidString(#[from] std::string::FromUtf8Error),

    #[error("String field of {0} bytes exceeds the 64 KiB wire limit")]
    StringTooLong(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
