//! Reading patch files and splitting them into commands.
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use crate::error::{Error, RatchetResult};

mod command;
pub use command::{Command, CommandKind, Location};

mod delimiter;
pub use delimiter::{Delimiter, DelimiterChange, Delimiters, Placement};

pub mod parser;
pub use parser::{SqlSource, parse, render};

static ENCODING_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^\s*--\*\s*ENCODING\s+"([^"]*)"\s*$"#).expect("static regex")
});

/// A text encoding a patch file can be written in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UTF-8" | "UTF8" => Ok(Self::Utf8),
            "UTF-16LE" | "UTF16LE" => Ok(Self::Utf16Le),
            "UTF-16" | "UTF16" | "UTF-16BE" | "UTF16BE" => Ok(Self::Utf16Be),
            "ISO-8859-1" | "ISO8859-1" | "LATIN1" | "LATIN-1" => Ok(Self::Latin1),
            other => Err(format!("unsupported encoding `{other}`")),
        }
    }
}

impl Encoding {
    fn decode(self, bytes: &[u8]) -> RatchetResult<String> {
        match self {
            Self::Utf8 => String::from_utf8(bytes.to_vec()).map_err(invalid_data),
            Self::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            Self::Utf16Le | Self::Utf16Be => {
                if bytes.len() % 2 != 0 {
                    return Err(invalid_data("odd number of bytes in UTF-16 text"));
                }
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| match self {
                        Self::Utf16Le => u16::from_le_bytes([pair[0], pair[1]]),
                        _ => u16::from_be_bytes([pair[0], pair[1]]),
                    })
                    .collect();
                String::from_utf16(&units).map_err(invalid_data)
            }
        }
    }
}

fn invalid_data<E>(e: E) -> Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    Error::Io(io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Decode the raw bytes of a patch file.
///
/// A byte order mark wins; otherwise an `--* ENCODING "name"` first line;
/// otherwise `default`.
pub fn decode(bytes: &[u8], default: Encoding) -> RatchetResult<String> {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return Encoding::Utf8.decode(rest);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return Encoding::Utf16Le.decode(rest);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return Encoding::Utf16Be.decode(rest);
    }

    let first_line = bytes.split(|&b| b == b'\n').next().unwrap_or_default();
    let first_line = String::from_utf8_lossy(first_line);
    let encoding = match ENCODING_LINE.captures(&first_line) {
        Some(captures) => {
            let name = captures.get(1).map_or("", |m| m.as_str());
            name.parse::<Encoding>()
                .map_err(|message| Error::source_error(message, &Location::new(None, 1)))?
        }
        None => default,
    };
    encoding.decode(bytes)
}

/// Text of a patch file or included file.
#[derive(Debug, Clone)]
pub struct Resource {
    name: Arc<str>,
    text: String,
}

impl Resource {
    pub fn new<N: Into<Arc<str>>, T: Into<String>>(name: N, text: T) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Finds and reads resources by name.
///
/// `base` is the name of the resource doing the including, so relative names
/// can be resolved against it.
pub trait ResourceLoader: Send + Sync {
    fn load(&self, name: &str, base: Option<&str>) -> RatchetResult<Resource>;
}

/// Loads resources from the file system.
#[derive(Debug, Clone, Default)]
pub struct FileLoader {
    root: Option<PathBuf>,
    encoding: Encoding,
}

impl FileLoader {
    pub const fn new() -> Self {
        Self {
            root: None,
            encoding: Encoding::Utf8,
        }
    }

    /// Resolve names without a base against `root`.
    pub fn with_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.root = Some(root.into());
        self
    }

    /// The encoding used when a file has neither a BOM nor an `ENCODING` line.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    fn resolve(&self, name: &str, base: Option<&str>) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        let dir = base
            .and_then(|base| Path::new(base).parent().map(Path::to_path_buf))
            .or_else(|| self.root.clone());
        match dir {
            Some(dir) => dir.join(path),
            None => path.to_path_buf(),
        }
    }
}

impl ResourceLoader for FileLoader {
    fn load(&self, name: &str, base: Option<&str>) -> RatchetResult<Resource> {
        let path = self.resolve(name, base);
        log::trace!(target: "ratchet", "loading resource {}", path.display());
        let bytes = std::fs::read(&path)?;
        let text = decode(&bytes, self.encoding)?;
        Ok(Resource::new(path.to_string_lossy().as_ref(), text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bom_selects_encoding() {
        let mut utf16 = vec![0xFF, 0xFE];
        for unit in "GO\n".encode_utf16() {
            utf16.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode(&utf16, Encoding::Utf8).unwrap(), "GO\n");

        let utf8 = [&[0xEF, 0xBB, 0xBF][..], "SELECT 1".as_bytes()].concat();
        assert_eq!(decode(&utf8, Encoding::Latin1).unwrap(), "SELECT 1");
    }

    #[test]
    fn encoding_line_overrides_default() {
        let bytes = b"--* ENCODING \"ISO-8859-1\"\nSELECT '\xe9'\nGO\n";
        let text = decode(bytes, Encoding::Utf8).unwrap();
        assert!(text.contains("SELECT 'é'"));
    }

    #[test]
    fn unknown_encoding_is_a_source_error() {
        let bytes = b"--* ENCODING \"EBCDIC\"\n";
        assert!(matches!(
            decode(bytes, Encoding::Utf8),
            Err(Error::Source { .. })
        ));
    }

    #[test]
    fn relative_names_follow_the_base() {
        let loader = FileLoader::new().with_root("/srv/patches");
        assert_eq!(
            loader.resolve("inc/a.sql", Some("/data/upgrade.sql")),
            PathBuf::from("/data/inc/a.sql")
        );
        assert_eq!(
            loader.resolve("b.sql", None),
            PathBuf::from("/srv/patches/b.sql")
        );
    }
}
