use std::collections::HashMap;
use std::fs::OpenOptions;

/// Read/write capabilities implied by an open mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub readable: bool,
    pub writable: bool,
}

/// What opening a path in a given mode does to the file on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Disposition {
    Existing,
    Truncate,
    Append,
    CreateNew,
    Create,
}

#[derive(Clone, Copy, Debug)]
struct ModeEntry {
    capabilities: Capabilities,
    disposition: Disposition,
}

use Disposition::*;

// (mode, readable, writable, disposition)
const MODE_TABLE: &[(&str, bool, bool, Disposition)] = &[
    ("r", true, false, Existing),
    ("rb", true, false, Existing),
    ("rt", true, false, Existing),
    ("r+", true, true, Existing),
    ("r+b", true, true, Existing),
    ("r+t", true, true, Existing),
    ("w+", true, true, Truncate),
    ("w+b", true, true, Truncate),
    ("w+t", true, true, Truncate),
    ("x+", true, true, CreateNew),
    ("x+b", true, true, CreateNew),
    ("x+t", true, true, CreateNew),
    ("c+", true, true, Create),
    ("c+b", true, true, Create),
    ("c+t", true, true, Create),
    ("a+", true, true, Append),
    ("w", false, true, Truncate),
    ("wb", false, true, Truncate),
    ("a", false, true, Append),
    ("rw", false, true, Existing),
];

lazy_static! {
    static ref MODES: HashMap<&'static str, ModeEntry> = MODE_TABLE
        .iter()
        .map(|&(mode, readable, writable, disposition)| {
            let capabilities = Capabilities { readable, writable };
            (
                mode,
                ModeEntry {
                    capabilities,
                    disposition,
                },
            )
        })
        .collect();
}

/// Capabilities of `mode`. Modes missing from the table are neither
/// readable nor writable.
pub fn capabilities(mode: &str) -> Capabilities {
    MODES
        .get(mode)
        .map(|entry| entry.capabilities)
        .unwrap_or_default()
}

pub fn is_known(mode: &str) -> bool {
    MODES.contains_key(mode)
}

/// Translate `mode` into the options used to open a path with it.
pub(crate) fn open_options(mode: &str) -> Option<OpenOptions> {
    let entry = MODES.get(mode)?;
    let Capabilities { readable, writable } = entry.capabilities;

    let mut options = OpenOptions::new();
    options.read(readable);
    match entry.disposition {
        Existing => {
            options.write(writable);
        }
        Truncate => {
            options.write(true).create(true).truncate(true);
        }
        Append => {
            options.append(true).create(true);
        }
        CreateNew => {
            options.write(true).create_new(true);
        }
        Create => {
            options.write(true).create(true);
        }
    }
    Some(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::{Read, Write};
    use tempdir::TempDir;

    #[rstest]
    #[case("r", true, false)]
    #[case("rb", true, false)]
    #[case("rt", true, false)]
    #[case("r+", true, true)]
    #[case("r+b", true, true)]
    #[case("r+t", true, true)]
    #[case("w+", true, true)]
    #[case("w+b", true, true)]
    #[case("w+t", true, true)]
    #[case("x+", true, true)]
    #[case("x+b", true, true)]
    #[case("x+t", true, true)]
    #[case("c+", true, true)]
    #[case("c+b", true, true)]
    #[case("c+t", true, true)]
    #[case("a+", true, true)]
    #[case("w", false, true)]
    #[case("wb", false, true)]
    #[case("a", false, true)]
    #[case("rw", false, true)]
    fn table_modes(
        #[case] mode: &str,
        #[case] readable: bool,
        #[case] writable: bool,
    ) {
        assert!(is_known(mode));
        assert_eq!(
            capabilities(mode),
            Capabilities { readable, writable }
        );
    }

    #[rstest]
    #[case("")]
    #[case("x")]
    #[case("c")]
    #[case("ab")]
    #[case("R")]
    #[case("r+x")]
    fn unknown_modes_have_no_capabilities(#[case] mode: &str) {
        assert!(!is_known(mode));
        assert_eq!(capabilities(mode), Capabilities::default());
        assert!(open_options(mode).is_none());
    }

    #[test]
    fn truncating_mode_clears_file() {
        let dir = TempDir::new("mode_truncate").unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"old content").unwrap();

        let mut file = open_options("w+").unwrap().open(&path).unwrap();
        let mut buf = vec![];
        file.read_to_end(&mut buf).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn append_mode_keeps_file() {
        let dir = TempDir::new("mode_append").unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"head").unwrap();

        let mut file = open_options("a").unwrap().open(&path).unwrap();
        file.write_all(b"tail").unwrap();
        drop(file);
        assert_eq!(std::fs::read(&path).unwrap(), b"headtail");
    }

    #[test]
    fn exclusive_mode_refuses_existing_file() {
        let dir = TempDir::new("mode_exclusive").unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"taken").unwrap();

        let err = open_options("x+").unwrap().open(&path).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
    }
}
