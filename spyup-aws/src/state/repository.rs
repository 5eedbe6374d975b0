use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::PathBuf,
};

use regex::Regex;

use super::{Kind, Record, FILE_SUFFIX};
use crate::errors::{self, Result};

/// Stores and retrieves state records by kind.
pub trait StateRepository {
    /// Returns the most recently created record of the kind with its name,
    /// or None if there is none.
    fn latest(&self, kind: Kind) -> Result<Option<(String, Record)>>;

    /// Persists a new record and returns its name.
    /// Never overwrites an existing record.
    fn save(&self, kind: Kind, record: &Record) -> Result<String>;
}

/// Keeps state files in a single directory,
/// named "<kind>_<YYYY-mm-dd>_at_<HH-MM-SS>.state", with a "_NN"
/// counter before the suffix when several are saved in the same second.
pub struct FsRepository {
    dir: PathBuf,
}

impl FsRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn pattern(kind: Kind) -> Result<Regex> {
        let expr = format!(
            r"^{}_\d{{4}}-\d{{2}}-\d{{2}}_at_\d{{2}}-\d{{2}}-\d{{2}}(_\d{{2}})?{}$",
            kind.as_str(),
            regex::escape(FILE_SUFFIX)
        );
        Regex::new(&expr).map_err(|e| errors::Error::Other {
            message: format!("failed to compile state file pattern ({})", e),
        })
    }

    /// Lists the matching file names in lexicographic order.
    pub fn list(&self, kind: Kind) -> Result<Vec<String>> {
        let pattern = Self::pattern(kind)?;
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(errors::config(format!(
                    "failed to read state directory '{}' ({})",
                    self.dir.display(),
                    e
                )))
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if pattern.is_match(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

impl StateRepository for FsRepository {
    fn latest(&self, kind: Kind) -> Result<Option<(String, Record)>> {
        let names = self.list(kind)?;
        let name = match names.last() {
            Some(name) => name.clone(),
            None => return Ok(None),
        };
        log::info!("found {} {} state file(s), using '{}'", names.len(), kind.as_str(), name);

        let record = Record::load(&self.dir.join(&name))?;
        Ok(Some((name, record)))
    }

    fn save(&self, kind: Kind, record: &Record) -> Result<String> {
        self.save_at(kind, record, chrono::Local::now().naive_local())
    }
}

/// Same-second saves tried before giving up.
const MAX_SAVE_ATTEMPTS: u32 = 100;

impl FsRepository {
    /// Saves the record under a name stamped with "now". A name already
    /// taken in the same second gets the next free "_NN" counter.
    pub fn save_at(&self, kind: Kind, record: &Record, now: chrono::NaiveDateTime) -> Result<String> {
        fs::create_dir_all(&self.dir)?;

        for attempt in 0..MAX_SAVE_ATTEMPTS {
            let path = self.dir.join(super::numbered_file_name(kind, now, attempt));
            let mut f = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    log::debug!("'{}' already exists, trying the next name", path.display());
                    continue;
                }
                Err(e) => {
                    return Err(errors::Error::Other {
                        message: format!("failed to create '{}' ({})", path.display(), e),
                    })
                }
            };
            log::info!("saving {} state to '{}'", kind.as_str(), path.display());
            f.write_all(record.encode().as_bytes())?;
            f.sync_all()?;
            return Ok(path.display().to_string());
        }

        Err(errors::Error::Other {
            message: format!(
                "failed to save {} state, {} names taken for {}",
                kind.as_str(),
                MAX_SAVE_ATTEMPTS,
                now.format(super::TIMESTAMP_FORMAT)
            ),
        })
    }
}

/// RUST_LOG=debug cargo test --package spyup-aws --lib -- state::repository::test_latest --exact --show-output
#[test]
fn test_latest() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().unwrap();
    let repo = FsRepository::new(dir.path());
    assert!(repo.latest(Kind::Network).unwrap().is_none());

    for (name, label) in [
        ("network_2024-06-01_at_00-00-00.state", "second"),
        ("network_2024-01-01_at_00-00-00.state", "first"),
        ("instance_2025-01-01_at_00-00-00.state", "instance"),
        ("network_2099-01-01_at_00-00-00.state.bak", "ignored"),
        ("vpc_2099-01-01_at_00-00-00.file", "ignored"),
    ] {
        fs::write(dir.path().join(name), format!("label: {}\n", label)).unwrap();
    }

    let (name, record) = repo.latest(Kind::Network).unwrap().unwrap();
    assert_eq!(name, "network_2024-06-01_at_00-00-00.state");
    assert_eq!(record.get("label"), Some("second"));

    let (name, _) = repo.latest(Kind::Instance).unwrap().unwrap();
    assert_eq!(name, "instance_2025-01-01_at_00-00-00.state");
}

#[test]
fn test_latest_malformed() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("network_2024-01-01_at_00-00-00.state"),
        "label ab1cd\n",
    )
    .unwrap();

    let repo = FsRepository::new(dir.path());
    let e = repo.latest(Kind::Network).unwrap_err();
    assert!(e.is_config());
    assert!(e.message().contains("network_2024-01-01_at_00-00-00.state"));
}

#[test]
fn test_save() {
    let dir = tempfile::tempdir().unwrap();
    let repo = FsRepository::new(dir.path().join("nested"));

    let mut record = Record::new();
    record.insert("network_interface_id", "eni-0123");
    record.insert("private_ip", "10.42.0.111");

    let path = repo.save(Kind::Instance, &record).unwrap();
    assert!(path.ends_with(FILE_SUFFIX));
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "network_interface_id: eni-0123\nprivate_ip: 10.42.0.111\n"
    );

    let (_, loaded) = repo.latest(Kind::Instance).unwrap().unwrap();
    assert_eq!(loaded, record);
    assert!(repo.latest(Kind::Network).unwrap().is_none());
}

#[test]
fn test_save_same_second() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().unwrap();
    let repo = FsRepository::new(dir.path());
    let now = chrono::NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(13, 5, 9)
        .unwrap();

    let mut first = Record::new();
    first.insert("label", "first");
    let mut second = Record::new();
    second.insert("label", "second");
    let mut third = Record::new();
    third.insert("label", "third");

    let p1 = repo.save_at(Kind::Network, &first, now).unwrap();
    let p2 = repo.save_at(Kind::Network, &second, now).unwrap();
    let p3 = repo.save_at(Kind::Network, &third, now).unwrap();
    assert!(p1.ends_with("network_2024-06-01_at_13-05-09.state"));
    assert!(p2.ends_with("network_2024-06-01_at_13-05-09_01.state"));
    assert!(p3.ends_with("network_2024-06-01_at_13-05-09_02.state"));

    assert_eq!(repo.list(Kind::Network).unwrap().len(), 3);
    let (name, latest) = repo.latest(Kind::Network).unwrap().unwrap();
    assert_eq!(name, "network_2024-06-01_at_13-05-09_02.state");
    assert_eq!(latest.get("label"), Some("third"));

    // earlier files are left untouched
    let loaded = Record::load(std::path::Path::new(&p1)).unwrap();
    assert_eq!(loaded.get("label"), Some("first"));
}
