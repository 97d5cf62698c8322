//! Versioned on-disk archive of filtered offers.
//!
//! Layout inside the archive root:
//!
//! - `<prefix>_filtered_<zip>_<YYYYmmdd_HHMMSS_mmm>[_n].csv`: one immutable
//!   file per successful scrape
//! - `<prefix>_export_<zip>_<timestamp>[_n].csv`: untouched site exports
//! - `latest_<energy>_<zip>.json`: pointer to the newest filtered file
//!
//! Files are never rewritten or deleted. Every file is written to a
//! uniquely named temp file in the root first: archives are then linked
//! into place without clobbering, and the pointer is replaced by atomic
//! rename only after the archive file it names is durable.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::types::{EnergyType, RateRecord, ScrapeError, ScrapeResult, ZipCode};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Which family of archive file a name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Filtered,
    Export,
}

impl FileKind {
    fn tag(self) -> &'static str {
        match self {
            FileKind::Filtered => "filtered",
            FileKind::Export => "export",
        }
    }
}

/// Parsed form of an archive file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub energy_type: EnergyType,
    pub kind: FileKind,
    pub zip_code: ZipCode,
    /// `YYYYmmdd_HHMMSS_mmm`
    pub stamp: String,
    /// Collision counter; 0 for the first file with this stamp.
    pub sequence: u32,
}

impl ArchiveName {
    fn new(energy_type: EnergyType, kind: FileKind, zip: &ZipCode, at: DateTime<Utc>) -> Self {
        Self {
            energy_type,
            kind,
            zip_code: zip.clone(),
            stamp: format!(
                "{}_{:03}",
                at.format(TIMESTAMP_FORMAT),
                at.timestamp_subsec_millis()
            ),
            sequence: 0,
        }
    }

    pub fn file_name(&self) -> String {
        let base = format!(
            "{}_{}_{}_{}",
            self.energy_type.archive_prefix(),
            self.kind.tag(),
            self.zip_code,
            self.stamp
        );
        if self.sequence == 0 {
            format!("{base}.csv")
        } else {
            format!("{base}_{}.csv", self.sequence)
        }
    }

    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".csv")?;
        let (energy_type, rest) = EnergyType::ALL.iter().find_map(|e| {
            stem.strip_prefix(e.archive_prefix())
                .and_then(|r| r.strip_prefix('_'))
                .map(|r| (*e, r))
        })?;
        let (kind, rest) = [FileKind::Filtered, FileKind::Export]
            .iter()
            .find_map(|k| {
                rest.strip_prefix(k.tag())
                    .and_then(|r| r.strip_prefix('_'))
                    .map(|r| (*k, r))
            })?;

        let zip_code = ZipCode::parse(rest.get(..5)?).ok()?;
        let rest = rest.get(5..)?.strip_prefix('_')?;
        // YYYYmmdd_HHMMSS_mmm is 19 characters.
        let stamp = rest.get(..19)?;
        parse_stamp(stamp)?;
        let sequence = match rest.get(19..)? {
            "" => 0,
            suffix => suffix.strip_prefix('_')?.parse().ok()?,
        };

        Some(Self {
            energy_type,
            kind,
            zip_code,
            stamp: stamp.to_string(),
            sequence,
        })
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        parse_stamp(&self.stamp)
    }
}

fn parse_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(stamp.get(..15)?, TIMESTAMP_FORMAT).ok()?;
    let millis: i64 = stamp.get(15..)?.strip_prefix('_')?.parse().ok()?;
    Some(naive.and_utc() + ChronoDuration::milliseconds(millis))
}

/// Contents of `latest_<energy>_<zip>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestPointer {
    /// File name of the archive, relative to the archive root.
    pub archive: String,
    pub zip_code: ZipCode,
    pub energy_type: EnergyType,
    pub created_at: DateTime<Utc>,
    pub record_count: usize,
}

/// A loaded archive file.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub zip_code: ZipCode,
    pub energy_type: EnergyType,
    pub created_at: DateTime<Utc>,
    pub records: Vec<RateRecord>,
}

/// Archive rooted at one output directory.
#[derive(Debug, Clone)]
pub struct Archive {
    root: PathBuf,
}

impl Archive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pointer_path(&self, zip: &ZipCode, energy_type: EnergyType) -> PathBuf {
        self.root.join(format!("latest_{energy_type}_{zip}.json"))
    }

    /// Write `records` as a new archive file and repoint "latest" to it.
    pub fn save(
        &self,
        records: &[RateRecord],
        zip: &ZipCode,
        energy_type: EnergyType,
    ) -> ScrapeResult<PathBuf> {
        let created_at = Utc::now();
        self.ensure_root()?;

        let mut tmp =
            NamedTempFile::new_in(&self.root).map_err(|e| ScrapeError::archive_write(&self.root, e))?;
        write_csv(tmp.as_file_mut(), records).map_err(|e| ScrapeError::archive_write(tmp.path(), e))?;

        let mut name = ArchiveName::new(energy_type, FileKind::Filtered, zip, created_at);
        let path = loop {
            let candidate = self.root.join(name.file_name());
            match tmp.persist_noclobber(&candidate) {
                Ok(_) => break candidate,
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    tmp = e.file;
                    name.sequence += 1;
                }
                Err(e) => return Err(ScrapeError::archive_write(candidate, e.error)),
            }
        };
        sync_dir(&self.root);

        let pointer = LatestPointer {
            archive: name.file_name(),
            zip_code: zip.clone(),
            energy_type,
            created_at,
            record_count: records.len(),
        };
        self.write_pointer(&pointer)?;

        tracing::info!(
            path = %path.display(),
            records = records.len(),
            "archive saved"
        );
        Ok(path)
    }

    /// Keep an untouched copy of a site export next to the archive.
    pub fn save_raw_export(
        &self,
        data: &[u8],
        zip: &ZipCode,
        energy_type: EnergyType,
    ) -> ScrapeResult<PathBuf> {
        self.ensure_root()?;
        let mut name = ArchiveName::new(energy_type, FileKind::Export, zip, Utc::now());
        loop {
            let path = self.root.join(name.file_name());
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(data)
                        .and_then(|()| file.sync_all())
                        .map_err(|e| ScrapeError::archive_write(&path, e))?;
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => name.sequence += 1,
                Err(e) => return Err(ScrapeError::archive_write(path, e)),
            }
        }
    }

    /// Newest filtered archive for the pair. Uses the pointer when it names
    /// an existing file, otherwise the newest file by name.
    pub fn latest(&self, zip: &ZipCode, energy_type: EnergyType) -> ScrapeResult<Option<PathBuf>> {
        if let Some(pointer) = self.read_pointer(zip, energy_type)? {
            let path = self.root.join(&pointer.archive);
            if path.is_file() {
                return Ok(Some(path));
            }
            tracing::warn!(archive = %pointer.archive, "latest pointer names a missing file");
        }
        Ok(self.history(zip, energy_type)?.pop())
    }

    pub fn read_pointer(
        &self,
        zip: &ZipCode,
        energy_type: EnergyType,
    ) -> ScrapeResult<Option<LatestPointer>> {
        let path = self.pointer_path(zip, energy_type);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ScrapeError::archive_write(path, e)),
        };
        match serde_json::from_str(&text) {
            Ok(pointer) => Ok(Some(pointer)),
            Err(e) => {
                tracing::warn!(path = %path.display(), "unreadable latest pointer: {e}");
                Ok(None)
            }
        }
    }

    /// All filtered archives for the pair, oldest first.
    pub fn history(&self, zip: &ZipCode, energy_type: EnergyType) -> ScrapeResult<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ScrapeError::archive_write(&self.root, e)),
        };

        let mut found: Vec<(ArchiveName, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = ArchiveName::parse(entry.file_name().to_str()?)?;
                (name.kind == FileKind::Filtered
                    && name.energy_type == energy_type
                    && &name.zip_code == zip)
                    .then(|| (name, entry.path()))
            })
            .collect();
        found.sort_by(|(a, _), (b, _)| (&a.stamp, a.sequence).cmp(&(&b.stamp, b.sequence)));
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    /// Read an archive file back.
    pub fn load(path: &Path) -> ScrapeResult<ArchiveEntry> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(ArchiveName::parse)
            .ok_or_else(|| {
                ScrapeError::InvalidRequest(format!("not an archive file: {}", path.display()))
            })?;

        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| ScrapeError::archive_write(path, io::Error::other(e)))?;
        let records = reader
            .deserialize::<RateRecord>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ScrapeError::archive_write(path, io::Error::other(e)))?;

        Ok(ArchiveEntry {
            path: path.to_path_buf(),
            created_at: name.created_at().unwrap_or_else(Utc::now),
            zip_code: name.zip_code,
            energy_type: name.energy_type,
            records,
        })
    }

    fn ensure_root(&self) -> ScrapeResult<()> {
        fs::create_dir_all(&self.root).map_err(|e| ScrapeError::archive_write(&self.root, e))
    }

    fn write_pointer(&self, pointer: &LatestPointer) -> ScrapeResult<()> {
        let path = self.pointer_path(&pointer.zip_code, pointer.energy_type);
        let json = serde_json::to_vec_pretty(pointer)
            .map_err(|e| ScrapeError::archive_write(&path, io::Error::other(e)))?;

        let mut tmp =
            NamedTempFile::new_in(&self.root).map_err(|e| ScrapeError::archive_write(&self.root, e))?;
        tmp.write_all(&json)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| ScrapeError::archive_write(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| ScrapeError::archive_write(&path, e.error))?;
        sync_dir(&self.root);
        Ok(())
    }
}

fn write_csv(file: &mut File, records: &[RateRecord]) -> io::Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(&mut *file);
    writer.write_record(RateRecord::COLUMNS)?;
    for record in records {
        writer.serialize(record).map_err(io::Error::other)?;
    }
    writer.flush()?;
    drop(writer);
    file.sync_all()
}

/// Persist directory entries (renames, links). Not supported everywhere.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RateType, RateUnit, ServiceClass};
    use rust_decimal_macros::dec;

    fn zip() -> ZipCode {
        ZipCode::parse("19348").unwrap()
    }

    fn record(provider: &str) -> RateRecord {
        RateRecord {
            provider: provider.to_string(),
            plan_name: "Fixed 12, \"Green\"".to_string(),
            rate_value: dec!(8.99),
            rate_type: RateType::Fixed,
            term_months: 12,
            cancellation_fee: dec!(0),
            estimated_annual_cost: dec!(755.16),
            energy_type: EnergyType::Electricity,
            zip_code: zip(),
            retrieved_at: "2026-10-18T12:00:00Z".parse().unwrap(),
            rate_unit: RateUnit::CentsPerKwh,
            service_class: ServiceClass::Residential,
            monthly_fee: false,
            has_incentives: false,
            new_customers_only: true,
        }
    }

    #[test]
    fn test_archive_name_roundtrip() {
        let at: DateTime<Utc> = "2026-10-18T09:08:07.654Z".parse().unwrap();
        let mut name = ArchiveName::new(EnergyType::Gas, FileKind::Filtered, &zip(), at);
        assert_eq!(name.file_name(), "pagasswitch_filtered_19348_20261018_090807_654.csv");
        assert_eq!(ArchiveName::parse(&name.file_name()).unwrap(), name);
        assert_eq!(name.created_at().unwrap(), at);

        name.sequence = 2;
        assert_eq!(ArchiveName::parse(&name.file_name()).unwrap().sequence, 2);
        assert!(ArchiveName::parse("latest_gas_19348.json").is_none());
        assert!(ArchiveName::parse("papowerswitch_filtered_1934_x.csv").is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path());
        let records = vec![record("Acme"), record("Bolt")];

        let path = archive.save(&records, &zip(), EnergyType::Electricity).unwrap();
        let entry = Archive::load(&path).unwrap();
        assert_eq!(entry.records, records);
        assert_eq!(entry.zip_code, zip());
        assert_eq!(entry.energy_type, EnergyType::Electricity);
        // Only the archive and its pointer remain; no temp files.
        assert_eq!(dir.path().read_dir().unwrap().count(), 2);
    }

    #[test]
    fn test_empty_save_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path());
        let path = archive.save(&[], &zip(), EnergyType::Gas).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), RateRecord::COLUMNS.join(","));
        assert!(Archive::load(&path).unwrap().records.is_empty());
    }

    #[test]
    fn test_second_save_appends_and_repoints_latest() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path());

        let first = archive
            .save(&[record("First")], &zip(), EnergyType::Electricity)
            .unwrap();
        let first_bytes = fs::read(&first).unwrap();
        let second = archive
            .save(&[record("Second")], &zip(), EnergyType::Electricity)
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(fs::read(&first).unwrap(), first_bytes);
        assert_eq!(
            archive.history(&zip(), EnergyType::Electricity).unwrap(),
            vec![first, second.clone()]
        );

        let latest = archive.latest(&zip(), EnergyType::Electricity).unwrap().unwrap();
        assert_eq!(latest, second);
        assert_eq!(Archive::load(&latest).unwrap().records[0].provider, "Second");

        let pointer = archive.read_pointer(&zip(), EnergyType::Electricity).unwrap().unwrap();
        assert_eq!(pointer.record_count, 1);
    }

    #[test]
    fn test_latest_is_per_energy_and_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path());
        archive.save(&[record("A")], &zip(), EnergyType::Electricity).unwrap();

        assert!(archive.latest(&zip(), EnergyType::Gas).unwrap().is_none());
        let other = ZipCode::parse("15213").unwrap();
        assert!(archive.latest(&other, EnergyType::Electricity).unwrap().is_none());
    }

    #[test]
    fn test_latest_falls_back_without_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path());
        let path = archive.save(&[record("A")], &zip(), EnergyType::Electricity).unwrap();
        fs::remove_file(archive.pointer_path(&zip(), EnergyType::Electricity)).unwrap();

        assert_eq!(archive.latest(&zip(), EnergyType::Electricity).unwrap(), Some(path));
    }

    #[test]
    fn test_raw_export_never_clobbers() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path());
        let a = archive.save_raw_export(b"one", &zip(), EnergyType::Gas).unwrap();
        let b = archive.save_raw_export(b"two", &zip(), EnergyType::Gas).unwrap();
        assert_ne!(a, b);
        assert_eq!(fs::read(a).unwrap(), b"one");
        assert_eq!(fs::read(b).unwrap(), b"two");
        assert!(archive.history(&zip(), EnergyType::Gas).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_saves_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(dir.path());

        for _ in 0..10 {
            let paths: Vec<PathBuf> = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..4)
                    .map(|_| scope.spawn(|| archive.save(&[], &zip(), EnergyType::Gas)))
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap().unwrap())
                    .collect()
            });
            let mut unique = paths.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), paths.len(), "{paths:?}");
        }

        assert_eq!(archive.history(&zip(), EnergyType::Gas).unwrap().len(), 40);
        let latest = archive.latest(&zip(), EnergyType::Gas).unwrap().unwrap();
        assert!(Archive::load(&latest).unwrap().records.is_empty());
        // 40 archives plus one pointer; every temp file was persisted.
        assert_eq!(dir.path().read_dir().unwrap().count(), 41);
    }
}
