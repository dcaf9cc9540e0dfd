//! Profile persistence.
//!
//! Holds profiles in memory keyed by id, mirrored as one JSON record per
//! profile on disk. Persistence failures are logged as warnings; the
//! in-memory state stays authoritative for the current process lifetime and
//! is re-written on the next mutation.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;

use crate::constants;
use crate::core::{parser, validator};
use crate::error::{Error, Result};
use crate::logger::{self, LogLevel};
use crate::state::profile::VpnProfile;
use crate::utils;

pub struct ProfileStore {
    dir: PathBuf,
    profiles: HashMap<String, VpnProfile>,
}

impl ProfileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            profiles: HashMap::new(),
        })
    }

    /// Load every persisted record; unreadable records are skipped with a
    /// warning. Returns the number of profiles loaded.
    pub fn load_all(&mut self) -> usize {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            logger::log(
                LogLevel::Warning,
                "STORE",
                format!("cannot read profiles directory {}", self.dir.display()),
            );
            return 0;
        };

        let mut loaded = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::File::open(&path)
                .map_err(|e| e.to_string())
                .and_then(|f| serde_json::from_reader::<_, VpnProfile>(f).map_err(|e| e.to_string()))
            {
                Ok(profile) => {
                    self.profiles.insert(profile.id.clone(), profile);
                    loaded += 1;
                }
                Err(e) => {
                    logger::log(
                        LogLevel::Warning,
                        "STORE",
                        format!("skipped {}: {e}", path.display()),
                    );
                }
            }
        }

        logger::log(LogLevel::Info, "STORE", format!("loaded {loaded} profiles"));
        loaded
    }

    /// Import a `.ovpn` file: parse, validate, assign a stable id, persist.
    ///
    /// A failed validation still imports the profile; the verdict is stored
    /// on it and gates connect attempts later.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] on syntactic defects and I/O errors when the
    /// source file cannot be read.
    pub fn import(&mut self, path: &Path, name: Option<&str>) -> Result<VpnProfile> {
        let metadata = fs::metadata(path)?;
        if metadata.len() > constants::MAX_CONFIG_SIZE_BYTES {
            return Err(Error::Validation(format!(
                "file too large ({} bytes); configs should be under 1 MiB",
                metadata.len()
            )));
        }
        if metadata.len() == 0 {
            return Err(Error::Validation("file is empty".to_string()));
        }

        let content = fs::read_to_string(path)?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("profile");
        let stem = utils::sanitize_stem(stem);

        let now = Utc::now();
        let id = format!(
            "{stem}_{}",
            now.timestamp_nanos_opt()
                .unwrap_or_else(|| now.timestamp_micros())
        );
        let display_name = name.map_or_else(|| stem.clone(), str::to_string);
        let source_file = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let mut profile = parser::parse_profile(&content, &id, &display_name, &source_file)
            .map_err(Error::Parse)?;
        validator::validate(&mut profile);

        logger::log(
            LogLevel::Info,
            "STORE",
            format!(
                "imported '{}' as {} (validated: {})",
                profile.name, profile.id, profile.validated
            ),
        );

        self.insert(profile.clone());
        Ok(profile)
    }

    /// Download a configuration over HTTP(S) and import it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for bad URLs or non-config payloads and
    /// [`Error::External`] for network failures.
    pub fn import_url(&mut self, url: &str, name: Option<&str>) -> Result<VpnProfile> {
        let parsed =
            url::Url::parse(url).map_err(|_| Error::Validation("invalid URL".to_string()))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(constants::HTTP_TIMEOUT_SECS))
            .user_agent(format!("{}/{}", constants::APP_NAME, constants::APP_VERSION))
            .build()
            .map_err(|e| Error::external("http", e))?;

        let response = client
            .get(url)
            .send()
            .map_err(|e| Error::external("http", e))?;

        if !response.status().is_success() {
            return Err(Error::external(
                "http",
                format!("server returned {}", response.status()),
            ));
        }

        if let Some(content_type) = response.headers().get("content-type") {
            let ct = content_type.to_str().unwrap_or("").to_ascii_lowercase();
            if ct.contains("text/html") {
                return Err(Error::Validation(
                    "URL returned HTML; use the raw version of the link".to_string(),
                ));
            }
        }

        let body = response.text().map_err(|e| Error::external("http", e))?;
        if body.is_empty() {
            return Err(Error::Validation("downloaded content is empty".to_string()));
        }

        // Stage into a temp file so the regular import path applies.
        let filename = parsed
            .path_segments()
            .and_then(|mut s| s.next_back().map(str::to_string))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "downloaded.ovpn".to_string());
        let staged = std::env::temp_dir().join(format!(
            "{}_{}_{filename}",
            constants::APP_NAME,
            Utc::now().timestamp_micros()
        ));
        fs::write(&staged, &body)?;

        let result = self.import(&staged, name);
        utils::remove_file_quiet(&staged);
        result
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&VpnProfile> {
        self.profiles.get(id)
    }

    /// All profiles, highest priority first, then by name.
    #[must_use]
    pub fn list(&self) -> Vec<&VpnProfile> {
        let mut profiles: Vec<&VpnProfile> = self.profiles.values().collect();
        profiles.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        profiles
    }

    /// Remove a profile from memory and disk. A missing record file is
    /// tolerated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    pub fn delete(&mut self, id: &str) -> Result<()> {
        if self.profiles.remove(id).is_none() {
            return Err(Error::NotFound(format!("profile {id}")));
        }
        utils::remove_file_quiet(&self.record_path(id));
        logger::log(LogLevel::Info, "STORE", format!("deleted profile {id}"));
        Ok(())
    }

    /// Render a profile to OpenVPN text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id and I/O errors from the
    /// writer.
    pub fn export<W: Write>(&self, id: &str, writer: &mut W) -> Result<()> {
        let profile = self
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("profile {id}")))?;
        writer.write_all(parser::render_profile(profile).as_bytes())?;
        Ok(())
    }

    /// Re-run validation and persist the new verdict.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    pub fn revalidate(&mut self, id: &str) -> Result<VpnProfile> {
        let profile = self
            .profiles
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("profile {id}")))?;
        validator::validate(profile);
        let snapshot = profile.clone();
        self.persist(&snapshot);
        Ok(snapshot)
    }

    /// Insert (or replace) a profile and persist it.
    pub(crate) fn insert(&mut self, profile: VpnProfile) {
        self.persist(&profile);
        self.profiles.insert(profile.id.clone(), profile);
    }

    /// Mark exactly one profile (or none) as the actively connected one.
    pub(crate) fn set_active(&mut self, active_id: Option<&str>) {
        let mut changed = Vec::new();
        for profile in self.profiles.values_mut() {
            let want = Some(profile.id.as_str()) == active_id;
            if profile.active != want {
                profile.active = want;
                changed.push(profile.clone());
            }
        }
        for profile in &changed {
            self.persist(profile);
        }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn persist(&self, profile: &VpnProfile) {
        let path = self.record_path(&profile.id);
        let write = fs::File::create(&path)
            .map_err(|e| e.to_string())
            .and_then(|f| serde_json::to_writer_pretty(f, profile).map_err(|e| e.to_string()));
        if let Err(e) = write {
            logger::log(
                LogLevel::Warning,
                "STORE",
                format!("failed to persist {}: {e}", path.display()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GOOD_CONFIG: &str = "client\ndev tun\nproto udp\nremote 203.0.113.10 1194\nnobind\n";

    fn store_with_dir() -> (ProfileStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::new(dir.path()).unwrap();
        (store, dir)
    }

    fn write_config(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_import_persists_record() {
        let (mut store, dir) = store_with_dir();
        let src = TempDir::new().unwrap();
        let config = write_config(&src, "site-a.ovpn", GOOD_CONFIG);

        let profile = store.import(&config, None).unwrap();
        assert!(profile.id.starts_with("site-a_"));
        assert_eq!(profile.name, "site-a");
        assert!(profile.validated);
        assert!(dir.path().join(format!("{}.json", profile.id)).exists());
    }

    #[test]
    fn test_import_with_name_override() {
        let (mut store, _dir) = store_with_dir();
        let src = TempDir::new().unwrap();
        let config = write_config(&src, "site-a.ovpn", GOOD_CONFIG);

        let profile = store.import(&config, Some("Primary Uplink")).unwrap();
        assert_eq!(profile.name, "Primary Uplink");
    }

    #[test]
    fn test_import_empty_file_rejected() {
        let (mut store, _dir) = store_with_dir();
        let src = TempDir::new().unwrap();
        let config = write_config(&src, "empty.ovpn", "");
        let err = store.import(&config, None).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_import_parse_error_surfaces() {
        let (mut store, _dir) = store_with_dir();
        let src = TempDir::new().unwrap();
        let config = write_config(&src, "bad.ovpn", "client\nproto carrier-pigeon\n");
        let err = store.import(&config, None).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_invalid_profile_still_imported_with_verdict() {
        let (mut store, _dir) = store_with_dir();
        let src = TempDir::new().unwrap();
        // No remote: parses but fails validation.
        let config = write_config(&src, "lonely.ovpn", "client\ndev tun\n");
        let profile = store.import(&config, None).unwrap();
        assert!(!profile.validated);
        assert!(profile.validation_error.is_some());
        assert!(store.get(&profile.id).is_some());
    }

    #[test]
    fn test_load_all_round_trip() {
        let dir = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        let config = write_config(&src, "site-a.ovpn", GOOD_CONFIG);

        let id = {
            let mut store = ProfileStore::new(dir.path()).unwrap();
            store.import(&config, None).unwrap().id
        };

        let mut fresh = ProfileStore::new(dir.path()).unwrap();
        assert_eq!(fresh.load_all(), 1);
        let profile = fresh.get(&id).unwrap();
        assert_eq!(profile.remotes[0].host, "203.0.113.10");
        assert!(profile.validated);
    }

    #[test]
    fn test_load_all_skips_corrupt_records() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        let mut store = ProfileStore::new(dir.path()).unwrap();
        assert_eq!(store.load_all(), 0);
    }

    #[test]
    fn test_delete_removes_memory_and_disk() {
        let (mut store, dir) = store_with_dir();
        let src = TempDir::new().unwrap();
        let config = write_config(&src, "site-a.ovpn", GOOD_CONFIG);
        let id = store.import(&config, None).unwrap().id;

        store.delete(&id).unwrap();
        assert!(store.get(&id).is_none());
        assert!(!dir.path().join(format!("{id}.json")).exists());
        assert!(matches!(store.delete(&id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_export_renders_ovpn() {
        let (mut store, _dir) = store_with_dir();
        let src = TempDir::new().unwrap();
        let config = write_config(&src, "site-a.ovpn", GOOD_CONFIG);
        let id = store.import(&config, None).unwrap().id;

        let mut out = Vec::new();
        store.export(&id, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("client\n"));
        assert!(text.contains("remote 203.0.113.10 1194"));
        assert!(text.contains("nobind"));
    }

    #[test]
    fn test_revalidate_updates_verdict() {
        let (mut store, _dir) = store_with_dir();
        let src = TempDir::new().unwrap();
        let config = write_config(&src, "site-a.ovpn", GOOD_CONFIG);
        let id = store.import(&config, None).unwrap().id;

        let profile = store.revalidate(&id).unwrap();
        assert!(profile.validated);
        assert!(matches!(
            store.revalidate("missing"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_list_sorted_by_priority_then_name() {
        let (mut store, _dir) = store_with_dir();
        let mut a = VpnProfile::new("a_1".into(), "zeta".into(), "z.ovpn".into());
        a.priority = 5;
        let mut b = VpnProfile::new("b_1".into(), "alpha".into(), "a.ovpn".into());
        b.priority = 5;
        let mut c = VpnProfile::new("c_1".into(), "mid".into(), "m.ovpn".into());
        c.priority = 1;
        store.insert(a);
        store.insert(b);
        store.insert(c);

        let names: Vec<&str> = store.list().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["mid", "alpha", "zeta"]);
    }
}
