use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tether_pipeline::{default_host_id, RemoteSpec, ScanOptions, SyncConfig};

const QUALIFIER: &str = "org";
const ORG: &str = "tether";
const APP: &str = "tether";

/// A saved replica pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub local_path: Utf8PathBuf,
    pub remote: RemoteSpec,
    #[serde(default)]
    pub auto_rename: bool,
    #[serde(default)]
    pub scan: ScanOptions,
}

impl Profile {
    pub fn to_config(&self) -> SyncConfig {
        SyncConfig {
            local_root: self.local_path.clone(),
            remote: self.remote.clone(),
            auto_rename: self.auto_rename,
            scan: self.scan,
            host_id: default_host_id(),
        }
    }
}

pub struct ProfileManager {
    dir: Option<PathBuf>,
}

impl ProfileManager {
    /// Profiles in the platform config directory.
    pub fn new() -> Self {
        Self { dir: None }
    }

    /// Profiles in `dir` instead of the platform config directory.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    fn config_dir(&self) -> Result<PathBuf> {
        let dir = match &self.dir {
            Some(dir) => dir.clone(),
            None => ProjectDirs::from(QUALIFIER, ORG, APP)
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .config_dir()
                .to_path_buf(),
        };
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(dir)
    }

    fn profiles_path(&self) -> Result<PathBuf> {
        Ok(self.config_dir()?.join("profiles.json"))
    }

    pub fn list(&self) -> Result<Vec<Profile>> {
        let path = self.profiles_path()?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).context("Failed to read profiles")?;
        let profiles: Vec<Profile> =
            serde_json::from_str(&content).context("Failed to parse profiles")?;
        Ok(profiles)
    }

    fn save(&self, profiles: &[Profile]) -> Result<()> {
        let path = self.profiles_path()?;
        let json = serde_json::to_string_pretty(profiles)?;
        atomic_write(&path, json.as_bytes()).context("Failed to write profiles")
    }

    pub fn find(&self, name_or_id: &str) -> Result<Profile> {
        self.list()?
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(name_or_id) || p.id == name_or_id)
            .ok_or_else(|| anyhow!("Profile '{}' not found", name_or_id))
    }

    pub fn add(&self, profile: Profile) -> Result<Profile> {
        let mut profiles = self.list()?;

        if profile.id.trim().is_empty() {
            return Err(anyhow!("Profile ID cannot be empty"));
        }
        if !profile
            .id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(anyhow!("Profile ID must use only a-z, 0-9, - and _"));
        }
        if profiles.iter().any(|p| p.id == profile.id) {
            return Err(anyhow!("A profile with ID '{}' already exists", profile.id));
        }
        if profile.remote.root.trim().is_empty() {
            return Err(anyhow!("Remote root cannot be empty"));
        }

        profiles.push(profile.clone());
        self.save(&profiles)?;
        Ok(profile)
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let mut profiles = self.list()?;
        let original_len = profiles.len();
        profiles.retain(|p| p.id != name && !p.name.eq_ignore_ascii_case(name));

        if profiles.len() == original_len {
            return Err(anyhow!("Profile '{}' not found", name));
        }
        self.save(&profiles)
    }
}

impl Default for ProfileManager {
    fn default() -> Self {
        Self::new()
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp_path = {
        let mut name = path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    };

    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp file {}", tmp_path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("Failed to write temp file {}", tmp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync temp file {}", tmp_path.display()))?;
    drop(file);

    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "Failed to rename temp file {} to {}",
            tmp_path.display(),
            path.display()
        )
    })
}

pub fn handle_list(mgr: &ProfileManager) -> Result<()> {
    let profiles = mgr.list()?;

    if profiles.is_empty() {
        println!("No profiles found.");
        return Ok(());
    }

    println!("{:<16} {:<20} {:<32} {:<40}", "ID", "NAME", "LOCAL", "REMOTE");
    println!("{:-<16} {:-<20} {:-<32} {:-<40}", "", "", "", "");
    for p in profiles {
        println!(
            "{:<16} {:<20} {:<32} {:<40}",
            p.id,
            p.name,
            p.local_path,
            p.remote.display()
        );
    }

    Ok(())
}

pub fn handle_add(mgr: &ProfileManager, profile: Profile) -> Result<()> {
    let p = mgr.add(profile)?;
    println!("Profile '{}' ({}) created successfully.", p.name, p.id);
    Ok(())
}

pub fn handle_remove(mgr: &ProfileManager, name: &str) -> Result<()> {
    mgr.remove(name)?;
    println!("Profile '{}' removed.", name);
    Ok(())
}
