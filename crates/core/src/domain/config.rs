//! Policy configuration
//!
//! This module provides:
//! - Device priority lists used by the default router as its tie-break
//! - The privacy/public device table consulted by the priority routers
//! - The static device type to hardware module mapping
//! - TOML load/save, a config manager with corrupt-file recovery and a
//!   hot-reload watcher

use crate::domain::device::{DeviceCategory, DeviceRole, DeviceType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Privacy class of a device type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrivacyClass {
    /// Personal devices (headsets, earbuds)
    Privacy,
    /// Shared devices (displays, cast receivers)
    Public,
}

/// Which stream families a privacy rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceUsage {
    Media,
    Voice,
    All,
}

impl DeviceUsage {
    pub fn covers(&self, requested: DeviceUsage) -> bool {
        *self == DeviceUsage::All || requested == DeviceUsage::All || *self == requested
    }
}

/// One row of the privacy table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevicePrivacyRule {
    pub device_type: DeviceType,
    pub class: PrivacyClass,
    pub roles: Vec<DeviceRole>,
    pub usages: Vec<DeviceUsage>,
    /// Empty means any category
    #[serde(default)]
    pub categories: Vec<DeviceCategory>,
}

impl DevicePrivacyRule {
    pub fn new(device_type: DeviceType, class: PrivacyClass) -> Self {
        Self {
            device_type,
            class,
            roles: vec![DeviceRole::Output, DeviceRole::Input],
            usages: vec![DeviceUsage::All],
            categories: Vec::new(),
        }
    }

    pub fn roles(mut self, roles: &[DeviceRole]) -> Self {
        self.roles = roles.to_vec();
        self
    }

    pub fn usages(mut self, usages: &[DeviceUsage]) -> Self {
        self.usages = usages.to_vec();
        self
    }

    pub fn matches(
        &self,
        device_type: DeviceType,
        category: DeviceCategory,
        role: DeviceRole,
        usage: DeviceUsage,
    ) -> bool {
        self.device_type == device_type
            && self.roles.contains(&role)
            && self.usages.iter().any(|u| u.covers(usage))
            && (self.categories.is_empty() || self.categories.contains(&category))
    }
}

/// Hardware module family a port belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleClass {
    Primary,
    A2dp,
    Usb,
    Dp,
    File,
    Remote,
}

/// Static description of one loadable hardware module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub class: ModuleClass,
    /// Port (sink/source) name exposed by the module
    pub name: String,
    pub role: DeviceRole,
    pub device_types: Vec<DeviceType>,
    /// Loaded at init rather than on demand
    #[serde(default)]
    pub preload: bool,
}

impl ModuleSpec {
    pub fn new(class: ModuleClass, name: &str, role: DeviceRole, types: &[DeviceType]) -> Self {
        Self {
            class,
            name: name.to_string(),
            role,
            device_types: types.to_vec(),
            preload: class == ModuleClass::Primary,
        }
    }

    /// Module spec for a distributed node
    pub fn remote(network_id: &str, role: DeviceRole) -> Self {
        let suffix = if role == DeviceRole::Input { "in" } else { "out" };
        Self {
            class: ModuleClass::Remote,
            name: format!("{}_{}", network_id, suffix),
            role,
            device_types: Vec::new(),
            preload: false,
        }
    }
}

/// Complete routing policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Output tie-break order for the default router, highest first
    pub output_priority: Vec<DeviceType>,

    /// Input tie-break order for the default router, highest first
    pub input_priority: Vec<DeviceType>,

    /// Duration of the forced mute applied to a lost sink (0 = disabled)
    #[serde(default = "default_mute_ms")]
    pub mute_on_device_lost_ms: u64,

    /// How long the volume path waits on the safe-volume dialog
    #[serde(default = "default_safe_volume_timeout")]
    pub safe_volume_timeout_secs: u64,

    #[serde(default)]
    pub privacy: Vec<DevicePrivacyRule>,

    pub modules: Vec<ModuleSpec>,
}

fn default_mute_ms() -> u64 {
    150
}

fn default_safe_volume_timeout() -> u64 {
    5
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::factory_default()
    }
}

impl PolicyConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading policy configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        debug!("Policy configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving policy configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Policy configuration saved successfully");
        Ok(())
    }

    /// Create factory default configuration
    pub fn factory_default() -> Self {
        use DeviceType::*;

        let output_priority = vec![BluetoothSco, BluetoothA2dp, UsbHeadset, WiredHeadset, WiredHeadphones, Dp, Speaker];
        let input_priority = vec![BluetoothSco, UsbHeadset, WiredHeadset, Mic, WakeUp];

        let privacy = vec![
            DevicePrivacyRule::new(BluetoothA2dp, PrivacyClass::Privacy)
                .roles(&[DeviceRole::Output])
                .usages(&[DeviceUsage::Media]),
            DevicePrivacyRule::new(BluetoothSco, PrivacyClass::Privacy)
                .usages(&[DeviceUsage::Voice]),
            DevicePrivacyRule::new(WiredHeadset, PrivacyClass::Privacy),
            DevicePrivacyRule::new(WiredHeadphones, PrivacyClass::Privacy)
                .roles(&[DeviceRole::Output]),
            DevicePrivacyRule::new(UsbHeadset, PrivacyClass::Privacy),
            DevicePrivacyRule::new(Dp, PrivacyClass::Public)
                .roles(&[DeviceRole::Output])
                .usages(&[DeviceUsage::Media]),
            DevicePrivacyRule::new(RemoteCast, PrivacyClass::Public)
                .roles(&[DeviceRole::Output])
                .usages(&[DeviceUsage::Media]),
        ];

        let modules = vec![
            ModuleSpec::new(
                ModuleClass::Primary,
                "Speaker",
                DeviceRole::Output,
                &[Speaker, Earpiece, WiredHeadset, WiredHeadphones, BluetoothSco],
            ),
            ModuleSpec::new(
                ModuleClass::Primary,
                "Built_in_mic",
                DeviceRole::Input,
                &[Mic, WiredHeadset, BluetoothSco],
            ),
            ModuleSpec::new(ModuleClass::Primary, "Built_in_wakeup", DeviceRole::Input, &[WakeUp]),
            ModuleSpec::new(ModuleClass::A2dp, "Bt_Speaker", DeviceRole::Output, &[BluetoothA2dp]),
            ModuleSpec::new(ModuleClass::Usb, "Usb_arm_speaker", DeviceRole::Output, &[UsbHeadset]),
            ModuleSpec::new(ModuleClass::Usb, "Usb_arm_mic", DeviceRole::Input, &[UsbHeadset]),
            ModuleSpec::new(ModuleClass::Dp, "DP_speaker", DeviceRole::Output, &[Dp]),
            ModuleSpec::new(ModuleClass::File, "file_sink", DeviceRole::Output, &[FileSink]),
            ModuleSpec::new(ModuleClass::File, "file_source", DeviceRole::Input, &[FileSource]),
        ];

        Self {
            output_priority,
            input_priority,
            privacy,
            modules,
            mute_on_device_lost_ms: default_mute_ms(),
            safe_volume_timeout_secs: default_safe_volume_timeout(),
        }
    }

    /// Check the invariants the engine relies on
    pub fn validate(&self) -> Result<()> {
        if self.output_priority.is_empty() {
            return Err(ConfigError::Invalid("output_priority is empty".to_string()));
        }
        if self.input_priority.is_empty() {
            return Err(ConfigError::Invalid("input_priority is empty".to_string()));
        }
        if self.module_for(DeviceType::Speaker, DeviceRole::Output).is_none() {
            return Err(ConfigError::Invalid(
                "no module serves the built-in speaker".to_string(),
            ));
        }
        Ok(())
    }

    /// Module serving a device type in the given direction
    pub fn module_for(&self, device_type: DeviceType, role: DeviceRole) -> Option<&ModuleSpec> {
        self.modules
            .iter()
            .find(|m| m.role == role && m.device_types.contains(&device_type))
    }

    /// All modules of a class
    pub fn modules_of(&self, class: ModuleClass) -> impl Iterator<Item = &ModuleSpec> {
        self.modules.iter().filter(move |m| m.class == class)
    }

    /// Privacy class configured for a device, if any
    pub fn privacy_class(
        &self,
        device_type: DeviceType,
        category: DeviceCategory,
        role: DeviceRole,
        usage: DeviceUsage,
    ) -> Option<PrivacyClass> {
        self.privacy
            .iter()
            .find(|rule| rule.matches(device_type, category, role, usage))
            .map(|rule| rule.class)
    }
}

/// File system watcher for hot-reload
pub struct ConfigWatcher {
    _watcher: notify::RecommendedWatcher,
    config_tx: broadcast::Sender<PathBuf>,
}

impl ConfigWatcher {
    /// Watch a configuration directory for TOML changes
    pub async fn new(config_dir: PathBuf) -> Result<Self> {
        use notify::Watcher;

        let (config_tx, _config_rx) = broadcast::channel(32);

        fs::create_dir_all(&config_dir).await?;

        let tx_clone = config_tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                ) {
                    for path in event.paths {
                        if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                            if let Err(e) = tx_clone.send(path) {
                                error!("Failed to send config change event: {}", e);
                            }
                        }
                    }
                }
            }
        })?;

        watcher.watch(&config_dir, notify::RecursiveMode::NonRecursive)?;

        info!(path = %config_dir.display(), "Config watcher started");

        Ok(Self {
            _watcher: watcher,
            config_tx,
        })
    }

    /// Subscribe to config change events
    pub fn subscribe(&self) -> broadcast::Receiver<PathBuf> {
        self.config_tx.subscribe()
    }
}

/// Manages the policy file at `~/.config/conductor/policy.toml`
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("policy.toml");
        Self {
            config_dir,
            config_path,
        }
    }

    /// Get the default config directory path
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("conductor"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file
    ///
    /// A missing file yields (and writes) the factory default. A corrupt
    /// file is backed up next to the original and replaced in memory by the
    /// factory default.
    #[instrument(skip(self))]
    pub async fn load(&self) -> PolicyConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Policy file not found, creating factory default"
            );

            let config = PolicyConfig::factory_default();
            if let Err(e) = config.save_to_file(&self.config_path).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save factory default policy"
                );
            }
            return config;
        }

        match PolicyConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load policy, using factory default"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt policy"
                    );
                }

                PolicyConfig::factory_default()
            }
        }
    }

    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &PolicyConfig) -> Result<()> {
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}
