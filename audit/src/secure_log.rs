use async_trait::async_trait;
use authz::audit::{AuditEvent, AuditSink};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::{AuditError, Result};

/// `previous_hash` of the first entry in every log file.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecureLogEntry {
    /// ULID of this entry
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Event tag, e.g. `ACCESS_DENIED`
    pub event: String,
    /// `granted`, `denied`, `failed`, `rejected` or `admin`
    pub outcome: String,
    /// Subject of the token, or the admin who acted
    pub user_id: Option<String>,
    pub resource_id: Option<String>,
    pub client_ip: Option<String>,
    /// The full event as JSON
    pub details: serde_json::Value,
    /// Hash of the previous entry for chain verification
    pub previous_hash: String,
    /// Hash of this entry
    pub entry_hash: String,
}

impl SecureLogEntry {
    pub fn from_event(event: &AuditEvent, previous_hash: String) -> Result<Self> {
        let mut entry = Self {
            id: ulid::Ulid::new().to_string(),
            timestamp: Utc::now(),
            event: event.tag().to_string(),
            outcome: event.outcome().to_string(),
            user_id: event.user_id().map(str::to_string),
            resource_id: event.resource_id().map(str::to_string),
            client_ip: event.client_ip().map(str::to_string),
            details: serde_json::to_value(event)?,
            previous_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.calculate_hash();
        Ok(entry)
    }

    fn calculate_hash(&self) -> String {
        let mut hasher = Sha256::new();

        // Every field except entry_hash; optional fields are length-prefixed so
        // that moving text between them changes the hash.
        hasher.update(self.id.as_bytes());
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update(self.event.as_bytes());
        hasher.update(self.outcome.as_bytes());
        for field in [&self.user_id, &self.resource_id, &self.client_ip] {
            match field {
                Some(value) => {
                    hasher.update((value.len() as u64).to_be_bytes());
                    hasher.update(value.as_bytes());
                }
                None => hasher.update([0xffu8]),
            }
        }
        hasher.update(self.details.to_string().as_bytes());
        hasher.update(self.previous_hash.as_bytes());

        hex::encode(hasher.finalize())
    }

    pub fn verify_hash(&self) -> bool {
        self.entry_hash == self.calculate_hash()
    }
}

/// Configuration for the secure logger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureLogConfig {
    /// Path to the active log file
    pub log_path: PathBuf,
    /// Size of the active file (in MB) that triggers rotation
    pub max_size_mb: u64,
    /// Number of rotated files to keep
    pub max_rotations: u32,
    /// Verify the existing chain when the logger opens the file
    pub enable_verification: bool,
}

impl Default for SecureLogConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("logs/audit-chain.log"),
            max_size_mb: 100,
            max_rotations: 10,
            enable_verification: true,
        }
    }
}

/// Outcome of checking one log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    /// Entries that passed before the first failure (all of them if valid)
    pub entries: usize,
    pub valid: bool,
    /// 1-based line of the first broken entry
    pub broken_at: Option<usize>,
}

/// Hash-chained audit log writer.
///
/// Each rotated file is an independent chain starting at [`GENESIS_HASH`].
pub struct SecureLogger {
    config: SecureLogConfig,
    /// Hash of the last written entry. Held across the write so entries are
    /// chained in the order they reach the file.
    last_hash: Mutex<String>,
}

impl SecureLogger {
    pub fn new(config: SecureLogConfig) -> Result<Self> {
        if let Some(parent) = config.log_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let last_hash = if config.log_path.exists() {
            if config.enable_verification {
                match Self::verify_file(&config.log_path) {
                    Ok(report) if !report.valid => error!(
                        path = %config.log_path.display(),
                        line = ?report.broken_at,
                        "Existing audit log failed chain verification"
                    ),
                    Err(e) => error!(
                        path = %config.log_path.display(),
                        "Existing audit log could not be verified: {}",
                        e
                    ),
                    Ok(_) => {}
                }
            }
            Self::get_last_hash(&config.log_path)?
        } else {
            GENESIS_HASH.to_string()
        };

        info!("Secure audit log at {}", config.log_path.display());

        Ok(Self {
            config,
            last_hash: Mutex::new(last_hash),
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.log_path
    }

    /// Append one event to the chain.
    ///
    /// File I/O runs on the blocking pool; the hash lock is held until the
    /// entry is on disk.
    pub async fn log_event(&self, event: &AuditEvent) -> Result<SecureLogEntry> {
        let mut last_hash = self.last_hash.lock().await;

        let config = self.config.clone();
        let event = event.clone();
        let previous_hash = last_hash.clone();
        let entry = tokio::task::spawn_blocking(move || {
            let previous_hash = if rotate_if_needed(&config)? {
                GENESIS_HASH.to_string()
            } else {
                previous_hash
            };
            let entry = SecureLogEntry::from_event(&event, previous_hash)?;
            write_entry(&config.log_path, &entry)?;
            Ok::<_, AuditError>(entry)
        })
        .await
        .map_err(|e| AuditError::Task(e.to_string()))??;

        *last_hash = entry.entry_hash.clone();

        debug!(
            event = %entry.event,
            outcome = %entry.outcome,
            id = %entry.id,
            "Secure log entry created"
        );
        Ok(entry)
    }

    /// Rotated files next to the active one, oldest first.
    pub fn rotated_files(&self) -> Result<Vec<PathBuf>> {
        rotated_files(&self.config.log_path)
    }

    fn get_last_hash(path: &Path) -> Result<String> {
        let reader = BufReader::new(File::open(path)?);
        let mut last_hash = GENESIS_HASH.to_string();

        for line in reader.lines().map_while(|r| r.ok()) {
            if let Ok(entry) = serde_json::from_str::<SecureLogEntry>(&line) {
                last_hash = entry.entry_hash;
            }
        }
        Ok(last_hash)
    }

    /// Check the hash chain of an arbitrary log file.
    pub fn verify_file(path: &Path) -> Result<ChainReport> {
        let reader = BufReader::new(File::open(path)?);
        let mut expected_previous_hash = GENESIS_HASH.to_string();
        let mut entries = 0;

        for (index, line) in reader.lines().enumerate() {
            let line_number = index + 1;
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let entry: SecureLogEntry =
                serde_json::from_str(&line).map_err(|e| AuditError::Parse {
                    line: line_number,
                    message: e.to_string(),
                })?;

            if !entry.verify_hash() {
                error!(
                    "Hash verification failed at line {}: entry_id={}",
                    line_number, entry.id
                );
                return Ok(ChainReport {
                    entries,
                    valid: false,
                    broken_at: Some(line_number),
                });
            }

            if entry.previous_hash != expected_previous_hash {
                error!(
                    "Chain verification failed at line {}: expected_previous={}, got={}",
                    line_number, expected_previous_hash, entry.previous_hash
                );
                return Ok(ChainReport {
                    entries,
                    valid: false,
                    broken_at: Some(line_number),
                });
            }

            expected_previous_hash = entry.entry_hash;
            entries += 1;
        }

        Ok(ChainReport {
            entries,
            valid: true,
            broken_at: None,
        })
    }

    /// Verify the integrity of the active log file.
    pub async fn verify_log_chain(&self) -> Result<bool> {
        let _guard = self.last_hash.lock().await;
        if !self.config.log_path.exists() {
            return Ok(true);
        }

        let report = Self::verify_file(&self.config.log_path)?;
        if report.valid {
            info!(
                "Log chain verification successful: {} entries verified",
                report.entries
            );
        }
        Ok(report.valid)
    }

    /// Read back every entry of a backup copy, rejecting tampered entries.
    pub async fn replay_from_backup(&self, backup_path: &Path) -> Result<Vec<SecureLogEntry>> {
        if !backup_path.exists() {
            return Err(AuditError::BackupNotFound(backup_path.to_path_buf()));
        }

        let reader = BufReader::new(File::open(backup_path)?);
        let mut entries = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: SecureLogEntry = serde_json::from_str(&line)?;
            if !entry.verify_hash() {
                return Err(AuditError::HashVerificationFailed { line: index + 1 });
            }
            entries.push(entry);
        }

        info!("Replayed {} entries from backup", entries.len());
        Ok(entries)
    }
}

/// File name marker that separates rotated chains from other files sharing
/// the stem, such as daily tracing logs.
const ROTATED_MARKER: &str = "rotated-";

fn write_entry(path: &Path, entry: &SecureLogEntry) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    let json = serde_json::to_string(entry)?;
    writeln!(file, "{}", json)?;
    file.flush()?;
    Ok(())
}

/// Returns true if the active file was rotated.
fn rotate_if_needed(config: &SecureLogConfig) -> Result<bool> {
    if !config.log_path.exists() {
        return Ok(false);
    }

    let size = std::fs::metadata(&config.log_path)?.len();
    if size == 0 || size < config.max_size_mb.saturating_mul(1024 * 1024) {
        return Ok(false);
    }

    rotate_logs(config)?;
    Ok(true)
}

/// `{stem}.rotated-` for the active log path.
fn rotation_prefix(log_path: &Path) -> String {
    let stem = log_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("audit");
    format!("{}.{}", stem, ROTATED_MARKER)
}

fn rotate_logs(config: &SecureLogConfig) -> Result<()> {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%f");
    let extension = config
        .log_path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("log");
    let rotated_path = config.log_path.with_file_name(format!(
        "{}{}.{}",
        rotation_prefix(&config.log_path),
        timestamp,
        extension
    ));

    std::fs::rename(&config.log_path, &rotated_path)?;
    info!("Rotated audit log to: {}", rotated_path.display());

    cleanup_old_rotations(config)
}

fn rotated_files(log_path: &Path) -> Result<Vec<PathBuf>> {
    let Some(parent) = log_path.parent() else {
        return Ok(Vec::new());
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    let prefix = rotation_prefix(log_path);

    let mut rotated: Vec<PathBuf> = std::fs::read_dir(parent)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with(&prefix))
                .unwrap_or(false)
        })
        .map(|entry| entry.path())
        .collect();

    // The timestamp in the name sorts chronologically
    rotated.sort();
    Ok(rotated)
}

fn cleanup_old_rotations(config: &SecureLogConfig) -> Result<()> {
    let mut rotated = rotated_files(&config.log_path)?;
    let keep = config.max_rotations as usize;
    if rotated.len() > keep {
        for old in rotated.drain(..rotated.len() - keep) {
            std::fs::remove_file(&old)?;
            info!("Removed old rotation: {}", old.display());
        }
    }
    Ok(())
}

#[async_trait]
impl AuditSink for SecureLogger {
    async fn record(&self, event: &AuditEvent) -> authz::Result<()> {
        self.log_event(event).await?;
        Ok(())
    }
}
