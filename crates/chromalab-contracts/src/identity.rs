//! Stylist identity and license-verification record keeping.
//!
//! This is the external collaborator the pipeline is gated behind: accounts,
//! license status, and an auth-state subscription. The orchestrator never
//! consults it directly: callers pass an explicit [`StylistSession`] and
//! apply [`StylistSession::require_verified`] before invoking professional
//! operations.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StylistRole {
    Owner,
    Admin,
    Stylist,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StylistRecord {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub role: StylistRole,
    pub is_verified: bool,
    pub license_url: Option<String>,
    pub created_at: String,
}

/// The session value passed explicitly into every professional entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct StylistSession {
    pub uid: String,
    pub display_name: String,
    pub verified: bool,
}

impl StylistSession {
    pub fn require_verified(&self) -> Result<(), IdentityError> {
        if self.verified {
            Ok(())
        } else {
            Err(IdentityError::NotVerified)
        }
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("email '{0}' is already registered")]
    EmailTaken(String),
    #[error("unknown account or wrong password")]
    InvalidCredentials,
    #[error("no account with uid '{0}'")]
    UnknownUid(String),
    #[error("account is not license-verified")]
    NotVerified,
    #[error("directory store I/O failed")]
    Store {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl IdentityError {
    fn store(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        IdentityError::Store {
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedUp(StylistSession),
    SignedIn(StylistSession),
    LicenseUpdated { uid: String, is_verified: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredAccount {
    record: StylistRecord,
    password_digest: String,
}

/// JSON-file-backed account directory. Loads tolerantly: a missing or
/// malformed file starts an empty directory rather than failing.
#[derive(Debug)]
pub struct DirectoryStore {
    path: PathBuf,
    accounts: Mutex<Vec<StoredAccount>>,
    watchers: Mutex<Vec<Sender<AuthEvent>>>,
}

impl DirectoryStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let accounts = load_accounts(&path);
        Self {
            path,
            accounts: Mutex::new(accounts),
            watchers: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Auth-state subscription; dead receivers are pruned on the next notify.
    pub fn subscribe(&self) -> Receiver<AuthEvent> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut watchers) = self.watchers.lock() {
            watchers.push(tx);
        }
        rx
    }

    pub fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<StylistSession, IdentityError> {
        let email = email.trim().to_ascii_lowercase();
        let mut accounts = self.lock_accounts()?;
        if accounts.iter().any(|account| account.record.email == email) {
            return Err(IdentityError::EmailTaken(email));
        }
        let record = StylistRecord {
            uid: Uuid::new_v4().to_string(),
            email: email.clone(),
            display_name: display_name.trim().to_string(),
            role: StylistRole::Stylist,
            is_verified: false,
            license_url: None,
            created_at: now_utc_iso(),
        };
        let session = session_for(&record);
        accounts.push(StoredAccount {
            record,
            password_digest: password_digest(&email, password),
        });
        save_accounts(&self.path, &accounts)?;
        drop(accounts);
        self.notify(AuthEvent::SignedUp(session.clone()));
        Ok(session)
    }

    pub fn sign_in(&self, email: &str, password: &str) -> Result<StylistSession, IdentityError> {
        let email = email.trim().to_ascii_lowercase();
        let digest = password_digest(&email, password);
        let accounts = self.lock_accounts()?;
        let session = accounts
            .iter()
            .find(|account| {
                account.record.email == email && account.password_digest == digest
            })
            .map(|account| session_for(&account.record))
            .ok_or(IdentityError::InvalidCredentials)?;
        drop(accounts);
        self.notify(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    pub fn get_record(&self, uid: &str) -> Option<StylistRecord> {
        let accounts = self.accounts.lock().ok()?;
        accounts
            .iter()
            .find(|account| account.record.uid == uid)
            .map(|account| account.record.clone())
    }

    pub fn update_license_status(
        &self,
        uid: &str,
        license_url: Option<&str>,
        is_verified: bool,
    ) -> Result<StylistRecord, IdentityError> {
        let mut accounts = self.lock_accounts()?;
        let account = accounts
            .iter_mut()
            .find(|account| account.record.uid == uid)
            .ok_or_else(|| IdentityError::UnknownUid(uid.to_string()))?;
        account.record.license_url = license_url.map(str::to_string);
        account.record.is_verified = is_verified;
        let record = account.record.clone();
        save_accounts(&self.path, &accounts)?;
        drop(accounts);
        self.notify(AuthEvent::LicenseUpdated {
            uid: record.uid.clone(),
            is_verified,
        });
        Ok(record)
    }

    fn lock_accounts(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, Vec<StoredAccount>>, IdentityError> {
        self.accounts
            .lock()
            .map_err(|_| IdentityError::store(anyhow::anyhow!("account lock poisoned")))
    }

    fn notify(&self, event: AuthEvent) {
        if let Ok(mut watchers) = self.watchers.lock() {
            watchers.retain(|watcher| watcher.send(event.clone()).is_ok());
        }
    }
}

fn session_for(record: &StylistRecord) -> StylistSession {
    StylistSession {
        uid: record.uid.clone(),
        display_name: record.display_name.clone(),
        verified: record.is_verified,
    }
}

fn password_digest(email: &str, password: &str) -> String {
    hex::encode(Sha256::digest(format!("{email}:{password}").as_bytes()))
}

fn load_accounts(path: &Path) -> Vec<StoredAccount> {
    let Ok(raw) = fs::read_to_string(path) else {
        return Vec::new();
    };
    let payload: Value = serde_json::from_str(&raw).unwrap_or(Value::Object(Map::new()));
    payload
        .get("accounts")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn save_accounts(path: &Path, accounts: &[StoredAccount]) -> Result<(), IdentityError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(IdentityError::store)?;
    }
    let payload = serde_json::json!({
        "schema_version": 1,
        "accounts": accounts,
    });
    let rendered = serde_json::to_string_pretty(&payload).map_err(IdentityError::store)?;
    fs::write(path, rendered).map_err(IdentityError::store)
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_up_then_sign_in_round_trips_through_the_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("directory.json");

        let store = DirectoryStore::open(&path);
        let session = store
            .sign_up("ana@salon.example", "hunter2", "Ana")
            .unwrap();
        assert!(!session.verified);
        assert!(session.require_verified().is_err());

        // A fresh store over the same file sees the account.
        let reopened = DirectoryStore::open(&path);
        let session = reopened.sign_in("Ana@Salon.example", "hunter2").unwrap();
        assert_eq!(session.display_name, "Ana");
        assert!(matches!(
            reopened.sign_in("ana@salon.example", "wrong"),
            Err(IdentityError::InvalidCredentials)
        ));
        Ok(())
    }

    #[test]
    fn duplicate_email_is_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = DirectoryStore::open(temp.path().join("directory.json"));
        store.sign_up("ana@salon.example", "pw", "Ana").unwrap();
        assert!(matches!(
            store.sign_up("ana@salon.example", "pw2", "Other Ana"),
            Err(IdentityError::EmailTaken(_))
        ));
        Ok(())
    }

    #[test]
    fn license_update_flips_verification_and_notifies_watchers() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = DirectoryStore::open(temp.path().join("directory.json"));
        let events = store.subscribe();

        let session = store.sign_up("ana@salon.example", "pw", "Ana").unwrap();
        let record = store
            .update_license_status(&session.uid, Some("file:///licenses/ana.jpg"), true)
            .unwrap();
        assert!(record.is_verified);
        assert_eq!(
            record.license_url.as_deref(),
            Some("file:///licenses/ana.jpg")
        );

        let verified = store.sign_in("ana@salon.example", "pw").unwrap();
        assert!(verified.require_verified().is_ok());

        assert!(matches!(events.recv()?, AuthEvent::SignedUp(_)));
        assert!(matches!(
            events.recv()?,
            AuthEvent::LicenseUpdated { is_verified: true, .. }
        ));
        Ok(())
    }

    #[test]
    fn unknown_uid_is_reported() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = DirectoryStore::open(temp.path().join("directory.json"));
        assert!(matches!(
            store.update_license_status("nope", None, true),
            Err(IdentityError::UnknownUid(_))
        ));
        assert!(store.get_record("nope").is_none());
        Ok(())
    }
}
