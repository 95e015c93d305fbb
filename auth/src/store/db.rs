//! # AuthDb: Persistent Identity Store
//!
//! The shipped implementation of [`IdentityStore`] and [`ActivityRecorder`],
//! built on sled's embedded key-value store.
//!
//! ## Tree Layout
//!
//! | Tree         | Key                          | Value                    |
//! |--------------|------------------------------|--------------------------|
//! | `identities` | address bytes (20B)          | `bincode(Identity)`      |
//! | `activity`   | sled-generated id (8B BE)    | `bincode(ActivityEntry)` |
//!
//! Identity keys are the decoded address bytes, never the text, so two
//! spellings of one address cannot produce two records. Activity ids are
//! big-endian so sled's lexicographic order is append order.
//!
//! ## Atomicity
//!
//! `create` is a compare-and-swap from "absent". When two resolvers race to
//! provision the same wallet, one CAS lands and the other gets
//! [`StoreError::AlreadyExists`]. Mutations are CAS read-modify-write loops:
//! a lost race re-reads and retries, it never clobbers.

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};
use std::path::Path;

use super::{ActivityEntry, ActivityRecorder, IdentityStore, StoreError, StoreResult};
use crate::identity::{Identity, Role, WalletAddress};

// ---------------------------------------------------------------------------
// AuthDb
// ---------------------------------------------------------------------------

/// sled-backed identity repository and activity log.
///
/// # Thread Safety
///
/// sled trees support concurrent reads and serialized writes, so `AuthDb`
/// can be shared via `Arc<AuthDb>` without extra locking.
#[derive(Debug, Clone)]
pub struct AuthDb {
    db: Db,
    identities: Tree,
    activity: Tree,
}

impl AuthDb {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A throwaway database, removed when dropped. For tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let identities = db.open_tree("identities")?;
        let activity = db.open_tree("activity")?;
        Ok(Self {
            db,
            identities,
            activity,
        })
    }

    // -- Identity operations ------------------------------------------------

    /// Synchronous lookup used by the async trait methods.
    pub fn load(&self, address: &WalletAddress) -> StoreResult<Option<Identity>> {
        match self.identities.get(address.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Insert a new record unless one exists.
    pub fn insert_new(&self, address: &WalletAddress, role: Role) -> StoreResult<Identity> {
        if !role.is_authenticated() {
            return Err(StoreError::UnassignableRole(role));
        }

        let identity = Identity::provision(*address, role);
        let encoded = encode(&identity)?;

        match self
            .identities
            .compare_and_swap(address.as_bytes(), None::<&[u8]>, Some(encoded))?
        {
            Ok(()) => {
                self.identities.flush()?;
                Ok(identity)
            }
            Err(_) => Err(StoreError::AlreadyExists(*address)),
        }
    }

    /// Apply `mutate` to the stored record and bump `updated_at`.
    fn modify<F>(&self, address: &WalletAddress, mutate: F) -> StoreResult<Identity>
    where
        F: Fn(&mut Identity),
    {
        let key = address.as_bytes();
        loop {
            let current = self
                .identities
                .get(key)?
                .ok_or(StoreError::NotFound(*address))?;

            let mut identity: Identity = decode(&current)?;
            mutate(&mut identity);
            let encoded = encode(&identity)?;

            match self
                .identities
                .compare_and_swap(key, Some(current), Some(encoded))?
            {
                Ok(()) => return Ok(identity),
                Err(_) => continue,
            }
        }
    }

    pub fn update_role(&self, address: &WalletAddress, role: Role) -> StoreResult<Identity> {
        if !role.is_authenticated() {
            return Err(StoreError::UnassignableRole(role));
        }
        self.modify(address, |identity| {
            identity.role = role;
            identity.updated_at = Utc::now();
        })
    }

    pub fn update_active(&self, address: &WalletAddress, active: bool) -> StoreResult<Identity> {
        self.modify(address, |identity| {
            identity.active = active;
            identity.updated_at = Utc::now();
        })
    }

    pub fn mark_seen(&self, address: &WalletAddress) -> StoreResult<Identity> {
        self.modify(address, |identity| {
            identity.last_seen_at = Some(Utc::now());
        })
    }

    // -- Activity operations ------------------------------------------------

    /// Newest-first activity entries, at most `limit`.
    pub fn recent_activity(&self, limit: usize) -> StoreResult<Vec<ActivityEntry>> {
        let mut entries = Vec::with_capacity(limit.min(64));
        for item in self.activity.iter().rev().take(limit) {
            let (_key, value) = item?;
            entries.push(decode(&value)?);
        }
        Ok(entries)
    }

    // -- Utility operations -------------------------------------------------

    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    pub fn activity_count(&self) -> usize {
        self.activity.len()
    }

    /// Block until all pending writes are durable.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Port Implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl IdentityStore for AuthDb {
    async fn get_by_address(&self, address: &WalletAddress) -> StoreResult<Option<Identity>> {
        self.load(address)
    }

    async fn create(&self, address: &WalletAddress, default_role: Role) -> StoreResult<Identity> {
        self.insert_new(address, default_role)
    }

    async fn set_role(&self, address: &WalletAddress, role: Role) -> StoreResult<Identity> {
        self.update_role(address, role)
    }

    async fn set_active(&self, address: &WalletAddress, active: bool) -> StoreResult<Identity> {
        self.update_active(address, active)
    }

    async fn touch(&self, address: &WalletAddress) -> StoreResult<Identity> {
        self.mark_seen(address)
    }
}

impl ActivityRecorder for AuthDb {
    fn append(&self, entry: ActivityEntry) -> StoreResult<()> {
        let id = self.db.generate_id()?;
        self.activity.insert(id.to_be_bytes(), encode(&entry)?)?;
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
