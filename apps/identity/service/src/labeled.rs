//! Labeled collection protocol shared by the four profile attribute kinds.
//!
//! Each kind is a `label -> value` map on [`UserRecord`]. Labels are unique
//! within a kind, compared exactly (case-sensitive, no normalization), and
//! independent across kinds. A kind supplies its value predicate and its
//! cardinality floor through [`CollectionKind`]; everything else is shared.
//!
//! Every mutation runs as one get-mutate-save sequence under the username
//! lock, so a rename is a single whole-record write: observers see either the
//! old label or the new one, never both and never neither.

use std::collections::BTreeMap;
use std::fmt;

use crate::profile::{ProfileError, RecordAccess};
use crate::record_store::{Address, BankAccount, Phonenumber, UserRecord};
use crate::validation::{
    validate_address, validate_bank_account, validate_email_address, validate_label,
    validate_phonenumber,
};

pub trait CollectionKind: Send + Sync + 'static {
    type Value: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    /// Route segment and log name.
    const NAME: &'static str;

    /// Entries that must remain after a delete.
    const MIN_ENTRIES: usize = 0;

    fn entries(record: &UserRecord) -> &BTreeMap<String, Self::Value>;

    fn entries_mut(record: &mut UserRecord) -> &mut BTreeMap<String, Self::Value>;

    fn validate_value(value: &Self::Value) -> Result<(), ProfileError>;
}

pub struct Emails;
pub struct Phones;
pub struct Addresses;
pub struct Banks;

impl CollectionKind for Emails {
    type Value = String;
    const NAME: &'static str = "emailaddresses";
    const MIN_ENTRIES: usize = 1;

    fn entries(record: &UserRecord) -> &BTreeMap<String, String> {
        &record.email
    }

    fn entries_mut(record: &mut UserRecord) -> &mut BTreeMap<String, String> {
        &mut record.email
    }

    fn validate_value(value: &String) -> Result<(), ProfileError> {
        validate_email_address(value)
    }
}

impl CollectionKind for Phones {
    type Value = Phonenumber;
    const NAME: &'static str = "phonenumbers";

    fn entries(record: &UserRecord) -> &BTreeMap<String, Phonenumber> {
        &record.phone
    }

    fn entries_mut(record: &mut UserRecord) -> &mut BTreeMap<String, Phonenumber> {
        &mut record.phone
    }

    fn validate_value(value: &Phonenumber) -> Result<(), ProfileError> {
        validate_phonenumber(value)
    }
}

impl CollectionKind for Addresses {
    type Value = Address;
    const NAME: &'static str = "addresses";

    fn entries(record: &UserRecord) -> &BTreeMap<String, Address> {
        &record.address
    }

    fn entries_mut(record: &mut UserRecord) -> &mut BTreeMap<String, Address> {
        &mut record.address
    }

    fn validate_value(value: &Address) -> Result<(), ProfileError> {
        validate_address(value)
    }
}

impl CollectionKind for Banks {
    type Value = BankAccount;
    const NAME: &'static str = "banks";

    fn entries(record: &UserRecord) -> &BTreeMap<String, BankAccount> {
        &record.bank
    }

    fn entries_mut(record: &mut UserRecord) -> &mut BTreeMap<String, BankAccount> {
        &mut record.bank
    }

    fn validate_value(value: &BankAccount) -> Result<(), ProfileError> {
        validate_bank_account(value)
    }
}

pub fn validate_entry<K: CollectionKind>(label: &str, value: &K::Value) -> Result<(), ProfileError> {
    validate_label(label)?;
    K::validate_value(value)
}

/// Inserts a new entry. The record is always changed on success.
pub fn apply_create<K: CollectionKind>(
    record: &mut UserRecord,
    label: &str,
    value: K::Value,
) -> Result<(), ProfileError> {
    let entries = K::entries_mut(record);
    if entries.contains_key(label) {
        return Err(ProfileError::conflict(format!(
            "{} label '{label}' already exists",
            K::NAME
        )));
    }
    entries.insert(label.to_string(), value);
    Ok(())
}

/// Renames `old_label` to `new_label` and replaces the value.
///
/// Returns `false` when the record already holds exactly the requested end
/// state because a previous attempt committed: `old_label` is gone and
/// `new_label` carries `value`.
pub fn apply_rename<K: CollectionKind>(
    record: &mut UserRecord,
    old_label: &str,
    new_label: &str,
    value: K::Value,
) -> Result<bool, ProfileError> {
    let entries = K::entries_mut(record);

    if !entries.contains_key(old_label) {
        if old_label != new_label && entries.get(new_label) == Some(&value) {
            return Ok(false);
        }
        return Err(ProfileError::not_found(format!(
            "{} label '{old_label}' not found",
            K::NAME
        )));
    }

    if old_label == new_label {
        if entries.get(old_label) == Some(&value) {
            return Ok(false);
        }
        entries.insert(new_label.to_string(), value);
        return Ok(true);
    }

    if entries.contains_key(new_label) {
        return Err(ProfileError::conflict(format!(
            "{} label '{new_label}' already exists",
            K::NAME
        )));
    }

    entries.remove(old_label);
    entries.insert(new_label.to_string(), value);
    Ok(true)
}

pub fn apply_delete<K: CollectionKind>(
    record: &mut UserRecord,
    label: &str,
) -> Result<K::Value, ProfileError> {
    let entries = K::entries_mut(record);
    if !entries.contains_key(label) {
        return Err(ProfileError::not_found(format!(
            "{} label '{label}' not found",
            K::NAME
        )));
    }
    if entries.len() <= K::MIN_ENTRIES {
        return Err(ProfileError::conflict(format!(
            "cannot remove the last entry of {}",
            K::NAME
        )));
    }
    entries
        .remove(label)
        .ok_or_else(|| ProfileError::not_found(format!("{} label '{label}' not found", K::NAME)))
}

/// Applies the labeled protocol against records fetched from the store.
#[derive(Clone)]
pub struct LabeledCollectionManager {
    records: RecordAccess,
}

impl LabeledCollectionManager {
    pub fn new(records: RecordAccess) -> Self {
        Self { records }
    }

    pub async fn create<K: CollectionKind>(
        &self,
        username: &str,
        label: &str,
        value: K::Value,
    ) -> Result<K::Value, ProfileError> {
        validate_entry::<K>(label, &value)?;

        let stored = self
            .records
            .mutate(username, |record| {
                apply_create::<K>(record, label, value.clone())?;
                Ok((value, true))
            })
            .await?;

        tracing::info!(
            target: "identity.labeled",
            username,
            kind = K::NAME,
            label,
            "labeled entry created",
        );
        Ok(stored)
    }

    pub async fn get<K: CollectionKind>(
        &self,
        username: &str,
        label: &str,
    ) -> Result<K::Value, ProfileError> {
        let record = self.records.load(username).await?;
        K::entries(&record).get(label).cloned().ok_or_else(|| {
            ProfileError::not_found(format!("{} label '{label}' not found", K::NAME))
        })
    }

    pub async fn list<K: CollectionKind>(
        &self,
        username: &str,
    ) -> Result<BTreeMap<String, K::Value>, ProfileError> {
        let record = self.records.load(username).await?;
        Ok(K::entries(&record).clone())
    }

    pub async fn rename<K: CollectionKind>(
        &self,
        username: &str,
        old_label: &str,
        new_label: &str,
        value: K::Value,
    ) -> Result<K::Value, ProfileError> {
        validate_entry::<K>(new_label, &value)?;

        let (stored, changed) = self
            .records
            .mutate(username, |record| {
                let changed = apply_rename::<K>(record, old_label, new_label, value.clone())?;
                Ok(((value, changed), changed))
            })
            .await?;

        tracing::info!(
            target: "identity.labeled",
            username,
            kind = K::NAME,
            old_label,
            new_label,
            changed,
            "labeled entry updated",
        );
        Ok(stored)
    }

    pub async fn delete<K: CollectionKind>(
        &self,
        username: &str,
        label: &str,
    ) -> Result<(), ProfileError> {
        self.records
            .mutate(username, |record| {
                apply_delete::<K>(record, label)?;
                Ok(((), true))
            })
            .await?;

        tracing::info!(
            target: "identity.labeled",
            username,
            kind = K::NAME,
            label,
            "labeled entry deleted",
        );
        Ok(())
    }
}
