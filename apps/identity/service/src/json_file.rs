use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Reads a JSON document, falling back to `T::default()` when the file is
/// missing or unreadable.
pub fn load_or_default<T>(path: Option<&Path>, target: &'static str) -> T
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        return T::default();
    };

    let raw = match std::fs::read_to_string(path) {
        Ok(value) => value,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(error) => {
            tracing::warn!(
                target: "identity.json_file",
                store = target,
                path = %path.display(),
                error = %error,
                "failed to read store file; booting with empty state",
            );
            return T::default();
        }
    };

    match serde_json::from_str::<T>(&raw) {
        Ok(state) => state,
        Err(error) => {
            tracing::warn!(
                target: "identity.json_file",
                store = target,
                path = %path.display(),
                error = %error,
                "failed to parse store file; booting with empty state",
            );
            T::default()
        }
    }
}

/// Writes `value` to a sibling temp file and renames it over `path`.
pub async fn write_atomically<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|error| format!("failed to prepare store directory: {error}"))?;
    }

    let payload = serde_json::to_vec(value)
        .map_err(|error| format!("failed to encode store payload: {error}"))?;

    let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    tokio::fs::write(&temp_path, payload)
        .await
        .map_err(|error| format!("failed to write store payload: {error}"))?;

    if let Err(error) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(format!("failed to finalize store payload: {error}"));
    }

    Ok(())
}
