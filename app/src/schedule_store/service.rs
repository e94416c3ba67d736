use std::path::{Path, PathBuf};

use infrastructure::EventEmitter;
use tokio::{io::AsyncWriteExt as _, sync::Mutex};

use crate::schedule_store::{SettingsDocument, SettingsEvent, SettingsUpdate, StoreError};

pub struct SettingsStore {
    path: PathBuf,
    document: Mutex<SettingsDocument>,
    event_tx: EventEmitter<SettingsEvent>,
}

impl SettingsStore {
    /// Reads the settings file. A missing file is a first start and gets initialized with defaults,
    /// an unreadable or invalid one is an error.
    pub async fn load(path: impl Into<PathBuf>, event_tx: EventEmitter<SettingsEvent>) -> Result<Self, StoreError> {
        let path = path.into();

        let document = match read_document(&path).await? {
            Some(document) => document,
            None => {
                tracing::warn!("Settings file {} not found, writing defaults", path.display());
                let document = SettingsDocument::default();
                write_document(&path, &document).await?;
                document
            }
        };

        tracing::info!("Settings loaded from {}: {:?}", path.display(), document);

        Ok(Self {
            path,
            document: Mutex::new(document),
            event_tx,
        })
    }

    pub async fn current(&self) -> SettingsDocument {
        self.document.lock().await.clone()
    }

    /// Persists the updated document before it becomes visible.
    pub async fn update(&self, update: SettingsUpdate) -> Result<SettingsDocument, StoreError> {
        let mut document = self.document.lock().await;

        let updated = document.with_update(update.clone())?;
        write_document(&self.path, &updated).await?;

        *document = updated.clone();
        tracing::info!("Settings updated with {:?}", update);

        self.event_tx.send(SettingsEvent::Changed(updated.clone()));
        Ok(updated)
    }

    /// Re-reads the settings file, keeping the current document if the file is unusable.
    pub async fn reload(&self) -> Result<SettingsDocument, StoreError> {
        let mut document = self.document.lock().await;

        let reloaded = match read_document(&self.path).await {
            Ok(Some(reloaded)) => reloaded,
            Ok(None) => {
                let e = StoreError::CorruptSettings {
                    path: self.path.display().to_string(),
                    message: "file does not exist".to_string(),
                };
                tracing::error!("Error reloading settings, keeping current ones: {}", e);
                return Err(e);
            }
            Err(e) => {
                tracing::error!("Error reloading settings, keeping current ones: {}", e);
                return Err(e);
            }
        };

        *document = reloaded.clone();
        tracing::info!("Settings reloaded from {}", self.path.display());

        self.event_tx.send(SettingsEvent::Changed(reloaded.clone()));
        Ok(reloaded)
    }
}

async fn read_document(path: &Path) -> Result<Option<SettingsDocument>, StoreError> {
    let corrupt = |message: String| StoreError::CorruptSettings {
        path: path.display().to_string(),
        message,
    };

    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(corrupt(e.to_string())),
    };

    let mut document: SettingsDocument = serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))?;
    document.normalize();
    document
        .check_scheduled_channels()
        .map_err(|e| corrupt(e.to_string()))?;

    Ok(Some(document))
}

//temp file in the same directory, flushed to disk and renamed over the original,
//then the directory is synced so the rename survives a power cut
async fn write_document(path: &Path, document: &SettingsDocument) -> Result<(), StoreError> {
    let storage = |message: String| StoreError::Storage {
        path: path.display().to_string(),
        message,
    };

    let json = serde_json::to_vec_pretty(document).map_err(|e| storage(e.to_string()))?;
    let temp_path = path.with_extension("json.tmp");

    let result = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(storage(e.to_string()));
    }

    let dir = parent_dir(path);
    let synced = async { tokio::fs::File::open(&dir).await?.sync_all().await }.await;
    if let Err(e) = synced {
        //new content is already in place, only its durability is uncertain
        tracing::warn!("Error syncing settings directory {}: {}", dir.display(), e);
    }

    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use infrastructure::EventBus;
    use tempfile::TempDir;

    use super::*;
    use crate::{core::ChannelId, t};

    fn id(id: u8) -> ChannelId {
        ChannelId::new(id).unwrap()
    }

    async fn store_in(dir: &TempDir) -> (SettingsStore, EventBus<SettingsEvent>) {
        let bus = EventBus::new(16);
        let store = SettingsStore::load(dir.path().join("settings.json"), bus.emitter())
            .await
            .unwrap();
        (store, bus)
    }

    #[tokio::test]
    async fn test_missing_file_is_initialized_with_defaults() {
        let dir = TempDir::new().unwrap();

        let (store, _bus) = store_in(&dir).await;

        assert_eq!(store.current().await, SettingsDocument::default());
        assert!(dir.path().join("settings.json").exists());
    }

    #[tokio::test]
    async fn test_update_then_load_reflects_update() {
        let dir = TempDir::new().unwrap();
        let (store, _bus) = store_in(&dir).await;

        store.update(SettingsUpdate::OpenTime(t!(7:30))).await.unwrap();
        store
            .update(SettingsUpdate::ScheduledChannels(vec![id(2), id(1)]))
            .await
            .unwrap();

        let (reloaded, _bus) = store_in(&dir).await;
        let doc = reloaded.current().await;
        assert_eq!(doc.open_time, t!(7:30));
        assert_eq!(doc.scheduled_channel_ids, vec![id(1), id(2)]);
    }

    #[tokio::test]
    async fn test_update_emits_change_event() {
        let dir = TempDir::new().unwrap();
        let (store, bus) = store_in(&dir).await;
        let mut listener = bus.subscribe();

        store.update(SettingsUpdate::CloseTime(t!(21:00))).await.unwrap();

        let Some(SettingsEvent::Changed(doc)) = listener.recv().await else {
            panic!("No settings event received");
        };
        assert_eq!(doc.close_time, t!(21:00));
    }

    #[tokio::test]
    async fn test_rejected_update_leaves_file_and_memory_untouched() {
        let dir = TempDir::new().unwrap();
        let (store, _bus) = store_in(&dir).await;
        let before = std::fs::read_to_string(dir.path().join("settings.json")).unwrap();

        let result = store.update(SettingsUpdate::ScheduledChannels(vec![id(42)])).await;

        assert!(matches!(result, Err(StoreError::UnknownChannel { .. })));
        assert_eq!(store.current().await, SettingsDocument::default());
        assert_eq!(std::fs::read_to_string(dir.path().join("settings.json")).unwrap(), before);
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let (store, _bus) = store_in(&dir).await;

        store.update(SettingsUpdate::OpenTime(t!(9:00))).await.unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(files, vec!["settings.json".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_file_fails_to_load() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("settings.json"), "{ not json").unwrap();

        let result = SettingsStore::load(dir.path().join("settings.json"), EventBus::new(4).emitter()).await;

        assert!(matches!(result, Err(StoreError::CorruptSettings { .. })));
        //no silent fallback, the file is left alone
        assert_eq!(
            std::fs::read_to_string(dir.path().join("settings.json")).unwrap(),
            "{ not json"
        );
    }

    #[tokio::test]
    async fn test_unknown_scheduled_channel_in_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"pin_map":{"1":14},"open_time":"08:00","close_time":"20:00","scheduled_channel_ids":[3]}"#,
        )
        .unwrap();

        let result = SettingsStore::load(dir.path().join("settings.json"), EventBus::new(4).emitter()).await;

        assert!(matches!(result, Err(StoreError::CorruptSettings { .. })));
    }

    #[tokio::test]
    async fn test_reload_keeps_previous_document_on_corruption() {
        let dir = TempDir::new().unwrap();
        let (store, _bus) = store_in(&dir).await;
        store.update(SettingsUpdate::OpenTime(t!(6:00))).await.unwrap();

        std::fs::write(dir.path().join("settings.json"), "garbage").unwrap();
        let result = store.reload().await;

        assert!(matches!(result, Err(StoreError::CorruptSettings { .. })));
        assert_eq!(store.current().await.open_time, t!(6:00));
    }

    #[tokio::test]
    async fn test_reload_picks_up_external_edit() {
        let dir = TempDir::new().unwrap();
        let (store, _bus) = store_in(&dir).await;

        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"pin_map":{"1":14,"2":15},"open_time":"22:00","close_time":"05:00","scheduled_channel_ids":[2,2],"subscribed_topics":["relay/#"]}"#,
        )
        .unwrap();
        let doc = store.reload().await.unwrap();

        assert_eq!(doc.pin_map.len(), 2);
        assert_eq!(doc.schedule_window(), t!(22:00 - 05:00));
        assert_eq!(doc.scheduled_channel_ids, vec![id(2)]);
        assert_eq!(store.current().await, doc);
    }

    #[test]
    fn test_directory_of_settings_file() {
        assert_eq!(parent_dir(Path::new("settings.json")), PathBuf::from("."));
        assert_eq!(parent_dir(Path::new("/var/lib/relay-hub/settings.json")), PathBuf::from("/var/lib/relay-hub"));
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");

        write_document(&path, &SettingsDocument::default()).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["settings.json".to_string()]);
    }
}
