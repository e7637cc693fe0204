// Blob storage for raw and processed payloads
//
// OpenDAL operator over the configured backend. Keys are
// {prefix}/{collection_id}/{file_id}/{filename} so collection deletion can
// remove everything under one directory.

use opendal::Operator;
use pdf2csv_config::{StorageBackend, StorageConfig};
use tracing::info;
use uuid::Uuid;

use crate::StoreResult;

pub struct BlobStore {
    operator: Operator,
    raw_prefix: String,
    processed_prefix: String,
}

impl BlobStore {
    pub fn from_config(config: &StorageConfig) -> StoreResult<Self> {
        let operator = match config.backend {
            StorageBackend::Fs => {
                let fs = config
                    .fs
                    .as_ref()
                    .expect("validated config carries an fs section for the fs backend");
                info!("Using filesystem blob storage at: {}", fs.path);

                let fs_builder = opendal::services::Fs::default().root(&fs.path);
                Operator::new(fs_builder)?.finish()
            }
            StorageBackend::S3 => {
                let s3 = config
                    .s3
                    .as_ref()
                    .expect("validated config carries an s3 section for the s3 backend");
                info!(
                    "Using S3 blob storage: bucket={}, region={}",
                    s3.bucket, s3.region
                );

                let mut s3_builder = opendal::services::S3::default()
                    .bucket(&s3.bucket)
                    .region(&s3.region);

                if let Some(endpoint) = &s3.endpoint {
                    s3_builder = s3_builder.endpoint(endpoint);
                }

                Operator::new(s3_builder)?.finish()
            }
        };

        Ok(Self {
            operator,
            raw_prefix: config.raw_prefix.clone(),
            processed_prefix: config.processed_prefix.clone(),
        })
    }

    /// Store an uploaded payload; returns the storage path for the row.
    pub async fn write_raw(
        &self,
        collection_id: &str,
        file_id: Uuid,
        filename: &str,
        payload: Vec<u8>,
    ) -> StoreResult<String> {
        let path = self.key(&self.raw_prefix, collection_id, file_id, filename);
        self.operator.write(&path, payload).await?;
        Ok(path)
    }

    pub async fn write_processed(
        &self,
        collection_id: &str,
        file_id: Uuid,
        filename: &str,
        payload: Vec<u8>,
    ) -> StoreResult<String> {
        let path = self.key(&self.processed_prefix, collection_id, file_id, filename);
        self.operator.write(&path, payload).await?;
        Ok(path)
    }

    pub async fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        let buffer = self.operator.read(path).await?;
        Ok(buffer.to_vec())
    }

    pub async fn delete(&self, path: &str) -> StoreResult<()> {
        self.operator.delete(path).await?;
        Ok(())
    }

    /// Remove every raw blob belonging to a collection.
    pub async fn delete_collection_raw(&self, collection_id: &str) -> StoreResult<()> {
        let dir = format!("{}/{}/", self.raw_prefix, sanitize(collection_id));
        self.operator.remove_all(&dir).await?;
        Ok(())
    }

    fn key(&self, prefix: &str, collection_id: &str, file_id: Uuid, filename: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            prefix,
            sanitize(collection_id),
            file_id,
            sanitize(filename)
        )
    }
}

/// Keep keys flat: path separators and parent references are replaced.
fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c => c,
        })
        .collect::<String>()
        .replace("..", "_")
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStore")
            .field("raw_prefix", &self.raw_prefix)
            .field("processed_prefix", &self.processed_prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdf2csv_config::FsConfig;

    fn fs_store(root: &std::path::Path) -> BlobStore {
        let config = StorageConfig {
            backend: StorageBackend::Fs,
            fs: Some(FsConfig {
                path: root.to_string_lossy().to_string(),
            }),
            s3: None,
            raw_prefix: "raw".to_string(),
            processed_prefix: "processed".to_string(),
        };
        BlobStore::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_write_read_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = fs_store(dir.path());
        let file_id = Uuid::new_v4();

        let path = store
            .write_raw("c1", file_id, "invoice.pdf", b"%PDF-1.7 test".to_vec())
            .await
            .unwrap();
        assert!(path.starts_with("raw/c1/"));
        assert!(path.ends_with("invoice.pdf"));

        let payload = store.read(&path).await.unwrap();
        assert_eq!(payload, b"%PDF-1.7 test");

        store.delete(&path).await.unwrap();
        assert!(store.read(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_collection_raw_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let store = fs_store(dir.path());

        let a = store
            .write_raw("c1", Uuid::new_v4(), "a.pdf", b"a".to_vec())
            .await
            .unwrap();
        let b = store
            .write_raw("c2", Uuid::new_v4(), "b.pdf", b"b".to_vec())
            .await
            .unwrap();

        store.delete_collection_raw("c1").await.unwrap();
        assert!(store.read(&a).await.is_err());
        assert_eq!(store.read(&b).await.unwrap(), b"b");
    }

    #[test]
    fn test_sanitize_strips_traversal() {
        assert_eq!(sanitize("../etc/passwd"), "__etc_passwd");
        assert_eq!(sanitize("col/one"), "col_one");
    }
}
