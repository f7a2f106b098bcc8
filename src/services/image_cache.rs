// Local image store for published artwork
//
// Content-addressed by (source namespace, entity id, role): once a file
// exists at the derived path it is treated as valid forever - no TTL, no
// revalidation. Failures never cross this boundary; callers get ok=false
// and publish the derived path regardless.

use std::collections::HashSet;
use std::path::PathBuf;

use reqwest::Client;
use tokio::fs;

use crate::models::ImageRole;

pub struct ImageCache {
    client: Client,
    cache_dir: PathBuf,
    public_prefix: String,
}

impl ImageCache {
    pub fn new(client: Client, cache_dir: PathBuf, public_prefix: impl Into<String>) -> Self {
        Self {
            client,
            cache_dir,
            public_prefix: public_prefix.into(),
        }
    }

    /// Create the backing directory. Idempotent; called at the start of
    /// every cycle and a no-op after the first success. The directory is
    /// world-readable so the web layer can serve it.
    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.cache_dir).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o755);
            fs::set_permissions(&self.cache_dir, perms).await?;
        }

        Ok(())
    }

    fn file_name(key: &str, role: ImageRole) -> String {
        format!("{}_{}.jpg", key, role.as_str())
    }

    /// The URL under which a cached image is (or will be) served,
    /// whether or not the file exists yet.
    pub fn public_path(&self, key: &str, role: ImageRole) -> String {
        format!("{}/{}", self.public_prefix, Self::file_name(key, role))
    }

    /// Mirror a remote image into the cache.
    ///
    /// Returns the public path and whether the file is actually present.
    /// A file already on disk short-circuits without any network call.
    /// On failure no partial file is left behind and the caller proceeds
    /// with the (dangling) public path.
    pub async fn ensure(
        &self,
        remote_url: &str,
        key: &str,
        role: ImageRole,
        auth_header: Option<(&'static str, String)>,
    ) -> (String, bool) {
        let public = self.public_path(key, role);
        let local = self.cache_dir.join(Self::file_name(key, role));

        if fs::try_exists(&local).await.unwrap_or(false) {
            tracing::debug!("Image already cached: {}", local.display());
            return (public, true);
        }

        let mut request = self.client.get(remote_url);
        if let Some((name, value)) = auth_header {
            request = request.header(name, value);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Image download failed for {}: {}", remote_url, e);
                return (public, false);
            }
        };

        if !response.status().is_success() {
            tracing::warn!(
                "Image download for {} returned status {}",
                remote_url,
                response.status()
            );
            return (public, false);
        }

        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("Image body read failed for {}: {}", remote_url, e);
                return (public, false);
            }
        };

        // Write to a temp file and rename so a failed write never leaves a
        // partial image at the final path.
        let part = local.with_extension("jpg.part");
        if let Err(e) = fs::write(&part, &bytes).await {
            tracing::warn!("Image write failed for {}: {}", local.display(), e);
            let _ = fs::remove_file(&part).await;
            return (public, false);
        }
        if let Err(e) = fs::rename(&part, &local).await {
            tracing::warn!("Image rename failed for {}: {}", local.display(), e);
            let _ = fs::remove_file(&part).await;
            return (public, false);
        }

        tracing::debug!("Cached image {}", local.display());
        (public, true)
    }

    /// Remove cached files whose key is no longer in the live set.
    /// Runs after a successful cycle for sources that mirror upstream
    /// artwork (the recently-added feed rotates constantly). The directory
    /// is shared between sensors, so only files under the caller's
    /// `key_prefix` namespace are considered.
    pub async fn sweep(&self, key_prefix: &str, live_keys: &HashSet<String>) {
        let mut entries = match fs::read_dir(&self.cache_dir).await {
            Ok(e) => e,
            Err(_) => return,
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".jpg") else {
                continue;
            };
            // "{key}_{role}" -> key
            let Some((key, _role)) = stem.rsplit_once('_') else {
                continue;
            };
            if key.starts_with(key_prefix) && !live_keys.contains(key) {
                if let Err(e) = fs::remove_file(entry.path()).await {
                    tracing::warn!("Failed to sweep cached image {}: {}", name, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn spawn_upstream(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn cache_in(dir: &std::path::Path) -> ImageCache {
        ImageCache::new(
            Client::new(),
            dir.to_path_buf(),
            "/local/mediarr",
        )
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/poster.jpg",
            get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { &b"jpegbytes"[..] }
            }),
        );
        let base = spawn_upstream(app).await;

        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache.ensure_dir().await.unwrap();

        let url = format!("{}/poster.jpg", base);
        let (path1, ok1) = cache.ensure(&url, "sonarr-42", ImageRole::Poster, None).await;
        let (path2, ok2) = cache.ensure(&url, "sonarr-42", ImageRole::Poster, None).await;

        assert!(ok1 && ok2);
        assert_eq!(path1, "/local/mediarr/sonarr-42_poster.jpg");
        assert_eq!(path1, path2);
        // Second call served from disk: at most one upstream fetch.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(dir.path().join("sonarr-42_poster.jpg").exists());
    }

    #[tokio::test]
    async fn test_failure_leaves_no_partial_file() {
        let app = Router::new().route(
            "/missing.jpg",
            get(|| async { axum::http::StatusCode::NOT_FOUND }),
        );
        let base = spawn_upstream(app).await;

        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache.ensure_dir().await.unwrap();

        let url = format!("{}/missing.jpg", base);
        let (path, ok) = cache.ensure(&url, "radarr-9", ImageRole::Fanart, None).await;

        assert!(!ok);
        // The public path is still returned, pointing at a file that does
        // not exist on disk.
        assert_eq!(path, "/local/mediarr/radarr-9_fanart.jpg");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_dir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir.path().join("nested"));
        cache.ensure_dir().await.unwrap();
        cache.ensure_dir().await.unwrap();
        assert!(dir.path().join("nested").is_dir());
    }

    #[tokio::test]
    async fn test_sweep_removes_dead_keys() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache.ensure_dir().await.unwrap();

        std::fs::write(dir.path().join("jellyfin-live_poster.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("jellyfin-gone_poster.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("jellyfin-gone_fanart.jpg"), b"x").unwrap();

        let mut live = HashSet::new();
        live.insert("jellyfin-live".to_string());
        cache.sweep("jellyfin-", &live).await;

        assert!(dir.path().join("jellyfin-live_poster.jpg").exists());
        assert!(!dir.path().join("jellyfin-gone_poster.jpg").exists());
        assert!(!dir.path().join("jellyfin-gone_fanart.jpg").exists());
    }

    #[tokio::test]
    async fn test_sweep_leaves_other_sensors_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path());
        cache.ensure_dir().await.unwrap();

        // Another sensor's file in the shared directory, not in this
        // sweep's live set.
        std::fs::write(dir.path().join("plex-42_poster.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("jellyfin-gone_poster.jpg"), b"x").unwrap();

        cache.sweep("jellyfin-", &HashSet::new()).await;

        assert!(dir.path().join("plex-42_poster.jpg").exists());
        assert!(!dir.path().join("jellyfin-gone_poster.jpg").exists());
    }
}
