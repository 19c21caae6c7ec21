use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use anyhow::Result;
use futures::StreamExt;
use reqwest::{
    Client, Response, Url,
    header::{CONTENT_DISPOSITION, CONTENT_TYPE},
};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use crate::{Token, TokenError, env, locks::KeyedLocks};

/// Extensions trusted when they appear at the end of an icon URL.
pub const IMAGE_EXTENSIONS: [&str; 8] = [
    "jpg", "jpeg", "png", "tiff", "svg", "gif", "webm", "webp",
];

const DEFAULT_DISPOSITION: &str = "attachment; filename=image.png";
const DEFAULT_EXTENSION: &str = "png";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconConfig {
    pub dir: PathBuf,
    pub timeout: Duration,
    /// How long a stored icon is served before it is downloaded again. Zero disables reuse.
    pub max_age: Duration,
}

impl IconConfig {
    /// Reads ICON_DIR, ICON_TIMEOUT and ICON_CACHE_TIME (seconds).
    pub fn from_env(default_max_age: Duration) -> Result<Self> {
        Ok(Self {
            dir: PathBuf::from(env::var_or("ICON_DIR", "static/icons")),
            timeout: Duration::from_secs(env::var_parse("ICON_TIMEOUT", 10)?),
            max_age: Duration::from_secs(env::var_parse(
                "ICON_CACHE_TIME",
                default_max_age.as_secs(),
            )?),
        })
    }
}

/// A stored icon ready to be streamed back.
///
/// `file` is opened while the symbol's lock is held, so a later download that replaces
/// or removes `path` cannot pull the file out from under the reader.
#[derive(Debug)]
pub struct Icon {
    pub path: PathBuf,
    pub extension: String,
    pub mime: String,
    pub file: fs::File,
}

impl Icon {
    async fn open(path: PathBuf, extension: String, mime: String) -> Result<Self, TokenError> {
        let file = fs::File::open(&path).await?;
        Ok(Self {
            path,
            extension,
            mime,
            file,
        })
    }

    /// Name offered to clients, independent of the symbol.
    pub fn file_name(&self) -> String {
        format!("icon.{}", self.extension)
    }
}

/// Downloads token icons into a local directory.
pub struct IconStore {
    client: Client,
    config: IconConfig,
    locks: KeyedLocks,
}

impl IconStore {
    pub fn new(config: IconConfig) -> Result<Self, TokenError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            config,
            locks: KeyedLocks::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    pub async fn ensure_dir(&self) -> Result<(), TokenError> {
        fs::create_dir_all(&self.config.dir).await?;
        Ok(())
    }

    #[instrument(name = "fetch_icon", skip(self, token), fields(symbol = %token.symbol))]
    pub async fn fetch(&self, token: &Token) -> Result<Icon, TokenError> {
        let url = token.metadata.icon.trim();
        if url.is_empty() {
            return Err(TokenError::IconMissing(token.symbol.clone()));
        }

        let stem = file_stem(&token.symbol);
        let _guard = self.locks.lock(&stem).await;

        if let Some(icon) = self.stored(&stem).await? {
            debug!(path = %icon.path.display(), "serving stored icon");
            return Ok(icon);
        }

        self.download(&stem, url).await
    }

    async fn download(&self, stem: &str, url: &str) -> Result<Icon, TokenError> {
        debug!(url, "downloading icon");

        let res = self
            .client
            .get(url)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(TokenError::IconFetch)?;

        let headers = res.headers();
        let extension = match extension_from_url(url) {
            Some(ext) => ext,
            None => extension_from_disposition(
                headers
                    .get(CONTENT_DISPOSITION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or(DEFAULT_DISPOSITION),
            ),
        };
        let mime = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| mime_for_extension(&extension));

        let path = self.config.dir.join(format!("{}.{}", stem, extension));
        let partial = self.config.dir.join(format!(".{}.{}.part", stem, extension));

        if let Err(e) = write_body(res, &partial).await {
            let _ = fs::remove_file(&partial).await;
            return Err(e);
        }

        self.remove_other_extensions(stem, &extension).await?;
        fs::rename(&partial, &path).await?;

        info!(path = %path.display(), %mime, "stored icon");
        Icon::open(path, extension, mime).await
    }

    /// A previously downloaded icon still younger than `max_age`.
    async fn stored(&self, symbol: &str) -> Result<Option<Icon>, TokenError> {
        if self.config.max_age.is_zero() {
            return Ok(None);
        }

        for (path, extension) in self.files_for(symbol).await? {
            let modified = fs::metadata(&path).await?.modified()?;
            let age = SystemTime::now()
                .duration_since(modified)
                .unwrap_or_default();

            if age < self.config.max_age {
                let mime = mime_for_extension(&extension);
                return Icon::open(path, extension, mime).await.map(Some);
            }
        }

        Ok(None)
    }

    async fn remove_other_extensions(&self, symbol: &str, keep: &str) -> Result<(), TokenError> {
        for (path, extension) in self.files_for(symbol).await? {
            if extension != keep {
                debug!(path = %path.display(), "removing icon with stale extension");
                if let Err(e) = fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "could not remove old icon");
                }
            }
        }
        Ok(())
    }

    async fn files_for(&self, symbol: &str) -> Result<Vec<(PathBuf, String)>, TokenError> {
        let prefix = format!("{}.", symbol);
        let mut found = Vec::new();

        let mut entries = match fs::read_dir(&self.config.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(extension) = name.to_str().and_then(|n| n.strip_prefix(&prefix)) else {
                continue;
            };
            if !extension.is_empty() && !extension.contains('.') {
                found.push((entry.path(), extension.to_string()));
            }
        }

        Ok(found)
    }
}

/// File name stem for a symbol, limited to characters safe in a single path component.
fn file_stem(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

async fn write_body(res: Response, path: &Path) -> Result<(), TokenError> {
    let mut file = fs::File::create(path).await?;
    let mut body = res.bytes_stream();

    while let Some(chunk) = body.next().await {
        file.write_all(&chunk.map_err(TokenError::IconFetch)?).await?;
    }

    file.flush().await?;
    Ok(())
}

/// Extension of the URL path's last segment, when it is a known image type.
pub fn extension_from_url(url: &str) -> Option<String> {
    let url = Url::parse(url.trim()).ok()?;
    let file_name = url.path_segments()?.next_back()?;
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.trim().to_lowercase();

    IMAGE_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Extension of the `filename` parameter in a Content-Disposition header.
pub fn extension_from_disposition(value: &str) -> String {
    let filename = value
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("filename"))
        .map(|(_, v)| v.trim().trim_matches('"'));

    let ext: String = filename
        .and_then(|f| f.rsplit('.').next())
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_lowercase();

    if ext.is_empty() {
        DEFAULT_EXTENSION.to_string()
    } else {
        ext
    }
}

pub fn mime_for_extension(extension: &str) -> String {
    match extension {
        "svg" => "image/svg+xml".to_string(),
        "jpg" => "image/jpeg".to_string(),
        "webm" => "video/webm".to_string(),
        other => format!("image/{}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_url_extensions() {
        assert_eq!(
            extension_from_url("https://i.imgur.com/abc.PNG").as_deref(),
            Some("png")
        );
        assert_eq!(
            extension_from_url("https://x.org/logo.svg?v=2#top").as_deref(),
            Some("svg")
        );
        assert_eq!(extension_from_url("https://x.org/icon.php"), None);
        assert_eq!(extension_from_url("https://x.org/icon"), None);
    }

    #[test]
    fn url_extension_ignores_host_and_directories() {
        assert_eq!(extension_from_url("https://cdn.png"), None);
        assert_eq!(extension_from_url("https://cdn.png/"), None);
        assert_eq!(extension_from_url("https://host/a.b/icon"), None);
        assert_eq!(extension_from_url("https://host/img.gif/icon?x=y.png"), None);
        assert_eq!(
            extension_from_url("https://host/a.b/logo.WebP").as_deref(),
            Some("webp")
        );
        assert_eq!(extension_from_url("not a url.png"), None);
    }

    #[test]
    fn disposition_filename() {
        assert_eq!(
            extension_from_disposition("attachment; filename=\"logo.GIF\""),
            "gif"
        );
        assert_eq!(
            extension_from_disposition("inline; name=x; FILENAME=icon.webp"),
            "webp"
        );
        assert_eq!(extension_from_disposition(DEFAULT_DISPOSITION), "png");
        assert_eq!(extension_from_disposition("inline"), "png");
        assert_eq!(extension_from_disposition("attachment; filename=../x.p/g"), "pg");
    }

    #[test]
    fn stems_stay_inside_the_icon_dir() {
        assert_eq!(file_stem("SWAP.HIVE"), "SWAP.HIVE");
        assert_eq!(file_stem("../ETC/PASSWD"), "_ETC_PASSWD");
    }

    #[test]
    fn mime_types_follow_extension() {
        assert_eq!(mime_for_extension("svg"), "image/svg+xml");
        assert_eq!(mime_for_extension("jpg"), "image/jpeg");
        assert_eq!(mime_for_extension("png"), "image/png");
    }

    #[tokio::test]
    async fn missing_icon_url_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = IconStore::new(IconConfig {
            dir: dir.path().to_path_buf(),
            timeout: Duration::from_secs(1),
            max_age: Duration::from_secs(60),
        })
        .unwrap();

        let token = Token {
            symbol: "ENG".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            store.fetch(&token).await,
            Err(TokenError::IconMissing(symbol)) if symbol == "ENG"
        ));
    }

    #[tokio::test]
    async fn fresh_file_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ENG.svg"), b"<svg/>").unwrap();
        std::fs::write(dir.path().join("ENGX.png"), b"other").unwrap();

        let store = IconStore::new(IconConfig {
            dir: dir.path().to_path_buf(),
            timeout: Duration::from_secs(1),
            max_age: Duration::from_secs(60),
        })
        .unwrap();

        let icon = store.stored("ENG").await.unwrap().unwrap();
        assert_eq!(icon.extension, "svg");
        assert_eq!(icon.mime, "image/svg+xml");
        assert_eq!(icon.file_name(), "icon.svg");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn open_icon_survives_replacement_on_disk() {
        use tokio::io::AsyncReadExt;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ENG.svg"), b"<svg/>").unwrap();

        let store = IconStore::new(IconConfig {
            dir: dir.path().to_path_buf(),
            timeout: Duration::from_secs(1),
            max_age: Duration::from_secs(60),
        })
        .unwrap();

        let mut icon = store.stored("ENG").await.unwrap().unwrap();
        store.remove_other_extensions("ENG", "png").await.unwrap();
        assert!(!icon.path.exists());

        let mut body = Vec::new();
        icon.file.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"<svg/>");
    }

    #[tokio::test]
    async fn zero_max_age_never_reuses() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ENG.png"), b"png").unwrap();

        let store = IconStore::new(IconConfig {
            dir: dir.path().to_path_buf(),
            timeout: Duration::from_secs(1),
            max_age: Duration::ZERO,
        })
        .unwrap();

        assert!(store.stored("ENG").await.unwrap().is_none());
    }
}
