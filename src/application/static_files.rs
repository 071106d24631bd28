//! Static resource handler.
//!
//! Serves files below a root directory through the ordinary `Handler`
//! contract, so it can be mapped like any application handler or act as
//! the default handler of a unit.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::StatusCode;

use crate::dispatch::handler::{Handler, UnitConfig};
use crate::error::{HostError, HostResult};
use crate::http::request::Request;
use crate::http::response::Response;

const ROOT_PARAM: &str = "root";
const INDEX_FILE: &str = "index.html";

#[derive(Debug, Default)]
pub struct StaticResourceHandler {
    root: OnceLock<PathBuf>,
}

impl StaticResourceHandler {
    /// A handler whose root comes from `init` (init-param `root`, else the
    /// application's resource root).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handler that serves from `root` regardless of the unit.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let handler = Self::new();
        let _ = handler.root.set(root.into());
        handler
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.get().map(PathBuf::as_path)
    }

    /// Map a request path to a file below the root. `None` for paths that
    /// would leave the root.
    pub fn resolve_file(&self, path: &str) -> Option<PathBuf> {
        let root = self.root.get()?;
        let relative = Path::new(path.trim_start_matches('/'));
        let mut resolved = root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(resolved)
    }

    /// Read the resource at `path`. `Ok(None)` when it does not exist.
    pub async fn load(&self, path: &str) -> HostResult<Option<Bytes>> {
        let Some(mut file) = self.resolve_file(path) else {
            return Ok(None);
        };
        if tokio::fs::metadata(&file).await.map(|m| m.is_dir()).unwrap_or(false) {
            file.push(INDEX_FILE);
        }
        match tokio::fs::read(&file).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(HostError::Io(err)),
        }
    }
}

#[async_trait]
impl Handler for StaticResourceHandler {
    fn init(&self, config: &UnitConfig) -> HostResult<()> {
        if self.root.get().is_some() {
            return Ok(());
        }
        let root = config
            .init_param(ROOT_PARAM)
            .map(PathBuf::from)
            .or_else(|| config.resource_root.clone())
            .ok_or_else(|| {
                HostError::lifecycle(
                    &config.application,
                    format!("static handler `{}` has no `root` and the unit no resource root", config.name),
                )
            })?;
        tracing::debug!(application = %config.application, root = %root.display(), "Static resources ready");
        let _ = self.root.set(root);
        Ok(())
    }

    async fn handle(&self, request: &mut Request, response: &Response) -> HostResult<()> {
        let path = request.path().to_string();
        match self.load(&path).await? {
            Some(bytes) => {
                let served = if path.ends_with('/') { INDEX_FILE } else { path.as_str() };
                response.set_content_type(content_type_for(served))?;
                response.write(&bytes)
            }
            None => response.send_error(StatusCode::NOT_FOUND, "Not Found"),
        }
    }
}

fn content_type_for(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_segments_are_rejected() {
        let handler = StaticResourceHandler::with_root("/srv/www");
        assert_eq!(handler.resolve_file("/a/b.txt"), Some(PathBuf::from("/srv/www/a/b.txt")));
        assert!(handler.resolve_file("/../etc/passwd").is_none());
        assert!(handler.resolve_file("/a/../../x").is_none());
    }

    #[tokio::test]
    async fn loads_files_and_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hi").unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        let handler = StaticResourceHandler::with_root(dir.path());

        assert_eq!(handler.load("/hello.txt").await.unwrap().unwrap(), Bytes::from("hi"));
        assert_eq!(handler.load("/").await.unwrap().unwrap(), Bytes::from("<h1>home</h1>"));
        assert!(handler.load("/missing.txt").await.unwrap().is_none());
    }

    #[test]
    fn init_requires_a_root() {
        let handler = StaticResourceHandler::new();
        let config = UnitConfig {
            name: "files".into(),
            application: "app".into(),
            ..UnitConfig::default()
        };
        assert!(matches!(handler.init(&config), Err(HostError::Lifecycle { .. })));

        let config = UnitConfig {
            resource_root: Some(PathBuf::from("/srv")),
            ..config
        };
        handler.init(&config).unwrap();
        assert_eq!(handler.root(), Some(Path::new("/srv")));
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("/a/index.HTML"), "text/html; charset=utf-8");
        assert_eq!(content_type_for("/blob"), "application/octet-stream");
    }
}
