//! File-backed resources: static files and companion specs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{
    Artifact, CreateError, LoadContext, Location, ResourceCreator, ResourceKey, ResourceKind,
};

/// Raw file contents with a content hash.
#[derive(Debug)]
pub struct StaticFile {
    path: PathBuf,
    bytes: Vec<u8>,
    hash: String,
}

impl StaticFile {
    pub fn read(path: &Path) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        Ok(Self::new(path.to_path_buf(), bytes))
    }

    /// In-memory contents attributed to `path`.
    pub fn new(path: PathBuf, bytes: Vec<u8>) -> Self {
        Self {
            hash: blake3::hash(&bytes).to_hex().to_string(),
            path,
            bytes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Hex blake3 digest of the contents.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }
}

/// Reads files under any filesystem-backed location.
pub struct StaticCreator;

impl ResourceCreator for StaticCreator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Static
    }

    fn can_load(&self, name: &str, args: &[String]) -> bool {
        args.is_empty() && !name.is_empty() && !name.ends_with('/')
    }

    fn create(&self, key: &ResourceKey, ctx: &mut LoadContext<'_>) -> Result<Artifact, CreateError> {
        let path = ctx
            .locations()
            .resolve(key.location(), key.name())
            .ok_or_else(|| CreateError::NotFound(key.clone()))?;

        if !path.is_file() {
            return Err(CreateError::NotFound(key.clone()));
        }

        let file = StaticFile::read(&path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => CreateError::NotFound(key.clone()),
            _ => CreateError::Io(path.clone(), err),
        })?;

        ctx.watch(crate::utils::path::normalize_path(&path));
        Ok(Artifact::Static(Arc::new(file)))
    }
}

/// Spec script that accompanies a document script of the same name.
#[derive(Debug)]
pub struct SpecSource {
    name: String,
    source: Arc<StaticFile>,
}

impl SpecSource {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Arc<StaticFile> {
        &self.source
    }

    pub fn text(&self) -> Option<&str> {
        self.source.text()
    }
}

/// Creates `(Spec, Specs, name)` and pairs it with `(Script, App, name)`.
pub struct SpecCreator;

impl ResourceCreator for SpecCreator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Spec
    }

    fn can_load(&self, name: &str, args: &[String]) -> bool {
        args.is_empty() && !name.is_empty()
    }

    fn create(&self, key: &ResourceKey, ctx: &mut LoadContext<'_>) -> Result<Artifact, CreateError> {
        let source_key = ResourceKey::new(ResourceKind::Static, Location::Specs, key.name());
        let source = ctx
            .load(source_key)?
            .as_static()
            .cloned()
            .ok_or_else(|| CreateError::Mismatch(key.clone()))?;

        ctx.companion(ResourceKey::script(key.name()));

        Ok(Artifact::Spec(Arc::new(SpecSource {
            name: key.name().to_string(),
            source,
        })))
    }
}
