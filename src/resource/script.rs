//! Creators that compile app sources into script environments.

use std::path::Path;
use std::sync::Arc;

use super::{Artifact, CreateError, LoadContext, Location, ResourceCreator, ResourceKey, ResourceKind};
use crate::script::{ScriptCompiler, ScriptEnvironment};

/// Source file for module `identifier`: `.js` is implied when the name has
/// no extension.
pub fn module_file_name(identifier: &str) -> String {
    if Path::new(identifier).extension().is_some() {
        identifier.to_string()
    } else {
        format!("{identifier}.js")
    }
}

/// Resolve `identifier` against the directory of `requester` (an app name).
///
/// `.` and `..` segments are folded; a result that escapes the app location
/// or names a dot-file is rejected.
pub fn resolve_module_identifier(identifier: &str, requester: &str) -> Option<String> {
    if identifier.starts_with('/') {
        return None;
    }

    let mut segments: Vec<&str> = requester.split('/').collect();
    segments.pop();
    for segment in identifier.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            name => segments.push(name),
        }
    }

    let resolved = segments.join("/");
    (!resolved.is_empty() && !resolved.starts_with('.')).then_some(resolved)
}

/// Load `(Static, App, file)`, compile it and wrap it in a fresh environment.
fn compile(
    compiler: &dyn ScriptCompiler,
    key: &ResourceKey,
    file: &str,
    ctx: &mut LoadContext<'_>,
) -> Result<Arc<ScriptEnvironment>, CreateError> {
    let source = ctx
        .load(ResourceKey::app_source(file))?
        .as_static()
        .cloned()
        .ok_or_else(|| CreateError::Mismatch(key.clone()))?;

    let text = source
        .text()
        .ok_or_else(|| CreateError::Encoding { key: key.clone() })?;

    let program = compiler
        .compile(file, text)
        .map_err(|message| CreateError::Compile {
            key: key.clone(),
            message,
        })?;

    Ok(Arc::new(ScriptEnvironment::new(
        key.clone(),
        program,
        source.hash(),
    )))
}

/// Document scripts: `(Script, App, name)`.
pub struct ScriptCreator {
    compiler: Arc<dyn ScriptCompiler>,
}

impl ScriptCreator {
    pub fn new(compiler: Arc<dyn ScriptCompiler>) -> Self {
        Self { compiler }
    }
}

impl ResourceCreator for ScriptCreator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Script
    }

    fn can_load(&self, name: &str, args: &[String]) -> bool {
        args.is_empty() && !name.is_empty() && !name.ends_with('/')
    }

    fn create(&self, key: &ResourceKey, ctx: &mut LoadContext<'_>) -> Result<Artifact, CreateError> {
        if key.location() != Location::App {
            return Err(CreateError::Unclaimed(key.clone()));
        }

        let environment = compile(self.compiler.as_ref(), key, key.name(), ctx)?;
        ctx.companion(ResourceKey::new(ResourceKind::Spec, Location::Specs, key.name()));
        Ok(Artifact::Environment(environment))
    }
}

/// Required modules: `(Module, App, identifier, [root script])`.
///
/// Every requester under one root script shares the environment for an
/// identifier.
pub struct ModuleCreator {
    compiler: Arc<dyn ScriptCompiler>,
}

impl ModuleCreator {
    pub fn new(compiler: Arc<dyn ScriptCompiler>) -> Self {
        Self { compiler }
    }
}

impl ResourceCreator for ModuleCreator {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Module
    }

    fn can_load(&self, name: &str, args: &[String]) -> bool {
        args.len() == 1 && !name.is_empty()
    }

    fn create(&self, key: &ResourceKey, ctx: &mut LoadContext<'_>) -> Result<Artifact, CreateError> {
        let file = module_file_name(key.name());
        let environment = compile(self.compiler.as_ref(), key, &file, ctx)?;
        Ok(Artifact::Environment(environment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_file_name() {
        assert_eq!(module_file_name("util"), "util.js");
        assert_eq!(module_file_name("lib/strings"), "lib/strings.js");
        assert_eq!(module_file_name("data.json"), "data.json");
    }

    #[test]
    fn test_resolve_module_identifier() {
        assert_eq!(resolve_module_identifier("util", "index.js").as_deref(), Some("util"));
        assert_eq!(
            resolve_module_identifier("./strings", "lib/util").as_deref(),
            Some("lib/strings")
        );
        assert_eq!(
            resolve_module_identifier("../shared", "lib/util").as_deref(),
            Some("shared")
        );
        assert_eq!(
            resolve_module_identifier("text/format", "pages/index.js").as_deref(),
            Some("pages/text/format")
        );

        assert_eq!(resolve_module_identifier("../util", "index.js"), None);
        assert_eq!(resolve_module_identifier("/etc/passwd", "index.js"), None);
        assert_eq!(resolve_module_identifier(".hidden", "index.js"), None);
        assert_eq!(resolve_module_identifier(".", "index.js"), None);
    }
}
