//! Resource identity.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Artifact type of a resource. Each kind has exactly one creator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Raw file contents.
    Static,
    /// Document script environment.
    Script,
    /// Module environment, one per root script.
    Module,
    /// Companion spec script of a document script.
    Spec,
}

impl ResourceKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Script => "script",
            Self::Module => "module",
            Self::Spec => "spec",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Base location a resource name resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    App,
    Assets,
    Specs,
    /// Not backed by the filesystem.
    Virtual,
}

impl Location {
    pub const fn label(self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Assets => "assets",
            Self::Specs => "specs",
            Self::Virtual => "virtual",
        }
    }
}

/// `(kind, location, name, args)`.
///
/// Equality and hashing are structural over all four parts, so the same
/// module name required by two different scripts yields two keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    kind: ResourceKind,
    location: Location,
    name: Arc<str>,
    args: Arc<[String]>,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, location: Location, name: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            location,
            name: name.into(),
            args: Arc::from([]),
        }
    }

    pub fn with_args<I, S>(
        kind: ResourceKind,
        location: Location,
        name: impl Into<Arc<str>>,
        args: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            location,
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Source file of an app script.
    pub fn app_source(name: &str) -> Self {
        Self::new(ResourceKind::Static, Location::App, name)
    }

    /// Document script under the app location.
    pub fn script(name: &str) -> Self {
        Self::new(ResourceKind::Script, Location::App, name)
    }

    /// Module `identifier` as required by `requester`.
    ///
    /// Modules are instanced per root script: a module required from
    /// another module inherits that module's root, so the same identifier
    /// anywhere under one document script maps to one key.
    pub fn module(identifier: &str, requester: &ResourceKey) -> Self {
        let root = match requester.kind {
            ResourceKind::Module => Arc::clone(&requester.args),
            _ => Arc::from([requester.to_string()]),
        };
        Self {
            kind: ResourceKind::Module,
            location: Location::App,
            name: identifier.into(),
            args: root,
        }
    }

    #[inline]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    #[inline]
    pub const fn location(&self) -> Location {
        self.location
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for ResourceKey {
    /// `script:app/index.js`, `module:app/util[script:app/index.js]`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.kind, self.location.label(), self.name)?;
        if !self.args.is_empty() {
            write!(f, "[{}]", self.args.join(","))?;
        }
        Ok(())
    }
}

impl Serialize for ResourceKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    #[test]
    fn test_args_participate_in_identity() {
        let a = ResourceKey::script("a.js");
        let b = ResourceKey::script("b.js");

        let from_a = ResourceKey::module("util", &a);
        let from_b = ResourceKey::module("util", &b);
        assert_ne!(from_a, from_b);
        assert_eq!(from_a, ResourceKey::module("util", &a));

        let set: FxHashSet<_> = [from_a.clone(), from_b, from_a].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_nested_module_shares_root() {
        let index = ResourceKey::script("index.js");
        let a = ResourceKey::module("a", &index);
        let b = ResourceKey::module("b", &index);

        let shared_from_a = ResourceKey::module("shared", &a);
        assert_eq!(shared_from_a, ResourceKey::module("shared", &b));
        assert_eq!(shared_from_a, ResourceKey::module("shared", &index));
        assert_eq!(shared_from_a.args(), ["script:app/index.js".to_string()]);

        // a cycle back to `a` lands on the key it started from
        assert_eq!(ResourceKey::module("a", &b), a);
    }

    #[test]
    fn test_kind_and_location_participate_in_identity() {
        let script = ResourceKey::script("index.js");
        let source = ResourceKey::app_source("index.js");
        let asset = ResourceKey::new(ResourceKind::Static, Location::Assets, "index.js");
        assert_ne!(script, source);
        assert_ne!(source, asset);
    }

    #[test]
    fn test_display() {
        let script = ResourceKey::script("index.js");
        assert_eq!(script.to_string(), "script:app/index.js");
        assert_eq!(
            ResourceKey::module("util", &script).to_string(),
            "module:app/util[script:app/index.js]"
        );
    }
}
