//! `weaver check`: compile scripts without serving them.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};
use jwalk::WalkDir;
use owo_colors::OwoColorize;
use rayon::prelude::*;

use crate::config::WeaverConfig;
use crate::log;
use crate::resource::{Locations, ResourceCache, ResourceKey, default_creators};
use crate::script::DirectiveCompiler;

const SCRIPT_EXT: &str = "js";

/// Compile `names` (every script under the app location when empty).
pub fn check_scripts(config: &WeaverConfig, names: &[String]) -> Result<()> {
    let names = if names.is_empty() {
        collect_scripts(&config.resource.app)
    } else {
        names.to_vec()
    };

    if names.is_empty() {
        log!("check"; "no scripts found in {}", config.resource.app.display());
        return Ok(());
    }

    let cache = ResourceCache::new(
        default_creators(Arc::new(DirectiveCompiler)),
        Locations::from_config(&config.resource),
    );
    let failures = compile_all(&cache, &names);

    if failures.is_empty() {
        log!("check"; "{} {} script{}", "ok".green(), names.len(), plural_s(names.len()));
        return Ok(());
    }

    for (name, error) in &failures {
        eprintln!("{}{}{}", "[".dimmed(), name.cyan(), "]".dimmed());
        eprintln!("{} {}", "→".red(), error);
    }
    bail!(
        "{} of {} script{} failed",
        failures.len(),
        names.len(),
        plural_s(names.len())
    )
}

/// Compile each script; failures keyed by name.
fn compile_all(cache: &ResourceCache, names: &[String]) -> BTreeMap<String, String> {
    names
        .par_iter()
        .filter_map(|name| {
            let key = ResourceKey::script(name);
            cache.load(&key).err().map(|e| (name.clone(), format!("{e}")))
        })
        .collect()
}

/// Script names relative to `app`, sorted.
fn collect_scripts(app: &Path) -> Vec<String> {
    let mut names: Vec<String> = WalkDir::new(app)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == SCRIPT_EXT))
        .filter_map(|path| {
            let relative = path.strip_prefix(app).ok()?;
            Some(relative.to_str()?.replace('\\', "/"))
        })
        .collect();
    names.sort();
    names
}

fn plural_s(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project(files: &[(&str, &str)]) -> (TempDir, WeaverConfig) {
        let temp = TempDir::new().unwrap();
        let config = WeaverConfig::with_root(temp.path());
        std::fs::create_dir_all(config.resource.app.join("lib")).unwrap();
        for (name, content) in files {
            std::fs::write(config.resource.app.join(name), content).unwrap();
        }
        (temp, config)
    }

    #[test]
    fn test_collect_scripts_recurses() {
        let (_temp, config) = project(&[
            ("index.js", "emit hi"),
            ("lib/util.js", "export v = 1"),
            ("notes.txt", "skip"),
        ]);
        assert_eq!(collect_scripts(&config.resource.app), ["index.js", "lib/util.js"]);
    }

    #[test]
    fn test_check_reports_failures() {
        let (_temp, config) = project(&[("good.js", "emit hi"), ("bad.js", "require")]);

        assert!(check_scripts(&config, &["good.js".to_string()]).is_ok());

        let err = check_scripts(&config, &[]).unwrap_err();
        assert_eq!(err.to_string(), "1 of 2 scripts failed");

        let cache = ResourceCache::new(
            default_creators(Arc::new(DirectiveCompiler)),
            Locations::from_config(&config.resource),
        );
        let failures = compile_all(&cache, &["bad.js".into(), "missing.js".into()]);
        assert_eq!(failures.len(), 2);
        assert!(failures["bad.js"].contains("module name"), "{}", failures["bad.js"]);
    }
}
