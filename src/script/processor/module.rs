use std::sync::Arc;
use tokio::runtime::Handle;

use super::{Completion, ContinuationProcessor, TriggerRequest, deliver};
use crate::debug;
use crate::resource::{ResourceCache, ResourceKey, resolve_module_identifier};
use crate::script::{
    ContextKind, Entry, RequiredModule, ScriptContext, Trigger, TriggerError, TriggerKind,
};

/// Loads a required module through the cache and waits for its
/// initialization.
///
/// Identifiers resolve against the requester's directory. The module key
/// carries the root script as its argument, and the requester gets an edge
/// onto the module, so invalidating the module invalidates every script
/// that required it.
///
/// Requiring a module whose initialization is already on the context chain
/// fails: that initialization is waiting on this one and would never finish.
pub struct RequiredModuleProcessor {
    cache: Arc<ResourceCache>,
    io: Handle,
}

impl RequiredModuleProcessor {
    pub fn new(cache: Arc<ResourceCache>, io: Handle) -> Self {
        Self { cache, io }
    }
}

impl ContinuationProcessor for RequiredModuleProcessor {
    fn kind(&self) -> TriggerKind {
        TriggerKind::RequireModule
    }

    fn perform(&self, request: TriggerRequest, completion: Completion) {
        let Trigger::RequireModule { identifier } = request.trigger else {
            deliver(completion, Err(TriggerError::Abandoned));
            return;
        };

        let requester = request.environment.key().clone();
        let Some(identifier) = resolve_module_identifier(&identifier, requester.name()) else {
            deliver(completion, Err(TriggerError::InvalidModule { identifier }));
            return;
        };

        let key = ResourceKey::module(&identifier, &requester);
        if let Some(chain) = initializing(&request.context, &key) {
            deliver(completion, Err(TriggerError::CyclicRequire { identifier, chain }));
            return;
        }

        let cache = Arc::clone(&self.cache);
        // Creation reads files and compiles: keep it off the evaluation pool.
        self.io.spawn_blocking(move || {
            let module = match cache.load(&key) {
                Ok(artifact) => match artifact.as_environment() {
                    Some(module) => Arc::clone(module),
                    None => {
                        let reason = format!("{key} is a {}", artifact.label());
                        deliver(completion, Err(TriggerError::ModuleLoad { identifier, reason }));
                        return;
                    }
                },
                Err(err) => {
                    let reason = err.root_cause().to_string();
                    deliver(completion, Err(TriggerError::ModuleLoad { identifier, reason }));
                    return;
                }
            };

            if let Err(err) = cache.add_dependency(&requester, &key) {
                // Either side was invalidated meanwhile; the resume is discarded.
                debug!("continuation"; "not linking {} -> {}: {}", requester, key, err);
            }

            let scheduler = completion.scheduler().clone();
            let waiting_on = identifier.clone();
            let must_start = module.on_initialized(Box::new(move |result| {
                let result = result.map_err(|err| TriggerError::ModuleInit {
                    identifier: waiting_on,
                    reason: err.to_string(),
                });
                deliver(completion, result);
            }));

            if must_start && let Some(scheduler) = scheduler.upgrade() {
                let context = ScriptContext::module_initialization(
                    request.context,
                    key,
                    RequiredModule {
                        identifier,
                        requester,
                    },
                );
                scheduler.submit(module, context, Entry::Init);
            }
        });
    }
}

/// The chain of module initializations from `key` down to `context`, if
/// `key` is one of them.
fn initializing(context: &ScriptContext, key: &ResourceKey) -> Option<String> {
    let modules: Vec<&ScriptContext> = context
        .ancestors()
        .filter(|ancestor| ancestor.kind() == ContextKind::ModuleInitialization)
        .collect();
    let at = modules.iter().position(|ancestor| ancestor.environment() == key)?;

    let chain: Vec<&str> = modules[..=at]
        .iter()
        .rev()
        .map(|ancestor| ancestor.environment().name())
        .chain(std::iter::once(key.name()))
        .collect();
    Some(chain.join(" -> "))
}
