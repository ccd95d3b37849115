//! Stepping a parsed directive script.
//!
//! An activation is a program counter into one block plus its local
//! bindings. Suspending returns the trigger and remembers where the result
//! goes; the next `step` binds it and carries on from the following line.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use super::parse::{Expr, Line, Path, Script, Segment, Statement, Template};
use crate::script::{
    Activation, Entry, HttpCall, Program, Resumption, Scope, ScriptError, Step, Trigger,
};

/// Compiled directive script.
pub struct DirectiveProgram {
    script: Arc<Script>,
}

impl DirectiveProgram {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
        }
    }
}

impl Program for DirectiveProgram {
    fn activate(&self, entry: &Entry) -> Option<Box<dyn Activation>> {
        let (handler, locals) = match entry {
            Entry::Init => (None, Map::new()),
            Entry::Handler { name, argument } => {
                if !self.script.handlers.contains_key(name) {
                    return None;
                }
                let mut locals = Map::new();
                locals.insert("event".to_string(), argument.clone());
                (Some(name.clone()), locals)
            }
        };

        Some(Box::new(DirectiveActivation {
            script: Arc::clone(&self.script),
            handler,
            next: 0,
            locals,
            waiting: None,
        }))
    }

    fn has_handler(&self, name: &str) -> bool {
        self.script.handlers.contains_key(name)
    }
}

/// Where a suspended statement's result goes.
struct Waiting {
    line: usize,
    bind: Option<String>,
}

enum Flow {
    Next,
    Suspend(Trigger, Option<String>),
    Return(Value),
}

struct DirectiveActivation {
    script: Arc<Script>,
    /// `None` runs the top level.
    handler: Option<String>,
    next: usize,
    locals: Map<String, Value>,
    waiting: Option<Waiting>,
}

impl Activation for DirectiveActivation {
    fn step(&mut self, scope: &mut Scope<'_>, input: Resumption) -> Step {
        match (input, self.waiting.take()) {
            (Resumption::Value(value), Some(waiting)) => {
                if let Some(name) = waiting.bind {
                    self.assign(scope, &name, value);
                }
            }
            (Resumption::Failure(err), Some(waiting)) => {
                return Step::Failed(ScriptError::at(waiting.line, err.to_string()));
            }
            (Resumption::Failure(err), None) => return Step::Failed(ScriptError::new(err.to_string())),
            (Resumption::Start | Resumption::Value(_), _) => {}
        }

        let script = Arc::clone(&self.script);
        let lines = script.block(self.handler.as_deref());

        while let Some(line) = lines.get(self.next) {
            self.next += 1;
            match self.execute(scope, line) {
                Ok(Flow::Next) => {}
                Ok(Flow::Suspend(trigger, bind)) => {
                    self.waiting = Some(Waiting {
                        line: line.number,
                        bind,
                    });
                    return Step::Suspend(trigger);
                }
                Ok(Flow::Return(value)) => return Step::Complete(value),
                Err(err) => return Step::Failed(err),
            }
        }
        Step::Complete(Value::Null)
    }
}

impl DirectiveActivation {
    fn execute(&mut self, scope: &mut Scope<'_>, line: &Line) -> Result<Flow, ScriptError> {
        let at = line.number;
        let flow = match &line.statement {
            Statement::Let { name, value } => {
                let value = self.evaluate(scope, value, at)?;
                self.assign(scope, name, value);
                Flow::Next
            }
            Statement::Export { name, value } => {
                let value = self.evaluate(scope, value, at)?;
                scope.export(name, value);
                Flow::Next
            }
            Statement::Require { identifier, bind } => Flow::Suspend(
                Trigger::RequireModule {
                    identifier: identifier.clone(),
                },
                Some(bind.clone()),
            ),
            Statement::Fetch {
                method,
                url,
                body,
                bind,
            } => {
                let url = self.render(scope, url, at)?;
                if let Err(err) = url::Url::parse(&url) {
                    return Err(ScriptError::at(at, format!("invalid url `{url}`: {err}")));
                }
                let body = body
                    .as_ref()
                    .map(|path| self.lookup(scope, path, at))
                    .transpose()?;
                Flow::Suspend(
                    Trigger::HttpCall(HttpCall {
                        method: method.clone(),
                        url,
                        body,
                    }),
                    bind.clone(),
                )
            }
            Statement::Sleep { ms } => Flow::Suspend(
                Trigger::Timer {
                    delay: Duration::from_millis(*ms),
                },
                None,
            ),
            Statement::Receive { bind } => Flow::Suspend(Trigger::ClientMessage, bind.clone()),
            Statement::Emit(text) => {
                let text = self.render(scope, text, at)?;
                scope.emit(&text);
                Flow::Next
            }
            Statement::Send(text) => {
                let text = self.render(scope, text, at)?;
                scope
                    .send(&text)
                    .map_err(|err| ScriptError::at(at, err.message()))?;
                Flow::Next
            }
            Statement::Fail(text) => {
                return Err(ScriptError::at(at, self.render(scope, text, at)?));
            }
            Statement::Timer {
                ms,
                handler,
                repeat,
            } => {
                scope.schedule(Duration::from_millis(*ms), handler, *repeat);
                Flow::Next
            }
            Statement::Return(value) => Flow::Return(self.evaluate(scope, value, at)?),
        };
        Ok(flow)
    }

    /// Top-level bindings are environment globals; handler bindings are
    /// local to the activation.
    fn assign(&mut self, scope: &mut Scope<'_>, name: &str, value: Value) {
        if self.handler.is_some() {
            self.locals.insert(name.to_string(), value);
        } else {
            scope.set_global(name, value);
        }
    }

    fn evaluate(&self, scope: &Scope<'_>, expr: &Expr, at: usize) -> Result<Value, ScriptError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Template(template) => self.render(scope, template, at).map(Value::String),
            Expr::Path(path) => self.lookup(scope, path, at),
        }
    }

    fn lookup(&self, scope: &Scope<'_>, path: &Path, at: usize) -> Result<Value, ScriptError> {
        let undefined = || ScriptError::at(at, format!("`{}` is not defined", path.join(".")));

        let (head, rest) = path.split_first().ok_or_else(undefined)?;
        let mut value = self
            .locals
            .get(head)
            .or_else(|| scope.global(head))
            .ok_or_else(undefined)?;

        for part in rest {
            value = match value {
                Value::Object(map) => map.get(part),
                Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            }
            .ok_or_else(undefined)?;
        }
        Ok(value.clone())
    }

    fn render(&self, scope: &Scope<'_>, template: &Template, at: usize) -> Result<String, ScriptError> {
        let mut out = String::new();
        for segment in &template.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Var(path) => match self.lookup(scope, path, at)? {
                    Value::String(text) => out.push_str(&text),
                    other => out.push_str(&other.to_string()),
                },
            }
        }
        Ok(out)
    }
}
