//! Line-oriented parser for directive scripts.

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::script::ScriptError;

/// `a.b.0` path into bound values.
pub type Path = Vec<String>;

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Var(Path),
}

/// Text with `{path}` holes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Template {
    pub segments: Vec<Segment>,
}

impl Template {
    pub fn is_static(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Text(_)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Template(Template),
    Path(Path),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Let { name: String, value: Expr },
    Require { identifier: String, bind: String },
    Fetch {
        method: String,
        url: Template,
        body: Option<Path>,
        bind: Option<String>,
    },
    Sleep { ms: u64 },
    Receive { bind: Option<String> },
    Emit(Template),
    Send(Template),
    Export { name: String, value: Expr },
    Fail(Template),
    Timer { ms: u64, handler: String, repeat: bool },
    Return(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub number: usize,
    pub statement: Statement,
}

/// Parsed script: top-level statements plus `on` handlers.
#[derive(Debug, Default)]
pub struct Script {
    pub init: Vec<Line>,
    pub handlers: FxHashMap<String, Vec<Line>>,
}

impl Script {
    /// Statements of a handler, or of the top level for `None`.
    pub fn block(&self, handler: Option<&str>) -> &[Line] {
        match handler {
            None => &self.init,
            Some(name) => self.handlers.get(name).map(Vec::as_slice).unwrap_or_default(),
        }
    }
}

pub fn parse(source: &str) -> Result<Script, ScriptError> {
    let mut script = Script::default();
    // Open `on` block: name, line, statements so far
    let mut open: Option<(String, usize, Vec<Line>)> = None;
    let mut timer_targets = Vec::new();

    for (index, raw) in source.lines().enumerate() {
        let number = index + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }

        let (word, rest) = split_word(text);
        match word {
            "on" => {
                if let Some((name, _, _)) = &open {
                    return Err(ScriptError::at(number, format!("`on` inside handler `{name}`")));
                }
                let name = identifier(rest, number)?;
                if script.handlers.contains_key(&name) {
                    return Err(ScriptError::at(number, format!("handler `{name}` defined twice")));
                }
                open = Some((name, number, Vec::new()));
            }
            "end" => {
                let Some((name, _, lines)) = open.take() else {
                    return Err(ScriptError::at(number, "`end` without `on`"));
                };
                script.handlers.insert(name, lines);
            }
            _ => {
                let statement = statement(word, rest, number)?;
                if let Statement::Timer { handler, .. } = &statement {
                    timer_targets.push((handler.clone(), number));
                }
                let line = Line { number, statement };
                match &mut open {
                    Some((_, _, lines)) => lines.push(line),
                    None => script.init.push(line),
                }
            }
        }
    }

    if let Some((name, number, _)) = open {
        return Err(ScriptError::at(number, format!("handler `{name}` is missing `end`")));
    }
    for (handler, number) in timer_targets {
        if !script.handlers.contains_key(&handler) {
            return Err(ScriptError::at(number, format!("no handler `{handler}`")));
        }
    }

    Ok(script)
}

fn statement(word: &str, rest: &str, line: usize) -> Result<Statement, ScriptError> {
    let statement = match word {
        "let" => {
            let (name, value) = assignment(rest, line)?;
            Statement::Let { name, value }
        }
        "export" => {
            let (name, value) = assignment(rest, line)?;
            Statement::Export { name, value }
        }
        "require" => require(rest, line)?,
        "fetch" => fetch(rest, line)?,
        "sleep" => Statement::Sleep {
            ms: millis(rest, line)?,
        },
        "receive" => {
            let bind = match split_word(rest) {
                ("", _) => None,
                ("as", name) => Some(identifier(name, line)?),
                _ => return Err(ScriptError::at(line, "expected `receive [as <name>]`")),
            };
            Statement::Receive { bind }
        }
        "emit" => Statement::Emit(text(rest, line)?),
        "send" => Statement::Send(text(rest, line)?),
        "fail" => Statement::Fail(text(rest, line)?),
        "after" | "every" => timer(rest, word == "every", line)?,
        "return" => Statement::Return(expression(rest, line)?),
        other => return Err(ScriptError::at(line, format!("unknown statement `{other}`"))),
    };
    Ok(statement)
}

/// `name = expr`
fn assignment(rest: &str, line: usize) -> Result<(String, Expr), ScriptError> {
    let Some((name, value)) = rest.split_once('=') else {
        return Err(ScriptError::at(line, "expected `<name> = <value>`"));
    };
    Ok((identifier(name, line)?, expression(value, line)?))
}

/// `require <id> [as <name>]`; the name defaults to the id's file stem.
fn require(rest: &str, line: usize) -> Result<Statement, ScriptError> {
    let (identifier_text, tail) = split_word(rest);
    if identifier_text.is_empty() {
        return Err(ScriptError::at(line, "`require` needs a module name"));
    }

    let bind = match split_word(tail) {
        ("as", name) => identifier(name, line)?,
        ("", _) => {
            let stem = identifier_text
                .rsplit('/')
                .next()
                .and_then(|file| file.split('.').next())
                .unwrap_or(identifier_text);
            if !is_identifier(stem) {
                return Err(ScriptError::at(
                    line,
                    format!("`require {identifier_text}` needs `as <name>`"),
                ));
            }
            stem.to_string()
        }
        _ => return Err(ScriptError::at(line, "expected `require <module> [as <name>]`")),
    };

    Ok(Statement::Require {
        identifier: identifier_text.to_string(),
        bind,
    })
}

/// `fetch METHOD url [with <path>] [as <name>]`
fn fetch(rest: &str, line: usize) -> Result<Statement, ScriptError> {
    let words: Vec<&str> = rest.split_whitespace().collect();
    let [method, url, options @ ..] = words.as_slice() else {
        return Err(ScriptError::at(line, "expected `fetch <METHOD> <url>`"));
    };
    if !method.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(ScriptError::at(line, format!("invalid method `{method}`")));
    }

    let url = template(url, line)?;
    if url.is_static() {
        let text = render_static(&url);
        url::Url::parse(&text)
            .map_err(|err| ScriptError::at(line, format!("invalid url `{text}`: {err}")))?;
    }

    let mut body = None;
    let mut bind = None;
    let mut options = options.iter();
    while let Some(option) = options.next() {
        let value = options
            .next()
            .ok_or_else(|| ScriptError::at(line, format!("`{option}` needs a value")))?;
        match *option {
            "with" => body = Some(path(value, line)?),
            "as" => bind = Some(identifier(value, line)?),
            other => return Err(ScriptError::at(line, format!("unexpected `{other}`"))),
        }
    }

    Ok(Statement::Fetch {
        method: method.to_string(),
        url,
        body,
        bind,
    })
}

/// `<ms> call <handler>`
fn timer(rest: &str, repeat: bool, line: usize) -> Result<Statement, ScriptError> {
    let words: Vec<&str> = rest.split_whitespace().collect();
    let [ms, "call", handler] = words.as_slice() else {
        return Err(ScriptError::at(line, "expected `<ms> call <handler>`"));
    };
    Ok(Statement::Timer {
        ms: millis(ms, line)?,
        handler: identifier(handler, line)?,
        repeat,
    })
}

fn millis(text: &str, line: usize) -> Result<u64, ScriptError> {
    text.trim()
        .parse()
        .map_err(|_| ScriptError::at(line, format!("expected milliseconds, found `{}`", text.trim())))
}

/// A quoted string is a template, JSON is a literal, anything else a path.
pub fn expression(text: &str, line: usize) -> Result<Expr, ScriptError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ScriptError::at(line, "missing value"));
    }
    if let Some(inner) = quoted(text) {
        return Ok(Expr::Template(template(&unescape(inner), line)?));
    }
    if let Ok(value) = serde_json::from_str(text) {
        return Ok(Expr::Literal(value));
    }
    path(text, line).map(Expr::Path)
}

/// Rest-of-line text; surrounding quotes are optional.
fn text(rest: &str, line: usize) -> Result<Template, ScriptError> {
    match quoted(rest.trim()) {
        Some(inner) => template(&unescape(inner), line),
        None => template(rest.trim(), line),
    }
}

pub fn template(text: &str, line: usize) -> Result<Template, ScriptError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => return Err(ScriptError::at(line, "unclosed `{`")),
                    }
                }
                if !literal.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Var(path(&name, line)?));
            }
            c => literal.push(c),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Text(literal));
    }
    Ok(Template { segments })
}

fn render_static(template: &Template) -> String {
    template
        .segments
        .iter()
        .filter_map(|segment| match segment {
            Segment::Text(text) => Some(text.as_str()),
            Segment::Var(_) => None,
        })
        .collect()
}

fn path(text: &str, line: usize) -> Result<Path, ScriptError> {
    let text = text.trim();
    let mut parts = text.split('.');
    let head = parts.next().unwrap_or_default();
    if !is_identifier(head) {
        return Err(ScriptError::at(line, format!("invalid name `{text}`")));
    }

    let mut path = vec![head.to_string()];
    for part in parts {
        let valid = is_identifier(part) || (!part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()));
        if !valid {
            return Err(ScriptError::at(line, format!("invalid path `{text}`")));
        }
        path.push(part.to_string());
    }
    Ok(path)
}

fn identifier(text: &str, line: usize) -> Result<String, ScriptError> {
    let text = text.trim();
    if is_identifier(text) {
        Ok(text.to_string())
    } else {
        Err(ScriptError::at(line, format!("invalid name `{text}`")))
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(at) => (&text[..at], text[at..].trim_start()),
        None => (text, ""),
    }
}

fn quoted(text: &str) -> Option<&str> {
    text.strip_prefix('"')?.strip_suffix('"')
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
