//! Literal module evaluator.
//!
//! Executes the statements of a data module that construct values: imports,
//! constant declarations, enums, exports, CommonJS assignments and console
//! calls. Type-level syntax is erased. Function and class declarations are
//! skipped without being bound. Anything else (calls, operators, control
//! flow) is rejected, so a module either yields plain data or fails loudly.

use super::lexer::{TemplatePart, Token, TokenKind};
use super::value::{display, is_truthy, number_to_string, number_value, scalar_to_string};
use super::Exports;
use crate::error::{BuildError, Result};
use log::{debug, error, info, warn};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Gives the evaluator access to other modules.
pub trait ImportHost {
    /// Load the module `specifier` as imported by the file at `from`.
    fn import(&mut self, specifier: &str, from: &Path) -> Result<Arc<Exports>>;
}

/// Evaluate a tokenized module and return its export bindings.
pub fn evaluate_module(
    path: &Path,
    tokens: Vec<Token>,
    host: &mut dyn ImportHost,
) -> Result<Exports> {
    let mut evaluator = Evaluator::new(path, tokens, host);
    evaluator.run()?;
    evaluator.finish()
}

/// Tokens that, at the end of a line, mean the type continues on the next.
const TYPE_CONTINUATIONS: &[&str] = &["|", "&", "=>", ",", ":", "?", ".", "<", "="];

struct Evaluator<'h> {
    path: PathBuf,
    tokens: Vec<Token>,
    pos: usize,
    host: &'h mut dyn ImportHost,
    bindings: HashMap<String, Value>,
    exports: Exports,
    /// `export { local as exported }` entries, resolved once the body has run
    pending_exports: Vec<(String, String)>,
    /// Value assigned to `module.exports`
    module_exports: Option<Value>,
}

impl<'h> Evaluator<'h> {
    fn new(path: &Path, tokens: Vec<Token>, host: &'h mut dyn ImportHost) -> Self {
        Self {
            path: path.to_path_buf(),
            tokens,
            pos: 0,
            host,
            bindings: HashMap::new(),
            exports: Map::new(),
            pending_exports: Vec::new(),
            module_exports: None,
        }
    }

    fn run(&mut self) -> Result<()> {
        while !self.at_eof() {
            self.statement()?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Exports> {
        for (local, exported) in std::mem::take(&mut self.pending_exports) {
            let value = self.lookup(&local)?;
            self.exports.insert(exported, value);
        }

        match self.module_exports.take() {
            None => Ok(self.exports),
            Some(Value::Object(map)) => {
                let mut exports = map.clone();
                exports
                    .entry("default")
                    .or_insert_with(|| Value::Object(map));
                Ok(exports)
            }
            Some(other) => {
                let mut exports = Map::new();
                exports.insert("default".to_string(), other);
                Ok(exports)
            }
        }
    }

    // ------------------------------------------------------------------
    // Token cursor
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len().saturating_sub(1));
        &self.tokens[idx]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        self.tokens.is_empty() || matches!(self.peek().kind, TokenKind::Eof)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.peek().is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, name: &str) -> bool {
        if self.peek().is_ident(name) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.syntax(format!("expected '{}' but found {}", p, self.peek().describe())))
        }
    }

    fn expect_ident(&mut self, name: &str) -> Result<()> {
        if self.eat_ident(name) {
            Ok(())
        } else {
            Err(self.syntax(format!("expected '{}' but found {}", name, self.peek().describe())))
        }
    }

    /// Any identifier, keywords included.
    fn identifier(&mut self) -> Result<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.syntax(format!(
                "expected identifier but found {}",
                self.peek().describe()
            ))),
        }
    }

    fn string_literal(&mut self) -> Result<String> {
        match &self.peek().kind {
            TokenKind::Str(s) => {
                let s = s.clone();
                self.advance();
                Ok(s)
            }
            _ => Err(self.syntax(format!(
                "expected string literal but found {}",
                self.peek().describe()
            ))),
        }
    }

    /// Statement end: `;`, or a line break / `}` / end of file before the next token.
    fn terminator(&mut self) -> Result<()> {
        if self.eat_punct(";") {
            return Ok(());
        }
        let next = self.peek();
        if next.newline_before || next.is_punct("}") || matches!(next.kind, TokenKind::Eof) {
            return Ok(());
        }
        Err(self.syntax(format!("expected ';' but found {}", next.describe())))
    }

    fn syntax(&self, message: String) -> BuildError {
        BuildError::Syntax {
            path: self.path.clone(),
            line: self.peek().line,
            message,
        }
    }

    fn unsupported(&self, message: String) -> BuildError {
        BuildError::Unsupported {
            path: self.path.clone(),
            line: self.peek().line,
            message,
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement(&mut self) -> Result<()> {
        let token = self.peek().clone();
        match &token.kind {
            TokenKind::Punct(";") => {
                self.advance();
                Ok(())
            }
            TokenKind::Str(_) => {
                // Directive prologue ("use strict")
                self.advance();
                self.terminator()
            }
            TokenKind::Ident(word) => match word.as_str() {
                "import" if !self.peek_at(1).is_punct("(") => self.import_declaration(),
                "export" => self.export_declaration(),
                "const" if self.peek_at(1).is_ident("enum") => {
                    self.advance();
                    self.enum_declaration(false)
                }
                "const" | "let" | "var" => self.variable_declaration(false),
                "enum" => self.enum_declaration(false),
                "type" if matches!(self.peek_at(1).kind, TokenKind::Ident(_)) => {
                    self.skip_type_alias()
                }
                "interface" => self.skip_interface(),
                "declare" => {
                    self.advance();
                    self.skip_statement();
                    Ok(())
                }
                "function" | "async" => self.skip_function(),
                "class" | "abstract" => self.skip_class(),
                "module" if self.peek_at(1).is_punct(".") => self.commonjs_assignment(),
                "exports" if self.peek_at(1).is_punct(".") => self.commonjs_assignment(),
                "console" if self.peek_at(1).is_punct(".") => self.console_call(),
                other => Err(self.unsupported(format!("statement starting with '{}'", other))),
            },
            _ => Err(self.unsupported(format!("statement starting with {}", token.describe()))),
        }
    }

    fn import_declaration(&mut self) -> Result<()> {
        self.expect_ident("import")?;

        // Side-effect import
        if let TokenKind::Str(_) = self.peek().kind {
            let specifier = self.string_literal()?;
            self.skip_import_attributes();
            self.host.import(&specifier, &self.path)?;
            return self.terminator();
        }

        // `import type ...` carries no runtime bindings
        if self.peek().is_ident("type")
            && !self.peek_at(1).is_ident("from")
            && !self.peek_at(1).is_punct(",")
        {
            while !self.at_eof() && !self.peek().is_ident("from") {
                self.advance();
            }
            self.expect_ident("from")?;
            self.string_literal()?;
            self.skip_import_attributes();
            return self.terminator();
        }

        let mut default_name = None;
        let mut namespace_name = None;
        let mut named: Vec<(String, String)> = Vec::new();

        if let TokenKind::Ident(_) = self.peek().kind {
            default_name = Some(self.identifier()?);
            if !self.eat_punct(",") {
                self.expect_ident("from")?;
                return self.finish_import(default_name, namespace_name, named);
            }
        }

        if self.eat_punct("*") {
            self.expect_ident("as")?;
            namespace_name = Some(self.identifier()?);
        } else if self.eat_punct("{") {
            named = self.specifier_list()?;
        } else {
            return Err(self.syntax(format!(
                "unexpected {} in import declaration",
                self.peek().describe()
            )));
        }

        self.expect_ident("from")?;
        self.finish_import(default_name, namespace_name, named)
    }

    fn finish_import(
        &mut self,
        default_name: Option<String>,
        namespace_name: Option<String>,
        named: Vec<(String, String)>,
    ) -> Result<()> {
        let specifier = self.string_literal()?;
        self.skip_import_attributes();
        let module = self.host.import(&specifier, &self.path)?;

        if let Some(local) = default_name {
            let value = module
                .get("default")
                .cloned()
                .unwrap_or_else(|| Value::Object((*module).clone()));
            self.bindings.insert(local, value);
        }
        if let Some(local) = namespace_name {
            self.bindings
                .insert(local, Value::Object((*module).clone()));
        }
        for (imported, local) in named {
            let value = match module.get(&imported) {
                Some(v) => v.clone(),
                None => {
                    // Usually an interface or type alias imported without `type`
                    debug!(
                        "[ModuleLoader] {} has no runtime export '{}' for {}",
                        specifier,
                        imported,
                        self.path.display()
                    );
                    Value::Null
                }
            };
            self.bindings.insert(local, value);
        }
        self.terminator()
    }

    /// `{ a, b as c, type D }` after the opening brace. Type-only entries are dropped.
    fn specifier_list(&mut self) -> Result<Vec<(String, String)>> {
        let mut entries = Vec::new();
        while !self.eat_punct("}") {
            let type_only = self.peek().is_ident("type")
                && !self.peek_at(1).is_punct(",")
                && !self.peek_at(1).is_punct("}")
                && !self.peek_at(1).is_ident("as");
            if type_only {
                self.advance();
            }

            let name = match &self.peek().kind {
                TokenKind::Str(_) => self.string_literal()?,
                _ => self.identifier()?,
            };
            let alias = if self.eat_ident("as") {
                match &self.peek().kind {
                    TokenKind::Str(_) => self.string_literal()?,
                    _ => self.identifier()?,
                }
            } else {
                name.clone()
            };

            if !type_only {
                entries.push((name, alias));
            }
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        Ok(entries)
    }

    /// `with { type: "json" }` / `assert { ... }`
    fn skip_import_attributes(&mut self) {
        let newline = self.peek().newline_before;
        if !newline
            && (self.peek().is_ident("with") || self.peek().is_ident("assert"))
            && self.peek_at(1).is_punct("{")
        {
            self.advance();
            self.skip_balanced();
        }
    }

    fn export_declaration(&mut self) -> Result<()> {
        self.expect_ident("export")?;
        let token = self.peek().clone();

        match &token.kind {
            TokenKind::Ident(word) => match word.as_str() {
                "default" => {
                    self.advance();
                    if self.peek().is_ident("function")
                        || self.peek().is_ident("async")
                        || self.peek().is_ident("class")
                        || self.peek().is_ident("abstract")
                    {
                        return Err(self.unsupported(
                            "default export of a function or class".to_string(),
                        ));
                    }
                    if self.peek().is_ident("interface") {
                        return self.skip_interface();
                    }
                    let value = self.expression()?;
                    self.exports.insert("default".to_string(), value);
                    self.terminator()
                }
                "const" if self.peek_at(1).is_ident("enum") => {
                    self.advance();
                    self.enum_declaration(true)
                }
                "const" | "let" | "var" => self.variable_declaration(true),
                "enum" => self.enum_declaration(true),
                "type" if self.peek_at(1).is_punct("{") || self.peek_at(1).is_punct("*") => {
                    self.advance();
                    self.skip_statement();
                    Ok(())
                }
                "type" => self.skip_type_alias(),
                "interface" => self.skip_interface(),
                "declare" => {
                    self.advance();
                    self.skip_statement();
                    Ok(())
                }
                "function" | "async" => self.skip_function(),
                "class" | "abstract" => self.skip_class(),
                "as" => {
                    // `export as namespace Foo;`
                    self.skip_statement();
                    Ok(())
                }
                other => Err(self.unsupported(format!("export of '{}'", other))),
            },
            TokenKind::Punct("*") => {
                self.advance();
                let alias = if self.eat_ident("as") {
                    Some(self.identifier()?)
                } else {
                    None
                };
                self.expect_ident("from")?;
                let specifier = self.string_literal()?;
                self.skip_import_attributes();
                let module = self.host.import(&specifier, &self.path)?;
                match alias {
                    Some(name) => {
                        self.exports
                            .insert(name, Value::Object((*module).clone()));
                    }
                    None => {
                        for (key, value) in module.iter() {
                            if key != "default" && !self.exports.contains_key(key) {
                                self.exports.insert(key.clone(), value.clone());
                            }
                        }
                    }
                }
                self.terminator()
            }
            TokenKind::Punct("{") => {
                self.advance();
                let entries = self.specifier_list()?;
                if self.eat_ident("from") {
                    let specifier = self.string_literal()?;
                    self.skip_import_attributes();
                    let module = self.host.import(&specifier, &self.path)?;
                    for (name, alias) in entries {
                        match module.get(&name) {
                            Some(value) => {
                                self.exports.insert(alias, value.clone());
                            }
                            None => debug!(
                                "[ModuleLoader] {} has no runtime export '{}' to re-export",
                                specifier, name
                            ),
                        }
                    }
                } else {
                    self.pending_exports.extend(entries);
                }
                self.terminator()
            }
            TokenKind::Punct("=") => {
                // `export = value`
                self.advance();
                let value = self.expression()?;
                self.module_exports = Some(value);
                self.terminator()
            }
            _ => Err(self.syntax(format!("unexpected {} after 'export'", token.describe()))),
        }
    }

    fn variable_declaration(&mut self, exported: bool) -> Result<()> {
        self.advance(); // const / let / var
        loop {
            if self.peek().is_punct("{") || self.peek().is_punct("[") {
                return Err(self.unsupported("destructuring declaration".to_string()));
            }
            let name = self.identifier()?;
            self.eat_punct("!");
            if self.eat_punct(":") {
                self.skip_type(&["="]);
            }
            let value = if self.eat_punct("=") {
                self.expression()?
            } else {
                Value::Null
            };

            if exported {
                self.exports.insert(name.clone(), value.clone());
            }
            self.bindings.insert(name, value);

            if !self.eat_punct(",") {
                break;
            }
        }
        self.terminator()
    }

    /// `enum Name { A, B = 5, C = "c" }`, numeric members get reverse mappings.
    fn enum_declaration(&mut self, exported: bool) -> Result<()> {
        self.expect_ident("enum")?;
        let name = self.identifier()?;
        self.expect_punct("{")?;

        let mut members = Map::new();
        let mut reverse = Vec::new();
        let mut next: Option<f64> = Some(0.0);

        while !self.eat_punct("}") {
            let member = match &self.peek().kind {
                TokenKind::Str(_) => self.string_literal()?,
                _ => self.identifier()?,
            };
            let value = if self.eat_punct("=") {
                self.expression()?
            } else {
                match next {
                    Some(n) => number_value(n),
                    None => {
                        return Err(self.syntax(format!(
                            "enum member '{}' needs an initializer",
                            member
                        )))
                    }
                }
            };

            next = value.as_f64().map(|n| n + 1.0);
            if let Value::Number(n) = &value {
                reverse.push((number_to_string(n), member.clone()));
            }
            members.insert(member, value);

            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        for (key, member) in reverse {
            members.insert(key, Value::String(member));
        }

        let value = Value::Object(members);
        if exported {
            self.exports.insert(name.clone(), value.clone());
        }
        self.bindings.insert(name, value);
        self.eat_punct(";");
        Ok(())
    }

    /// `module.exports = v`, `module.exports.x = v`, `exports.x = v`
    fn commonjs_assignment(&mut self) -> Result<()> {
        let root = self.identifier()?;
        if root == "module" {
            self.expect_punct(".")?;
            self.expect_ident("exports")?;
            if self.eat_punct("=") {
                let value = self.expression()?;
                self.module_exports = Some(value);
                return self.terminator();
            }
        }

        self.expect_punct(".")?;
        let name = self.identifier()?;
        self.expect_punct("=")?;
        let value = self.expression()?;
        match &mut self.module_exports {
            Some(Value::Object(map)) => {
                map.insert(name, value);
            }
            Some(_) => {
                return Err(self.unsupported(
                    "property assignment on a non-object module.exports".to_string(),
                ))
            }
            None => {
                self.exports.insert(name, value);
            }
        }
        self.terminator()
    }

    /// `console.log(...)` and friends, routed through the `log` facade.
    fn console_call(&mut self) -> Result<()> {
        self.expect_ident("console")?;
        self.expect_punct(".")?;
        let method = self.identifier()?;
        self.expect_punct("(")?;
        let mut parts = Vec::new();
        while !self.eat_punct(")") {
            parts.push(display(&self.expression()?));
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        let message = parts.join(" ");
        let file = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match method.as_str() {
            "warn" => warn!("[{}] {}", file, message),
            "error" => error!("[{}] {}", file, message),
            "debug" | "trace" => debug!("[{}] {}", file, message),
            _ => info!("[{}] {}", file, message),
        }
        self.terminator()
    }

    // ------------------------------------------------------------------
    // Erased syntax
    // ------------------------------------------------------------------

    /// Skip a bracketed group starting at the current opener.
    fn skip_balanced(&mut self) {
        let mut depth = 0usize;
        loop {
            let token = self.advance();
            match token.kind {
                TokenKind::Punct("{" | "[" | "(") => depth += 1,
                TokenKind::Punct("}" | "]" | ")") => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return;
                    }
                }
                TokenKind::Eof => return,
                _ => {}
            }
        }
    }

    /// Skip a type expression. Stops before `stop` tokens, unbalanced closers,
    /// `,`/`;` at depth zero, or a line break that ends the type.
    fn skip_type(&mut self, stop: &[&str]) {
        let mut depth = 0usize;
        let mut consumed = false;
        let mut prev_continues = true;

        loop {
            let token = self.peek();
            if matches!(token.kind, TokenKind::Eof) {
                return;
            }
            if depth == 0 {
                if let TokenKind::Punct(p) = token.kind {
                    if matches!(p, "," | ";" | ")" | "]" | "}" | ">") {
                        return;
                    }
                    if consumed && stop.contains(&p) {
                        return;
                    }
                    if !consumed && p == "=" && stop.contains(&p) {
                        return;
                    }
                }
                let starts_continuation = matches!(
                    token.kind,
                    TokenKind::Punct("|" | "&" | "." | "=>" | "?" | ":" | "[")
                ) || token.is_ident("extends");
                if consumed && token.newline_before && !prev_continues && !starts_continuation {
                    return;
                }
            }

            let token = self.advance();
            consumed = true;
            prev_continues = match &token.kind {
                TokenKind::Punct(p) => TYPE_CONTINUATIONS.contains(p),
                TokenKind::Ident(w) => matches!(w.as_str(), "extends" | "keyof" | "typeof"),
                _ => false,
            };
            match token.kind {
                TokenKind::Punct("{" | "[" | "(" | "<") => depth += 1,
                TokenKind::Punct("}" | "]" | ")" | ">") => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
    }

    /// `type Name<T> = ...`
    fn skip_type_alias(&mut self) -> Result<()> {
        self.expect_ident("type")?;
        self.identifier()?;
        if self.peek().is_punct("<") {
            self.skip_angle_group();
        }
        self.expect_punct("=")?;
        self.skip_type(&[]);
        self.terminator()
    }

    fn skip_angle_group(&mut self) {
        let mut depth = 0usize;
        loop {
            let token = self.advance();
            match token.kind {
                TokenKind::Punct("<") => depth += 1,
                TokenKind::Punct(">") => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return;
                    }
                }
                TokenKind::Eof => return,
                _ => {}
            }
        }
    }

    /// Skip tokens up to the next `{` at depth zero, then skip that block.
    fn skip_to_block(&mut self) {
        let mut depth = 0usize;
        while !self.at_eof() {
            match self.peek().kind {
                TokenKind::Punct("{") if depth == 0 => {
                    self.skip_balanced();
                    return;
                }
                TokenKind::Punct("(" | "[" | "<") => depth += 1,
                TokenKind::Punct(")" | "]" | ">") => depth = depth.saturating_sub(1),
                _ => {}
            }
            self.advance();
        }
    }

    fn skip_interface(&mut self) -> Result<()> {
        self.expect_ident("interface")?;
        self.skip_to_block();
        self.eat_punct(";");
        Ok(())
    }

    fn skip_class(&mut self) -> Result<()> {
        debug!(
            "[ModuleLoader] Skipping class declaration in {}",
            self.path.display()
        );
        self.skip_to_block();
        self.eat_punct(";");
        Ok(())
    }

    /// Function declarations carry no data; overload signatures end without a body.
    fn skip_function(&mut self) -> Result<()> {
        self.eat_ident("async");
        self.expect_ident("function")?;
        self.eat_punct("*");
        let name = self.identifier()?;
        debug!(
            "[ModuleLoader] Skipping function '{}' in {}",
            name,
            self.path.display()
        );
        if self.peek().is_punct("<") {
            self.skip_angle_group();
        }
        if !self.peek().is_punct("(") {
            return Err(self.syntax(format!("expected '(' after function '{}'", name)));
        }
        self.skip_balanced();
        if self.eat_punct(":") {
            self.skip_type(&["{"]);
        }
        if self.peek().is_punct("{") {
            self.skip_balanced();
            Ok(())
        } else {
            self.terminator()
        }
    }

    /// Skip a statement of unknown shape (`declare ...`, `export type { }`).
    fn skip_statement(&mut self) {
        let mut depth = 0usize;
        let mut consumed = false;
        while !self.at_eof() {
            let token = self.peek();
            if depth == 0 {
                if token.is_punct(";") {
                    self.advance();
                    return;
                }
                if consumed && token.newline_before {
                    return;
                }
            }
            let token = self.advance();
            consumed = true;
            match token.kind {
                TokenKind::Punct("{" | "[" | "(") => depth += 1,
                TokenKind::Punct("}" | "]" | ")") => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expression(&mut self) -> Result<Value> {
        let mut value = self.unary()?;
        while self.peek().is_punct("+") {
            self.advance();
            let rhs = self.unary()?;
            value = self.add(value, rhs)?;
        }
        if self.peek().is_punct("=>") {
            return Err(self.unsupported("arrow function".to_string()));
        }
        for op in ["?", "??", "||", "&&", "-", "*", "/", "===", "==", "!==", "!="] {
            if self.peek().is_punct(op) && !self.peek().newline_before {
                return Err(self.unsupported(format!("operator '{}'", op)));
            }
        }
        Ok(value)
    }

    fn add(&self, lhs: Value, rhs: Value) -> Result<Value> {
        if let (Value::Number(a), Value::Number(b)) = (&lhs, &rhs) {
            if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
                let sum = if let (Some(x), Some(y)) = (lhs.as_i64(), rhs.as_i64()) {
                    x.checked_add(y).map(Value::from)
                } else {
                    None
                };
                return Ok(sum.unwrap_or_else(|| number_value(a + b)));
            }
        }
        match (scalar_to_string(&lhs), scalar_to_string(&rhs)) {
            (Some(a), Some(b)) => Ok(Value::String(a + &b)),
            _ => Err(self.unsupported("'+' on an object or array".to_string())),
        }
    }

    fn unary(&mut self) -> Result<Value> {
        if self.eat_punct("-") {
            let value = self.unary()?;
            return match value {
                Value::Number(n) => Ok(negate(&n)),
                _ => Err(self.unsupported("unary '-' on a non-number".to_string())),
            };
        }
        if self.eat_punct("+") {
            let value = self.unary()?;
            return match value {
                Value::Number(_) => Ok(value),
                _ => Err(self.unsupported("unary '+' on a non-number".to_string())),
            };
        }
        if self.eat_punct("!") {
            let value = self.unary()?;
            return Ok(Value::Bool(!is_truthy(&value)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Value> {
        let mut value = self.primary()?;
        loop {
            let token = self.peek().clone();
            if token.is_punct(".") || token.is_punct("?.") {
                self.advance();
                if self.peek().is_punct("[") {
                    // `a?.[key]`
                    continue;
                }
                let name = self.identifier()?;
                value = member(&value, &name);
            } else if token.is_punct("[") && !token.newline_before {
                self.advance();
                let key = self.expression()?;
                self.expect_punct("]")?;
                let key = scalar_to_string(&key)
                    .ok_or_else(|| self.unsupported("object used as a property key".to_string()))?;
                value = member(&value, &key);
            } else if token.is_punct("!") && !token.newline_before {
                self.advance();
            } else if (token.is_ident("as") || token.is_ident("satisfies")) && !token.newline_before
            {
                self.advance();
                if !self.eat_ident("const") {
                    self.skip_type(&[]);
                }
            } else if token.is_punct("(") && !token.newline_before {
                return Err(self.unsupported("function call".to_string()));
            } else {
                return Ok(value);
            }
        }
    }

    fn primary(&mut self) -> Result<Value> {
        let token = self.advance();
        match token.kind {
            TokenKind::Str(s) => Ok(Value::String(s)),
            TokenKind::Num(n) => Ok(Value::Number(n)),
            TokenKind::Template(parts) => self.template(parts),
            TokenKind::Punct("[") => self.array_literal(),
            TokenKind::Punct("{") => self.object_literal(),
            TokenKind::Punct("(") => {
                if self.peek().is_punct(")") {
                    return Err(self.unsupported("arrow function".to_string()));
                }
                let value = self.expression()?;
                self.expect_punct(")")?;
                if self.peek().is_punct("=>") || self.peek().is_punct(":") {
                    return Err(self.unsupported("arrow function".to_string()));
                }
                Ok(value)
            }
            TokenKind::Ident(name) => self.identifier_value(&name),
            _ => {
                self.pos -= 1;
                Err(self.syntax(format!("unexpected {} in expression", token.describe())))
            }
        }
    }

    fn identifier_value(&mut self, name: &str) -> Result<Value> {
        match name {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            "null" | "undefined" | "NaN" | "Infinity" => Ok(Value::Null),
            "__filename" => Ok(Value::String(self.path.display().to_string())),
            "__dirname" => Ok(Value::String(
                self.path
                    .parent()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            )),
            "require" if self.peek().is_punct("(") => {
                self.advance();
                let specifier = self.string_literal()?;
                self.expect_punct(")")?;
                let module = self.host.import(&specifier, &self.path)?;
                Ok(Value::Object((*module).clone()))
            }
            "new" | "function" | "async" | "class" | "this" | "await" | "yield" | "typeof" => {
                Err(self.unsupported(format!("'{}' expression", name)))
            }
            _ => {
                if self.peek().is_punct("=>") {
                    return Err(self.unsupported("arrow function".to_string()));
                }
                if self.peek().is_punct("(") && !self.peek().newline_before {
                    return Err(self.unsupported(format!("call of '{}'", name)));
                }
                self.lookup(name)
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<Value> {
        self.bindings
            .get(name)
            .cloned()
            .ok_or_else(|| BuildError::UnknownBinding {
                path: self.path.clone(),
                name: name.to_string(),
            })
    }

    fn template(&mut self, parts: Vec<TemplatePart>) -> Result<Value> {
        let mut out = String::new();
        for part in parts {
            match part {
                TemplatePart::Text(text) => out.push_str(&text),
                TemplatePart::Expr(tokens) => {
                    let saved_tokens = std::mem::replace(&mut self.tokens, tokens);
                    let saved_pos = std::mem::replace(&mut self.pos, 0);
                    let result = self.expression().and_then(|value| {
                        if self.at_eof() {
                            Ok(value)
                        } else {
                            Err(self.syntax(format!(
                                "unexpected {} in template substitution",
                                self.peek().describe()
                            )))
                        }
                    });
                    self.tokens = saved_tokens;
                    self.pos = saved_pos;

                    let value = result?;
                    match &value {
                        Value::Array(_) | Value::Object(_) => out.push_str(&value.to_string()),
                        other => out.push_str(&scalar_to_string(other).unwrap_or_default()),
                    }
                }
            }
        }
        Ok(Value::String(out))
    }

    /// After the opening `[`.
    fn array_literal(&mut self) -> Result<Value> {
        let mut items = Vec::new();
        loop {
            if self.eat_punct("]") {
                break;
            }
            if self.peek().is_punct(",") {
                // Hole
                self.advance();
                items.push(Value::Null);
                continue;
            }
            if self.eat_punct("...") {
                match self.expression()? {
                    Value::Array(spread) => items.extend(spread),
                    Value::String(s) => items.extend(s.chars().map(|c| Value::String(c.into()))),
                    Value::Null => {
                        return Err(self.unsupported("spread of undefined".to_string()))
                    }
                    _ => return Err(self.unsupported("spread of a non-iterable".to_string())),
                }
            } else {
                items.push(self.expression()?);
            }
            if !self.eat_punct(",") {
                self.expect_punct("]")?;
                break;
            }
        }
        Ok(Value::Array(items))
    }

    /// After the opening `{`.
    fn object_literal(&mut self) -> Result<Value> {
        let mut map = Map::new();
        loop {
            if self.eat_punct("}") {
                break;
            }

            if self.eat_punct("...") {
                match self.expression()? {
                    Value::Object(spread) => map.extend(spread),
                    Value::Array(items) => {
                        for (i, item) in items.into_iter().enumerate() {
                            map.insert(i.to_string(), item);
                        }
                    }
                    Value::String(s) => {
                        for (i, c) in s.chars().enumerate() {
                            map.insert(i.to_string(), Value::String(c.into()));
                        }
                    }
                    _ => {}
                }
            } else {
                let key_token = self.advance();
                let (key, shorthand_ok) = match key_token.kind {
                    TokenKind::Ident(name) => (name, true),
                    TokenKind::Str(s) => (s, false),
                    TokenKind::Num(n) => (number_to_string(&n), false),
                    TokenKind::Punct("[") => {
                        let key = self.expression()?;
                        self.expect_punct("]")?;
                        let key = scalar_to_string(&key).ok_or_else(|| {
                            self.unsupported("object used as a property key".to_string())
                        })?;
                        (key, false)
                    }
                    _ => {
                        self.pos -= 1;
                        return Err(self.syntax(format!(
                            "unexpected {} in object literal",
                            key_token.describe()
                        )));
                    }
                };

                if self.eat_punct(":") {
                    let value = self.expression()?;
                    map.insert(key, value);
                } else if self.peek().is_punct("(") || self.peek().is_punct("<") {
                    return Err(self.unsupported(format!("method '{}' in object literal", key)));
                } else if shorthand_ok
                    && (self.peek().is_punct(",") || self.peek().is_punct("}"))
                {
                    let value = self.lookup(&key)?;
                    map.insert(key, value);
                } else {
                    return Err(self.syntax(format!(
                        "expected ':' after property '{}' but found {}",
                        key,
                        self.peek().describe()
                    )));
                }
            }

            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        Ok(Value::Object(map))
    }
}

fn member(value: &Value, key: &str) -> Value {
    match value {
        Value::Object(map) => map.get(key).cloned().unwrap_or(Value::Null),
        Value::Array(items) => {
            if key == "length" {
                return Value::from(items.len());
            }
            key.parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null)
        }
        Value::String(s) if key == "length" => Value::from(s.chars().count()),
        _ => Value::Null,
    }
}

fn negate(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        if let Some(neg) = i.checked_neg() {
            return Value::from(neg);
        }
    }
    number_value(-n.as_f64().unwrap_or(0.0))
}
