//! Assembly language for contracts and functions.
//!
//! Loads human-readable source directly into a [`VM`]. Uses
//! [`for_each_instruction!`](crate::for_each_instruction) to generate the
//! instruction parser.
//!
//! # Syntax
//!
//! ```text
//! contract @1Transfer            # `inactive` may follow the name
//!     tx Recipient str
//!     tx Amount int optional     # words after the type are tags
//!     uses @1Audit
//!     func conditions
//!         LOAD_EXTEND Amount
//!         PUSH_INT 0
//!         GT
//!         JUMP_IF_FALSE negative
//!         RET 0
//!     negative:
//!         PUSH_STR "amount must be positive"
//!         RAISE
//!     end
//! end
//!
//! func double x:int -> int
//!     var tmp int
//!     LOAD_VAR x
//!     PUSH_INT 2
//!     MUL
//!     RET 1
//! end
//! ```
//!
//! - Instructions are uppercase; operands follow, commas optional
//! - Variables are referenced by name or index
//! - String literals are double-quoted, with `\"`, `\\` and `\n` escapes
//! - Labels end with `:` and may be used before their definition
//! - Comments start with `#`

use crate::for_each_instruction;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::ByteCode;
use crate::virtual_machine::object::{BlockId, FieldInfo, FuncInfo, Object};
use crate::virtual_machine::value::ValueType;
use crate::virtual_machine::vm::VM;
use std::collections::HashMap;
use std::fmt::Write;
use std::fs;
use std::path::Path;

const COMMENT_CHAR: char = '#';
const LABEL_SUFFIX: char = ':';
const RESULTS_ARROW: &str = "->";

/// Formats a compiler-style diagnostic for assembly failures.
pub fn render_diagnostic(file: &str, source: &str, err: &VMError) -> String {
    let mut diag = String::new();
    let VMError::AssemblyError { line, message } = err else {
        let _ = writeln!(diag, "error: {err}");
        return diag;
    };
    let _ = writeln!(diag, "error: {message}");
    let _ = writeln!(diag, " --> {file}:{line}");
    if let Some(raw_line) = source.lines().nth(line.saturating_sub(1)) {
        let _ = writeln!(diag, "  |");
        let _ = writeln!(diag, "{:>4} | {}", line, raw_line.trim_end_matches('\r'));
        let _ = writeln!(diag, "  |");
    }
    diag
}

fn asm_error(line: usize, message: impl Into<String>) -> VMError {
    VMError::AssemblyError {
        line,
        message: message.into(),
    }
}

/// Tokenize a single line of assembly.
///
/// Rules:
/// - `#` starts a comment outside of string literals
/// - commas and whitespace separate tokens
/// - a string literal is one token, quotes included
fn tokenize(line_no: usize, line: &str) -> Result<Vec<&str>, VMError> {
    let mut out = Vec::with_capacity(8);
    let mut start: Option<usize> = None;
    let mut in_str = false;
    let mut escaped = false;

    for (i, c) in line.char_indices() {
        if in_str {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_str = false,
                _ => {}
            }
            continue;
        }
        match c {
            COMMENT_CHAR => {
                if let Some(s) = start.take() {
                    out.push(&line[s..i]);
                }
                return Ok(out);
            }
            ',' | ' ' | '\t' | '\r' => {
                if let Some(s) = start.take() {
                    out.push(&line[s..i]);
                }
            }
            '"' => {
                in_str = true;
                start.get_or_insert(i);
            }
            _ => {
                start.get_or_insert(i);
            }
        }
    }

    if in_str {
        return Err(asm_error(line_no, "unterminated string literal (missing closing quote)"));
    }
    if let Some(s) = start {
        out.push(&line[s..]);
    }
    Ok(out)
}

/// Parses a double-quoted literal, resolving escapes.
fn parse_string(tok: &str) -> Result<String, String> {
    let inner = tok
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .filter(|_| tok.len() >= 2)
        .ok_or_else(|| format!("expected string literal, got {tok}"))?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other @ ('"' | '\\')) => out.push(other),
            other => return Err(format!("invalid escape \\{}", other.map(String::from).unwrap_or_default())),
        }
    }
    Ok(out)
}

fn parse_int(tok: &str) -> Result<i64, String> {
    tok.parse().map_err(|_| format!("invalid integer {tok}"))
}

fn parse_count(tok: &str) -> Result<usize, String> {
    tok.parse().map_err(|_| format!("invalid count {tok}"))
}

/// Parse a boolean literal (`true` or `false`).
fn parse_bool(tok: &str) -> Result<bool, String> {
    match tok {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(format!("expected true or false, got {tok}")),
    }
}

fn parse_name(tok: &str) -> Result<String, String> {
    if tok.starts_with('"') {
        parse_string(tok)
    } else {
        Ok(tok.to_string())
    }
}

fn parse_type(tok: &str) -> Result<ValueType, String> {
    ValueType::parse(tok).ok_or_else(|| format!("unknown type {tok}"))
}

/// Checks if a token is a label definition (ends with `:`)
fn is_label_def(tok: &str) -> bool {
    tok.ends_with(LABEL_SUFFIX) && tok.len() > 1 && !tok.starts_with('"')
}

/// Names visible to the instructions of one function.
struct FuncScope<'a> {
    vm: &'a VM,
    func: BlockId,
    labels: &'a HashMap<String, usize>,
}

impl FuncScope<'_> {
    fn var(&self, tok: &str) -> Result<usize, String> {
        if let Ok(index) = tok.parse::<usize>() {
            return Ok(index);
        }
        match self.vm.block(self.func).objects.get(tok) {
            Some(Object::Variable(var)) => Ok(var.index),
            _ => Err(format!("unknown variable {tok}")),
        }
    }

    fn label(&self, tok: &str) -> Result<usize, String> {
        if let Ok(target) = tok.parse::<usize>() {
            return Ok(target);
        }
        self.labels
            .get(tok)
            .copied()
            .ok_or_else(|| format!("undefined label {tok}"))
    }
}

macro_rules! define_parse_instruction {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ], $cost:expr
        ),* $(,)?
    ) => {
        /// Parse one instruction from its mnemonic and operand tokens.
        fn parse_instruction(
            scope: &FuncScope<'_>,
            mnemonic: &str,
            operands: &[&str],
        ) -> Result<ByteCode, String> {
            match mnemonic {
                $(
                    $mnemonic => {
                        const EXPECTED: usize = define_parse_instruction!(@count $( $field ),*);
                        if operands.len() != EXPECTED {
                            return Err(format!(
                                "{} expects {} operands, got {}",
                                $mnemonic,
                                EXPECTED,
                                operands.len()
                            ));
                        }
                        #[allow(unused_mut, unused_variables)]
                        let mut it = operands.iter().copied();
                        Ok(ByteCode::$name {
                            $(
                                $field: define_parse_instruction!(
                                    @parse_operand $kind, it.next().unwrap_or_default(), scope
                                )?,
                            )*
                        })
                    }
                )*
                other => Err(format!("invalid instruction name {other}")),
            }
        }
    };

    // ---------- counting ----------
    (@count $( $x:ident ),* ) => {
        <[()]>::len(&[ $( define_parse_instruction!(@unit $x) ),* ])
    };

    (@unit $x:ident) => { () };

    // ---------- parsing ----------
    (@parse_operand Int, $tok:expr, $scope:ident) => { parse_int($tok) };
    (@parse_operand Str, $tok:expr, $scope:ident) => { parse_string($tok) };
    (@parse_operand Bool, $tok:expr, $scope:ident) => { parse_bool($tok) };
    (@parse_operand Var, $tok:expr, $scope:ident) => { $scope.var($tok) };
    (@parse_operand Name, $tok:expr, $scope:ident) => { parse_name($tok) };
    (@parse_operand Count, $tok:expr, $scope:ident) => { parse_count($tok) };
    (@parse_operand Label, $tok:expr, $scope:ident) => { $scope.label($tok) };
}

for_each_instruction!(define_parse_instruction);

/// A function whose body is being collected.
struct PendingFunc<'s> {
    id: BlockId,
    labels: HashMap<String, usize>,
    lines: Vec<(usize, Vec<&'s str>)>,
}

enum Scope<'s> {
    Root,
    Contract(BlockId),
    Func {
        func: PendingFunc<'s>,
        parent: Option<BlockId>,
    },
}

struct Assembler<'v, 's> {
    vm: &'v mut VM,
    scope: Scope<'s>,
    contracts: Vec<String>,
}

impl<'s> Assembler<'_, 's> {
    fn line(&mut self, line_no: usize, tokens: Vec<&'s str>) -> Result<(), VMError> {
        let err = |message: String| asm_error(line_no, message);
        let directive = tokens[0];
        let args = &tokens[1..];

        if let Scope::Func { func, .. } = &mut self.scope {
            match directive {
                "end" => return self.close_func(),
                "var" => {
                    let [name, ty] = args else {
                        return Err(err("expected: var <name> <type>".into()));
                    };
                    let ty = parse_type(ty).map_err(err)?;
                    self.vm.define_variable(func.id, name, ty);
                }
                _ if is_label_def(directive) => {
                    let label = directive.trim_end_matches(LABEL_SUFFIX).to_string();
                    if func.labels.insert(label.clone(), func.lines.len()).is_some() {
                        return Err(err(format!("duplicate label {label}")));
                    }
                    if !args.is_empty() {
                        func.lines.push((line_no, args.to_vec()));
                    }
                }
                _ => func.lines.push((line_no, tokens)),
            }
            return Ok(());
        }

        let contract = match self.scope {
            Scope::Contract(id) => Some(id),
            _ => None,
        };
        match (directive, contract) {
            ("contract", None) => {
                let (name, flags) = args
                    .split_first()
                    .ok_or_else(|| err("expected: contract <name> [inactive]".into()))?;
                if self.vm.root().objects.contains_key(*name) {
                    return Err(err(format!("{name} is already defined")));
                }
                let id = self.vm.define_contract(name, Vec::new());
                match flags {
                    [] => {}
                    ["inactive"] => self.vm.set_active(id, false),
                    _ => return Err(err(format!("unexpected {}", flags.join(" ")))),
                }
                self.contracts.push(name.to_string());
                self.scope = Scope::Contract(id);
            }
            ("tx", Some(id)) => {
                let [name, ty, tags @ ..] = args else {
                    return Err(err("expected: tx <name> <type> [tags]".into()));
                };
                let field = FieldInfo::new(name, parse_type(ty).map_err(err)?).with_tags(&tags.join(" "));
                self.vm.add_field(id, field);
            }
            ("uses", Some(id)) => {
                if args.is_empty() {
                    return Err(err("expected: uses <contract>...".into()));
                }
                for name in args {
                    self.vm.add_used(id, name);
                }
            }
            ("table", Some(id)) => {
                let [table] = args else {
                    return Err(err("expected: table <id>".into()));
                };
                let table = parse_int(table).map_err(err)?;
                self.vm.set_table_id(id, table);
            }
            ("extend", _) => {
                let owner = contract.unwrap_or(BlockId::ROOT);
                for name in args {
                    self.vm.define_extend(owner, name);
                }
            }
            ("func", _) => self.open_func(args).map_err(err)?,
            ("end", Some(_)) => self.scope = Scope::Root,
            (other, _) => return Err(err(format!("unexpected {other} here"))),
        }
        Ok(())
    }

    /// `func <name> [param:type]... [-> type...]`
    fn open_func(&mut self, args: &[&'s str]) -> Result<(), String> {
        let (name, rest) = args
            .split_first()
            .ok_or_else(|| "expected: func <name> [param:type]... [-> type...]".to_string())?;
        let (params, results) = match rest.iter().position(|t| *t == RESULTS_ARROW) {
            Some(at) => (&rest[..at], &rest[at + 1..]),
            None => (rest, &[][..]),
        };

        let mut names = Vec::with_capacity(params.len());
        let mut types = Vec::with_capacity(params.len());
        for param in params {
            let (pname, ty) = param
                .split_once(':')
                .ok_or_else(|| format!("expected <name>:<type>, got {param}"))?;
            names.push(pname);
            types.push(parse_type(ty)?);
        }
        let results = results.iter().map(|t| parse_type(t)).collect::<Result<Vec<_>, _>>()?;

        let enclosing = match self.scope {
            Scope::Contract(id) => Some(id),
            _ => None,
        };
        let parent = enclosing.unwrap_or(BlockId::ROOT);
        if self.vm.block(parent).objects.contains_key(*name) {
            return Err(format!("{name} is already defined"));
        }
        let id = self.vm.define_function(
            parent,
            FuncInfo {
                name: name.to_string(),
                params: types,
                results,
                variadic: false,
            },
        );
        for (index, pname) in names.into_iter().enumerate() {
            self.vm.name_variable(id, pname, index);
        }

        self.scope = Scope::Func {
            func: PendingFunc {
                id,
                labels: HashMap::new(),
                lines: Vec::new(),
            },
            parent: enclosing,
        };
        Ok(())
    }

    /// Parses the collected body once every label is known.
    fn close_func(&mut self) -> Result<(), VMError> {
        let Scope::Func { func, parent } = std::mem::replace(&mut self.scope, Scope::Root) else {
            return Ok(());
        };
        let code = {
            let scope = FuncScope {
                vm: &*self.vm,
                func: func.id,
                labels: &func.labels,
            };
            func.lines
                .iter()
                .map(|(line_no, tokens)| {
                    parse_instruction(&scope, tokens[0], &tokens[1..]).map_err(|m| asm_error(*line_no, m))
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        self.vm.set_code(func.id, code);
        self.scope = match parent {
            Some(id) => Scope::Contract(id),
            None => Scope::Root,
        };
        Ok(())
    }
}

/// Assembles `source` into `vm` and returns the names of the contracts it
/// defines.
pub fn assemble_source(vm: &mut VM, source: &str) -> Result<Vec<String>, VMError> {
    let mut asm = Assembler {
        vm,
        scope: Scope::Root,
        contracts: Vec::new(),
    };
    let mut last_line = 0;
    for (index, line) in source.lines().enumerate() {
        last_line = index + 1;
        let tokens = tokenize(last_line, line)?;
        if !tokens.is_empty() {
            asm.line(last_line, tokens)?;
        }
    }
    match asm.scope {
        Scope::Root => Ok(asm.contracts),
        _ => Err(asm_error(last_line, "missing end")),
    }
}

/// Convenience: assemble directly from file path
pub fn assemble_file<P: AsRef<Path>>(vm: &mut VM, path: P) -> Result<Vec<String>, VMError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|e| VMError::IoError(format!("{}: {e}", path.display())))?;
    assemble_source(vm, &source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::object::ObjectKind;

    fn function_code(vm: &VM, name: &str) -> Vec<ByteCode> {
        let id = vm.resolve(name).and_then(Object::block).unwrap();
        vm.block(id).code.clone()
    }

    #[test]
    fn tokenize_splits_operands_and_strips_comments() {
        assert_eq!(tokenize(1, "CALL len, 1 # note").unwrap(), vec!["CALL", "len", "1"]);
        assert_eq!(
            tokenize(1, r#"PUSH_STR "a, b # c""#).unwrap(),
            vec!["PUSH_STR", r#""a, b # c""#]
        );
        assert_eq!(tokenize(1, r#"PUSH_STR "say \"hi\"""#).unwrap().len(), 2);
        assert!(matches!(
            tokenize(3, r#"PUSH_STR "open"#),
            Err(VMError::AssemblyError { line: 3, .. })
        ));
    }

    #[test]
    fn string_literals_unescape() {
        assert_eq!(parse_string(r#""a\"b\\c\n""#).unwrap(), "a\"b\\c\n");
        assert!(parse_string("plain").is_err());
        assert!(parse_string(r#""bad\q""#).is_err());
    }

    #[test]
    fn assemble_contract_with_fields_and_stages() {
        let mut vm = VM::new();
        let source = r#"
            # transfer contract
            contract @1Transfer
                tx Recipient str
                tx Amount int optional
                uses @1Audit
                table 7
                func action
                    LOAD_EXTEND Amount
                    SET_EXTEND last
                end
            end
            contract @1Audit inactive
            end
        "#;
        let names = assemble_source(&mut vm, source).unwrap();
        assert_eq!(names, vec!["@1Transfer", "@1Audit"]);

        let id = vm.resolve("@1Transfer").and_then(Object::block).unwrap();
        let meta = vm.block(id).contract().unwrap();
        assert!(meta.active);
        assert_eq!(meta.table_id, Some(7));
        assert_eq!(meta.tx.len(), 2);
        assert_eq!(meta.tx[1].ty, ValueType::Int);
        assert_eq!(meta.tx[1].tags, "optional");
        assert!(meta.used.contains("@1Audit"));

        let audit = vm.resolve("@1Audit").and_then(Object::block).unwrap();
        assert!(!vm.block(audit).contract().unwrap().active);
        assert_eq!(
            function_code(&vm, "@1Transfer.action"),
            vec![
                ByteCode::LoadExtend {
                    name: "Amount".into()
                },
                ByteCode::SetExtend { name: "last".into() },
            ]
        );
    }

    #[test]
    fn assemble_function_with_params_variables_and_labels() {
        let mut vm = VM::new();
        let source = r#"
            func pick flag:bool n:int -> int
                var out int
                LOAD_VAR flag
                JUMP_IF_FALSE other
                LOAD_VAR n
                SET_VAR out
                JUMP done
            other: PUSH_INT -1
                SET_VAR 2
            done:
                LOAD_VAR out
                RET 1
            end
        "#;
        assemble_source(&mut vm, source).unwrap();
        let id = vm.resolve("pick").and_then(Object::block).unwrap();
        let block = vm.block(id);
        assert_eq!(block.vars, vec![ValueType::Bool, ValueType::Int, ValueType::Int]);
        assert_eq!(block.function().unwrap().results, vec![ValueType::Int]);
        assert_eq!(vm.resolve("pick.n").map(Object::kind), Some(ObjectKind::Variable));

        let code = &block.code;
        assert_eq!(code[1], ByteCode::JumpIfFalse { target: 5 });
        assert_eq!(code[4], ByteCode::Jump { target: 7 });
        assert_eq!(code[5], ByteCode::PushInt { value: -1 });
        assert_eq!(code[6], ByteCode::SetVar { index: 2 });
        assert_eq!(code[3], ByteCode::SetVar { index: 2 });
    }

    #[test]
    fn assembly_errors_carry_line_numbers() {
        let cases = [
            ("func f\n  FROB\nend", 2),
            ("func f\n  PUSH_INT\nend", 2),
            ("func f\n  JUMP nowhere\nend", 2),
            ("func f\n  LOAD_VAR missing\nend", 2),
            ("contract @1A\n  tx Amount float\nend", 2),
            ("tx Amount int", 1),
            ("contract @1A\nend\ncontract @1A\nend", 3),
            ("func f\n  PUSH_NIL", 2),
        ];
        for (source, line) in cases {
            let mut vm = VM::new();
            match assemble_source(&mut vm, source) {
                Err(VMError::AssemblyError { line: got, .. }) => assert_eq!(got, line, "{source}"),
                other => panic!("{source}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn diagnostic_points_at_line() {
        let source = "func f\n  FROB\nend";
        let err = assemble_source(&mut VM::new(), source).unwrap_err();
        let diag = render_diagnostic("test.asm", source, &err);
        assert!(diag.contains("test.asm:2"));
        assert!(diag.contains("FROB"));
    }
}
