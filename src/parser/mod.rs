//! Reader for the textual IR format.
//!
//! The grammar is line oriented: module-level declarations (`global`,
//! `extern fn`, `fn`), block labels (`name:`) and one instruction per line.
//! `%name` introduces or references a local value, `@name` a global or
//! function. Forward references (phis, later blocks) resolve through
//! placeholder arena slots patched when the definition arrives.
//!
//! ```text
//! fn @main() -> i64 {
//! entry:
//!   %a = mul i64 3, 4
//!   %b = add i64 %a, 1
//!   return %b
//! }
//! ```

use std::collections::{HashMap, HashSet};

use crate::error::{BasaltError, Result};
use crate::ir::{
    BinaryOp, BlockId, Callee, CmpOp, Function, GlobalInit, GlobalVar, IntrinsicKind, Module,
    Type, UnaryOp, ValueId, ValueKind,
};

/// Parse a complete module from textual IR.
pub fn parse_module(source: &str, name: &str) -> Result<Module> {
    Parser::new(source, name).parse()
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    /// `%name`
    Local(String),
    /// `@name`
    Global(String),
    Num(i64),
    Punct(char),
}

fn err(line: usize, msg: impl Into<String>) -> BasaltError {
    BasaltError::ParseError(format!("line {}: {}", line, msg.into()))
}

fn tokenize(line: &str, lineno: usize) -> Result<Vec<Tok>> {
    let mut toks = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.peek().copied() {
        match c {
            ';' => break,
            c if c.is_whitespace() => {
                chars.next();
            }
            '%' | '@' => {
                let sigil = c;
                chars.next();
                let mut ident = String::new();
                while let Some(c) = chars.peek() {
                    if c.is_alphanumeric() || *c == '_' || *c == '.' {
                        ident.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if ident.is_empty() {
                    return Err(err(lineno, format!("dangling '{}'", sigil)));
                }
                toks.push(if sigil == '%' {
                    Tok::Local(ident)
                } else {
                    Tok::Global(ident)
                });
            }
            '-' | '0'..='9' => {
                let negative = c == '-';
                if negative {
                    chars.next();
                    // `->` of a function header.
                    if chars.peek() == Some(&'>') {
                        chars.next();
                        toks.push(Tok::Punct('>'));
                        continue;
                    }
                }
                let mut digits = String::new();
                while let Some(c) = chars.peek() {
                    if c.is_ascii_digit() {
                        digits.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if digits.is_empty() {
                    return Err(err(lineno, "expected digits after '-'"));
                }
                let mut value: i64 = digits
                    .parse()
                    .map_err(|_| err(lineno, format!("integer literal '{}' out of range", digits)))?;
                if negative {
                    value = -value;
                }
                toks.push(Tok::Num(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(c) = chars.peek() {
                    if c.is_alphanumeric() || *c == '_' || *c == '.' {
                        ident.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                toks.push(Tok::Ident(ident));
            }
            '(' | ')' | '[' | ']' | '{' | '}' | ',' | ':' | '=' | '>' => {
                chars.next();
                // `->` arrives as '-' handled above; treat '>' alone.
                toks.push(Tok::Punct(c));
            }
            _ => return Err(err(lineno, format!("unexpected character '{}'", c))),
        }
    }
    Ok(toks)
}

/// Cursor over one line of tokens.
struct Line {
    toks: Vec<Tok>,
    pos: usize,
    no: usize,
}

impl Line {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat_punct(&mut self, c: char) -> Result<()> {
        match self.next() {
            Some(Tok::Punct(p)) if p == c => Ok(()),
            other => Err(err(self.no, format!("expected '{}', found {:?}", c, other))),
        }
    }

    fn eat_ident(&mut self, word: &str) -> Result<()> {
        match self.next() {
            Some(Tok::Ident(w)) if w == word => Ok(()),
            other => Err(err(
                self.no,
                format!("expected '{}', found {:?}", word, other),
            )),
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.next() {
            Some(Tok::Ident(w)) => Ok(w),
            other => Err(err(self.no, format!("expected identifier, found {:?}", other))),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }
}

struct Parser<'a> {
    lines: Vec<(usize, &'a str)>,
    module_name: String,
    /// Names of all declared functions, for resolving `@x` operands.
    fn_names: HashSet<String>,
}

struct BodyState {
    func: Function,
    /// %name -> value
    locals: HashMap<String, ValueId>,
    /// Locals referenced before definition.
    pending: HashSet<String>,
    /// label -> block
    blocks: HashMap<String, BlockId>,
    /// Blocks in label-definition order.
    defined_order: Vec<BlockId>,
    current: Option<BlockId>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, name: &str) -> Self {
        let lines = source
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l))
            .filter(|(_, l)| {
                let t = l.trim();
                !t.is_empty() && !t.starts_with(';')
            })
            .collect();
        Self {
            lines,
            module_name: name.to_string(),
            fn_names: HashSet::new(),
        }
    }

    fn parse(mut self) -> Result<Module> {
        // Pre-scan declarations so operands can tell functions from
        // globals regardless of definition order.
        for (no, raw) in &self.lines {
            let toks = tokenize(raw, *no)?;
            let mut i = 0;
            if matches!(toks.first(), Some(Tok::Ident(w)) if w == "extern") {
                i = 1;
            }
            if matches!(toks.get(i), Some(Tok::Ident(w)) if w == "fn") {
                if let Some(Tok::Global(name)) = toks.get(i + 1) {
                    self.fn_names.insert(name.clone());
                }
            }
        }

        let mut module = Module::new(self.module_name.clone());
        let mut idx = 0;
        while idx < self.lines.len() {
            let (no, raw) = self.lines[idx];
            let mut line = Line {
                toks: tokenize(raw, no)?,
                pos: 0,
                no,
            };
            match line.peek() {
                Some(Tok::Ident(w)) if w == "global" => {
                    module.add_global(self.parse_global(&mut line)?);
                    idx += 1;
                }
                Some(Tok::Ident(w)) if w == "extern" => {
                    line.next();
                    let mut func = self.parse_fn_header(&mut line)?;
                    func.attrs.is_extern = true;
                    module.add_function(func);
                    idx += 1;
                }
                Some(Tok::Ident(w)) if w == "fn" => {
                    let consumed = self.parse_fn_body(&mut module, idx)?;
                    idx += consumed;
                }
                other => return Err(err(no, format!("unexpected {:?} at module level", other))),
            }
        }
        Ok(module)
    }

    fn parse_type(&self, line: &mut Line) -> Result<Type> {
        match line.next() {
            Some(Tok::Ident(w)) if w == "void" => Ok(Type::Void),
            Some(Tok::Ident(w)) if w == "ptr" => Ok(Type::Ptr),
            Some(Tok::Ident(w)) if w.starts_with('i') => w[1..]
                .parse::<u32>()
                .map(Type::Integer)
                .map_err(|_| err(line.no, format!("unknown type '{}'", w))),
            Some(Tok::Punct('[')) => {
                let len = match line.next() {
                    Some(Tok::Num(n)) if n >= 0 => n as u64,
                    other => return Err(err(line.no, format!("expected array length, found {:?}", other))),
                };
                line.eat_ident("x")?;
                let elem = self.parse_type(line)?;
                line.eat_punct(']')?;
                Ok(Type::array(elem, len))
            }
            other => Err(err(line.no, format!("expected type, found {:?}", other))),
        }
    }

    fn parse_global(&self, line: &mut Line) -> Result<GlobalVar> {
        line.eat_ident("global")?;
        let name = match line.next() {
            Some(Tok::Global(n)) => n,
            other => return Err(err(line.no, format!("expected @name, found {:?}", other))),
        };
        line.eat_punct(':')?;
        let ty = self.parse_type(line)?;
        let init = if matches!(line.peek(), Some(Tok::Punct('='))) {
            line.next();
            match line.next() {
                Some(Tok::Num(n)) => Some(GlobalInit::Int(n as u64)),
                Some(Tok::Global(f)) if self.fn_names.contains(&f) => {
                    Some(GlobalInit::FuncRef(f))
                }
                other => return Err(err(line.no, format!("bad global initialiser {:?}", other))),
            }
        } else {
            None
        };
        Ok(GlobalVar { name, ty, init })
    }

    /// Parse `fn @name(ty %p, ...) -> ty`, returning the function shell and
    /// the parameter names.
    fn parse_fn_header_named(&self, line: &mut Line) -> Result<(Function, Vec<Option<String>>)> {
        line.eat_ident("fn")?;
        let name = match line.next() {
            Some(Tok::Global(n)) => n,
            other => return Err(err(line.no, format!("expected @name, found {:?}", other))),
        };
        line.eat_punct('(')?;
        let mut param_tys = Vec::new();
        let mut param_names = Vec::new();
        if !matches!(line.peek(), Some(Tok::Punct(')'))) {
            loop {
                param_tys.push(self.parse_type(line)?);
                match line.peek() {
                    Some(Tok::Local(_)) => {
                        if let Some(Tok::Local(n)) = line.next() {
                            param_names.push(Some(n));
                        }
                    }
                    _ => param_names.push(None),
                }
                match line.next() {
                    Some(Tok::Punct(',')) => continue,
                    Some(Tok::Punct(')')) => break,
                    other => {
                        return Err(err(line.no, format!("expected ',' or ')', found {:?}", other)))
                    }
                }
            }
        } else {
            line.eat_punct(')')?;
        }
        // `->`: the '-' lexes as the start of a number, so accept either a
        // bare '>' or a negative-number artefact.
        match line.peek() {
            Some(Tok::Punct('>')) => {
                line.next();
            }
            _ => return Err(err(line.no, "expected '->' after parameter list")),
        }
        let ret = self.parse_type(line)?;
        Ok((Function::new(name, Type::func(ret, param_tys)), param_names))
    }

    fn parse_fn_header(&self, line: &mut Line) -> Result<Function> {
        self.parse_fn_header_named(line).map(|(f, _)| f)
    }

    /// Parse a function with a body; returns how many lines were consumed.
    fn parse_fn_body(&mut self, module: &mut Module, start: usize) -> Result<usize> {
        let (no, raw) = self.lines[start];
        let mut header = Line {
            toks: tokenize(raw, no)?,
            pos: 0,
            no,
        };
        let (func, param_names) = self.parse_fn_header_named(&mut header)?;
        header.eat_punct('{')?;

        let mut state = BodyState {
            locals: HashMap::new(),
            pending: HashSet::new(),
            blocks: HashMap::new(),
            defined_order: Vec::new(),
            current: None,
            func,
        };
        for (i, pname) in param_names.iter().enumerate() {
            if let Some(pname) = pname {
                state.locals.insert(pname.clone(), state.func.params[i]);
            }
        }

        let mut consumed = 1;
        loop {
            let (no, raw) = match self.lines.get(start + consumed) {
                Some(l) => *l,
                None => return Err(err(no, "unterminated function body")),
            };
            consumed += 1;
            let mut line = Line {
                toks: tokenize(raw, no)?,
                pos: 0,
                no,
            };
            match line.peek() {
                Some(Tok::Punct('}')) => break,
                Some(Tok::Ident(_))
                    if line.toks.len() == 2 && line.toks[1] == Tok::Punct(':') =>
                {
                    let label = line.ident()?;
                    let block = ensure_block(&mut state, &label);
                    state.defined_order.push(block);
                    state.current = Some(block);
                }
                _ => self.parse_inst(&mut state, &mut line)?,
            }
        }

        if !state.pending.is_empty() {
            let mut names: Vec<_> = state.pending.iter().cloned().collect();
            names.sort();
            return Err(err(no, format!("undefined locals: %{}", names.join(", %"))));
        }
        if state.defined_order.is_empty() {
            return Err(err(no, "function body has no blocks"));
        }
        for (label, block) in &state.blocks {
            if !state.defined_order.contains(block) {
                return Err(err(no, format!("undefined label '{}'", label)));
            }
        }
        state.func.layout = state.defined_order.clone();
        module.add_function(state.func);
        Ok(consumed)
    }

    /// An operand in instruction position: a local, an integer literal or a
    /// global/function reference.
    fn parse_operand(&self, state: &mut BodyState, line: &mut Line, ty: &Type) -> Result<ValueId> {
        match line.next() {
            Some(Tok::Local(name)) => Ok(use_local(state, &name, ty)),
            Some(Tok::Num(n)) => Ok(state
                .func
                .new_value(ValueKind::Immediate(n as u64), ty.clone())),
            Some(Tok::Global(name)) => {
                let kind = if self.fn_names.contains(&name) {
                    ValueKind::FuncRef(name)
                } else {
                    ValueKind::StaticRef(name)
                };
                Ok(state.func.new_value(kind, Type::Ptr))
            }
            other => Err(err(line.no, format!("expected operand, found {:?}", other))),
        }
    }

    fn parse_inst(&self, state: &mut BodyState, line: &mut Line) -> Result<()> {
        let block = state
            .current
            .ok_or_else(|| err(line.no, "instruction before first block label"))?;

        // `%r = ...` or a void instruction.
        let result = match line.peek() {
            Some(Tok::Local(_)) => match line.next() {
                Some(Tok::Local(n)) => {
                    line.eat_punct('=')?;
                    Some(n)
                }
                _ => unreachable!(),
            },
            _ => None,
        };

        let word = match line.next() {
            Some(Tok::Ident(w)) => w,
            other => return Err(err(line.no, format!("expected instruction, found {:?}", other))),
        };

        let (kind, ty) = self.parse_inst_kind(state, line, &word, result.is_some())?;
        let id = place_inst(state, block, kind, ty);
        if let Some(name) = result {
            if state.locals.contains_key(&name) && !state.pending.remove(&name) {
                return Err(err(line.no, format!("redefinition of %{}", name)));
            }
            define_local(state, &name, id);
        }
        if !line.at_end() {
            return Err(err(line.no, "trailing tokens after instruction"));
        }
        Ok(())
    }

    fn parse_inst_kind(
        &self,
        state: &mut BodyState,
        line: &mut Line,
        word: &str,
        has_result: bool,
    ) -> Result<(ValueKind, Type)> {
        let binop = |w: &str| -> Option<BinaryOp> {
            Some(match w {
                "add" => BinaryOp::Add,
                "sub" => BinaryOp::Sub,
                "mul" => BinaryOp::Mul,
                "div" => BinaryOp::Div,
                "rem" => BinaryOp::Rem,
                "shl" => BinaryOp::Shl,
                "shr" => BinaryOp::Shr,
                "sar" => BinaryOp::Sar,
                "and" => BinaryOp::And,
                "or" => BinaryOp::Or,
                "xor" => BinaryOp::Xor,
                _ => return None,
            })
        };
        let cmpop = |w: &str| -> Option<CmpOp> {
            Some(match w {
                "eq" => CmpOp::Eq,
                "ne" => CmpOp::Ne,
                "lt" => CmpOp::SLt,
                "le" => CmpOp::SLe,
                "gt" => CmpOp::SGt,
                "ge" => CmpOp::SGe,
                "ult" => CmpOp::ULt,
                "ule" => CmpOp::ULe,
                "ugt" => CmpOp::UGt,
                "uge" => CmpOp::UGe,
                _ => return None,
            })
        };
        let castop = |w: &str| -> Option<UnaryOp> {
            Some(match w {
                "neg" => UnaryOp::Neg,
                "not" => UnaryOp::Not,
                "zext" => UnaryOp::ZeroExtend,
                "sext" => UnaryOp::SignExtend,
                "trunc" => UnaryOp::Truncate,
                "bitcast" => UnaryOp::Bitcast,
                _ => return None,
            })
        };

        if let Some(op) = binop(word) {
            let ty = self.parse_type(line)?;
            let lhs = self.parse_operand(state, line, &ty)?;
            line.eat_punct(',')?;
            let rhs = self.parse_operand(state, line, &ty)?;
            return Ok((ValueKind::Binary { op, lhs, rhs }, ty));
        }

        match word {
            // Folded constants print as block-level `const` lines.
            "const" => {
                let ty = self.parse_type(line)?;
                match line.next() {
                    Some(Tok::Num(n)) => Ok((ValueKind::Immediate(n as u64), ty)),
                    other => Err(err(line.no, format!("expected integer, found {:?}", other))),
                }
            }
            "cmp" => {
                let opw = line.ident()?;
                let op = cmpop(&opw)
                    .ok_or_else(|| err(line.no, format!("unknown comparison '{}'", opw)))?;
                let ty = self.parse_type(line)?;
                let lhs = self.parse_operand(state, line, &ty)?;
                line.eat_punct(',')?;
                let rhs = self.parse_operand(state, line, &ty)?;
                Ok((ValueKind::Compare { op, lhs, rhs }, Type::Integer(1)))
            }
            w if castop(w).is_some() => {
                let op = castop(w).unwrap();
                let operand = self.parse_operand(state, line, &Type::Integer(64))?;
                line.eat_ident("to")?;
                let ty = self.parse_type(line)?;
                Ok((ValueKind::Unary { op, operand }, ty))
            }
            "alloca" => {
                let allocated = self.parse_type(line)?;
                Ok((ValueKind::Alloca { allocated }, Type::Ptr))
            }
            "load" => {
                let ty = self.parse_type(line)?;
                line.eat_punct(',')?;
                let ptr = self.parse_operand(state, line, &Type::Ptr)?;
                Ok((ValueKind::Load { ptr }, ty))
            }
            "store" => {
                let ty = self.parse_type(line)?;
                let value = self.parse_operand(state, line, &ty)?;
                line.eat_punct(',')?;
                let ptr = self.parse_operand(state, line, &Type::Ptr)?;
                Ok((ValueKind::Store { value, ptr }, Type::Void))
            }
            "gep" => {
                let elem_ty = self.parse_type(line)?;
                line.eat_punct(',')?;
                let ptr = self.parse_operand(state, line, &Type::Ptr)?;
                line.eat_punct(',')?;
                let index = self.parse_operand(state, line, &Type::Integer(64))?;
                Ok((ValueKind::GetElemPtr { ptr, index, elem_ty }, Type::Ptr))
            }
            "copy" => {
                let value = self.parse_operand(state, line, &Type::Ptr)?;
                let ty = state.func.value(value).ty.clone();
                Ok((ValueKind::Copy { value }, ty))
            }
            "memcpy" => {
                line.eat_punct('(')?;
                let dst = self.parse_operand(state, line, &Type::Ptr)?;
                line.eat_punct(',')?;
                let src = self.parse_operand(state, line, &Type::Ptr)?;
                line.eat_punct(',')?;
                let n = self.parse_operand(state, line, &Type::Integer(64))?;
                line.eat_punct(')')?;
                Ok((
                    ValueKind::Intrinsic {
                        intrinsic: IntrinsicKind::MemCopy,
                        args: vec![dst, src, n],
                    },
                    Type::Void,
                ))
            }
            "tail" | "call" => {
                let tail_call = word == "tail";
                if tail_call {
                    line.eat_ident("call")?;
                }
                let ty = if has_result {
                    self.parse_type(line)?
                } else {
                    Type::Void
                };
                let callee = match line.next() {
                    Some(Tok::Global(n)) => Callee::Direct(n),
                    Some(Tok::Local(n)) => {
                        Callee::Indirect(use_local(state, &n, &Type::Ptr))
                    }
                    other => {
                        return Err(err(line.no, format!("expected callee, found {:?}", other)))
                    }
                };
                line.eat_punct('(')?;
                let mut args = Vec::new();
                if !matches!(line.peek(), Some(Tok::Punct(')'))) {
                    loop {
                        args.push(self.parse_operand(state, line, &Type::Integer(64))?);
                        match line.next() {
                            Some(Tok::Punct(',')) => continue,
                            Some(Tok::Punct(')')) => break,
                            other => {
                                return Err(err(
                                    line.no,
                                    format!("expected ',' or ')', found {:?}", other),
                                ))
                            }
                        }
                    }
                } else {
                    line.eat_punct(')')?;
                }
                Ok((
                    ValueKind::Call {
                        callee,
                        args,
                        tail_call,
                    },
                    ty,
                ))
            }
            "phi" => {
                let ty = self.parse_type(line)?;
                let mut incoming = Vec::new();
                loop {
                    line.eat_punct('[')?;
                    let v = self.parse_operand(state, line, &ty)?;
                    line.eat_punct(',')?;
                    let label = line.ident()?;
                    let block = ensure_block(state, &label);
                    line.eat_punct(']')?;
                    incoming.push((block, v));
                    match line.peek() {
                        Some(Tok::Punct(',')) => {
                            line.next();
                        }
                        _ => break,
                    }
                }
                Ok((ValueKind::Phi { incoming }, ty))
            }
            "branch" => {
                let label = line.ident()?;
                let target = ensure_block(state, &label);
                Ok((ValueKind::Branch { target }, Type::Void))
            }
            "condbranch" => {
                let cond = self.parse_operand(state, line, &Type::Integer(1))?;
                line.eat_punct(',')?;
                let then_label = line.ident()?;
                line.eat_punct(',')?;
                let else_label = line.ident()?;
                let then_block = ensure_block(state, &then_label);
                let else_block = ensure_block(state, &else_label);
                Ok((
                    ValueKind::CondBranch {
                        cond,
                        then_block,
                        else_block,
                    },
                    Type::Void,
                ))
            }
            "return" => {
                if line.at_end() {
                    Ok((ValueKind::Return { value: None }, Type::Void))
                } else {
                    let ret_ty = state.func.return_type().clone();
                    let v = self.parse_operand(state, line, &ret_ty)?;
                    Ok((ValueKind::Return { value: Some(v) }, Type::Void))
                }
            }
            "unreachable" => Ok((ValueKind::Unreachable, Type::Void)),
            other => Err(err(line.no, format!("unknown instruction '{}'", other))),
        }
    }
}

fn ensure_block(state: &mut BodyState, label: &str) -> BlockId {
    if let Some(b) = state.blocks.get(label) {
        return *b;
    }
    let b = state.func.add_block(label);
    state.blocks.insert(label.to_string(), b);
    b
}

/// Reference a local, creating a placeholder slot on forward references.
fn use_local(state: &mut BodyState, name: &str, ty_hint: &Type) -> ValueId {
    if let Some(v) = state.locals.get(name) {
        return *v;
    }
    let placeholder = state.func.new_value(ValueKind::Removed, ty_hint.clone());
    state.locals.insert(name.to_string(), placeholder);
    state.pending.insert(name.to_string());
    placeholder
}

/// Place a freshly parsed instruction in its block. When the result name
/// was forward-referenced, the placeholder slot is filled in instead of
/// allocating a new one.
fn place_inst(
    state: &mut BodyState,
    block: BlockId,
    kind: ValueKind,
    ty: Type,
) -> ValueId {
    state.func.append_inst(block, kind, ty)
}

fn define_local(state: &mut BodyState, name: &str, id: ValueId) {
    if let Some(placeholder) = state.locals.get(name).copied() {
        if placeholder != id {
            // Forward references resolved: move them over to the real
            // definition.
            state.func.replace_uses(placeholder, id);
        }
    }
    state.locals.insert(name.to_string(), id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::verify::verify_module;

    #[test]
    fn test_parse_simple_function() {
        let src = "\
fn @main() -> i64 {
entry:
  %a = mul i64 3, 4
  %b = add i64 %a, 1
  return %b
}
";
        let module = parse_module(src, "t").unwrap();
        verify_module(&module).unwrap();
        let f = module.function("main").unwrap();
        assert_eq!(f.instruction_count(), 3);
    }

    #[test]
    fn test_parse_control_flow_and_phi() {
        let src = "\
fn @f(i64 %n) -> i64 {
entry:
  %z = cmp eq i64 %n, 0
  condbranch %z, base, rec
base:
  branch merge
rec:
  branch merge
merge:
  %r = phi i64 [0, base], [%n, rec]
  return %r
}
";
        let module = parse_module(src, "t").unwrap();
        verify_module(&module).unwrap();
        let f = module.function("f").unwrap();
        assert_eq!(f.layout.len(), 4);
    }

    #[test]
    fn test_parse_calls_and_globals() {
        let src = "\
global @counter: i64 = 0
extern fn @observe(ptr) -> void
fn @main() -> i64 {
entry:
  %v = load i64, @counter
  call @observe(@counter)
  return %v
}
";
        let module = parse_module(src, "t").unwrap();
        verify_module(&module).unwrap();
        assert!(module.globals.contains_key("counter"));
        assert!(module.function("observe").unwrap().attrs.is_extern);
        let f = module.function("main").unwrap();
        // `@counter` in operand position resolves to a static ref, not a
        // function ref.
        let uses_static = f.value_ids().any(|v| {
            matches!(&f.value(v).kind, ValueKind::StaticRef(n) if n == "counter")
        });
        assert!(uses_static);
    }

    #[test]
    fn test_parse_forward_reference_in_phi() {
        let src = "\
fn @f(i64 %n) -> i64 {
entry:
  condbranch %n, more, out
more:
  %next = add i64 %n, -1
  branch out
out:
  %r = phi i64 [%next, more], [%n, entry]
  return %r
}
";
        // %next is used by the phi textually after its block; the phi in
        // `out` references it before... actually here the definition comes
        // first. Exercise the genuinely-forward case instead:
        let fwd = "\
fn @g(i64 %n) -> i64 {
entry:
  branch loop
loop:
  %i = phi i64 [0, entry], [%next, loop]
  %next = add i64 %i, 1
  %done = cmp eq i64 %next, %n
  condbranch %done, exit, loop
exit:
  return %i
}
";
        parse_module(src, "t").unwrap();
        let module = parse_module(fwd, "t").unwrap();
        verify_module(&module).unwrap();
    }

    #[test]
    fn test_undefined_local_rejected() {
        let src = "\
fn @f() -> i64 {
entry:
  return %nope
}
";
        let e = parse_module(src, "t").unwrap_err();
        assert!(e.to_string().contains("undefined locals"));
    }

    #[test]
    fn test_roundtrip_through_printer() {
        let src = "\
fn @f(i64 %x) -> i64 {
entry:
  %a = alloca i64
  store i64 %x, %a
  %y = load i64, %a
  %s = add i64 %y, 1
  return %s
}
";
        let module = parse_module(src, "t").unwrap();
        let printed = format!("{}", module);
        let reparsed = parse_module(&printed, "t").unwrap();
        verify_module(&reparsed).unwrap();
        assert_eq!(
            reparsed.function("f").unwrap().instruction_count(),
            module.function("f").unwrap().instruction_count()
        );
    }
}
