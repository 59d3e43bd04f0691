//! Execution context and interpreter loop.
//!
//! A [`RunTime`] is created per top-level call (and per contract stage). It
//! borrows the VM and the shared [`Extend`] environment, tracks the stack of
//! running blocks and debits the cost budget before every instruction.

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::extend::Extend;
use crate::virtual_machine::isa::ByteCode;
use crate::virtual_machine::native::NativeFunction;
use crate::virtual_machine::object::{BlockId, Object};
use crate::virtual_machine::value::{Value, mismatch};
use crate::virtual_machine::vm::VM;
use std::collections::BTreeMap;

pub struct RunTime<'a> {
    vm: &'a VM,
    blocks: Vec<BlockId>,
    cost: i64,
    depth: usize,
    pub extend: &'a mut Extend,
}

impl<'a> RunTime<'a> {
    pub fn new(vm: &'a VM, cost: i64, extend: &'a mut Extend) -> Self {
        Self {
            vm,
            blocks: Vec::new(),
            cost,
            depth: 0,
            extend,
        }
    }

    pub fn vm(&self) -> &'a VM {
        self.vm
    }

    /// Remaining budget.
    pub fn cost(&self) -> i64 {
        self.cost
    }

    /// Blocks currently running, innermost last.
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Debits `amount` from the budget.
    pub fn charge(&mut self, amount: i64) -> Result<(), VMError> {
        self.cost -= amount;
        if self.cost < 0 {
            return Err(VMError::CostExceeded);
        }
        Ok(())
    }

    /// A fresh context sharing this one's budget, environment and call depth.
    ///
    /// The child's residual budget must be copied back with
    /// [`RunTime::absorb`].
    pub fn child(&mut self) -> RunTime<'_> {
        RunTime {
            vm: self.vm,
            blocks: Vec::new(),
            cost: self.cost,
            depth: self.depth,
            extend: &mut *self.extend,
        }
    }

    /// Takes over the residual budget of a child context.
    pub fn absorb(&mut self, cost: i64) {
        self.cost = cost;
    }

    /// Runs the code of `block` with `params` as its first variables.
    pub fn run(&mut self, block: BlockId, params: Vec<Value>) -> Result<Vec<Value>, VMError> {
        let limit = self.vm.config().max_call_depth;
        if self.depth >= limit {
            return Err(VMError::CallDepthExceeded(limit));
        }
        let mut vars = params;
        let declared = self.vm.block(block).vars.len();
        if vars.len() < declared {
            vars.resize(declared, Value::Nil);
        }

        self.blocks.push(block);
        self.depth += 1;
        let result = self.exec(block, vars);
        self.depth -= 1;
        self.blocks.pop();
        result
    }

    /// Calls a resolved object with caller-supplied arguments.
    pub fn invoke(&mut self, name: &str, object: &Object, args: Vec<Value>) -> Result<Vec<Value>, VMError> {
        match object {
            Object::Function(id) => {
                let expected = self
                    .vm
                    .block(*id)
                    .function()
                    .map(|info| info.params.len())
                    .unwrap_or(0);
                if args.len() != expected {
                    return Err(VMError::ArityMismatch {
                        name: name.to_string(),
                        expected,
                        got: args.len(),
                    });
                }
                self.charge(self.vm.config().cost_call)?;
                self.run(*id, args)
            }
            Object::Native(native) => self.call_native(native, args),
            _ => Err(VMError::NotCallable(name.to_string())),
        }
    }

    /// Checks arity, debits the native's cost and calls it.
    pub fn call_native(&mut self, native: &NativeFunction, args: Vec<Value>) -> Result<Vec<Value>, VMError> {
        native.check_arity(args.len())?;
        self.charge(self.vm.native_cost(native))?;
        (native.func)(self, args)
    }

    fn exec(&mut self, block: BlockId, mut vars: Vec<Value>) -> Result<Vec<Value>, VMError> {
        let vm = self.vm;
        let code = &vm.block(block).code;
        let mut stack = Stack::default();
        let mut pc = 0;

        while let Some(instr) = code.get(pc) {
            pc += 1;
            self.charge(instr.cost())?;
            match instr {
                ByteCode::PushInt { value } => stack.push(Value::Int(*value)),
                ByteCode::PushStr { value } => stack.push(Value::Str(value.clone())),
                ByteCode::PushBool { value } => stack.push(Value::Bool(*value)),
                ByteCode::PushNil {} => stack.push(Value::Nil),
                ByteCode::LoadVar { index } => {
                    let value = vars.get(*index).ok_or(VMError::InvalidVariable(*index))?;
                    stack.push(value.clone());
                }
                ByteCode::SetVar { index } => {
                    let value = stack.pop("SET_VAR")?;
                    let slot = vars.get_mut(*index).ok_or(VMError::InvalidVariable(*index))?;
                    *slot = value;
                }
                ByteCode::LoadExtend { name } => {
                    let value = self
                        .extend
                        .get(name)
                        .cloned()
                        .ok_or_else(|| VMError::UndefinedExtend(name.clone()))?;
                    stack.push(value);
                }
                ByteCode::SetExtend { name } => {
                    let value = stack.pop("SET_EXTEND")?;
                    self.extend.set(name, value);
                }
                ByteCode::Pop {} => {
                    stack.pop("POP")?;
                }
                ByteCode::MakeMap { count } => op_make_map(&mut stack, *count)?,
                ByteCode::Add {} => op_add(&mut stack)?,
                ByteCode::Sub {} => op_arith(&mut stack, "SUB", i64::checked_sub)?,
                ByteCode::Mul {} => op_arith(&mut stack, "MUL", i64::checked_mul)?,
                ByteCode::Div {} => op_div(&mut stack, "DIV", i64::checked_div)?,
                ByteCode::Mod {} => op_div(&mut stack, "MOD", i64::checked_rem)?,
                ByteCode::Neg {} => {
                    let v = stack.pop("NEG")?.as_int()?;
                    stack.push(Value::Int(v.checked_neg().ok_or(VMError::Overflow)?));
                }
                ByteCode::Eq {} => {
                    let (a, b) = stack.pop2("EQ")?;
                    stack.push(Value::Bool(a == b));
                }
                ByteCode::NotEq {} => {
                    let (a, b) = stack.pop2("NE")?;
                    stack.push(Value::Bool(a != b));
                }
                ByteCode::Lt {} => op_compare(&mut stack, "LT", |o| o.is_lt())?,
                ByteCode::Le {} => op_compare(&mut stack, "LE", |o| o.is_le())?,
                ByteCode::Gt {} => op_compare(&mut stack, "GT", |o| o.is_gt())?,
                ByteCode::Ge {} => op_compare(&mut stack, "GE", |o| o.is_ge())?,
                ByteCode::Not {} => {
                    let v = stack.pop("NOT")?.as_bool()?;
                    stack.push(Value::Bool(!v));
                }
                ByteCode::And {} => {
                    let (a, b) = stack.pop2("AND")?;
                    stack.push(Value::Bool(a.as_bool()? && b.as_bool()?));
                }
                ByteCode::Or {} => {
                    let (a, b) = stack.pop2("OR")?;
                    stack.push(Value::Bool(a.as_bool()? || b.as_bool()?));
                }
                ByteCode::Jump { target } => pc = jump(*target, code.len())?,
                ByteCode::JumpIfFalse { target } => {
                    if !stack.pop("JUMP_IF_FALSE")?.as_bool()? {
                        pc = jump(*target, code.len())?;
                    }
                }
                ByteCode::Call { name, argc } => {
                    let args = stack.take(*argc, "CALL")?;
                    let object = vm
                        .lookup(block, name, self.extend.state)
                        .ok_or_else(|| VMError::UnknownFunction(name.clone()))?;
                    for value in self.invoke(name, object, args)? {
                        stack.push(value);
                    }
                }
                ByteCode::Return { count } => return stack.take(*count, "RET"),
                ByteCode::Raise {} => return Err(VMError::Raised(stack.pop("RAISE")?.to_text())),
            }
        }
        Ok(Vec::new())
    }
}

fn jump(target: usize, len: usize) -> Result<usize, VMError> {
    if target > len {
        return Err(VMError::InvalidJump(target));
    }
    Ok(target)
}

/// Operand stack of one frame.
#[derive(Default)]
struct Stack {
    values: Vec<Value>,
}

impl Stack {
    fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    fn pop(&mut self, instr: &'static str) -> Result<Value, VMError> {
        self.values.pop().ok_or(VMError::StackUnderflow(instr))
    }

    /// Pops the right operand, then the left one.
    fn pop2(&mut self, instr: &'static str) -> Result<(Value, Value), VMError> {
        let b = self.pop(instr)?;
        let a = self.pop(instr)?;
        Ok((a, b))
    }

    /// Removes the top `count` values, keeping their order.
    fn take(&mut self, count: usize, instr: &'static str) -> Result<Vec<Value>, VMError> {
        let at = self
            .values
            .len()
            .checked_sub(count)
            .ok_or(VMError::StackUnderflow(instr))?;
        Ok(self.values.split_off(at))
    }
}

/// Left operand decides the expected type when it is a valid one.
fn operand_mismatch(a: &Value, b: &Value) -> VMError {
    match a {
        Value::Int(_) | Value::Str(_) | Value::Bytes(_) => mismatch(a.type_name(), b),
        _ => mismatch("int", a),
    }
}

fn op_add(stack: &mut Stack) -> Result<(), VMError> {
    let result = match stack.pop2("ADD")? {
        (Value::Int(a), Value::Int(b)) => Value::Int(a.checked_add(b).ok_or(VMError::Overflow)?),
        (Value::Str(a), Value::Str(b)) => Value::Str(a + &b),
        (Value::Bytes(mut a), Value::Bytes(b)) => {
            a.extend(b);
            Value::Bytes(a)
        }
        (a, b) => return Err(operand_mismatch(&a, &b)),
    };
    stack.push(result);
    Ok(())
}

fn op_arith(stack: &mut Stack, instr: &'static str, op: fn(i64, i64) -> Option<i64>) -> Result<(), VMError> {
    let (a, b) = stack.pop2(instr)?;
    let v = op(a.as_int()?, b.as_int()?).ok_or(VMError::Overflow)?;
    stack.push(Value::Int(v));
    Ok(())
}

fn op_div(stack: &mut Stack, instr: &'static str, op: fn(i64, i64) -> Option<i64>) -> Result<(), VMError> {
    let (a, b) = stack.pop2(instr)?;
    let (a, b) = (a.as_int()?, b.as_int()?);
    if b == 0 {
        return Err(VMError::DivisionByZero);
    }
    stack.push(Value::Int(op(a, b).ok_or(VMError::Overflow)?));
    Ok(())
}

fn op_compare(
    stack: &mut Stack,
    instr: &'static str,
    test: fn(std::cmp::Ordering) -> bool,
) -> Result<(), VMError> {
    let ordering = match stack.pop2(instr)? {
        (Value::Int(a), Value::Int(b)) => a.cmp(&b),
        (Value::Str(a), Value::Str(b)) => a.cmp(&b),
        (a, b) => return Err(operand_mismatch(&a, &b)),
    };
    stack.push(Value::Bool(test(ordering)));
    Ok(())
}

/// Pops `count` key/value pairs, pushed key first.
fn op_make_map(stack: &mut Stack, count: usize) -> Result<(), VMError> {
    let items = stack.take(count.saturating_mul(2), "MAKE_MAP")?;
    let mut map = BTreeMap::new();
    let mut items = items.into_iter();
    while let (Some(key), Some(value)) = (items.next(), items.next()) {
        let Value::Str(key) = key else {
            return Err(mismatch("str", &key));
        };
        map.insert(key, value);
    }
    stack.push(Value::Map(map));
    Ok(())
}
