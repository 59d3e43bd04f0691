//! Core virtual machine: the program arena, registration and dispatch.
//!
//! A [`VM`] owns every block of a loaded program. Index 0 is the root scope,
//! which holds contracts and natives; contracts hold their lifecycle
//! functions. The VM is immutable while contracts run, so any number of
//! invocations may share it.

use crate::config::{NonCallablePolicy, VmConfig};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::executor;
use crate::virtual_machine::isa::ByteCode;
use crate::virtual_machine::names::state_name;
use crate::virtual_machine::native::{ExtendData, Extension, NativeFunction};
use crate::virtual_machine::object::{
    Block, BlockId, BlockInfo, ContractMeta, FieldInfo, FuncInfo, Object, VarInfo,
};
use crate::virtual_machine::extend::Extend;
use crate::virtual_machine::runtime::RunTime;
use crate::virtual_machine::stdlib;
use crate::virtual_machine::value::{Value, ValueType};
use crate::warn;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Host hook pricing natives by name. Negative means "use the default".
pub type ExtCost = Arc<dyn Fn(&str) -> i64 + Send + Sync>;

pub struct VM {
    blocks: Vec<Block>,
    ext_cost: Option<ExtCost>,
    config: VmConfig,
    next_contract_id: u32,
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

impl VM {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    /// Creates a VM with the standard natives registered.
    pub fn with_config(config: VmConfig) -> Self {
        let mut vm = Self {
            blocks: vec![Block::default()],
            ext_cost: None,
            config,
            next_contract_id: 1,
        };
        for native in stdlib::natives() {
            vm.register(native);
        }
        vm
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub fn root(&self) -> &Block {
        self.block(BlockId::ROOT)
    }

    fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0]
    }

    pub fn set_ext_cost(&mut self, cost: impl Fn(&str) -> i64 + Send + Sync + 'static) {
        self.ext_cost = Some(Arc::new(cost));
    }

    /// Cost of calling `native`, as priced by the host hook if any.
    pub fn native_cost(&self, native: &NativeFunction) -> i64 {
        match &self.ext_cost {
            Some(price) => {
                let cost = price(&native.name);
                if cost >= 0 { cost } else { native.cost }
            }
            None => native.cost,
        }
    }

    // =========================
    // Registration
    // =========================

    /// Registers a batch of natives in the root scope.
    ///
    /// Entries that are not functions are skipped with a warning or rejected,
    /// depending on [`VmConfig::non_callable`]; a rejected batch registers
    /// nothing.
    pub fn extend(&mut self, data: ExtendData) -> Result<(), VMError> {
        if self.config.non_callable == NonCallablePolicy::Reject {
            if let Some((name, _)) = data
                .objects
                .iter()
                .find(|(_, entry)| matches!(entry, Extension::Value(_)))
            {
                return Err(VMError::NotCallable(name.clone()));
            }
        }
        for (name, entry) in data.objects {
            match entry {
                Extension::Func(mut native) => {
                    native.name = name;
                    self.register(native);
                }
                Extension::Value(_) => warn!("{name} is not a function, skipping registration"),
            }
        }
        Ok(())
    }

    /// Registers one native under its name, replacing any previous one.
    pub fn register(&mut self, native: NativeFunction) {
        self.block_mut(BlockId::ROOT)
            .objects
            .insert(native.name.clone(), Object::Native(native));
    }

    fn push_block(&mut self, parent: BlockId, name: &str, block: Block, object: fn(BlockId) -> Object) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(block);
        let scope = self.block_mut(parent);
        scope.children.push(id);
        scope.objects.insert(name.to_string(), object(id));
        id
    }

    /// Adds an active contract to the root scope.
    pub fn define_contract(&mut self, name: &str, tx: Vec<FieldInfo>) -> BlockId {
        let meta = ContractMeta {
            id: self.next_contract_id,
            name: name.to_string(),
            active: true,
            table_id: None,
            used: BTreeSet::new(),
            tx,
        };
        self.next_contract_id += 1;
        let block = Block {
            info: BlockInfo::Contract(meta),
            parent: Some(BlockId::ROOT),
            ..Block::default()
        };
        self.push_block(BlockId::ROOT, name, block, Object::Contract)
    }

    fn contract_mut(&mut self, contract: BlockId) -> Option<&mut ContractMeta> {
        match &mut self.block_mut(contract).info {
            BlockInfo::Contract(meta) => Some(meta),
            _ => None,
        }
    }

    pub fn set_active(&mut self, contract: BlockId, active: bool) {
        if let Some(meta) = self.contract_mut(contract) {
            meta.active = active;
        }
    }

    pub fn set_table_id(&mut self, contract: BlockId, table_id: i64) {
        if let Some(meta) = self.contract_mut(contract) {
            meta.table_id = Some(table_id);
        }
    }

    /// Declares a transaction field of `contract`.
    pub fn add_field(&mut self, contract: BlockId, field: FieldInfo) {
        if let Some(meta) = self.contract_mut(contract) {
            meta.tx.push(field);
        }
    }

    /// Records that `contract` calls the contract `name`.
    pub fn add_used(&mut self, contract: BlockId, name: &str) {
        if let Some(meta) = self.contract_mut(contract) {
            meta.used.insert(name.to_string());
        }
    }

    /// Adds a function to `parent`; its parameters are its first variables.
    pub fn define_function(&mut self, parent: BlockId, info: FuncInfo) -> BlockId {
        let name = info.name.clone();
        let block = Block {
            vars: info.params.clone(),
            info: BlockInfo::Function(info),
            parent: Some(parent),
            ..Block::default()
        };
        self.push_block(parent, &name, block, Object::Function)
    }

    /// Names the variable at `index` of `owner`.
    pub fn name_variable(&mut self, owner: BlockId, name: &str, index: usize) {
        let ty = self.block(owner).vars.get(index).copied().unwrap_or(ValueType::Any);
        self.block_mut(owner)
            .objects
            .insert(name.to_string(), Object::Variable(VarInfo { index, ty, owner }));
    }

    /// Adds a local variable to `owner` and returns its index.
    pub fn define_variable(&mut self, owner: BlockId, name: &str, ty: ValueType) -> usize {
        let index = self.block(owner).vars.len();
        self.block_mut(owner).vars.push(ty);
        self.name_variable(owner, name, index);
        index
    }

    /// Declares the environment variable `$name` in `owner`'s scope.
    pub fn define_extend(&mut self, owner: BlockId, name: &str) {
        self.block_mut(owner)
            .objects
            .insert(name.to_string(), Object::Extend(name.to_string()));
    }

    pub fn set_code(&mut self, func: BlockId, code: Vec<ByteCode>) {
        self.block_mut(func).code = code;
    }

    // =========================
    // Resolution
    // =========================

    /// Resolves a dotted name from the root scope.
    ///
    /// Every segment but the last must name a contract or function.
    pub fn resolve(&self, name: &str) -> Option<&Object> {
        let mut scope = BlockId::ROOT;
        let mut segments = name.split('.').peekable();
        while let Some(segment) = segments.next() {
            let object = self.block(scope).objects.get(segment)?;
            if segments.peek().is_none() {
                return Some(object);
            }
            scope = object.block()?;
        }
        None
    }

    /// Resolves `name`, then its state-qualified form.
    pub fn resolve_in_state(&self, name: &str, state: u32) -> Option<&Object> {
        self.resolve(name)
            .or_else(|| self.resolve(&state_name(state, name)))
    }

    /// Looks `name` up from `scope` outwards, then from the root.
    pub fn lookup(&self, scope: BlockId, name: &str, state: Option<u32>) -> Option<&Object> {
        if !name.contains('.') {
            let mut current = Some(scope);
            while let Some(id) = current {
                let block = self.block(id);
                if let Some(object) = block.objects.get(name) {
                    return Some(object);
                }
                current = block.parent;
            }
        }
        match state {
            Some(state) => self.resolve_in_state(name, state),
            None => self.resolve(name),
        }
    }

    /// Every contract `name` may call, directly or not.
    pub fn dependencies(&self, name: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut pending = vec![name.to_string()];
        while let Some(current) = pending.pop() {
            let Some(meta) = self
                .resolve(&current)
                .and_then(Object::block)
                .and_then(|id| self.block(id).contract())
            else {
                continue;
            };
            for used in &meta.used {
                if found.insert(used.clone()) {
                    pending.push(used.clone());
                }
            }
        }
        found
    }

    // =========================
    // Execution
    // =========================

    /// Calls a function or native by name with the default cost ceiling.
    pub fn call(&self, name: &str, params: Vec<Value>, extend: &mut Extend) -> Result<Vec<Value>, VMError> {
        let object = self
            .lookup(BlockId::ROOT, name, extend.state)
            .ok_or_else(|| VMError::UnknownFunction(name.to_string()))?;
        let mut rt = self.run_init(self.config.cost_default, extend);
        rt.invoke(name, object, params)
    }

    /// Creates an execution context with the given budget.
    pub fn run_init<'a>(&'a self, cost: i64, extend: &'a mut Extend) -> RunTime<'a> {
        RunTime::new(self, cost, extend)
    }

    /// Runs a contract with the default ceiling and returns the unused budget.
    ///
    /// `names` is the comma-separated list of parameter names matching
    /// `values`. A bare contract name is qualified with the environment's
    /// state when it is not defined as is.
    pub fn run_contract(
        &self,
        extend: &mut Extend,
        name: &str,
        names: &str,
        values: Vec<Value>,
    ) -> Result<i64, VMError> {
        let name = match extend.state {
            Some(state) if !self.root().objects.contains_key(name) => state_name(state, name),
            _ => name.to_string(),
        };
        let mut rt = self.run_init(self.config.cost_default, extend);
        executor::exec_contract(&mut rt, &name, names, values)?;
        Ok(rt.cost())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::object::ObjectKind;

    fn add(a: i64, b: i64) -> i64 {
        a + b
    }

    fn vm_with_contracts() -> VM {
        let mut vm = VM::new();
        let a = vm.define_contract("@1A", vec![]);
        let b = vm.define_contract("@1B", vec![]);
        vm.define_contract("@1C", vec![]);
        vm.add_used(a, "@1B");
        vm.add_used(b, "@1C");
        vm.add_used(b, "@1A");
        let action = vm.define_function(
            a,
            FuncInfo {
                name: "action".into(),
                ..FuncInfo::default()
            },
        );
        vm.define_variable(action, "count", ValueType::Int);
        vm
    }

    #[test]
    fn standard_natives_are_registered() {
        let vm = VM::new();
        for name in ["ExecContract", "CallContract", "len", "hash"] {
            assert_eq!(vm.resolve(name).map(Object::kind), Some(ObjectKind::Native));
        }
    }

    #[test]
    fn resolve_walks_dotted_names() {
        let vm = vm_with_contracts();
        assert_eq!(vm.resolve("@1A").map(Object::kind), Some(ObjectKind::Contract));
        assert_eq!(vm.resolve("@1A.action").map(Object::kind), Some(ObjectKind::Function));
        assert_eq!(
            vm.resolve("@1A.action.count").map(Object::kind),
            Some(ObjectKind::Variable)
        );
        assert!(vm.resolve("@1A.missing").is_none());
        assert!(vm.resolve("len.x").is_none());
    }

    #[test]
    fn resolve_in_state_qualifies_names() {
        let vm = vm_with_contracts();
        assert!(vm.resolve("A").is_none());
        assert_eq!(vm.resolve_in_state("A", 1).map(Object::kind), Some(ObjectKind::Contract));
        assert_eq!(vm.resolve_in_state("@A", 7).map(Object::kind), Some(ObjectKind::Contract));
        assert!(vm.resolve_in_state("A", 2).is_none());
    }

    #[test]
    fn dependencies_are_transitive() {
        let vm = vm_with_contracts();
        let deps: Vec<String> = vm.dependencies("@1A").into_iter().collect();
        assert_eq!(deps, vec!["@1A", "@1B", "@1C"]);
        assert!(vm.dependencies("@1C").is_empty());
    }

    #[test]
    fn contract_ids_are_sequential() {
        let vm = vm_with_contracts();
        let id = |name: &str| {
            vm.resolve(name)
                .and_then(Object::block)
                .and_then(|b| vm.block(b).contract())
                .map(|m| m.id)
        };
        assert_eq!(id("@1A"), Some(1));
        assert_eq!(id("@1C"), Some(3));
    }

    #[test]
    fn non_callable_entries_follow_policy() {
        let mut vm = VM::new();
        let data = ExtendData::new().value("limit", 5i64).func("add", add);
        vm.extend(data).unwrap();
        assert!(vm.resolve("limit").is_none());
        assert!(vm.resolve("add").is_some());

        let mut strict = VM::with_config(VmConfig::default().with_non_callable(NonCallablePolicy::Reject));
        let data = ExtendData::new().func("add", add).value("limit", 5i64);
        assert_eq!(strict.extend(data), Err(VMError::NotCallable("limit".into())));
        assert!(strict.resolve("add").is_none());
    }

    #[test]
    fn registration_overwrites_existing_names() {
        let mut vm = VM::new();
        vm.extend(ExtendData::new().func("len", add)).unwrap();
        let Some(Object::Native(native)) = vm.resolve("len") else {
            panic!("len is not a native");
        };
        assert_eq!(native.params.len(), 2);
    }

    #[test]
    fn call_dispatches_natives_with_arity_check() {
        let mut vm = VM::new();
        vm.extend(ExtendData::new().func("add", add)).unwrap();
        let mut extend = Extend::new();
        let out = vm.call("add", vec![Value::Int(2), Value::Int(3)], &mut extend).unwrap();
        assert_eq!(out, vec![Value::Int(5)]);
        assert!(matches!(
            vm.call("add", vec![Value::Int(2)], &mut extend),
            Err(VMError::ArityMismatch { expected: 2, got: 1, .. })
        ));
        assert_eq!(
            vm.call("nope", vec![], &mut extend),
            Err(VMError::UnknownFunction("nope".into()))
        );
    }

    #[test]
    fn ext_cost_hook_prices_natives() {
        let mut vm = VM::new();
        vm.set_ext_cost(|name| if name == "len" { 99 } else { -1 });
        let Some(Object::Native(len)) = vm.resolve("len") else {
            panic!("len is not a native");
        };
        let Some(Object::Native(hash)) = vm.resolve("hash") else {
            panic!("hash is not a native");
        };
        assert_eq!(vm.native_cost(len), 99);
        assert_eq!(vm.native_cost(hash), hash.cost);
    }
}
