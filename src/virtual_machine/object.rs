//! Scope tree of a loaded program.
//!
//! Every contract and function is a [`Block`] stored in the VM's arena and
//! addressed by [`BlockId`]. Blocks name their children through an object
//! table; each entry is an [`Object`] whose variant carries its payload, so
//! an object's kind always matches what it holds.

use crate::virtual_machine::isa::ByteCode;
use crate::virtual_machine::native::NativeFunction;
use crate::virtual_machine::value::ValueType;
use std::collections::{BTreeSet, HashMap};

/// Index of a block in the VM arena. Index 0 is the root scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

impl BlockId {
    pub const ROOT: BlockId = BlockId(0);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Contract,
    Function,
    Native,
    Variable,
    Extend,
}

/// A named entry of a scope.
#[derive(Clone, Debug)]
pub enum Object {
    Contract(BlockId),
    Function(BlockId),
    Native(NativeFunction),
    Variable(VarInfo),
    /// Reference to an environment variable of the given name.
    Extend(String),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Contract(_) => ObjectKind::Contract,
            Object::Function(_) => ObjectKind::Function,
            Object::Native(_) => ObjectKind::Native,
            Object::Variable(_) => ObjectKind::Variable,
            Object::Extend(_) => ObjectKind::Extend,
        }
    }

    /// Block of a contract or function.
    pub fn block(&self) -> Option<BlockId> {
        match self {
            Object::Contract(id) | Object::Function(id) => Some(*id),
            _ => None,
        }
    }
}

/// A declared transaction field of a contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub ty: ValueType,
    pub tags: String,
}

impl FieldInfo {
    pub fn new(name: &str, ty: ValueType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            tags: String::new(),
        }
    }

    pub fn with_tags(mut self, tags: &str) -> Self {
        self.tags = tags.to_string();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractMeta {
    pub id: u32,
    pub name: String,
    pub active: bool,
    pub table_id: Option<i64>,
    /// Contracts this one calls.
    pub used: BTreeSet<String>,
    pub tx: Vec<FieldInfo>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FuncInfo {
    pub name: String,
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
    pub variadic: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VarInfo {
    pub index: usize,
    pub ty: ValueType,
    pub owner: BlockId,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum BlockInfo {
    #[default]
    None,
    Contract(ContractMeta),
    Function(FuncInfo),
}

#[derive(Clone, Debug, Default)]
pub struct Block {
    pub objects: HashMap<String, Object>,
    pub info: BlockInfo,
    /// Enclosing scope, used for name lookup only.
    pub parent: Option<BlockId>,
    pub vars: Vec<ValueType>,
    pub code: Vec<ByteCode>,
    pub children: Vec<BlockId>,
}

impl Block {
    pub fn kind(&self) -> Option<ObjectKind> {
        match self.info {
            BlockInfo::None => None,
            BlockInfo::Contract(_) => Some(ObjectKind::Contract),
            BlockInfo::Function(_) => Some(ObjectKind::Function),
        }
    }

    pub fn contract(&self) -> Option<&ContractMeta> {
        match &self.info {
            BlockInfo::Contract(meta) => Some(meta),
            _ => None,
        }
    }

    pub fn function(&self) -> Option<&FuncInfo> {
        match &self.info {
            BlockInfo::Function(info) => Some(info),
            _ => None,
        }
    }
}
