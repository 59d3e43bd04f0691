//! Bridge between Rust functions and contract code.
//!
//! A native is any `Fn` whose parameters implement [`NativeParam`] and whose
//! return type implements [`NativeReturn`]. Its signature is derived from the
//! Rust types through [`IntoNative`], so registration needs no hand-written
//! descriptor. A function taking `&mut RunTime` first receives the execution
//! context; that parameter is filled in by the VM and is not supplied by the
//! caller. A trailing [`Variadic`] parameter collects the remaining values.

use crate::config::COST_EXTEND;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::runtime::RunTime;
use crate::virtual_machine::value::{Value, ValueType, mismatch};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::vec::IntoIter;

/// Marker naming the execution-context parameter when none is configured.
pub const DEFAULT_RUNTIME_MARKER: &str = "rt";

/// Type-erased native entry point. Receives the caller's arguments only.
pub type NativeCallable =
    Arc<dyn Fn(&mut RunTime<'_>, Vec<Value>) -> Result<Vec<Value>, VMError> + Send + Sync>;

/// A parameter type a native can accept.
pub trait NativeParam: Sized {
    const TYPE: ValueType;
    const VARIADIC: bool = false;

    fn take(args: &mut IntoIter<Value>) -> Result<Self, VMError>;
}

/// A return type a native can produce.
pub trait NativeReturn {
    fn types() -> Vec<ValueType>;

    fn into_values(self) -> Result<Vec<Value>, VMError>;
}

/// Collects every remaining argument.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Variadic<T>(pub Vec<T>);

/// Marker for natives whose first parameter is the execution context.
pub struct RuntimeArg;

fn next_arg(args: &mut IntoIter<Value>, expected: &'static str) -> Result<Value, VMError> {
    args.next().ok_or(VMError::TypeMismatch {
        expected,
        found: "nothing",
    })
}

macro_rules! impl_native_value {
    ($ty:ty, $value_type:expr, $name:literal, $variant:ident) => {
        impl NativeParam for $ty {
            const TYPE: ValueType = $value_type;

            fn take(args: &mut IntoIter<Value>) -> Result<Self, VMError> {
                match next_arg(args, $name)? {
                    Value::$variant(v) => Ok(v),
                    other => Err(mismatch($name, &other)),
                }
            }
        }

        impl NativeReturn for $ty {
            fn types() -> Vec<ValueType> {
                vec![$value_type]
            }

            fn into_values(self) -> Result<Vec<Value>, VMError> {
                Ok(vec![Value::$variant(self)])
            }
        }
    };
}

impl_native_value!(i64, ValueType::Int, "int", Int);
impl_native_value!(bool, ValueType::Bool, "bool", Bool);
impl_native_value!(String, ValueType::Str, "str", Str);
impl_native_value!(Vec<u8>, ValueType::Bytes, "bytes", Bytes);
impl_native_value!(BTreeMap<String, Value>, ValueType::Map, "map", Map);

impl NativeParam for Value {
    const TYPE: ValueType = ValueType::Any;

    fn take(args: &mut IntoIter<Value>) -> Result<Self, VMError> {
        next_arg(args, "any")
    }
}

impl NativeReturn for Value {
    fn types() -> Vec<ValueType> {
        vec![ValueType::Any]
    }

    fn into_values(self) -> Result<Vec<Value>, VMError> {
        Ok(vec![self])
    }
}

impl<T: NativeParam> NativeParam for Variadic<T> {
    const TYPE: ValueType = T::TYPE;
    const VARIADIC: bool = true;

    fn take(args: &mut IntoIter<Value>) -> Result<Self, VMError> {
        let mut items = Vec::with_capacity(args.len());
        while args.len() > 0 {
            items.push(T::take(args)?);
        }
        Ok(Variadic(items))
    }
}

impl NativeReturn for () {
    fn types() -> Vec<ValueType> {
        Vec::new()
    }

    fn into_values(self) -> Result<Vec<Value>, VMError> {
        Ok(Vec::new())
    }
}

impl<A: NativeReturn, B: NativeReturn> NativeReturn for (A, B) {
    fn types() -> Vec<ValueType> {
        let mut types = A::types();
        types.extend(B::types());
        types
    }

    fn into_values(self) -> Result<Vec<Value>, VMError> {
        let mut values = self.0.into_values()?;
        values.extend(self.1.into_values()?);
        Ok(values)
    }
}

impl<R: NativeReturn> NativeReturn for Result<R, VMError> {
    fn types() -> Vec<ValueType> {
        R::types()
    }

    fn into_values(self) -> Result<Vec<Value>, VMError> {
        self?.into_values()
    }
}

/// Signature derived from a native's Rust type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Signature {
    /// Parameter types, the execution context included.
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
    pub variadic: bool,
    /// Whether the first parameter is the execution context.
    pub runtime: bool,
}

fn erase<F>(func: F) -> NativeCallable
where
    F: Fn(&mut RunTime<'_>, Vec<Value>) -> Result<Vec<Value>, VMError> + Send + Sync + 'static,
{
    Arc::new(func)
}

/// Conversion of a Rust function into a native.
///
/// `Marker` only disambiguates the blanket implementations for the
/// different arities.
pub trait IntoNative<Marker> {
    fn signature() -> Signature;

    fn into_callable(self) -> NativeCallable;
}

macro_rules! impl_into_native {
    ($($arg:ident $var:ident),*) => {
        impl<Func, Ret, $($arg,)*> IntoNative<($($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> Ret + Send + Sync + 'static,
            Ret: NativeReturn,
            $($arg: NativeParam,)*
        {
            fn signature() -> Signature {
                let flags: &[bool] = &[$($arg::VARIADIC),*];
                Signature {
                    params: vec![$($arg::TYPE),*],
                    results: Ret::types(),
                    variadic: flags.last().copied().unwrap_or(false),
                    runtime: false,
                }
            }

            #[allow(unused_mut, unused_variables)]
            fn into_callable(self) -> NativeCallable {
                erase(move |_rt: &mut RunTime<'_>, args: Vec<Value>| {
                    let mut args = args.into_iter();
                    $(let $var = $arg::take(&mut args)?;)*
                    self($($var),*).into_values()
                })
            }
        }

        impl<Func, Ret, $($arg,)*> IntoNative<(RuntimeArg, $($arg,)*)> for Func
        where
            Func: Fn(&mut RunTime<'_>, $($arg),*) -> Ret + Send + Sync + 'static,
            Ret: NativeReturn,
            $($arg: NativeParam,)*
        {
            fn signature() -> Signature {
                let flags: &[bool] = &[$($arg::VARIADIC),*];
                Signature {
                    params: vec![ValueType::Runtime, $($arg::TYPE),*],
                    results: Ret::types(),
                    variadic: flags.last().copied().unwrap_or(false),
                    runtime: true,
                }
            }

            #[allow(unused_mut, unused_variables)]
            fn into_callable(self) -> NativeCallable {
                erase(move |rt: &mut RunTime<'_>, args: Vec<Value>| {
                    let mut args = args.into_iter();
                    $(let $var = $arg::take(&mut args)?;)*
                    self(rt, $($var),*).into_values()
                })
            }
        }
    };
}

impl_into_native!();
impl_into_native!(A1 a1);
impl_into_native!(A1 a1, A2 a2);
impl_into_native!(A1 a1, A2 a2, A3 a3);
impl_into_native!(A1 a1, A2 a2, A3 a3, A4 a4);
impl_into_native!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);

/// A registered native function.
#[derive(Clone)]
pub struct NativeFunction {
    pub name: String,
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
    /// Per parameter, the marker of an injected value.
    pub auto: Vec<Option<String>>,
    pub variadic: bool,
    pub cost: i64,
    pub func: NativeCallable,
}

impl NativeFunction {
    pub fn new<M, F: IntoNative<M>>(name: &str, func: F) -> Self {
        Self::with_markers(name, func, &HashMap::new())
    }

    /// Builds a native, naming injected parameters through `auto_pars`.
    pub fn with_markers<M, F: IntoNative<M>>(
        name: &str,
        func: F,
        auto_pars: &HashMap<ValueType, String>,
    ) -> Self {
        let signature = F::signature();
        let auto = signature
            .params
            .iter()
            .enumerate()
            .map(|(i, ty)| {
                (signature.runtime && i == 0).then(|| {
                    auto_pars
                        .get(ty)
                        .cloned()
                        .unwrap_or_else(|| DEFAULT_RUNTIME_MARKER.to_string())
                })
            })
            .collect();
        Self {
            name: name.to_string(),
            params: signature.params,
            results: signature.results,
            auto,
            variadic: signature.variadic,
            cost: COST_EXTEND,
            func: func.into_callable(),
        }
    }

    /// Number of parameters the caller supplies.
    pub fn caller_params(&self) -> usize {
        self.auto.iter().filter(|a| a.is_none()).count()
    }

    /// Checks a caller-supplied argument count against the signature.
    pub fn check_arity(&self, got: usize) -> Result<(), VMError> {
        let expected = self.caller_params();
        let ok = if self.variadic {
            got + 1 >= expected
        } else {
            got == expected
        };
        if ok {
            Ok(())
        } else {
            Err(VMError::ArityMismatch {
                name: self.name.clone(),
                expected,
                got,
            })
        }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("results", &self.results)
            .field("auto", &self.auto)
            .field("variadic", &self.variadic)
            .field("cost", &self.cost)
            .finish_non_exhaustive()
    }
}

/// An entry of a registration batch.
pub enum Extension {
    Func(NativeFunction),
    /// A plain value; not callable.
    Value(Value),
}

/// A batch of natives to register with [`VM::extend`](super::vm::VM::extend).
#[derive(Default)]
pub struct ExtendData {
    pub objects: Vec<(String, Extension)>,
    /// Marker names of injected parameters, by type.
    pub auto_pars: HashMap<ValueType, String>,
}

impl ExtendData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn func<M, F: IntoNative<M>>(mut self, name: &str, func: F) -> Self {
        let native = NativeFunction::with_markers(name, func, &self.auto_pars);
        self.objects.push((name.to_string(), Extension::Func(native)));
        self
    }

    pub fn value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.objects.push((name.to_string(), Extension::Value(value.into())));
        self
    }

    /// Names injected parameters of type `ty`, including those of natives
    /// already in the batch.
    pub fn marker(mut self, ty: ValueType, name: &str) -> Self {
        for (_, object) in &mut self.objects {
            if let Extension::Func(native) = object {
                for (param, auto) in native.params.iter().zip(&mut native.auto) {
                    if *param == ty && auto.is_some() {
                        *auto = Some(name.to_string());
                    }
                }
            }
        }
        self.auto_pars.insert(ty, name.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(a: i64, b: i64) -> i64 {
        a + b
    }

    fn join(sep: String, parts: Variadic<String>) -> String {
        parts.0.join(&sep)
    }

    fn split(s: String) -> (String, i64) {
        let len = s.len() as i64;
        (s, len)
    }

    fn with_runtime(_rt: &mut RunTime<'_>, a: i64) -> Result<i64, VMError> {
        Ok(a)
    }

    #[test]
    fn signature_comes_from_rust_types() {
        let native = NativeFunction::new("add", add);
        assert_eq!(native.params, vec![ValueType::Int, ValueType::Int]);
        assert_eq!(native.results, vec![ValueType::Int]);
        assert!(!native.variadic);
        assert_eq!(native.caller_params(), 2);
        assert_eq!(native.cost, COST_EXTEND);
    }

    #[test]
    fn tuple_results_and_variadic_params() {
        assert_eq!(NativeFunction::new("split", split).results.len(), 2);

        let native = NativeFunction::new("join", join);
        assert!(native.variadic);
        assert!(native.check_arity(1).is_ok());
        assert!(native.check_arity(4).is_ok());
        assert!(native.check_arity(0).is_err());
    }

    #[test]
    fn runtime_parameter_is_injected() {
        let native = NativeFunction::new("f", with_runtime);
        assert_eq!(native.params, vec![ValueType::Runtime, ValueType::Int]);
        assert_eq!(native.auto, vec![Some("rt".to_string()), None]);
        assert_eq!(native.results, vec![ValueType::Int]);
        assert_eq!(native.caller_params(), 1);

        let markers = HashMap::from([(ValueType::Runtime, "ctx".to_string())]);
        let named = NativeFunction::with_markers("f", with_runtime, &markers);
        assert_eq!(named.auto[0].as_deref(), Some("ctx"));
    }

    #[test]
    fn marker_applies_regardless_of_order() {
        let data = ExtendData::new()
            .func("before", with_runtime)
            .marker(ValueType::Runtime, "ctx")
            .func("after", with_runtime)
            .func("plain", add);
        let auto: Vec<_> = data
            .objects
            .iter()
            .map(|(_, object)| match object {
                Extension::Func(native) => native.auto.clone(),
                Extension::Value(_) => Vec::new(),
            })
            .collect();
        assert_eq!(auto[0], vec![Some("ctx".to_string()), None]);
        assert_eq!(auto[1], vec![Some("ctx".to_string()), None]);
        assert_eq!(auto[2], vec![None, None]);
    }

    #[test]
    fn arity_is_checked_exactly() {
        let native = NativeFunction::new("add", add);
        assert!(native.check_arity(2).is_ok());
        assert_eq!(
            native.check_arity(3),
            Err(VMError::ArityMismatch {
                name: "add".into(),
                expected: 2,
                got: 3
            })
        );
    }
}
