//! Contract execution.
//!
//! A contract runs its `init`, `conditions` and `action` functions in that
//! order, each in a fresh [`RunTime`] sharing the caller's budget and
//! environment. Before that, the supplied parameters are checked against
//! the contract's declared transaction fields and bound into the
//! environment, and the contract is marked as running so that it cannot be
//! re-entered from its own call chain.

use crate::debug;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::names::{parse_contract, state_name};
use crate::virtual_machine::object::{BlockId, ContractMeta, Object};
use crate::virtual_machine::runtime::RunTime;
use crate::virtual_machine::value::Value;
use std::collections::BTreeMap;

/// Lifecycle functions, in execution order.
pub const STAGES: [&str; 3] = ["init", "conditions", "action"];
/// Transaction field that makes a call signature-bearing.
pub const SIGNATURE_FIELD: &str = "Signature";
/// Native consulted for signature-bearing calls.
pub const CHECK_SIGNATURE: &str = "check_signature";
/// State used by [`call_contract`] when the environment has none.
pub const GLOBAL_STATE: u32 = 1;

fn contract<'a>(rt: &RunTime<'a>, name: &str) -> Result<(BlockId, &'a ContractMeta), VMError> {
    let vm = rt.vm();
    match vm.root().objects.get(name) {
        Some(Object::Contract(id)) => vm
            .block(*id)
            .contract()
            .map(|meta| (*id, meta))
            .ok_or_else(|| VMError::UnknownContract(name.to_string())),
        _ => Err(VMError::UnknownContract(name.to_string())),
    }
}

/// Runs contract `name` with the comma-separated parameter `names` bound to
/// `params`.
pub fn exec_contract(rt: &mut RunTime<'_>, name: &str, names: &str, params: Vec<Value>) -> Result<(), VMError> {
    let (id, meta) = contract(rt, name)?;
    let names: Vec<&str> = names.split(',').collect();
    if names.len() != params.len() {
        return Err(VMError::WrongParameters {
            contract: name.to_string(),
            names: names.len(),
            values: params.len(),
        });
    }
    if !meta.active {
        return Err(VMError::InactiveContract(name.to_string()));
    }
    let mut signed = false;
    for field in &meta.tx {
        if !names.contains(&field.name.as_str()) {
            return Err(VMError::FieldNotDefined {
                contract: name.to_string(),
                field: field.name.clone(),
            });
        }
        signed |= field.name == SIGNATURE_FIELD;
    }

    if !rt.extend.enter(name) {
        return Err(VMError::Loop(name.to_string()));
    }
    let result = run_entered(rt, id, name, &names, params, signed);
    rt.extend.leave(name);
    result
}

fn run_entered(
    rt: &mut RunTime<'_>,
    id: BlockId,
    name: &str,
    names: &[&str],
    params: Vec<Value>,
    signed: bool,
) -> Result<(), VMError> {
    for (param, value) in names.iter().zip(params) {
        if !param.is_empty() {
            rt.extend.set(param, value);
        }
    }
    let parent = caller_contract(rt, name);
    let previous = rt.extend.replace_parent(parent);
    let result = run_traced(rt, id, name, signed);
    rt.extend.replace_parent(previous);
    result
}

fn run_traced(rt: &mut RunTime<'_>, id: BlockId, name: &str, signed: bool) -> Result<(), VMError> {
    let cost = rt.vm().config().cost_contract;
    rt.charge(cost)?;

    debug!("contract {name} started");
    rt.extend.trace(name);
    let result = run_stages(rt, id, name, signed);
    rt.extend.trace("");
    match &result {
        Ok(()) => debug!("contract {name} finished, {} left", rt.cost()),
        Err(err) => debug!("contract {name} failed: {err}"),
    }
    result
}

fn run_stages(rt: &mut RunTime<'_>, id: BlockId, name: &str, signed: bool) -> Result<(), VMError> {
    let vm = rt.vm();
    if signed && rt.extend.session.is_some() {
        if let Some(Object::Native(check)) = vm.root().objects.get(CHECK_SIGNATURE) {
            (check.func)(rt, vec![Value::Str(name.to_string())])
                .map_err(|e| VMError::Signature(e.to_string()))?;
        }
    }

    let block = vm.block(id);
    for stage in STAGES {
        let Some(Object::Function(func)) = block.objects.get(stage) else {
            continue;
        };
        let mut child = rt.child();
        let result = child.run(*func, Vec::new());
        let left = child.cost();
        rt.absorb(left);
        result?;
    }
    Ok(())
}

/// Name of the contract whose function is running, as seen from `name`.
///
/// Within the same state the bare name is used; a contract of state 0 is
/// reported as `@<name>`.
fn caller_contract(rt: &RunTime<'_>, name: &str) -> String {
    let vm = rt.vm();
    for id in rt.blocks().iter().rev() {
        let block = vm.block(*id);
        if block.function().is_none() {
            continue;
        }
        let Some(meta) = block.parent.and_then(|p| vm.block(p).contract()) else {
            continue;
        };
        let (fid, fname) = parse_contract(&meta.name);
        let (cid, _) = parse_contract(name);
        return if fname.is_empty() {
            meta.name.clone()
        } else if fid == 0 {
            format!("@{fname}")
        } else if fid == cid {
            fname
        } else {
            meta.name.clone()
        };
    }
    String::new()
}

/// Runs a contract by name with parameters given as a map.
///
/// The name is qualified with the environment's state and the values are
/// ordered by the contract's declared fields.
pub fn call_contract(rt: &mut RunTime<'_>, name: &str, params: &BTreeMap<String, Value>) -> Result<(), VMError> {
    let name = state_name(rt.extend.state.unwrap_or(GLOBAL_STATE), name);
    let (_, meta) = contract(rt, &name)?;

    let mut names = Vec::with_capacity(meta.tx.len());
    let mut values = Vec::with_capacity(meta.tx.len().max(1));
    for field in &meta.tx {
        let value = params.get(&field.name).ok_or_else(|| VMError::FieldNotDefined {
            contract: name.clone(),
            field: field.name.clone(),
        })?;
        names.push(field.name.as_str());
        values.push(value.clone());
    }
    if values.is_empty() {
        values.push(Value::Str(String::new()));
    }
    exec_contract(rt, &name, &names.join(","), values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{COST_CONTRACT, COST_DEFAULT};
    use crate::ledger::writer::{BlockData, StateWriter};
    use crate::storage::memory_storage::MemoryStorage;
    use crate::storage::statement::SqlValue;
    use crate::storage::storage_trait::{ROLLBACK_TABLE, ROLLBACK_TX_TABLE};
    use crate::utils::test_utils::utils::{ledger, tx_hash};
    use crate::virtual_machine::assembler::assemble_source;
    use crate::virtual_machine::extend::{Extend, PARENT_VAR, Session, Tracer};
    use crate::virtual_machine::native::ExtendData;
    use crate::virtual_machine::vm::VM;
    use std::sync::{Arc, Mutex};

    const TRANSFER: &str = r#"
        contract @1Transfer
            tx Recipient str
            tx Amount int
            func conditions
                LOAD_EXTEND Amount
                PUSH_INT 0
                GT
                JUMP_IF_FALSE bad
                RET 0
            bad:
                PUSH_STR "amount must be positive"
                RAISE
            end
            func action
                LOAD_EXTEND Amount
                SET_EXTEND moved
            end
        end
    "#;

    fn load(source: &str) -> VM {
        let mut vm = VM::new();
        assemble_source(&mut vm, source).unwrap();
        vm
    }

    fn transfer(vm: &VM, extend: &mut Extend, amount: i64) -> Result<i64, VMError> {
        vm.run_contract(extend, "@1Transfer", "Recipient,Amount", vec!["bob".into(), amount.into()])
    }

    fn session(storage: &Arc<MemoryStorage>) -> Arc<dyn Session> {
        Arc::new(
            StateWriter::new(storage.clone())
                .with_block(BlockData { block_id: 3, time: 0 })
                .with_tx_hash(tx_hash()),
        )
    }

    fn recording_tracer() -> (Tracer, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let tracer: Tracer = Arc::new(move |_: &dyn Session, name: &str| {
            sink.lock().unwrap().push(name.to_string())
        });
        (tracer, seen)
    }

    #[test]
    fn stages_run_with_bound_parameters() {
        let vm = load(TRANSFER);
        let mut extend = Extend::new();
        let left = transfer(&vm, &mut extend, 5).unwrap();
        assert_eq!(extend.get("moved"), Some(&Value::Int(5)));
        assert_eq!(extend.get("Recipient"), Some(&Value::Str("bob".into())));
        assert!(left <= COST_DEFAULT - COST_CONTRACT);
        assert!(!extend.is_active("@1Transfer"));
    }

    #[test]
    fn failing_condition_stops_action() {
        let vm = load(TRANSFER);
        let mut extend = Extend::new();
        assert_eq!(
            transfer(&vm, &mut extend, -1),
            Err(VMError::Raised("amount must be positive".into()))
        );
        assert_eq!(extend.get("moved"), None);
        assert!(!extend.is_active("@1Transfer"));
    }

    #[test]
    fn parameters_are_checked_against_fields() {
        let vm = load(TRANSFER);
        let mut extend = Extend::new();
        assert_eq!(
            vm.run_contract(&mut extend, "@1Transfer", "Recipient,Other", vec!["bob".into(), 1i64.into()]),
            Err(VMError::FieldNotDefined {
                contract: "@1Transfer".into(),
                field: "Amount".into()
            })
        );
        assert_eq!(
            vm.run_contract(&mut extend, "@1Transfer", "Recipient", vec!["bob".into(), 1i64.into()]),
            Err(VMError::WrongParameters {
                contract: "@1Transfer".into(),
                names: 1,
                values: 2
            })
        );
        assert_eq!(
            vm.run_contract(&mut extend, "@1Missing", "", vec!["".into()]),
            Err(VMError::UnknownContract("@1Missing".into()))
        );
    }

    #[test]
    fn bare_names_use_the_environment_state() {
        let vm = load(TRANSFER);
        let mut extend = Extend::new().with_state(1);
        vm.run_contract(&mut extend, "Transfer", "Recipient,Amount", vec!["bob".into(), 2i64.into()])
            .unwrap();
        assert_eq!(extend.get("moved"), Some(&Value::Int(2)));

        let mut other = Extend::new().with_state(2);
        assert_eq!(
            vm.run_contract(&mut other, "Transfer", "Recipient,Amount", vec!["bob".into(), 2i64.into()]),
            Err(VMError::UnknownContract("@2Transfer".into()))
        );
    }

    #[test]
    fn inactive_contracts_do_not_run() {
        let vm = load(
            "contract @1Frozen inactive
                func action
                    PUSH_INT 1
                    SET_EXTEND ran
                end
            end",
        );
        let mut extend = Extend::new();
        assert_eq!(
            vm.run_contract(&mut extend, "@1Frozen", "", vec!["".into()]),
            Err(VMError::InactiveContract("@1Frozen".into()))
        );
        assert_eq!(extend.get("ran"), None);
    }

    #[test]
    fn self_call_is_a_loop() {
        let vm = load(
            r#"contract @1Again
                func action
                    PUSH_STR "@1Again"
                    PUSH_STR ""
                    PUSH_STR ""
                    CALL ExecContract 3
                end
            end"#,
        );
        let mut extend = Extend::new();
        assert_eq!(
            vm.run_contract(&mut extend, "@1Again", "", vec!["".into()]),
            Err(VMError::Loop("@1Again".into()))
        );
        assert!(!extend.is_active("@1Again"));
    }

    #[test]
    fn mutual_recursion_is_a_loop() {
        let vm = load(
            r#"contract @1A
                func action
                    PUSH_STR "@1B"
                    PUSH_STR ""
                    PUSH_STR ""
                    CALL ExecContract 3
                end
            end
            contract @1B
                func action
                    PUSH_STR "@1A"
                    PUSH_STR ""
                    PUSH_STR ""
                    CALL ExecContract 3
                end
            end"#,
        );
        let mut extend = Extend::new();
        assert_eq!(
            vm.run_contract(&mut extend, "@1A", "", vec!["".into()]),
            Err(VMError::Loop("@1A".into()))
        );
        assert!(!extend.is_active("@1A"));
        assert!(!extend.is_active("@1B"));
    }

    #[test]
    fn extra_parameters_are_bound_too() {
        let vm = load(TRANSFER);
        let mut extend = Extend::new();
        vm.run_contract(
            &mut extend,
            "@1Transfer",
            "Recipient,Amount,Memo",
            vec!["bob".into(), 3i64.into(), "rent".into()],
        )
        .unwrap();
        assert_eq!(extend.get("moved"), Some(&Value::Int(3)));
        assert_eq!(extend.get("Memo"), Some(&Value::Str("rent".into())));
    }

    #[test]
    fn budget_is_shared_and_enforced() {
        let vm = load(TRANSFER);
        let mut extend = Extend::new();
        let mut rt = vm.run_init(1_000, &mut extend);
        exec_contract(&mut rt, "@1Transfer", "Recipient,Amount", vec!["bob".into(), 5i64.into()]).unwrap();
        let after_one = rt.cost();
        assert!(after_one < 1_000 - COST_CONTRACT);
        exec_contract(&mut rt, "@1Transfer", "Recipient,Amount", vec!["bob".into(), 5i64.into()]).unwrap();
        assert!(rt.cost() < after_one);

        let mut rt = vm.run_init(0, &mut extend);
        assert_eq!(
            exec_contract(&mut rt, "@1Transfer", "Recipient,Amount", vec!["bob".into(), 5i64.into()]),
            Err(VMError::CostExceeded)
        );
        assert!(!extend.is_active("@1Transfer"));
    }

    #[test]
    fn parent_is_reported_and_restored() {
        let vm = load(
            r#"contract @1Outer
                func action
                    PUSH_STR "@1Inner"
                    PUSH_STR ""
                    PUSH_STR ""
                    CALL ExecContract 3
                end
            end
            contract @0Root
                func action
                    PUSH_STR "@1Inner"
                    PUSH_STR ""
                    PUSH_STR ""
                    CALL ExecContract 3
                end
            end
            contract @2Far
                func action
                    PUSH_STR "@1Inner"
                    PUSH_STR ""
                    PUSH_STR ""
                    CALL ExecContract 3
                end
            end
            contract @1Inner
                func action
                    LOAD_EXTEND parent
                    SET_EXTEND seen
                end
            end"#,
        );
        let cases = [("@1Outer", "Outer"), ("@0Root", "@Root"), ("@2Far", "@2Far")];
        for (caller, expected) in cases {
            let mut extend = Extend::new();
            extend.parent = "host".into();
            vm.run_contract(&mut extend, caller, "", vec!["".into()]).unwrap();
            assert_eq!(extend.get("seen"), Some(&Value::Str(expected.into())), "{caller}");
            assert_eq!(extend.parent, "host");
            assert_eq!(extend.get(PARENT_VAR), Some(&Value::Str("host".into())));
        }

        let mut extend = Extend::new();
        vm.run_contract(&mut extend, "@1Inner", "", vec!["".into()]).unwrap();
        assert_eq!(extend.get("seen"), Some(&Value::Str(String::new())));
    }

    #[test]
    fn tracer_sees_entry_and_exit_even_on_failure() {
        let vm = load(TRANSFER);
        let storage = ledger();
        let (tracer, seen) = recording_tracer();
        let mut extend = Extend::new().with_session(session(&storage)).with_tracer(tracer);

        transfer(&vm, &mut extend, 1).unwrap();
        assert!(transfer(&vm, &mut extend, -1).is_err());
        assert_eq!(*seen.lock().unwrap(), vec!["@1Transfer", "", "@1Transfer", ""]);
    }

    #[test]
    fn nested_contracts_trace_in_call_order() {
        let vm = load(
            r#"contract @1Outer
                func action
                    PUSH_STR "@1Inner"
                    PUSH_STR ""
                    PUSH_STR ""
                    CALL ExecContract 3
                end
            end
            contract @1Inner
            end"#,
        );
        let storage = ledger();
        let (tracer, seen) = recording_tracer();
        let mut extend = Extend::new().with_session(session(&storage)).with_tracer(tracer);
        vm.run_contract(&mut extend, "@1Outer", "", vec!["".into()]).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["@1Outer", "@1Inner", "", ""]);
    }

    fn check_signature(rt: &mut RunTime<'_>, name: String) -> Result<(), VMError> {
        match rt.extend.get(SIGNATURE_FIELD) {
            Some(Value::Str(sig)) if *sig == format!("signed:{name}") => Ok(()),
            _ => Err(VMError::Raised("bad signature".into())),
        }
    }

    #[test]
    fn signed_calls_are_verified_within_a_session() {
        let mut vm = load(
            "contract @1Signed
                tx Signature str
                func action
                    PUSH_BOOL true
                    SET_EXTEND done
                end
            end",
        );
        vm.extend(ExtendData::new().func(CHECK_SIGNATURE, check_signature)).unwrap();
        let storage = ledger();
        let run = |extend: &mut Extend, sig: &str| vm.run_contract(extend, "@1Signed", "Signature", vec![sig.into()]);

        let mut extend = Extend::new().with_session(session(&storage));
        assert!(matches!(run(&mut extend, "forged"), Err(VMError::Signature(_))));
        assert_eq!(extend.get("done"), None);

        run(&mut extend, "signed:@1Signed").unwrap();
        assert_eq!(extend.get("done"), Some(&Value::Bool(true)));

        let mut offline = Extend::new();
        run(&mut offline, "forged").unwrap();
    }

    #[test]
    fn call_contract_orders_values_by_fields() {
        let vm = load(
            r#"contract @1Pay
                tx To str
                tx Sum int
                func action
                    LOAD_EXTEND Sum
                    SET_EXTEND paid
                end
            end
            contract @1Ping
                func action
                    PUSH_BOOL true
                    SET_EXTEND pinged
                end
            end
            contract @1Caller
                func action
                    PUSH_STR "Pay"
                    PUSH_STR "Sum"
                    PUSH_INT 7
                    PUSH_STR "To"
                    PUSH_STR "bob"
                    MAKE_MAP 2
                    CALL CallContract 2
                    PUSH_STR "Ping"
                    MAKE_MAP 0
                    CALL CallContract 2
                end
            end"#,
        );
        let mut extend = Extend::new();
        vm.run_contract(&mut extend, "@1Caller", "", vec!["".into()]).unwrap();
        assert_eq!(extend.get("paid"), Some(&Value::Int(7)));
        assert_eq!(extend.get("To"), Some(&Value::Str("bob".into())));
        assert_eq!(extend.get("pinged"), Some(&Value::Bool(true)));

        let mut extend = Extend::new();
        let mut rt = vm.run_init(COST_DEFAULT, &mut extend);
        assert_eq!(
            call_contract(&mut rt, "Pay", &BTreeMap::from([("To".to_string(), Value::from("bob"))])),
            Err(VMError::FieldNotDefined {
                contract: "@1Pay".into(),
                field: "Sum".into()
            })
        );
    }

    #[test]
    fn contracts_write_through_the_session() {
        let vm = load(
            r#"contract @1Open
                func action
                    PUSH_STR "accounts"
                    PUSH_STR "balance"
                    PUSH_STR "10"
                    MAKE_MAP 1
                    CALL db_insert 2
                    SET_EXTEND row
                end
            end
            contract @1Topup
                func action
                    PUSH_STR "accounts"
                    PUSH_INT 1
                    PUSH_STR "+balance"
                    PUSH_STR "5"
                    MAKE_MAP 1
                    CALL db_update 3
                    POP
                end
            end"#,
        );
        let storage = ledger();
        let mut extend = Extend::new().with_session(session(&storage));
        vm.run_contract(&mut extend, "@1Open", "", vec!["".into()]).unwrap();
        assert_eq!(extend.get("row"), Some(&Value::Str("1".into())));
        assert_eq!(storage.row_count("accounts"), 1);
        assert_eq!(storage.row_count(ROLLBACK_TABLE), 0);

        vm.run_contract(&mut extend, "@1Topup", "", vec!["".into()]).unwrap();
        assert_eq!(storage.row_count(ROLLBACK_TABLE), 1);
        assert_eq!(storage.row_count(ROLLBACK_TX_TABLE), 2);
        let rows = storage.rows("accounts").unwrap();
        assert_eq!(rows[0]["balance"], SqlValue::Int(15));

        let mut offline = Extend::new();
        assert_eq!(
            vm.run_contract(&mut offline, "@1Open", "", vec!["".into()]),
            Err(VMError::NoSession)
        );
    }
}
