//! Instruction Set Architecture (ISA) definitions.
//!
//! The VM is a stack machine. The [`for_each_instruction!`](crate::for_each_instruction)
//! macro holds the canonical instruction list and invokes a callback macro for
//! code generation, so the interpreter enum and the assembler's parser are
//! generated from the same definitions.
//!
//! This module generates:
//! - The [`ByteCode`] enum, one variant per instruction with its operands
//! - `opcode`, `mnemonic` and `cost` accessors
//!
//! See [`assembler`](super::assembler) for the textual form.
//!
//! # Operand kinds
//!
//! - `Int`: i64 literal
//! - `Str`: double-quoted string literal
//! - `Bool`: `true` or `false`
//! - `Var`: local variable, by name or index
//! - `Name`: identifier of a function or environment variable
//! - `Count`: small unsigned count
//! - `Label`: jump target, resolved to an instruction index

/// Invokes a callback macro with the complete instruction definition list.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Literals and variables
            // =========================
            /// PUSH_INT imm ; push imm
            PushInt = 0x01, "PUSH_INT" => [value: Int], 1,
            /// PUSH_STR "text" ; push a string
            PushStr = 0x02, "PUSH_STR" => [value: Str], 1,
            /// PUSH_BOOL true|false ; push a boolean
            PushBool = 0x03, "PUSH_BOOL" => [value: Bool], 1,
            /// PUSH_NIL ; push nil
            PushNil = 0x04, "PUSH_NIL" => [], 1,
            /// LOAD_VAR var ; push the local variable
            LoadVar = 0x05, "LOAD_VAR" => [index: Var], 1,
            /// SET_VAR var ; pop into the local variable
            SetVar = 0x06, "SET_VAR" => [index: Var], 1,
            /// LOAD_EXTEND name ; push the environment variable `$name`
            LoadExtend = 0x07, "LOAD_EXTEND" => [name: Name], 2,
            /// SET_EXTEND name ; pop into the environment variable `$name`
            SetExtend = 0x08, "SET_EXTEND" => [name: Name], 2,
            /// POP ; discard the top of the stack
            Pop = 0x09, "POP" => [], 1,
            /// MAKE_MAP n ; pop n key/value pairs into a map
            MakeMap = 0x0A, "MAKE_MAP" => [count: Count], 10,
            // =========================
            // Integer arithmetic
            // =========================
            /// ADD ; a + b, or string concatenation
            Add = 0x20, "ADD" => [], 3,
            /// SUB ; a - b
            Sub = 0x21, "SUB" => [], 3,
            /// MUL ; a * b
            Mul = 0x22, "MUL" => [], 5,
            /// DIV ; a / b (trap on division by zero)
            Div = 0x23, "DIV" => [], 10,
            /// MOD ; a % b (trap on division by zero)
            Mod = 0x24, "MOD" => [], 10,
            /// NEG ; -a
            Neg = 0x25, "NEG" => [], 2,
            // =========================
            // Boolean / comparison
            // =========================
            /// EQ ; a == b
            Eq = 0x30, "EQ" => [], 3,
            /// NE ; a != b
            NotEq = 0x31, "NE" => [], 3,
            /// LT ; a < b
            Lt = 0x32, "LT" => [], 3,
            /// LE ; a <= b
            Le = 0x33, "LE" => [], 3,
            /// GT ; a > b
            Gt = 0x34, "GT" => [], 3,
            /// GE ; a >= b
            Ge = 0x35, "GE" => [], 3,
            /// NOT ; !a
            Not = 0x36, "NOT" => [], 1,
            /// AND ; a && b
            And = 0x37, "AND" => [], 2,
            /// OR ; a || b
            Or = 0x38, "OR" => [], 2,
            // =========================
            // Control Flow
            // =========================
            /// JUMP label ; continue at label
            Jump = 0x40, "JUMP" => [target: Label], 5,
            /// JUMP_IF_FALSE label ; pop a bool, continue at label when false
            JumpIfFalse = 0x41, "JUMP_IF_FALSE" => [target: Label], 5,
            /// CALL name, argc ; call a function or native with argc stacked arguments.
            /// The callee's own cost is debited on top.
            Call = 0x42, "CALL" => [name: Name, argc: Count], 1,
            /// RET n ; return the top n values
            Return = 0x43, "RET" => [count: Count], 5,
            /// RAISE ; pop a message and fail with it
            Raise = 0x44, "RAISE" => [], 5,
        }
    };
}

#[macro_export]
macro_rules! define_instructions {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ], $cost:expr
        ),* $(,)?
    ) => {
        // =========================
        // VM instruction enum
        // =========================
        #[derive(Clone, Debug, Eq, PartialEq)]
        pub enum ByteCode {
            $(
                $(#[$doc])*
                $name { $( $field: $crate::define_instructions!(@ty $kind) ),* },
            )*
        }

        impl ByteCode {
            pub const fn opcode(&self) -> u8 {
                match self {
                    $( ByteCode::$name { .. } => $opcode, )*
                }
            }

            /// Returns the assembly mnemonic for this instruction.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( ByteCode::$name { .. } => $mnemonic, )*
                }
            }

            /// Returns the cost debited before this instruction runs.
            pub const fn cost(&self) -> i64 {
                match self {
                    $( ByteCode::$name { .. } => $cost, )*
                }
            }
        }
    };

    // ---------- types ----------
    (@ty Int)   => { i64 };
    (@ty Str)   => { String };
    (@ty Bool)  => { bool };
    (@ty Var)   => { usize };
    (@ty Name)  => { String };
    (@ty Count) => { usize };
    (@ty Label) => { usize };
}

for_each_instruction!(define_instructions);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_follow_definitions() {
        let call = ByteCode::Call {
            name: "len".into(),
            argc: 1,
        };
        assert_eq!(call.mnemonic(), "CALL");
        assert_eq!(call.opcode(), 0x42);
        assert_eq!(call.cost(), 1);
        assert_eq!(ByteCode::Add {}.mnemonic(), "ADD");
        assert_eq!(ByteCode::PushNil {}.cost(), 1);
    }
}
