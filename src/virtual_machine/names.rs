//! Contract naming convention.
//!
//! Contracts live in numbered states (ecosystems). A fully qualified name is
//! `@<state><name>`, e.g. `@12Transfer`; state 1 is the global one.

/// Qualifies `name` with `state` unless it already carries one.
///
/// `@<digits>...` is kept as is, `@<ident>` refers to the global state and a
/// bare name is placed in `state`.
pub fn state_name(state: u32, name: &str) -> String {
    match name.strip_prefix('@') {
        None => format!("@{state}{name}"),
        Some(rest) => match rest.chars().next() {
            Some(c) if !c.is_ascii_digit() => format!("@1{rest}"),
            _ => name.to_string(),
        },
    }
}

fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Splits `@<state><name>` into its parts; `(0, "")` for any other shape.
///
/// The state takes as many digits as possible while leaving a non-empty
/// name, so `@123` is state 12 with name `3`. A state that overflows `u32`
/// also yields `(0, "")`: state 0 is the root, so keeping the name would
/// misreport the contract as a root one. Callers fall back to the full name.
pub fn parse_contract(name: &str) -> (u32, String) {
    let Some(rest) = name.strip_prefix('@') else {
        return (0, String::new());
    };
    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    let split = if digits == rest.len() { digits.saturating_sub(1) } else { digits };
    let (id, ident) = rest.split_at(split);
    if id.is_empty() || ident.is_empty() || !ident.chars().all(is_word) {
        return (0, String::new());
    }
    match id.parse() {
        Ok(id) => (id, ident.to_string()),
        Err(_) => (0, String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_name_qualifies_bare_names() {
        assert_eq!(state_name(5, "Transfer"), "@5Transfer");
        assert_eq!(state_name(5, "@Transfer"), "@1Transfer");
        assert_eq!(state_name(5, "@3Transfer"), "@3Transfer");
        assert_eq!(state_name(5, "@"), "@");
    }

    #[test]
    fn parse_contract_splits_state_and_name() {
        assert_eq!(parse_contract("@12Name"), (12, "Name".to_string()));
        assert_eq!(parse_contract("@1a_b2"), (1, "a_b2".to_string()));
        assert_eq!(parse_contract("@123"), (12, "3".to_string()));
        assert_eq!(parse_contract("Name"), (0, String::new()));
        assert_eq!(parse_contract("@Name"), (0, String::new()));
        assert_eq!(parse_contract("@1"), (0, String::new()));
        assert_eq!(parse_contract("@1na-me"), (0, String::new()));
        assert_eq!(parse_contract("@99999999999Name"), (0, String::new()));
        assert_eq!(parse_contract("@4294967295Name"), (u32::MAX, "Name".to_string()));
    }
}
