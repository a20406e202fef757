//! Variable pools and `{name}` substitution.
//!
//! Names are matched case-insensitively. References are resolved innermost
//! first, so `{prefix{suffix}}` looks up `suffix` and then the combined name.
//! Unknown references are left in place.

use std::collections::BTreeMap;

use parking_lot::RwLock;

/// Names of the system variables every daemon publishes.
pub(crate) mod system {
    pub(crate) const MACHINE: &str = "STAF/Config/Machine";
    pub(crate) const MACHINE_NICKNAME: &str = "STAF/Config/MachineNickname";
    pub(crate) const CODEPAGE: &str = "STAF/Config/CodePage";
    pub(crate) const INSTANCE_UUID: &str = "STAF/Config/STAFInstanceUUID";
}

/// A named set of variables.
#[derive(Debug, Default)]
pub(crate) struct VariablePool {
    entries: RwLock<BTreeMap<String, (String, String)>>,
}

impl VariablePool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let pool = Self::new();
        for (name, value) in pairs {
            pool.set(name, value);
        }
        pool
    }

    pub(crate) fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries
            .write()
            .insert(name.to_lowercase(), (name, value.into()));
    }

    pub(crate) fn get(&self, name: &str) -> Option<String> {
        self.entries
            .read()
            .get(&name.to_lowercase())
            .map(|(_, value)| value.clone())
    }

    pub(crate) fn delete(&self, name: &str) -> bool {
        self.entries.write().remove(&name.to_lowercase()).is_some()
    }

    /// Copies every variable out with its original spelling.
    pub(crate) fn pairs(&self) -> Vec<(String, String)> {
        self.entries.read().values().cloned().collect()
    }
}

/// Substitutes references in `template` using `pools` in priority order.
pub(crate) fn resolve(template: &str, pools: &[&VariablePool]) -> String {
    let mut output = String::with_capacity(template.len());
    let mut open = Vec::new();

    for character in template.chars() {
        match character {
            '{' => {
                open.push(output.len());
                output.push('{');
            }
            '}' => match open.pop() {
                Some(start) => {
                    let value = output
                        .get(start + 1..)
                        .and_then(|name| lookup(name, pools));
                    match value {
                        Some(value) => {
                            output.truncate(start);
                            output.push_str(&value);
                        }
                        None => output.push('}'),
                    }
                }
                None => output.push('}'),
            },
            other => output.push(other),
        }
    }
    output
}

fn lookup(name: &str, pools: &[&VariablePool]) -> Option<String> {
    pools.iter().find_map(|pool| pool.get(name))
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn pools() -> (VariablePool, VariablePool) {
        let request = VariablePool::from_pairs([("dir".to_owned(), "/request".to_owned())]);
        let global = VariablePool::new();
        global.set("Dir", "/global");
        global.set(system::MACHINE, "host1");
        global.set("suffix", "Machine");
        (request, global)
    }

    #[rstest]
    #[case("{dir}/file", "/request/file")]
    #[case("{STAF/Config/Machine}", "host1")]
    #[case("{STAF/Config/{suffix}}", "host1")]
    #[case("{missing}/x", "{missing}/x")]
    #[case("plain } text {", "plain } text {")]
    fn resolves_in_priority_order(
        pools: (VariablePool, VariablePool),
        #[case] template: &str,
        #[case] expected: &str,
    ) {
        let (request, global) = pools;
        assert_eq!(resolve(template, &[&request, &global]), expected);
    }

    #[rstest]
    fn names_are_case_insensitive() {
        let pool = VariablePool::new();
        pool.set("Name", "value");
        assert_eq!(pool.get("NAME").as_deref(), Some("value"));
        assert_eq!(pool.pairs(), vec![("Name".to_owned(), "value".to_owned())]);
        assert!(pool.delete("name"));
        assert!(pool.get("Name").is_none());
    }
}
