//! Trust levels for machines and users.
//!
//! A request's trust level gates what it may do. User rules are consulted
//! first; when any matches, machine rules are ignored. Among matching rules
//! the most specific classification wins and ties take the lowest level.
//! Machine rules additionally prefer a match on the physical identifier over
//! one on the logical identifier, since logical names can be aliased.

mod pattern;

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use staf_proto::ReturnCode;
use stafd_config::{Config, MAX_TRUST_LEVEL, TrustSpecParseError};

use crate::endpoint::{SPEC_SEPARATOR, split_specification, strip_port};
use crate::handles::{ANONYMOUS_USER, NO_AUTHENTICATOR};

pub(crate) use self::pattern::{Case, matches_wildcards};
use self::pattern::has_wildcard;

pub(crate) const TRUST_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::trust");

/// Interface assumed by machine specifications without a prefix.
const ANY_INTERFACE: &str = "*";

/// How precisely a rule names its trustee, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub(crate) enum MatchType {
    Exact,
    EntityExact,
    GroupExact,
    Wildcard,
}

impl MatchType {
    fn classify(group: &str, entity: &str) -> Self {
        match (has_wildcard(group), has_wildcard(entity)) {
            (false, false) => Self::Exact,
            (true, false) => Self::EntityExact,
            (false, true) => Self::GroupExact,
            (true, true) => Self::Wildcard,
        }
    }
}

/// One machine or user trust rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TrustRule {
    pub(crate) group: String,
    pub(crate) entity: String,
    pub(crate) level: u32,
    pub(crate) match_type: MatchType,
}

impl TrustRule {
    fn new(group: &str, entity: &str, level: u32) -> Self {
        Self {
            group: group.to_owned(),
            entity: entity.to_owned(),
            level,
            match_type: MatchType::classify(group, entity),
        }
    }

    pub(crate) fn spec(&self) -> String {
        format!("{}{SPEC_SEPARATOR}{}", self.group, self.entity)
    }
}

/// Network and authentication identity of a requester.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TrustQuery<'a> {
    pub(crate) interface: &'a str,
    pub(crate) logical_id: &'a str,
    pub(crate) physical_id: &'a str,
    pub(crate) authenticator: &'a str,
    pub(crate) user_id: &'a str,
}

impl<'a> TrustQuery<'a> {
    /// The identity every request from this daemon's own handles carries.
    pub(crate) const fn local(authenticator: &'a str, user_id: &'a str) -> Self {
        Self {
            interface: "local",
            logical_id: "local",
            physical_id: "local",
            authenticator,
            user_id,
        }
    }
}

#[derive(Debug)]
struct TrustTables {
    machines: BTreeMap<String, TrustRule>,
    users: BTreeMap<String, TrustRule>,
    default_level: u32,
}

#[derive(Debug)]
pub(crate) struct TrustManager {
    tables: Mutex<TrustTables>,
}

impl TrustManager {
    pub(crate) fn new(default_level: u32) -> Self {
        Self {
            tables: Mutex::new(TrustTables {
                machines: BTreeMap::new(),
                users: BTreeMap::new(),
                default_level: default_level.min(MAX_TRUST_LEVEL),
            }),
        }
    }

    /// Builds the tables from the configured rules.
    pub(crate) fn from_config(config: &Config) -> Result<Self, TrustSpecParseError> {
        let manager = Self::new(config.default_trust);
        for spec in config.machine_trust_specs()? {
            manager.set_machine(spec.trustee(), spec.level());
        }
        for spec in config.user_trust_specs()? {
            manager.set_user(spec.trustee(), spec.level());
        }
        Ok(manager)
    }

    pub(crate) fn max_level(&self) -> u32 {
        MAX_TRUST_LEVEL
    }

    /// Computes the trust level of a requester.
    pub(crate) fn trust_level(&self, query: &TrustQuery<'_>) -> u32 {
        let tables = self.tables.lock();
        let level = best_user_match(tables.users.values(), query)
            .or_else(|| best_machine_match(tables.machines.values(), query))
            .unwrap_or(tables.default_level);
        debug!(
            target: TRUST_TARGET,
            interface = query.interface,
            logical_id = query.logical_id,
            physical_id = query.physical_id,
            authenticator = query.authenticator,
            user = query.user_id,
            level,
            "computed trust level"
        );
        level
    }

    /// Trust of `[interface://]machine` for `[authenticator://]user`.
    pub(crate) fn trust_for(&self, machine: &str, user: &str) -> u32 {
        let (interface, host) = split_specification(machine);
        let host = strip_port(host);
        let (authenticator, user_id) = split_specification(user);
        self.trust_level(&TrustQuery {
            interface: interface.unwrap_or(ANY_INTERFACE),
            logical_id: host,
            physical_id: host,
            authenticator: authenticator.unwrap_or(NO_AUTHENTICATOR),
            user_id,
        })
    }

    /// Trust of an unauthenticated `[interface://]machine`.
    pub(crate) fn trust_for_machine(&self, machine: &str) -> u32 {
        self.trust_for(
            machine,
            &format!("{NO_AUTHENTICATOR}{SPEC_SEPARATOR}{ANONYMOUS_USER}"),
        )
    }

    pub(crate) fn set_machine(&self, machine: &str, level: u32) -> ReturnCode {
        if level > MAX_TRUST_LEVEL {
            return ReturnCode::InvalidTrustLevel;
        }
        let (interface, host) = machine_parts(machine);
        let key = machine_key(interface, host);
        self.tables
            .lock()
            .machines
            .entry(key)
            .and_modify(|rule| rule.level = level)
            .or_insert_with(|| TrustRule::new(interface, host, level));
        ReturnCode::Ok
    }

    pub(crate) fn delete_machine(&self, machine: &str) -> ReturnCode {
        let (interface, host) = machine_parts(machine);
        match self.tables.lock().machines.remove(&machine_key(interface, host)) {
            Some(_) => ReturnCode::Ok,
            None => ReturnCode::TrusteeDoesNotExist,
        }
    }

    pub(crate) fn set_user(&self, user: &str, level: u32) -> ReturnCode {
        if level > MAX_TRUST_LEVEL {
            return ReturnCode::InvalidTrustLevel;
        }
        let (authenticator, user_id) = user_parts(user);
        let key = user_key(authenticator, user_id);
        self.tables
            .lock()
            .users
            .entry(key)
            .and_modify(|rule| rule.level = level)
            .or_insert_with(|| TrustRule::new(authenticator, user_id, level));
        ReturnCode::Ok
    }

    pub(crate) fn delete_user(&self, user: &str) -> ReturnCode {
        let (authenticator, user_id) = user_parts(user);
        match self.tables.lock().users.remove(&user_key(authenticator, user_id)) {
            Some(_) => ReturnCode::Ok,
            None => ReturnCode::TrusteeDoesNotExist,
        }
    }

    pub(crate) fn default_level(&self) -> u32 {
        self.tables.lock().default_level
    }

    pub(crate) fn set_default(&self, level: u32) -> ReturnCode {
        if level > MAX_TRUST_LEVEL {
            return ReturnCode::InvalidTrustLevel;
        }
        self.tables.lock().default_level = level;
        ReturnCode::Ok
    }

    pub(crate) fn machine_rules(&self) -> Vec<TrustRule> {
        self.tables.lock().machines.values().cloned().collect()
    }

    pub(crate) fn user_rules(&self) -> Vec<TrustRule> {
        self.tables.lock().users.values().cloned().collect()
    }
}

fn machine_parts(machine: &str) -> (&str, &str) {
    let (interface, host) = split_specification(machine.trim());
    (interface.unwrap_or(ANY_INTERFACE), strip_port(host))
}

fn user_parts(user: &str) -> (&str, &str) {
    let (authenticator, user_id) = split_specification(user.trim());
    (authenticator.unwrap_or(NO_AUTHENTICATOR), user_id)
}

fn machine_key(interface: &str, host: &str) -> String {
    format!(
        "{}{SPEC_SEPARATOR}{}",
        interface.to_lowercase(),
        host.to_lowercase()
    )
}

fn user_key(authenticator: &str, user_id: &str) -> String {
    format!("{}{SPEC_SEPARATOR}{user_id}", authenticator.to_lowercase())
}

fn best_user_match<'a>(
    rules: impl Iterator<Item = &'a TrustRule>,
    query: &TrustQuery<'_>,
) -> Option<u32> {
    let mut best: Option<(MatchType, u32)> = None;
    for rule in rules {
        if !(matches_wildcards(query.authenticator, &rule.group, Case::Insensitive)
            && matches_wildcards(query.user_id, &rule.entity, Case::Sensitive))
        {
            continue;
        }
        best = Some(match best {
            Some((kind, level)) if kind < rule.match_type => (kind, level),
            Some((kind, level)) if kind == rule.match_type => (kind, level.min(rule.level)),
            _ => (rule.match_type, rule.level),
        });
    }
    best.map(|(_, level)| level)
}

fn best_machine_match<'a>(
    rules: impl Iterator<Item = &'a TrustRule>,
    query: &TrustQuery<'_>,
) -> Option<u32> {
    struct Best {
        kind: MatchType,
        physical: bool,
        level: u32,
    }

    let mut best: Option<Best> = None;
    for rule in rules {
        if !matches_wildcards(query.interface, &rule.group, Case::Insensitive) {
            continue;
        }
        let physical = matches_wildcards(query.physical_id, &rule.entity, Case::Insensitive);
        if !physical && !matches_wildcards(query.logical_id, &rule.entity, Case::Insensitive) {
            continue;
        }
        let candidate = Best {
            kind: rule.match_type,
            physical,
            level: rule.level,
        };
        best = Some(match best {
            None => candidate,
            Some(current) if candidate.kind < current.kind => candidate,
            Some(current) if candidate.kind > current.kind => current,
            Some(current) if candidate.physical && !current.physical => candidate,
            Some(current) if candidate.physical == current.physical => Best {
                level: current.level.min(candidate.level),
                ..current
            },
            Some(current) => current,
        });
    }
    best.map(|best| best.level)
}
