//! Claims-based access control lists.
//!
//! Each scope (agent, pool, project, server) may carry an [`Acl`]. A scope
//! answers [`AclDecision::Allow`], [`AclDecision::Deny`] or
//! [`AclDecision::Defer`]; deferral hands the question to the enclosing
//! scope, and a chain that defers all the way up is denied.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

macro_rules! acl_actions {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        /// Actions that can be granted through an ACL.
        ///
        /// Append only. Documents written by older servers store actions by
        /// their position in this list, so variants must never be reordered
        /// or removed.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        pub enum AclAction {
            $($(#[$meta])* $name,)+
        }

        impl AclAction {
            /// Every action, in legacy index order.
            pub const ALL: &'static [AclAction] = &[$(AclAction::$name,)+];

            pub fn name(self) -> &'static str {
                match self {
                    $(AclAction::$name => stringify!($name),)+
                }
            }
        }
    };
}

acl_actions! {
    CreateProject,
    UpdateProject,
    DeleteProject,
    ViewProject,
    CreateStream,
    UpdateStream,
    DeleteStream,
    ViewStream,
    ChangeCommits,
    CreateJob,
    UpdateJob,
    DeleteJob,
    ExecuteJob,
    RetryJobStep,
    ViewJob,
    CreateEvent,
    ViewEvent,
    CreateAgent,
    UpdateAgent,
    DeleteAgent,
    ViewAgent,
    ListAgents,
    CreatePool,
    UpdatePool,
    DeletePool,
    ViewPool,
    ListPools,
    CreateSession,
    ViewSession,
    ViewLeases,
    ViewCredential,
    ChangePermissions,
    IssueBearerToken,
    /// Allows a principal to request leases on agents
    CreateLease,
    CancelLease,
}

impl AclAction {
    /// Position in the append-only list, as stored by older documents.
    pub fn legacy_index(self) -> u32 {
        self as u32
    }

    pub fn from_legacy_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

impl fmt::Display for AclAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AclAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|action| action.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown ACL action '{}'", s))
    }
}

impl<'de> Deserialize<'de> for AclAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Name(String),
            Legacy(u32),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Name(name) => name.parse().map_err(D::Error::custom),
            Repr::Legacy(index) => Self::from_legacy_index(index)
                .ok_or_else(|| D::Error::custom(format!("unknown legacy ACL action {}", index))),
        }
    }
}

/// A typed credential asserted by a principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclClaim {
    #[serde(rename = "type")]
    pub claim_type: String,
    pub value: String,
}

impl AclClaim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }

    /// Claim types compare case-insensitively, values exactly.
    pub fn matches(&self, other: &AclClaim) -> bool {
        self.claim_type.eq_ignore_ascii_case(&other.claim_type) && self.value == other.value
    }
}

/// The identity requesting an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub claims: Vec<AclClaim>,
}

impl Principal {
    pub fn new(claims: Vec<AclClaim>) -> Self {
        Self { claims }
    }

    pub fn has_claim(&self, claim: &AclClaim) -> bool {
        self.claims.iter().any(|held| held.matches(claim))
    }
}

/// What a matching entry does with the action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AclEffect {
    #[default]
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclEntry {
    pub claim: AclClaim,
    pub actions: BTreeSet<AclAction>,
    #[serde(default)]
    pub effect: AclEffect,
}

impl AclEntry {
    pub fn new(claim: AclClaim, actions: impl IntoIterator<Item = AclAction>) -> Self {
        Self {
            claim,
            actions: actions.into_iter().collect(),
            effect: AclEffect::Allow,
        }
    }

    pub fn denying(claim: AclClaim, actions: impl IntoIterator<Item = AclAction>) -> Self {
        Self {
            effect: AclEffect::Deny,
            ..Self::new(claim, actions)
        }
    }

    fn applies(&self, action: AclAction, principal: &Principal) -> bool {
        self.actions.contains(&action) && principal.has_claim(&self.claim)
    }
}

/// Answer from a single scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclDecision {
    Allow,
    Deny,
    /// No opinion; ask the enclosing scope
    Defer,
}

fn default_inherit() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acl {
    #[serde(default)]
    pub entries: Vec<AclEntry>,
    /// Whether unmatched actions defer to the enclosing scope
    #[serde(default = "default_inherit")]
    pub inherit: bool,
    /// Actions whose fallback is inverted: denied when inheriting,
    /// deferred when not
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exceptions: Option<BTreeSet<AclAction>>,
}

impl Default for Acl {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            inherit: true,
            exceptions: None,
        }
    }
}

impl Acl {
    /// The first entry listing `action` for a claim the principal holds
    /// decides; entry order matters.
    pub fn authorize(&self, action: AclAction, principal: &Principal) -> AclDecision {
        if let Some(entry) = self.entries.iter().find(|entry| entry.applies(action, principal)) {
            return match entry.effect {
                AclEffect::Allow => AclDecision::Allow,
                AclEffect::Deny => AclDecision::Deny,
            };
        }

        let excepted = self
            .exceptions
            .as_ref()
            .is_some_and(|exceptions| exceptions.contains(&action));
        match (self.inherit, excepted) {
            (true, false) | (false, true) => AclDecision::Defer,
            (true, true) | (false, false) => AclDecision::Deny,
        }
    }
}

/// Resolves `action` through nested scopes, innermost first.
///
/// Scopes without an ACL defer. The first non-deferring answer wins;
/// reaching the end of the chain denies.
pub fn authorize_chain<'a, I>(scopes: I, action: AclAction, principal: &Principal) -> bool
where
    I: IntoIterator<Item = Option<&'a Acl>>,
{
    for acl in scopes.into_iter().flatten() {
        match acl.authorize(action, principal) {
            AclDecision::Allow => return true,
            AclDecision::Deny => return false,
            AclDecision::Defer => {}
        }
    }
    false
}
