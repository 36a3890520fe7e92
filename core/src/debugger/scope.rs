use serde::{Deserialize, Serialize};

use crate::id::{Id, IdMap};
use crate::program::{DebugInfo, ScopeKind, SourceVariable};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeData {
    pub id: Id,
    pub kind: ScopeKind,
    pub name: String,
    pub parent: Option<Id>,
    pub line: u32,
    /// Caller scope and line when this is an inlined function body.
    pub inlined_at: Option<(Id, u32)>,
}

/// Lexical scopes of the program, linked by Id.
#[derive(Debug, Clone, Default)]
pub struct ScopeTree {
    scopes: IdMap<ScopeData>,
    variables: Vec<SourceVariable>,
}

impl ScopeTree {
    pub fn build(info: &DebugInfo) -> Self {
        let mut scopes = IdMap::new();
        for scope in &info.scopes {
            let inlined_at = scope.inlined_at.and_then(|site| {
                info.inline_sites
                    .iter()
                    .find(|s| s.id == site)
                    .map(|s| (s.scope, s.line))
            });
            scopes.insert(
                scope.id,
                ScopeData {
                    id: scope.id,
                    kind: scope.kind,
                    name: scope.name.clone(),
                    parent: scope.parent,
                    line: scope.line,
                    inlined_at,
                },
            );
        }
        Self { scopes, variables: info.variables.clone() }
    }

    pub fn scope(&self, id: Id) -> Option<&ScopeData> {
        self.scopes.get(id)
    }

    /// `scope` and its lexical parents, innermost first. An inlined
    /// function body stops at its own function scope.
    pub fn ancestors(&self, scope: Id) -> Vec<Id> {
        let mut chain = Vec::new();
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let Some(data) = self.scopes.get(id) else {
                break;
            };
            // malformed parent links must not loop
            if chain.contains(&id) {
                break;
            }
            chain.push(id);
            if data.kind == ScopeKind::Function && data.inlined_at.is_some() {
                break;
            }
            cur = data.parent;
        }
        chain
    }

    /// Source variables in view at `scope`, innermost scope first.
    pub fn visible_variables(&self, scope: Id) -> Vec<&SourceVariable> {
        let chain = self.ancestors(scope);
        let mut out: Vec<&SourceVariable> = Vec::new();
        for id in &chain {
            for var in self.variables.iter().filter(|v| v.scope == *id) {
                // an inner declaration shadows outer ones with the same name
                if !out.iter().any(|seen| seen.name == var.name) {
                    out.push(var);
                }
            }
        }
        out
    }

    /// Names of the inlined functions active at `scope`, outermost first.
    pub fn inline_chain(&self, scope: Id) -> Vec<String> {
        let mut names = Vec::new();
        let mut cur = Some(scope);
        let mut guard = 0usize;
        while let Some(id) = cur {
            guard += 1;
            if guard > self.scopes.len() + 1 {
                break;
            }
            let chain = self.ancestors(id);
            let Some(function) = chain
                .iter()
                .filter_map(|s| self.scopes.get(*s))
                .find(|s| s.kind == ScopeKind::Function)
            else {
                break;
            };
            let Some((caller, _)) = function.inlined_at else {
                break;
            };
            names.push(function.name.clone());
            cur = Some(caller);
        }
        names.reverse();
        names
    }
}
