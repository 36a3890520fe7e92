use serde::{Deserialize, Serialize};

use crate::id::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInfo {
    pub file: Id,
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub id: Id,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    CompilationUnit,
    Function,
    Block,
}

/// A lexical scope. A function scope with `inlined_at` set is an inlined
/// copy of that function; the site names the caller scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugScope {
    pub id: Id,
    pub kind: ScopeKind,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<Id>,
    #[serde(default)]
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inlined_at: Option<Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineSite {
    pub id: Id,
    /// Scope of the call site in the caller.
    pub scope: Id,
    #[serde(default)]
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceVariable {
    pub id: Id,
    pub name: String,
    pub scope: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<Id>,
    #[serde(default)]
    pub line: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugInfo {
    pub files: Vec<SourceFile>,
    pub scopes: Vec<DebugScope>,
    pub inline_sites: Vec<InlineSite>,
    pub variables: Vec<SourceVariable>,
}

impl DebugInfo {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.scopes.is_empty() && self.variables.is_empty()
    }

    pub fn file_path(&self, id: Id) -> Option<&str> {
        self.files.iter().find(|f| f.id == id).map(|f| f.path.as_str())
    }
}
