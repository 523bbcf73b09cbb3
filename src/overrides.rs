//! Detect whether a type overrides a hook it inherits.
//!
//! Hook-bearing types describe themselves with a [`TypeInfo`]: a name, a
//! kind, their base types and the methods they define. Each method points at
//! the [`CodeId`] of its body, so two entries are the same implementation
//! exactly when their code ids are equal.

use std::collections::BTreeMap;
use std::sync::Arc;

/// Identity of a function body, taken from its definition site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeId {
    file: &'static str,
    line: u32,
    column: u32,
}

impl CodeId {
    pub const fn new(file: &'static str, line: u32, column: u32) -> Self {
        Self { file, line, column }
    }
}

/// A [`CodeId`] for the place the macro is expanded.
#[macro_export]
macro_rules! code_id {
    () => {
        $crate::overrides::CodeId::new(file!(), line!(), column!())
    };
}

/// A method as exposed by a type or an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// A plain function body.
    Code(CodeId),
    /// Output of a decorator that keeps hold of the function it wraps.
    Wrapped { wrapper: CodeId, inner: Box<Method> },
    /// A test double, optionally delegating to a real method.
    Mock { wraps: Option<Box<Method>> },
    /// Another method with some arguments already bound.
    Partial(Box<Method>),
}

impl Method {
    pub fn wrapped(wrapper: CodeId, inner: Method) -> Self {
        Method::Wrapped {
            wrapper,
            inner: Box::new(inner),
        }
    }

    pub fn mock(wraps: Option<Method>) -> Self {
        Method::Mock {
            wraps: wraps.map(Box::new),
        }
    }

    pub fn partial(inner: Method) -> Self {
        Method::Partial(Box::new(inner))
    }

    /// The code that actually runs, looking through wrapping layers.
    ///
    /// A mock that wraps nothing has no underlying code.
    pub fn underlying_code(&self) -> Option<CodeId> {
        match self {
            Method::Code(id) => Some(*id),
            Method::Wrapped { inner, .. } => inner.underlying_code(),
            Method::Mock { wraps } => wraps.as_ref().and_then(|m| m.underlying_code()),
            Method::Partial(inner) => inner.underlying_code(),
        }
    }
}

/// Families of types that carry training hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Module,
    DataModule,
    Callback,
    Other,
}

impl TypeKind {
    fn has_hooks(self) -> bool {
        !matches!(self, TypeKind::Other)
    }
}

/// Description of a type: its bases and the methods it defines itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    name: String,
    kind: TypeKind,
    bases: Vec<Arc<TypeInfo>>,
    methods: BTreeMap<String, Method>,
}

impl TypeInfo {
    /// A type with no bases.
    pub fn root(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            bases: Vec::new(),
            methods: BTreeMap::new(),
        }
    }

    /// A type deriving from `base`, inheriting its kind.
    pub fn derive(name: impl Into<String>, base: &Arc<TypeInfo>) -> Self {
        Self {
            name: name.into(),
            kind: base.kind,
            bases: vec![Arc::clone(base)],
            methods: BTreeMap::new(),
        }
    }

    pub fn with_base(mut self, base: &Arc<TypeInfo>) -> Self {
        self.bases.push(Arc::clone(base));
        self
    }

    pub fn with_method(mut self, name: impl Into<String>, method: Method) -> Self {
        self.methods.insert(name.into(), method);
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn bases(&self) -> &[Arc<TypeInfo>] {
        &self.bases
    }

    /// Look up `name` on this type, then on its bases depth-first in
    /// declaration order.
    pub fn resolve(&self, name: &str) -> Option<&Method> {
        self.methods
            .get(name)
            .or_else(|| self.bases.iter().find_map(|base| base.resolve(name)))
    }
}

/// Something whose methods can be inspected.
pub trait Introspect {
    fn type_info(&self) -> Arc<TypeInfo>;

    /// The method as seen on this instance. Instances may replace a method
    /// (for example with a mock); by default the type's method is used.
    fn method(&self, name: &str) -> Option<Method> {
        self.type_info().resolve(name).cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideError {
    /// No parent was given and none could be inferred from the instance.
    MissingParent { type_name: String },
    /// None of the parents define the method.
    UndefinedInParents { method: String },
}

impl std::fmt::Display for OverrideError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverrideError::MissingParent { type_name } => {
                write!(f, "expected a parent type to compare {type_name} against")
            }
            OverrideError::UndefinedInParents { method } => {
                write!(f, "the parent should define the method `{method}`")
            }
        }
    }
}

impl std::error::Error for OverrideError {}

/// Whether `instance` overrides `method_name` relative to `parents`.
///
/// With no explicit parents, hook-bearing instances are compared against
/// the direct bases of their type. Wrapping layers (decorators, mocks,
/// partial application) are looked through before comparing. Returns
/// `false` for an absent instance or one that does not expose the method.
pub fn is_overridden(
    method_name: &str,
    instance: Option<&dyn Introspect>,
    parents: Option<&[Arc<TypeInfo>]>,
) -> Result<bool, OverrideError> {
    let Some(instance) = instance else {
        return Ok(false);
    };

    let inferred;
    let parents = match parents {
        Some(parents) => parents,
        None => {
            let info = instance.type_info();
            if !info.kind().has_hooks() || info.bases().is_empty() {
                return Err(OverrideError::MissingParent {
                    type_name: info.name().to_string(),
                });
            }
            inferred = info.bases().to_vec();
            &inferred[..]
        }
    };

    let Some(instance_code) = instance
        .method(method_name)
        .and_then(|m| m.underlying_code())
    else {
        return Ok(false);
    };

    let parent_methods: Vec<&Method> = parents
        .iter()
        .filter_map(|p| p.resolve(method_name))
        .collect();
    if parent_methods.is_empty() {
        return Err(OverrideError::UndefinedInParents {
            method: method_name.to_string(),
        });
    }

    Ok(parent_methods
        .iter()
        .filter_map(|m| m.underlying_code())
        .any(|parent_code| parent_code != instance_code))
}
