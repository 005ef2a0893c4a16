use crate::language::{
    ast::Decl,
    errors::{AnalyzerError, AnalyzerResult, ErrorKind},
    scope::Scope,
    types::EntityRef,
};
use std::{fmt, rc::Rc};

/// Immutable, backward-linked chain of the references visited on the way to
/// the current one. Cloning shares the chain.
#[derive(Clone, Debug, Default)]
pub struct Trace {
    head: Option<Rc<TraceNode>>,
}

#[derive(Debug)]
struct TraceNode {
    reference: EntityRef,
    prev: Trace,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reference: EntityRef) -> Trace {
        Trace {
            head: Some(Rc::new(TraceNode {
                reference,
                prev: self.clone(),
            })),
        }
    }

    pub fn head(&self) -> Option<&EntityRef> {
        self.head.as_ref().map(|node| &node.reference)
    }

    /// Newest reference first.
    pub fn iter(&self) -> TraceIter<'_> {
        TraceIter {
            next: self.head.as_deref(),
        }
    }

    pub fn contains(&self, reference: &EntityRef) -> bool {
        self.iter().any(|visited| visited == reference)
    }

    /// Whether the newest reference already appears earlier in the chain.
    pub fn is_repeated(&self) -> bool {
        match self.head.as_deref() {
            Some(node) => node.prev.contains(&node.reference),
            None => false,
        }
    }
}

pub struct TraceIter<'a> {
    next: Option<&'a TraceNode>,
}

impl<'a> Iterator for TraceIter<'a> {
    type Item = &'a EntityRef;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next?;
        self.next = node.prev.head.as_deref();
        Some(&node.reference)
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut refs: Vec<String> = self.iter().map(ToString::to_string).collect();
        refs.reverse();
        write!(f, "[{}]", refs.join(", "))
    }
}

/// Decides when expanding a type reference has gone around a cycle.
#[derive(Clone, Copy, Debug, Default)]
pub struct Terminator;

impl Terminator {
    /// A trace terminates when its newest reference was already visited and
    /// names a type alias. Repeated base types (`list<list<int>>`) never loop.
    pub fn should_terminate(&self, trace: &Trace, scope: &Scope<'_>) -> AnalyzerResult<bool> {
        if !trace.is_repeated() {
            return Ok(false);
        }
        let Some(reference) = trace.head() else {
            return Ok(false);
        };
        let (entity, _) = scope.entity(reference)?;
        match &entity.decl {
            Decl::Type(def) => Ok(def.body.is_some()),
            _ => Err(AnalyzerError::at(
                ErrorKind::TraceNotType {
                    reference: reference.clone(),
                },
                &scope.location,
                None,
            )),
        }
    }
}
