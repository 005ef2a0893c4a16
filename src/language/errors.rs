use crate::language::{
    ast::{Directive, EntityKind},
    scope::Location,
    span::Span,
    typesystem::SubtypeError,
    types::EntityRef,
};
use std::fmt;
use thiserror::Error;

pub type AnalyzerResult<T> = Result<T, AnalyzerError>;

/// A failure cause plus the stack of locations it surfaced through,
/// ordered outermost first.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("{kind}")]
pub struct AnalyzerError {
    pub kind: ErrorKind,
    pub frames: Vec<Frame>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub location: Location,
    pub span: Option<Span>,
    pub subject: Option<Subject>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subject {
    Package(String),
    Entity(String),
    Node(String),
    Connection(String),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Package(name) => write!(f, "package `{name}`"),
            Subject::Entity(name) => write!(f, "entity `{name}`"),
            Subject::Node(name) => write!(f, "node `{name}`"),
            Subject::Connection(conn) => write!(f, "connection `{conn}`"),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.location)?;
        if let Some(subject) = &self.subject {
            write!(f, " ({subject})")?;
        }
        if let Some(span) = self.span {
            write!(f, " @{}..{}", span.start, span.end)?;
        }
        Ok(())
    }
}

impl AnalyzerError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            frames: Vec::new(),
        }
    }

    pub fn at(kind: ErrorKind, location: &Location, span: Option<Span>) -> Self {
        Self {
            kind,
            frames: vec![Frame {
                location: location.clone(),
                span,
                subject: None,
            }],
        }
    }

    /// Records an enclosing frame. A frame equal to the current outermost one
    /// is folded into it instead of being repeated.
    pub fn within(
        mut self,
        location: &Location,
        span: Option<Span>,
        subject: Option<Subject>,
    ) -> Self {
        if let Some(outer) = self.frames.first_mut() {
            let same_place = outer.location == *location
                && (outer.span == span || span.is_none() || outer.span.is_none());
            let same_subject = subject.is_none() || outer.subject.is_none() || outer.subject == subject;
            if same_place && same_subject {
                if outer.span.is_none() {
                    outer.span = span;
                }
                if outer.subject.is_none() {
                    outer.subject = subject;
                }
                return self;
            }
        }
        self.frames.insert(
            0,
            Frame {
                location: location.clone(),
                span,
                subject,
            },
        );
        self
    }

    /// Innermost frame that carries a source span.
    pub fn primary_frame(&self) -> Option<&Frame> {
        self.frames
            .iter()
            .rev()
            .find(|frame| frame.span.is_some())
            .or_else(|| self.frames.last())
    }

    pub fn location(&self) -> Option<&Location> {
        self.primary_frame().map(|frame| &frame.location)
    }
}

impl From<ErrorKind> for AnalyzerError {
    fn from(kind: ErrorKind) -> Self {
        AnalyzerError::new(kind)
    }
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum ErrorKind {
    #[error("package `{package}` not found")]
    PackageNotFound { package: String },
    #[error("import `{alias}` not found")]
    ImportNotFound { alias: String },
    #[error("entity `{reference}` not found")]
    EntityNotFound { reference: EntityRef },
    #[error("entity `{reference}` is not exported")]
    EntityNotExported { reference: EntityRef },
    #[error("entity `{name}` is declared in both `{first}` and `{second}`")]
    DuplicateEntity {
        name: String,
        first: String,
        second: String,
    },
    #[error("`{reference}` is a {actual}, expected {expected}")]
    WrongEntityKind {
        reference: EntityRef,
        expected: &'static str,
        actual: EntityKind,
    },
    #[error("node `{node}` not found")]
    NodeNotFound { node: String },
    #[error("port `{node}:{port}` not found")]
    PortNotFound { node: String, port: String },

    #[error("`{reference}` expects {expected} type arguments, got {got}")]
    TypeArgsCount {
        reference: String,
        expected: usize,
        got: usize,
    },
    #[error("directive `{directive}` expects {expected} arguments, got {got}")]
    DirectiveArgsCount {
        directive: Directive,
        expected: usize,
        got: usize,
    },

    #[error("duplicate type parameter `{name}`")]
    DuplicateTypeParam { name: String },
    #[error("type argument `{arg}` does not satisfy the constraint of `{param}`: {source}")]
    ConstraintViolation {
        param: String,
        arg: String,
        #[source]
        source: SubtypeError,
    },
    #[error("recursive reference `{reference}` does not name a type")]
    TraceNotType { reference: EntityRef },
    #[error("const `{reference}` refers back to itself")]
    ConstCycle { reference: EntityRef },

    #[error("interface must declare at least one inport")]
    NoInports,
    #[error("interface must declare at least one outport")]
    NoOutports,
    #[error("extern component must not declare nodes or connections")]
    ExternWithNetwork,

    #[error("node name `{name}` is reserved")]
    ReservedNodeName { name: String },
    #[error("node of an interface cannot use the `{directive}` directive")]
    InterfaceNodeDirective { directive: Directive },
    #[error("node of an interface cannot have dependencies")]
    InterfaceNodeDeps,
    #[error("`bind` directive requires an extern component")]
    BindWithoutExtern,
    #[error("extern component with {overloads} overloads needs exactly one type argument, got {got}")]
    ExternOverloadTypeArgs { overloads: usize, got: usize },
    #[error("autoports component must not declare inports")]
    AutoportsWithInports,
    #[error("autoports component must have exactly one type parameter, got {got}")]
    AutoportsTypeParams { got: usize },
    #[error("autoports type parameter must be constrained by a record, got `{constraint}`")]
    AutoportsConstraint { constraint: String },
    #[error("autoports node must pass exactly one type argument, got {got}")]
    AutoportsTypeArgs { got: usize },
    #[error("autoports type argument must be a record, got `{arg}`")]
    AutoportsArgNotRecord { arg: String },

    #[error("connection sender is empty")]
    EmptySender,
    #[error("component cannot read its own outport `{port}`")]
    ReadSelfOut { port: String },
    #[error("component cannot write its own inport `{port}`")]
    WriteSelfIn { port: String },
    #[error("port `{addr}` is indexed but is not an array port")]
    NotArrayPort { addr: String },
    #[error("field `{field}` not found in `{ty}`")]
    FieldNotFound { field: String, ty: String },
    #[error("cannot select `{field}` from non-record type `{ty}`")]
    NotARecord { field: String, ty: String },
    #[error("`{sender}` cannot be sent to `{receiver}`: {source}")]
    IncompatibleConnection {
        sender: String,
        receiver: String,
        #[source]
        source: SubtypeError,
    },
    #[error("node `{node}` is not used")]
    UnusedNode { node: String },
    #[error("inport `{port}` of node `{node}` is not used")]
    UnusedInport { node: String, port: String },
    #[error("none of the outports of node `{node}` is used")]
    UnusedOutports { node: String },

    #[error("entry package `{package}` not found")]
    EntryPackageNotFound { package: String },
    #[error("entry component `{name}` not found")]
    EntryNotFound { name: String },
    #[error("entry entity `{name}` is a {kind}, expected component")]
    EntryNotComponent { name: String, kind: EntityKind },
    #[error("entry component `{name}` must not be exported")]
    EntryExported { name: String },
    #[error("entry component `{name}` must not declare type parameters")]
    EntryGeneric { name: String },
    #[error("entry package must not export `{entity}` (file `{file}`)")]
    EntryPackageExports { entity: String, file: String },
}
