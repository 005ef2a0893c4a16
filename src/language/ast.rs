use crate::language::{
    span::Span,
    types::{EntityRef, Param, TypeExpr},
};
use crate::project::manifest::Manifest;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Name of the pseudo node exposing a component's own inports inside its network.
pub const SELF_IN: &str = "in";
/// Name of the pseudo node exposing a component's own outports inside its network.
pub const SELF_OUT: &str = "out";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    #[serde(default)]
    pub manifest: Manifest,
    pub packages: BTreeMap<String, Package>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Package {
    pub files: BTreeMap<String, File>,
}

impl Package {
    /// Looks an entity up across every file of the package.
    pub fn entity(&self, name: &str) -> Option<(&Entity, &str)> {
        self.files.iter().find_map(|(file_name, file)| {
            file.entities
                .get(name)
                .map(|entity| (entity, file_name.as_str()))
        })
    }

    pub fn entities(&self) -> impl Iterator<Item = (&str, &str, &Entity)> {
        self.files.iter().flat_map(|(file_name, file)| {
            file.entities
                .iter()
                .map(move |(name, entity)| (file_name.as_str(), name.as_str(), entity))
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct File {
    /// Import alias to package path.
    #[serde(default)]
    pub imports: BTreeMap<String, String>,
    #[serde(default)]
    pub entities: BTreeMap<String, Entity>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default)]
    pub exported: bool,
    pub decl: Decl,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        self.decl.kind()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decl {
    Type(TypeDef),
    Const(Const),
    Interface(Interface),
    Component(Component),
}

impl Decl {
    pub fn kind(&self) -> EntityKind {
        match self {
            Decl::Type(_) => EntityKind::Type,
            Decl::Const(_) => EntityKind::Const,
            Decl::Interface(_) => EntityKind::Interface,
            Decl::Component(_) => EntityKind::Component,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Type,
    Const,
    Interface,
    Component,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Type => "type",
            EntityKind::Const => "const",
            EntityKind::Interface => "interface",
            EntityKind::Component => "component",
        };
        f.write_str(name)
    }
}

/// Type declaration. A missing body declares a base type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<TypeExpr>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Const {
    pub value: ConstValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstValue {
    Ref(EntityRef),
    Message(Message),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub type_expr: TypeExpr,
    pub value: Literal,
}

/// Constant payload; carried through analysis untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    EnumMember(String),
    List(Vec<Literal>),
    Map(BTreeMap<String, Literal>),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub io: Io,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Io {
    #[serde(default)]
    pub inports: BTreeMap<String, Port>,
    #[serde(default)]
    pub outports: BTreeMap<String, Port>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub type_expr: TypeExpr,
    #[serde(default)]
    pub is_array: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl Port {
    pub fn new(type_expr: TypeExpr) -> Self {
        Self {
            type_expr,
            is_array: false,
            span: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub interface: Interface,
    #[serde(default)]
    pub directives: Directives,
    #[serde(default)]
    pub nodes: BTreeMap<String, Node>,
    #[serde(default)]
    pub net: Vec<Connection>,
}

impl Component {
    pub fn is_extern(&self) -> bool {
        self.directives.contains_key(&Directive::Extern)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    /// Component is implemented by the runtime; arguments name the overloads.
    Extern,
    /// Node binds a runtime message to an extern component.
    Bind,
    /// Component synthesizes its inports from a record type argument.
    Autoports,
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Directive::Extern => "extern",
            Directive::Bind => "bind",
            Directive::Autoports => "autoports",
        };
        f.write_str(name)
    }
}

pub type Directives = BTreeMap<Directive, Vec<String>>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub entity_ref: EntityRef,
    #[serde(default)]
    pub type_args: Vec<TypeExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deps: Option<BTreeMap<String, Node>>,
    #[serde(default)]
    pub directives: Directives,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl Node {
    pub fn new(entity_ref: EntityRef, type_args: Vec<TypeExpr>) -> Self {
        Self {
            entity_ref,
            type_args,
            deps: None,
            directives: Directives::new(),
            span: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub sender: SenderSide,
    pub receivers: Vec<ReceiverSide>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SenderSide {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_addr: Option<PortAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub const_ref: Option<EntityRef>,
    /// Record field path applied to the sent message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selectors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl SenderSide {
    pub fn port(node: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            port_addr: Some(PortAddr::new(node, port)),
            ..Self::default()
        }
    }

    pub fn constant(reference: EntityRef) -> Self {
        Self {
            const_ref: Some(reference),
            ..Self::default()
        }
    }

    pub fn with_selectors<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selectors = selectors.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReceiverSide {
    pub port_addr: PortAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl ReceiverSide {
    pub fn port(node: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            port_addr: PortAddr::new(node, port),
            span: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortAddr {
    pub node: String,
    pub port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl PortAddr {
    pub fn new(node: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            port: port.into(),
            index: None,
            span: None,
        }
    }
}

impl fmt::Display for PortAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.port)?;
        if let Some(index) = self.index {
            write!(f, "[{index}]")?;
        }
        Ok(())
    }
}

impl fmt::Display for SenderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.port_addr, &self.const_ref) {
            (Some(addr), _) => write!(f, "{addr}")?,
            (None, Some(reference)) => write!(f, "${reference}")?,
            (None, None) => f.write_str("<empty>")?,
        }
        for selector in &self.selectors {
            write!(f, ".{selector}")?;
        }
        Ok(())
    }
}
