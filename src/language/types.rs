use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Reference to a named entity. `package` is an import alias of the referring
/// file, unless `canonical` is set: resolved references name the defining
/// package itself and are never looked up through the import table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub canonical: bool,
}

impl EntityRef {
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            package: None,
            name: name.into(),
            canonical: false,
        }
    }

    /// Reference through an import alias, as written in source.
    pub fn qualified(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: Some(package.into()),
            name: name.into(),
            canonical: false,
        }
    }

    /// Reference to `name` in the package that defines it.
    pub fn canonical(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: Some(package.into()),
            name: name.into(),
            canonical: true,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.package {
            Some(package) => write!(f, "{package}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeExpr {
    Inst(Inst),
    Lit(LitExpr),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inst {
    pub reference: EntityRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<TypeExpr>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LitExpr {
    Array { size: usize, elem: Box<TypeExpr> },
    Enum(Vec<String>),
    Record(BTreeMap<String, TypeExpr>),
    Union(Vec<TypeExpr>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LitKind {
    Array,
    Enum,
    Record,
    Union,
}

impl fmt::Display for LitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LitKind::Array => "array",
            LitKind::Enum => "enum",
            LitKind::Record => "record",
            LitKind::Union => "union",
        };
        f.write_str(name)
    }
}

impl LitExpr {
    pub fn kind(&self) -> LitKind {
        match self {
            LitExpr::Array { .. } => LitKind::Array,
            LitExpr::Enum(_) => LitKind::Enum,
            LitExpr::Record(_) => LitKind::Record,
            LitExpr::Union(_) => LitKind::Union,
        }
    }
}

impl TypeExpr {
    pub fn named(name: impl Into<String>) -> Self {
        TypeExpr::Inst(Inst {
            reference: EntityRef::local(name),
            args: Vec::new(),
        })
    }

    pub fn inst(reference: EntityRef, args: Vec<TypeExpr>) -> Self {
        TypeExpr::Inst(Inst { reference, args })
    }

    pub fn array(size: usize, elem: TypeExpr) -> Self {
        TypeExpr::Lit(LitExpr::Array {
            size,
            elem: Box::new(elem),
        })
    }

    pub fn enumeration<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TypeExpr::Lit(LitExpr::Enum(labels.into_iter().map(Into::into).collect()))
    }

    pub fn record<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, TypeExpr)>,
        S: Into<String>,
    {
        TypeExpr::Lit(LitExpr::Record(
            fields
                .into_iter()
                .map(|(name, ty)| (name.into(), ty))
                .collect(),
        ))
    }

    pub fn union(members: Vec<TypeExpr>) -> Self {
        TypeExpr::Lit(LitExpr::Union(members))
    }

    pub fn as_inst(&self) -> Option<&Inst> {
        match self {
            TypeExpr::Inst(inst) => Some(inst),
            TypeExpr::Lit(_) => None,
        }
    }

    pub fn as_record(&self) -> Option<&BTreeMap<String, TypeExpr>> {
        match self {
            TypeExpr::Lit(LitExpr::Record(fields)) => Some(fields),
            _ => None,
        }
    }

    pub fn is_union(&self) -> bool {
        matches!(self, TypeExpr::Lit(LitExpr::Union(_)))
    }

    /// Whether `reference` is instantiated anywhere inside this expression.
    pub fn mentions(&self, reference: &EntityRef) -> bool {
        match self {
            TypeExpr::Inst(inst) => {
                &inst.reference == reference || inst.args.iter().any(|arg| arg.mentions(reference))
            }
            TypeExpr::Lit(LitExpr::Array { elem, .. }) => elem.mentions(reference),
            TypeExpr::Lit(LitExpr::Enum(_)) => false,
            TypeExpr::Lit(LitExpr::Record(fields)) => {
                fields.values().any(|field| field.mentions(reference))
            }
            TypeExpr::Lit(LitExpr::Union(members)) => {
                members.iter().any(|member| member.mentions(reference))
            }
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Inst(inst) => write!(f, "{inst}"),
            TypeExpr::Lit(lit) => write!(f, "{lit}"),
        }
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference)?;
        if self.args.is_empty() {
            return Ok(());
        }
        let rendered: Vec<String> = self.args.iter().map(ToString::to_string).collect();
        write!(f, "<{}>", rendered.join(", "))
    }
}

impl fmt::Display for LitExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LitExpr::Array { size, elem } => write!(f, "[{size}]{elem}"),
            LitExpr::Enum(labels) => write!(f, "enum {{{}}}", labels.join(", ")),
            LitExpr::Record(fields) => {
                let rendered: Vec<String> = fields
                    .iter()
                    .map(|(name, ty)| format!("{name} {ty}"))
                    .collect();
                write!(f, "{{{}}}", rendered.join(", "))
            }
            LitExpr::Union(members) => {
                let rendered: Vec<String> = members.iter().map(ToString::to_string).collect();
                f.write_str(&rendered.join(" | "))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<TypeExpr>,
}

impl Param {
    pub fn new(name: impl Into<String>, constraint: Option<TypeExpr>) -> Self {
        Self {
            name: name.into(),
            constraint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_nested_literals() {
        let ty = TypeExpr::record([
            ("items", TypeExpr::array(3, TypeExpr::named("int"))),
            (
                "tag",
                TypeExpr::union(vec![TypeExpr::named("int"), TypeExpr::named("string")]),
            ),
        ]);
        assert_eq!(ty.to_string(), "{items [3]int, tag int | string}");
    }

    #[test]
    fn mentions_walks_instantiation_args() {
        let tree = EntityRef::canonical("main", "tree");
        let ty = TypeExpr::record([(
            "children",
            TypeExpr::inst(
                EntityRef::local("list"),
                vec![TypeExpr::inst(tree.clone(), Vec::new())],
            ),
        )]);
        assert!(ty.mentions(&tree));
        assert!(!ty.mentions(&EntityRef::local("tree")));
        assert!(!ty.mentions(&EntityRef::qualified("main", "tree")));
    }
}
