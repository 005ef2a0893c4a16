use super::{Resolver, Terminator, Trace};
use crate::language::{
    errors::AnalyzerError,
    scope::Scope,
    types::{Inst, LitExpr, LitKind, TypeExpr},
};
use std::{collections::BTreeMap, rc::Rc};
use thiserror::Error;

/// Ambient state for one subtype check: the scope used to unfold aliases and
/// the references already visited on each side.
#[derive(Clone, Debug)]
pub struct TerminatorParams<'p> {
    pub scope: &'p Scope<'p>,
    pub candidate_trace: Trace,
    pub constraint_trace: Trace,
}

impl<'p> TerminatorParams<'p> {
    pub fn new(scope: &'p Scope<'p>) -> Self {
        Self {
            scope,
            candidate_trace: Trace::new(),
            constraint_trace: Trace::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum SubtypeError {
    #[error("expected {constraint}, got {candidate}")]
    DiffKinds { candidate: String, constraint: String },
    #[error("`{candidate}` is not `{constraint}`")]
    DiffRefs { candidate: String, constraint: String },
    #[error("expected at least {constraint} type arguments, got {candidate}")]
    ArgsCount { candidate: usize, constraint: usize },
    #[error("type argument #{index}: {source}")]
    ArgNotSubtype {
        index: usize,
        #[source]
        source: Box<SubtypeError>,
    },
    #[error("expected {constraint} literal, got {candidate}")]
    DiffLitKinds { candidate: LitKind, constraint: LitKind },
    #[error("array of size {candidate} is smaller than {constraint}")]
    ArraySize { candidate: usize, constraint: usize },
    #[error("array element: {0}")]
    ArrayElement(#[source] Box<SubtypeError>),
    #[error("enum has {candidate} labels, more than {constraint}")]
    EnumTooBig { candidate: usize, constraint: usize },
    #[error("enum label #{index} is `{got}`, expected `{want}`")]
    EnumLabel {
        index: usize,
        got: String,
        want: String,
    },
    #[error("record is missing field `{field}`")]
    RecordMissingField { field: String },
    #[error("field `{field}`: {source}")]
    RecordField {
        field: String,
        #[source]
        source: Box<SubtypeError>,
    },
    #[error("`{candidate}` is not a member of `{constraint}`")]
    NotInUnion { candidate: String, constraint: String },
    #[error("union has {candidate} members, more than {constraint}")]
    UnionTooBig { candidate: usize, constraint: usize },
    #[error("union member `{member}` is not a member of `{constraint}`")]
    UnionMember { member: String, constraint: String },
    #[error("{0}")]
    Lookup(String),
}

impl From<AnalyzerError> for SubtypeError {
    fn from(err: AnalyzerError) -> Self {
        SubtypeError::Lookup(err.to_string())
    }
}

/// Mixed instantiation/literal comparisons already in progress further up.
/// Meeting one again closes a cycle, so it holds.
#[derive(Clone, Debug, Default)]
struct Assumed {
    head: Option<Rc<AssumedPair>>,
}

#[derive(Debug)]
struct AssumedPair {
    candidate: TypeExpr,
    constraint: TypeExpr,
    prev: Assumed,
}

impl Assumed {
    fn push(&self, candidate: &TypeExpr, constraint: &TypeExpr) -> Assumed {
        Assumed {
            head: Some(Rc::new(AssumedPair {
                candidate: candidate.clone(),
                constraint: constraint.clone(),
                prev: self.clone(),
            })),
        }
    }

    fn contains(&self, candidate: &TypeExpr, constraint: &TypeExpr) -> bool {
        let mut next = self.head.as_deref();
        while let Some(pair) = next {
            if &pair.candidate == candidate && &pair.constraint == constraint {
                return true;
            }
            next = pair.prev.head.as_deref();
        }
        false
    }
}

/// Structural subtyping over resolved type expressions.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubtypeChecker {
    terminator: Terminator,
}

impl SubtypeChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Succeeds when every value of `candidate` is acceptable where
    /// `constraint` is expected. Both sides must already be resolved.
    pub fn check(
        &self,
        candidate: &TypeExpr,
        constraint: &TypeExpr,
        params: &TerminatorParams<'_>,
    ) -> Result<(), SubtypeError> {
        self.check_traced(
            candidate,
            constraint,
            params.scope,
            &params.candidate_trace,
            &params.constraint_trace,
            &Assumed::default(),
        )
    }

    fn check_traced(
        &self,
        candidate: &TypeExpr,
        constraint: &TypeExpr,
        scope: &Scope<'_>,
        ct: &Trace,
        st: &Trace,
        seen: &Assumed,
    ) -> Result<(), SubtypeError> {
        if scope.is_top_type(constraint) {
            return Ok(());
        }
        match (candidate, constraint) {
            (TypeExpr::Inst(cand), TypeExpr::Inst(constr)) => {
                self.check_insts(cand, constr, scope, ct, st, seen)
            }
            (TypeExpr::Inst(cand), TypeExpr::Lit(constr)) => {
                if let LitExpr::Union(members) = constr {
                    if self.any_member(candidate, members, scope, ct, st, seen) {
                        return Ok(());
                    }
                }
                if seen.contains(candidate, constraint) {
                    return Ok(());
                }
                match Resolver::default().unfold(cand, scope)? {
                    Some(unfolded) => {
                        let ct = ct.push(cand.reference.clone());
                        let seen = seen.push(candidate, constraint);
                        self.check_traced(&unfolded, constraint, scope, &ct, st, &seen)
                    }
                    None if constr.kind() == LitKind::Union => Err(SubtypeError::NotInUnion {
                        candidate: candidate.to_string(),
                        constraint: constraint.to_string(),
                    }),
                    None => Err(diff_kinds(candidate, constraint)),
                }
            }
            (TypeExpr::Lit(_), TypeExpr::Inst(constr)) => {
                if seen.contains(candidate, constraint) {
                    return Ok(());
                }
                match Resolver::default().unfold(constr, scope)? {
                    Some(unfolded) => {
                        let st = st.push(constr.reference.clone());
                        let seen = seen.push(candidate, constraint);
                        self.check_traced(candidate, &unfolded, scope, ct, &st, &seen)
                    }
                    None => Err(diff_kinds(candidate, constraint)),
                }
            }
            (TypeExpr::Lit(cand), TypeExpr::Lit(constr)) => {
                self.check_lits(cand, constr, scope, ct, st, seen)
            }
        }
    }

    fn check_insts(
        &self,
        candidate: &Inst,
        constraint: &Inst,
        scope: &Scope<'_>,
        ct: &Trace,
        st: &Trace,
        seen: &Assumed,
    ) -> Result<(), SubtypeError> {
        let cand_trace = ct.push(candidate.reference.clone());
        let constr_trace = st.push(constraint.reference.clone());
        let cand_recursive = self.terminator.should_terminate(&cand_trace, scope)?;
        let constr_recursive = self.terminator.should_terminate(&constr_trace, scope)?;

        // Two cycles closing at once are taken as equal. Only monomorphic
        // occurrences qualify; generic ones still compare their arguments.
        if cand_recursive
            && constr_recursive
            && candidate.args.is_empty()
            && constraint.args.is_empty()
        {
            return Ok(());
        }

        if candidate.reference == constraint.reference {
            if candidate.args.len() < constraint.args.len() {
                return Err(SubtypeError::ArgsCount {
                    candidate: candidate.args.len(),
                    constraint: constraint.args.len(),
                });
            }
            for (index, (cand_arg, constr_arg)) in
                candidate.args.iter().zip(&constraint.args).enumerate()
            {
                self.check_traced(cand_arg, constr_arg, scope, &cand_trace, &constr_trace, seen)
                    .map_err(|source| SubtypeError::ArgNotSubtype {
                        index,
                        source: Box::new(source),
                    })?;
            }
            return Ok(());
        }

        if !cand_recursive {
            if let Some(unfolded) = self.unfold(candidate, scope, &cand_trace)? {
                let constraint = TypeExpr::Inst(constraint.clone());
                return self.check_traced(&unfolded, &constraint, scope, &cand_trace, st, seen);
            }
        }
        if !constr_recursive {
            if let Some(unfolded) = self.unfold(constraint, scope, &constr_trace)? {
                let candidate = TypeExpr::Inst(candidate.clone());
                return self.check_traced(&candidate, &unfolded, scope, ct, &constr_trace, seen);
            }
        }

        Err(SubtypeError::DiffRefs {
            candidate: candidate.to_string(),
            constraint: constraint.to_string(),
        })
    }

    fn check_lits(
        &self,
        candidate: &LitExpr,
        constraint: &LitExpr,
        scope: &Scope<'_>,
        ct: &Trace,
        st: &Trace,
        seen: &Assumed,
    ) -> Result<(), SubtypeError> {
        if let LitExpr::Union(constr_members) = constraint {
            return self.check_union(candidate, constr_members, scope, ct, st, seen);
        }
        match (candidate, constraint) {
            (
                LitExpr::Array { size, elem },
                LitExpr::Array {
                    size: constr_size,
                    elem: constr_elem,
                },
            ) => {
                if size < constr_size {
                    return Err(SubtypeError::ArraySize {
                        candidate: *size,
                        constraint: *constr_size,
                    });
                }
                self.check_traced(elem, constr_elem, scope, ct, st, seen)
                    .map_err(|source| SubtypeError::ArrayElement(Box::new(source)))
            }
            (LitExpr::Enum(labels), LitExpr::Enum(constr_labels)) => {
                if labels.len() > constr_labels.len() {
                    return Err(SubtypeError::EnumTooBig {
                        candidate: labels.len(),
                        constraint: constr_labels.len(),
                    });
                }
                for (index, (got, want)) in labels.iter().zip(constr_labels).enumerate() {
                    if got != want {
                        return Err(SubtypeError::EnumLabel {
                            index,
                            got: got.clone(),
                            want: want.clone(),
                        });
                    }
                }
                Ok(())
            }
            (LitExpr::Record(fields), LitExpr::Record(constr_fields)) => {
                self.check_record(fields, constr_fields, scope, ct, st, seen)
            }
            _ => Err(SubtypeError::DiffLitKinds {
                candidate: candidate.kind(),
                constraint: constraint.kind(),
            }),
        }
    }

    fn check_record(
        &self,
        fields: &BTreeMap<String, TypeExpr>,
        constr_fields: &BTreeMap<String, TypeExpr>,
        scope: &Scope<'_>,
        ct: &Trace,
        st: &Trace,
        seen: &Assumed,
    ) -> Result<(), SubtypeError> {
        for (name, constr_field) in constr_fields {
            let field = fields
                .get(name)
                .ok_or_else(|| SubtypeError::RecordMissingField { field: name.clone() })?;
            self.check_traced(field, constr_field, scope, ct, st, seen)
                .map_err(|source| SubtypeError::RecordField {
                    field: name.clone(),
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }

    fn check_union(
        &self,
        candidate: &LitExpr,
        constr_members: &[TypeExpr],
        scope: &Scope<'_>,
        ct: &Trace,
        st: &Trace,
        seen: &Assumed,
    ) -> Result<(), SubtypeError> {
        let render_constraint = || TypeExpr::union(constr_members.to_vec()).to_string();
        let LitExpr::Union(members) = candidate else {
            let candidate = TypeExpr::Lit(candidate.clone());
            if self.any_member(&candidate, constr_members, scope, ct, st, seen) {
                return Ok(());
            }
            return Err(SubtypeError::NotInUnion {
                candidate: candidate.to_string(),
                constraint: render_constraint(),
            });
        };
        if members.len() > constr_members.len() {
            return Err(SubtypeError::UnionTooBig {
                candidate: members.len(),
                constraint: constr_members.len(),
            });
        }
        for member in members {
            if !self.any_member(member, constr_members, scope, ct, st, seen) {
                return Err(SubtypeError::UnionMember {
                    member: member.to_string(),
                    constraint: render_constraint(),
                });
            }
        }
        Ok(())
    }

    fn any_member(
        &self,
        candidate: &TypeExpr,
        members: &[TypeExpr],
        scope: &Scope<'_>,
        ct: &Trace,
        st: &Trace,
        seen: &Assumed,
    ) -> bool {
        members
            .iter()
            .any(|member| self.check_traced(candidate, member, scope, ct, st, seen).is_ok())
    }

    /// One level of alias expansion between two instantiations, unless the
    /// trace already closed a cycle.
    fn unfold(
        &self,
        inst: &Inst,
        scope: &Scope<'_>,
        trace: &Trace,
    ) -> Result<Option<TypeExpr>, SubtypeError> {
        if self.terminator.should_terminate(trace, scope)? {
            return Ok(None);
        }
        Ok(Resolver::default().unfold(inst, scope)?)
    }
}

fn diff_kinds(candidate: &TypeExpr, constraint: &TypeExpr) -> SubtypeError {
    SubtypeError::DiffKinds {
        candidate: candidate.to_string(),
        constraint: constraint.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::types::{EntityRef, Param};
    use crate::tests::fixtures::{int, list, named, string, ModuleBuilder};

    fn check(module: &crate::language::ast::Module, cand: &TypeExpr, constr: &TypeExpr) -> Result<(), SubtypeError> {
        let scope = ModuleBuilder::scope(module, "main");
        SubtypeChecker::new().check(cand, constr, &TerminatorParams::new(&scope))
    }

    #[test]
    fn top_type_accepts_anything() {
        let module = ModuleBuilder::new().build();
        let any = TypeExpr::inst(EntityRef::canonical("builtin", "any"), Vec::new());
        assert!(check(&module, &TypeExpr::array(2, int()), &any).is_ok());
        assert!(check(&module, &list(string()), &any).is_ok());
    }

    #[test]
    fn arrays_are_covariant_and_shrink_only() {
        let module = ModuleBuilder::new().build();
        let small = TypeExpr::array(3, int());
        let big = TypeExpr::array(5, int());
        assert_eq!(
            check(&module, &small, &big),
            Err(SubtypeError::ArraySize {
                candidate: 3,
                constraint: 5
            })
        );
        assert!(check(&module, &big, &small).is_ok());
        assert!(matches!(
            check(&module, &TypeExpr::array(5, string()), &small),
            Err(SubtypeError::ArrayElement(_))
        ));
    }

    #[test]
    fn records_allow_extra_fields() {
        let module = ModuleBuilder::new().build();
        let wide = TypeExpr::record([("a", int()), ("b", string())]);
        assert!(check(&module, &wide, &TypeExpr::record([("a", int())])).is_ok());
        assert_eq!(
            check(
                &module,
                &wide,
                &TypeExpr::record([("a", int()), ("c", named_builtin("bool"))])
            ),
            Err(SubtypeError::RecordMissingField { field: "c".into() })
        );
        assert!(matches!(
            check(&module, &wide, &TypeExpr::record([("b", int())])),
            Err(SubtypeError::RecordField { ref field, .. }) if field == "b"
        ));
    }

    #[test]
    fn enums_must_be_label_prefixes() {
        let module = ModuleBuilder::new().build();
        let rgb = TypeExpr::enumeration(["red", "green", "blue"]);
        assert!(check(&module, &TypeExpr::enumeration(["red", "green"]), &rgb).is_ok());
        assert!(matches!(
            check(&module, &TypeExpr::enumeration(["red", "blue"]), &rgb),
            Err(SubtypeError::EnumLabel { index: 1, .. })
        ));
        assert!(matches!(
            check(&module, &rgb, &TypeExpr::enumeration(["red"])),
            Err(SubtypeError::EnumTooBig { .. })
        ));
    }

    #[test]
    fn unions_accept_members_and_smaller_unions() {
        let module = ModuleBuilder::new().build();
        let int_or_string = TypeExpr::union(vec![int(), string()]);
        assert!(check(&module, &int(), &int_or_string).is_ok());
        assert!(check(&module, &TypeExpr::union(vec![string()]), &int_or_string).is_ok());
        assert!(matches!(
            check(&module, &int_or_string, &TypeExpr::union(vec![int()])),
            Err(SubtypeError::UnionTooBig { .. })
        ));
        assert!(matches!(
            check(&module, &named_builtin("float"), &int_or_string),
            Err(SubtypeError::NotInUnion { .. })
        ));
    }

    #[test]
    fn mismatched_kinds_and_refs_fail() {
        let module = ModuleBuilder::new().build();
        assert!(matches!(
            check(&module, &string(), &int()),
            Err(SubtypeError::DiffRefs { .. })
        ));
        assert!(matches!(
            check(&module, &int(), &TypeExpr::record([("a", int())])),
            Err(SubtypeError::DiffKinds { .. })
        ));
        assert!(matches!(
            check(&module, &TypeExpr::enumeration(["a"]), &TypeExpr::array(1, int())),
            Err(SubtypeError::DiffLitKinds {
                candidate: LitKind::Enum,
                constraint: LitKind::Array
            })
        ));
        assert!(matches!(
            check(&module, &list(string()), &list(int())),
            Err(SubtypeError::ArgNotSubtype { index: 0, .. })
        ));
    }

    #[test]
    fn recursive_aliases_check_structurally() {
        let module = ModuleBuilder::new()
            .type_alias("main", "t1", &[], list(named("t1")))
            .type_alias("main", "t2", &[], list(named("t2")))
            .type_alias(
                "main",
                "node",
                &[],
                TypeExpr::record([("value", named("int")), ("next", named("node"))]),
            )
            .build();
        let t1 = TypeExpr::inst(EntityRef::canonical("main", "t1"), Vec::new());
        let t2 = TypeExpr::inst(EntityRef::canonical("main", "t2"), Vec::new());
        assert!(check(&module, &t1, &t2).is_ok());
        assert!(check(&module, &t1, &t1).is_ok());

        let node = TypeExpr::inst(EntityRef::canonical("main", "node"), Vec::new());
        assert!(check(&module, &node, &TypeExpr::record([("value", int())])).is_ok());
        assert!(matches!(
            check(&module, &node, &TypeExpr::record([("value", string())])),
            Err(SubtypeError::RecordField { .. })
        ));
        assert!(check(&module, &node, &t1).is_err());
    }

    #[test]
    fn recursive_records_unfold_to_any_depth() {
        let module = ModuleBuilder::new()
            .type_alias(
                "main",
                "node",
                &[],
                TypeExpr::record([("value", named("int")), ("next", named("node"))]),
            )
            .build();
        let node = TypeExpr::inst(EntityRef::canonical("main", "node"), Vec::new());
        let value = |ty| TypeExpr::record([("value", ty)]);
        let next = |ty| TypeExpr::record([("next", ty)]);

        assert_eq!(check(&module, &node, &value(int())), Ok(()));
        assert_eq!(check(&module, &node, &next(value(int()))), Ok(()));
        assert_eq!(check(&module, &node, &next(next(next(value(int()))))), Ok(()));
        assert!(matches!(
            check(&module, &node, &next(next(value(string())))),
            Err(SubtypeError::RecordField { ref field, .. }) if field == "next"
        ));

        // a literal spelling out one level is accepted where the alias is expected
        let spelled = TypeExpr::record([("value", int()), ("next", node.clone())]);
        assert_eq!(check(&module, &spelled, &node), Ok(()));
        assert!(check(&module, &value(int()), &node).is_err());
    }

    #[test]
    fn generic_recursion_still_compares_arguments() {
        let module = ModuleBuilder::new()
            .type_alias(
                "main",
                "chain",
                &[Param::new("T", None)],
                TypeExpr::record([
                    ("head", named("T")),
                    (
                        "tail",
                        TypeExpr::inst(EntityRef::local("chain"), vec![named("T")]),
                    ),
                ]),
            )
            .build();
        let chain = |arg| TypeExpr::inst(EntityRef::canonical("main", "chain"), vec![arg]);
        assert!(check(&module, &chain(int()), &chain(int())).is_ok());
        assert!(check(&module, &chain(string()), &chain(int())).is_err());
    }

    fn named_builtin(name: &str) -> TypeExpr {
        TypeExpr::inst(EntityRef::canonical("builtin", name), Vec::new())
    }

    #[test]
    fn unresolved_reference_surfaces_as_lookup_error() {
        let module = ModuleBuilder::new().build();
        let missing = TypeExpr::inst(EntityRef::canonical("main", "ghost"), Vec::new());
        assert!(matches!(
            check(&module, &missing, &named("int")),
            Err(SubtypeError::Lookup(_))
        ));
    }
}
