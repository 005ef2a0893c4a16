use super::{SubtypeChecker, TerminatorParams, Terminator, Trace};
use crate::language::{
    ast::Decl,
    errors::{AnalyzerError, AnalyzerResult, ErrorKind},
    scope::Scope,
    types::{EntityRef, Inst, LitExpr, Param, TypeExpr},
};
use std::collections::{BTreeMap, HashSet};

/// Type parameter name to the resolved expression it stands for.
pub type TypeFrame = BTreeMap<String, TypeExpr>;

#[derive(Clone, Copy, Debug, Default)]
pub struct Resolver {
    terminator: Terminator,
    checker: SubtypeChecker,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, expr: &TypeExpr, scope: &Scope<'_>) -> AnalyzerResult<TypeExpr> {
        self.resolve_with_frame(expr, &TypeFrame::new(), scope)
    }

    pub fn resolve_with_frame(
        &self,
        expr: &TypeExpr,
        frame: &TypeFrame,
        scope: &Scope<'_>,
    ) -> AnalyzerResult<TypeExpr> {
        self.resolve_traced(expr, frame, scope, &Trace::new())
    }

    /// Resolves `args` in `scope` and binds them to `params`, checking every
    /// argument against its parameter's constraint.
    pub fn resolve_frame(
        &self,
        args: &[TypeExpr],
        params: &[Param],
        scope: &Scope<'_>,
    ) -> AnalyzerResult<(Vec<TypeExpr>, TypeFrame)> {
        if args.len() != params.len() {
            return Err(AnalyzerError::at(
                ErrorKind::TypeArgsCount {
                    reference: render_params(params),
                    expected: params.len(),
                    got: args.len(),
                },
                &scope.location,
                None,
            ));
        }
        let resolved = args
            .iter()
            .map(|arg| self.resolve(arg, scope))
            .collect::<AnalyzerResult<Vec<_>>>()?;
        let frame = self.bind_params(&render_params(params), &resolved, params, scope, &Trace::new())?;
        Ok((resolved, frame))
    }

    /// Type-parameter names must be unique and their constraints must resolve.
    pub fn resolve_params(&self, params: &[Param], scope: &Scope<'_>) -> AnalyzerResult<Vec<Param>> {
        let mut seen = HashSet::new();
        let mut frame = TypeFrame::new();
        let mut resolved = Vec::with_capacity(params.len());
        for param in params {
            if !seen.insert(param.name.as_str()) {
                return Err(AnalyzerError::at(
                    ErrorKind::DuplicateTypeParam {
                        name: param.name.clone(),
                    },
                    &scope.location,
                    None,
                ));
            }
            let constraint = param
                .constraint
                .as_ref()
                .map(|constraint| self.resolve_with_frame(constraint, &frame, scope))
                .transpose()?;
            frame.insert(param.name.clone(), TypeExpr::named(&param.name));
            resolved.push(Param::new(&param.name, constraint));
        }
        Ok(resolved)
    }

    /// Expands one level of an alias instantiation. Base types yield `None`.
    pub fn unfold(&self, inst: &Inst, scope: &Scope<'_>) -> AnalyzerResult<Option<TypeExpr>> {
        let (entity, location) = scope.entity(&inst.reference)?;
        let Decl::Type(def) = &entity.decl else {
            return Ok(None);
        };
        let Some(body) = &def.body else {
            return Ok(None);
        };
        let canonical = EntityRef::canonical(&location.package, &inst.reference.name);
        let trace = Trace::new().push(canonical.clone());
        let def_scope = scope.relocate(location);
        let frame = self.bind_params(
            &canonical.to_string(),
            &inst.args,
            &def.params,
            &def_scope,
            &trace,
        )?;
        self.resolve_traced(body, &frame, &def_scope, &trace).map(Some)
    }

    pub(crate) fn resolve_traced(
        &self,
        expr: &TypeExpr,
        frame: &TypeFrame,
        scope: &Scope<'_>,
        trace: &Trace,
    ) -> AnalyzerResult<TypeExpr> {
        let lit = match expr {
            TypeExpr::Inst(inst) => return self.resolve_inst(inst, frame, scope, trace),
            TypeExpr::Lit(lit) => lit,
        };
        let resolved = match lit {
            LitExpr::Array { size, elem } => LitExpr::Array {
                size: *size,
                elem: Box::new(self.resolve_traced(elem, frame, scope, trace)?),
            },
            LitExpr::Enum(labels) => LitExpr::Enum(labels.clone()),
            LitExpr::Record(fields) => LitExpr::Record(
                fields
                    .iter()
                    .map(|(name, field)| {
                        Ok((name.clone(), self.resolve_traced(field, frame, scope, trace)?))
                    })
                    .collect::<AnalyzerResult<_>>()?,
            ),
            LitExpr::Union(members) => LitExpr::Union(
                members
                    .iter()
                    .map(|member| self.resolve_traced(member, frame, scope, trace))
                    .collect::<AnalyzerResult<_>>()?,
            ),
        };
        Ok(TypeExpr::Lit(resolved))
    }

    fn resolve_inst(
        &self,
        inst: &Inst,
        frame: &TypeFrame,
        scope: &Scope<'_>,
        trace: &Trace,
    ) -> AnalyzerResult<TypeExpr> {
        if inst.reference.package.is_none() && inst.args.is_empty() {
            if let Some(bound) = frame.get(&inst.reference.name) {
                return Ok(bound.clone());
            }
        }

        let (entity, location) = scope.entity(&inst.reference)?;
        let Decl::Type(def) = &entity.decl else {
            return Err(AnalyzerError::at(
                ErrorKind::WrongEntityKind {
                    reference: inst.reference.clone(),
                    expected: "type",
                    actual: entity.kind(),
                },
                &scope.location,
                None,
            ));
        };

        let canonical = EntityRef::canonical(&location.package, &inst.reference.name);
        let args = inst
            .args
            .iter()
            .map(|arg| self.resolve_traced(arg, frame, scope, trace))
            .collect::<AnalyzerResult<Vec<_>>>()?;

        let trace = trace.push(canonical.clone());
        if self.terminator.should_terminate(&trace, scope)? {
            return Ok(TypeExpr::inst(canonical, args));
        }

        let def_scope = scope.relocate(location);
        let def_frame = self
            .bind_params(&canonical.to_string(), &args, &def.params, &def_scope, &trace)
            .map_err(|err| err.within(&scope.location, None, None))?;
        let Some(body) = &def.body else {
            return Ok(TypeExpr::inst(canonical, args));
        };

        let expanded = self.resolve_traced(body, &def_frame, &def_scope, &trace)?;
        // an alias that reaches itself stays nominal outside its own declaration
        if expanded.mentions(&canonical) {
            return Ok(TypeExpr::inst(canonical, args));
        }
        Ok(expanded)
    }

    fn bind_params(
        &self,
        reference: &str,
        args: &[TypeExpr],
        params: &[Param],
        params_scope: &Scope<'_>,
        trace: &Trace,
    ) -> AnalyzerResult<TypeFrame> {
        if args.len() != params.len() {
            return Err(AnalyzerError::at(
                ErrorKind::TypeArgsCount {
                    reference: reference.to_string(),
                    expected: params.len(),
                    got: args.len(),
                },
                &params_scope.location,
                None,
            ));
        }
        let mut frame = TypeFrame::new();
        for (param, arg) in params.iter().zip(args) {
            // unqualified instantiations in resolved output are type parameters
            // of an enclosing generic declaration; their bounds were checked there
            let placeholder = arg
                .as_inst()
                .is_some_and(|inst| inst.reference.package.is_none());
            if placeholder {
                frame.insert(param.name.clone(), arg.clone());
                continue;
            }
            if let Some(constraint) = &param.constraint {
                let constraint = self.resolve_traced(constraint, &frame, params_scope, trace)?;
                let terminator_params = TerminatorParams {
                    scope: params_scope,
                    candidate_trace: trace.clone(),
                    constraint_trace: trace.clone(),
                };
                self.checker
                    .check(arg, &constraint, &terminator_params)
                    .map_err(|source| {
                        AnalyzerError::at(
                            ErrorKind::ConstraintViolation {
                                param: param.name.clone(),
                                arg: arg.to_string(),
                                source,
                            },
                            &params_scope.location,
                            None,
                        )
                    })?;
            }
            frame.insert(param.name.clone(), arg.clone());
        }
        Ok(frame)
    }
}

fn render_params(params: &[Param]) -> String {
    let names: Vec<&str> = params.iter().map(|param| param.name.as_str()).collect();
    format!("<{}>", names.join(", "))
}
