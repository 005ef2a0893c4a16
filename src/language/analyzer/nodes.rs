use super::Analyzer;
use crate::language::{
    ast::{Decl, Directive, Interface, Io, Node, Port, SELF_IN, SELF_OUT},
    errors::{AnalyzerError, AnalyzerResult, ErrorKind, Subject},
    scope::Scope,
    typesystem::{TerminatorParams, TypeFrame},
    types::{EntityRef, TypeExpr},
};
use std::collections::BTreeMap;
use tracing::trace;

/// Frames of the enclosing component: `identity` keeps its type parameters by
/// name for the resolved output, `constraints` replaces them by their bounds
/// for checking.
pub(super) struct Frames {
    pub identity: TypeFrame,
    pub constraints: TypeFrame,
}

/// A node together with the ports it exposes once its type arguments are
/// applied. The interface is only needed for checking the network.
#[derive(Debug)]
pub(super) struct ResolvedNode {
    pub node: Node,
    pub io: Io,
}

impl Analyzer {
    pub(super) fn resolve_nodes(
        &self,
        nodes: &BTreeMap<String, Node>,
        frames: &Frames,
        scope: &Scope<'_>,
    ) -> AnalyzerResult<BTreeMap<String, ResolvedNode>> {
        nodes
            .iter()
            .map(|(name, node)| {
                let resolved = self.resolve_node(name, node, frames, scope).map_err(|err| {
                    err.within(&scope.location, node.span, Some(Subject::Node(name.clone())))
                })?;
                Ok((name.clone(), resolved))
            })
            .collect()
    }

    fn resolve_node(
        &self,
        name: &str,
        node: &Node,
        frames: &Frames,
        scope: &Scope<'_>,
    ) -> AnalyzerResult<ResolvedNode> {
        let fail = |kind| Err(AnalyzerError::at(kind, &scope.location, node.span));

        if name == SELF_IN || name == SELF_OUT {
            return fail(ErrorKind::ReservedNodeName {
                name: name.to_string(),
            });
        }
        if let Some(args) = node.directives.get(&Directive::Bind) {
            if args.len() != 1 {
                return fail(ErrorKind::DirectiveArgsCount {
                    directive: Directive::Bind,
                    expected: 1,
                    got: args.len(),
                });
            }
        }

        let (entity, location) = scope.entity(&node.entity_ref)?;
        let canonical = EntityRef::canonical(&location.package, &node.entity_ref.name);
        trace!(node = name, entity = %canonical, "resolving node");

        let (interface, autoports) = match &entity.decl {
            Decl::Interface(interface) => {
                for directive in [Directive::Extern, Directive::Bind] {
                    if node.directives.contains_key(&directive) {
                        return fail(ErrorKind::InterfaceNodeDirective { directive });
                    }
                }
                if node.deps.as_ref().is_some_and(|deps| !deps.is_empty()) {
                    return fail(ErrorKind::InterfaceNodeDeps);
                }
                (interface, false)
            }
            Decl::Component(component) => {
                if node.directives.contains_key(&Directive::Bind) && !component.is_extern() {
                    return fail(ErrorKind::BindWithoutExtern);
                }
                if let Some(overloads) = component.directives.get(&Directive::Extern) {
                    if overloads.len() > 1 && node.type_args.len() != 1 {
                        return fail(ErrorKind::ExternOverloadTypeArgs {
                            overloads: overloads.len(),
                            got: node.type_args.len(),
                        });
                    }
                }
                (
                    &component.interface,
                    component.directives.contains_key(&Directive::Autoports),
                )
            }
            _ => {
                return fail(ErrorKind::WrongEntityKind {
                    reference: node.entity_ref.clone(),
                    expected: "component or interface",
                    actual: entity.kind(),
                })
            }
        };

        let args = node
            .type_args
            .iter()
            .map(|arg| {
                self.resolver
                    .resolve_with_frame(arg, &frames.constraints, scope)
            })
            .collect::<AnalyzerResult<Vec<_>>>()?;

        let def_scope = scope.relocate(location);
        let io = if autoports {
            self.autoports_io(interface, &args, &def_scope)
                .map_err(|err| err.within(&scope.location, node.span, None))?
        } else {
            if args.len() != interface.params.len() {
                return fail(ErrorKind::TypeArgsCount {
                    reference: canonical.to_string(),
                    expected: interface.params.len(),
                    got: args.len(),
                });
            }
            let (_, frame) = self
                .resolver
                .resolve_frame(&args, &interface.params, &def_scope)?;
            self.resolve_io(&interface.io, &frame, &def_scope)?
        };

        let deps = match &node.deps {
            Some(deps) => Some(
                self.resolve_nodes(deps, frames, scope)?
                    .into_iter()
                    .map(|(name, dep)| (name, dep.node))
                    .collect(),
            ),
            None => None,
        };

        let type_args = node
            .type_args
            .iter()
            .map(|arg| self.resolver.resolve_with_frame(arg, &frames.identity, scope))
            .collect::<AnalyzerResult<Vec<_>>>()?;

        Ok(ResolvedNode {
            node: Node {
                entity_ref: canonical,
                type_args,
                deps,
                directives: node.directives.clone(),
                span: node.span,
            },
            io,
        })
    }

    /// Ports of an autoports component: one inport per field of the record
    /// type argument and a single outport carrying the whole record.
    fn autoports_io(
        &self,
        interface: &Interface,
        args: &[TypeExpr],
        def_scope: &Scope<'_>,
    ) -> AnalyzerResult<Io> {
        let fail = |kind| Err(AnalyzerError::at(kind, &def_scope.location, interface.span));

        if !interface.io.inports.is_empty() {
            return fail(ErrorKind::AutoportsWithInports);
        }
        let [param] = interface.params.as_slice() else {
            return fail(ErrorKind::AutoportsTypeParams {
                got: interface.params.len(),
            });
        };
        let constraint = match &param.constraint {
            Some(constraint) => self.resolver.resolve(constraint, def_scope)?,
            None => TypeExpr::inst(def_scope.top_ref(), Vec::new()),
        };
        if constraint.as_record().is_none() {
            return fail(ErrorKind::AutoportsConstraint {
                constraint: constraint.to_string(),
            });
        }
        let [arg] = args else {
            return fail(ErrorKind::AutoportsTypeArgs { got: args.len() });
        };
        let Some(fields) = arg.as_record() else {
            return fail(ErrorKind::AutoportsArgNotRecord {
                arg: arg.to_string(),
            });
        };
        self.checker
            .check(arg, &constraint, &TerminatorParams::new(def_scope))
            .map_err(|source| {
                AnalyzerError::at(
                    ErrorKind::ConstraintViolation {
                        param: param.name.clone(),
                        arg: arg.to_string(),
                        source,
                    },
                    &def_scope.location,
                    interface.span,
                )
            })?;

        let inports = fields
            .iter()
            .map(|(field, ty)| (field.clone(), Port::new(ty.clone())))
            .collect();
        let outport = match interface.io.outports.keys().collect::<Vec<_>>().as_slice() {
            [single] => (*single).clone(),
            _ => self.options.autoports_outport.clone(),
        };
        Ok(Io {
            inports,
            outports: BTreeMap::from([(outport, Port::new(arg.clone()))]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{scope::Location, types::Param};
    use crate::tests::fixtures::{int, named, string, ModuleBuilder};

    fn frames() -> Frames {
        Frames {
            identity: TypeFrame::new(),
            constraints: TypeFrame::new(),
        }
    }

    fn module() -> crate::language::ast::Module {
        ModuleBuilder::new()
            .interface("main", "IPrinter", &[], &[("data", string())], &[("sig", string())])
            .extern_component(
                "main",
                "Add",
                &[Param::new("T", None)],
                &[("left", named("T")), ("right", named("T"))],
                &[("res", named("T"))],
                &["add_int", "add_float"],
            )
            .extern_component(
                "main",
                "Emit",
                &[Param::new("T", None)],
                &[("sig", named("any"))],
                &[("msg", named("T"))],
                &["emit"],
            )
            .autoports_component(
                "main",
                "Struct",
                Param::new("T", Some(TypeExpr::record(Vec::<(&str, TypeExpr)>::new()))),
                &[("res", named("T"))],
            )
            .build()
    }

    fn resolve(node: Node) -> AnalyzerResult<ResolvedNode> {
        resolve_in(&module(), node)
    }

    fn resolve_in(module: &crate::language::ast::Module, node: Node) -> AnalyzerResult<ResolvedNode> {
        let analyzer = Analyzer::default();
        let scope = analyzer.scope(module, Location::new("main", ModuleBuilder::file_name("main")));
        analyzer.resolve_node("n", &node, &frames(), &scope)
    }

    #[test]
    fn substitutes_type_arguments_into_ports() {
        let resolved = resolve(Node::new(EntityRef::local("Add"), vec![named("int")])).expect("node");
        assert_eq!(resolved.node.entity_ref, EntityRef::canonical("main", "Add"));
        assert_eq!(resolved.node.type_args, vec![int()]);
        assert_eq!(resolved.io.inports["left"].type_expr, int());
        assert_eq!(resolved.io.outports["res"].type_expr, int());
    }

    #[test]
    fn overloaded_extern_needs_one_type_argument() {
        let err = resolve(Node::new(EntityRef::local("Add"), Vec::new())).expect_err("no args");
        assert_eq!(
            err.kind,
            ErrorKind::ExternOverloadTypeArgs {
                overloads: 2,
                got: 0
            }
        );
    }

    #[test]
    fn arity_mismatch_names_both_counts() {
        let err = resolve(Node::new(EntityRef::local("IPrinter"), vec![named("int")]))
            .expect_err("interface takes no args");
        assert_eq!(
            err.kind,
            ErrorKind::TypeArgsCount {
                reference: "main.IPrinter".into(),
                expected: 0,
                got: 1
            }
        );
    }

    #[test]
    fn interface_nodes_reject_directives_and_deps() {
        let mut node = Node::new(EntityRef::local("IPrinter"), Vec::new());
        node.directives.insert(Directive::Bind, vec!["greeting".into()]);
        let err = resolve(node).expect_err("bind on interface");
        assert_eq!(
            err.kind,
            ErrorKind::InterfaceNodeDirective {
                directive: Directive::Bind
            }
        );

        let mut node = Node::new(EntityRef::local("IPrinter"), Vec::new());
        node.deps = Some(BTreeMap::from([(
            "dep".to_string(),
            Node::new(EntityRef::local("IPrinter"), Vec::new()),
        )]));
        assert_eq!(resolve(node).expect_err("deps").kind, ErrorKind::InterfaceNodeDeps);
    }

    #[test]
    fn bind_directive_takes_exactly_one_argument() {
        let mut node = Node::new(EntityRef::local("Emit"), vec![named("int")]);
        node.directives.insert(Directive::Bind, Vec::new());
        assert!(matches!(
            resolve(node).expect_err("empty bind").kind,
            ErrorKind::DirectiveArgsCount { expected: 1, got: 0, .. }
        ));

        let mut node = Node::new(EntityRef::local("Emit"), vec![named("int")]);
        node.directives.insert(Directive::Bind, vec!["forty_two".into()]);
        assert!(resolve(node).is_ok());
    }

    #[test]
    fn reserved_names_are_rejected() {
        let module = module();
        let analyzer = Analyzer::default();
        let scope = analyzer.scope(&module, Location::new("main", ModuleBuilder::file_name("main")));
        let node = Node::new(EntityRef::local("IPrinter"), Vec::new());
        let err = analyzer
            .resolve_node(SELF_IN, &node, &frames(), &scope)
            .expect_err("reserved");
        assert_eq!(err.kind, ErrorKind::ReservedNodeName { name: "in".into() });
    }

    #[test]
    fn autoports_synthesizes_ports_from_record_fields() {
        let user = TypeExpr::record([("name", named("string")), ("age", named("int"))]);
        let resolved = resolve(Node::new(EntityRef::local("Struct"), vec![user])).expect("autoports");
        let record = TypeExpr::record([("name", string()), ("age", int())]);
        assert_eq!(resolved.io.inports.len(), 2);
        assert_eq!(resolved.io.inports["age"].type_expr, int());
        assert_eq!(resolved.io.outports["res"].type_expr, record);

        let err = resolve(Node::new(EntityRef::local("Struct"), vec![named("int")]))
            .expect_err("not a record");
        assert!(matches!(err.kind, ErrorKind::AutoportsArgNotRecord { .. }));

        let err = resolve(Node::new(EntityRef::local("Struct"), Vec::new())).expect_err("no args");
        assert_eq!(err.kind, ErrorKind::AutoportsTypeArgs { got: 0 });
    }

    #[test]
    fn dependencies_resolve_recursively() {
        let mut adder = Node::new(EntityRef::local("Add"), vec![named("int")]);
        adder.deps = Some(BTreeMap::from([(
            "printer".to_string(),
            Node::new(EntityRef::local("IPrinter"), Vec::new()),
        )]));
        let mut node = Node::new(EntityRef::local("Emit"), vec![named("string")]);
        node.deps = Some(BTreeMap::from([("adder".to_string(), adder)]));

        let resolved = resolve(node).expect("node with deps");
        let deps = resolved.node.deps.expect("deps kept");
        assert_eq!(deps["adder"].entity_ref, EntityRef::canonical("main", "Add"));
        assert_eq!(deps["adder"].type_args, vec![int()]);
        let nested = deps["adder"].deps.as_ref().expect("nested deps kept");
        assert_eq!(nested["printer"].entity_ref, EntityRef::canonical("main", "IPrinter"));

        let mut node = Node::new(EntityRef::local("Emit"), vec![named("int")]);
        node.deps = Some(BTreeMap::from([(
            "adder".to_string(),
            Node::new(EntityRef::local("Add"), vec![named("ghost")]),
        )]));
        let err = resolve(node).expect_err("broken dependency");
        assert!(matches!(err.kind, ErrorKind::EntityNotFound { .. }));
        assert!(err
            .frames
            .iter()
            .any(|frame| frame.subject == Some(Subject::Node("adder".into()))));
    }

    #[test]
    fn autoports_components_need_a_single_record_parameter() {
        let record = || TypeExpr::record(Vec::<(&str, TypeExpr)>::new());
        let user = || TypeExpr::record([("name", named("string"))]);
        let module = ModuleBuilder::new()
            .extern_component(
                "main",
                "WithInports",
                &[Param::new("T", Some(record()))],
                &[("extra", string())],
                &[("res", named("T"))],
                &["with_inports"],
            )
            .directive("main", "WithInports", Directive::Autoports, &[])
            .extern_component(
                "main",
                "TwoParams",
                &[Param::new("T", Some(record())), Param::new("U", None)],
                &[],
                &[("res", named("T"))],
                &["two_params"],
            )
            .directive("main", "TwoParams", Directive::Autoports, &[])
            .extern_component(
                "main",
                "IntParam",
                &[Param::new("T", Some(named("int")))],
                &[],
                &[("res", named("T"))],
                &["int_param"],
            )
            .directive("main", "IntParam", Directive::Autoports, &[])
            .build();

        let err = resolve_in(&module, Node::new(EntityRef::local("WithInports"), vec![user()]))
            .expect_err("declared inports");
        assert_eq!(err.kind, ErrorKind::AutoportsWithInports);

        let err = resolve_in(&module, Node::new(EntityRef::local("TwoParams"), vec![user()]))
            .expect_err("two type params");
        assert_eq!(err.kind, ErrorKind::AutoportsTypeParams { got: 2 });

        let err = resolve_in(&module, Node::new(EntityRef::local("IntParam"), vec![user()]))
            .expect_err("non-record constraint");
        assert_eq!(
            err.kind,
            ErrorKind::AutoportsConstraint {
                constraint: "builtin.int".into()
            }
        );
    }

    #[test]
    fn non_component_entities_cannot_be_nodes() {
        let err = resolve(Node::new(EntityRef::local("int"), Vec::new())).expect_err("type as node");
        assert!(matches!(err.kind, ErrorKind::WrongEntityKind { .. }));
    }
}
