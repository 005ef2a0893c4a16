use super::{identity_frame, Analyzer};
use crate::language::{
    ast::{Component, Const, ConstValue, Decl, Directive, Entity, Interface, Io, Message, Port, TypeDef},
    errors::{AnalyzerError, AnalyzerResult, ErrorKind},
    scope::Scope,
    typesystem::{Trace, TypeFrame},
    types::{EntityRef, TypeExpr},
};
use std::collections::BTreeMap;
use tracing::trace;

impl Analyzer {
    pub(super) fn analyze_entity(
        &self,
        name: &str,
        entity: &Entity,
        scope: &Scope<'_>,
    ) -> AnalyzerResult<Entity> {
        trace!(entity = name, kind = %entity.kind(), location = %scope.location, "analyzing entity");
        let decl = match &entity.decl {
            Decl::Type(def) => Decl::Type(self.analyze_type_def(name, def, scope)?),
            Decl::Const(constant) => Decl::Const(self.analyze_const(constant, scope)?),
            Decl::Interface(interface) => {
                Decl::Interface(self.analyze_interface(interface, false, scope)?)
            }
            Decl::Component(component) => Decl::Component(self.analyze_component(component, scope)?),
        };
        Ok(Entity {
            exported: entity.exported,
            decl,
            span: entity.span,
        })
    }

    fn analyze_type_def(&self, name: &str, def: &TypeDef, scope: &Scope<'_>) -> AnalyzerResult<TypeDef> {
        let params = self.resolver.resolve_params(&def.params, scope)?;
        let body = match &def.body {
            Some(body) => {
                // seeding the trace with the alias itself keeps self references nominal
                let own = Trace::new().push(EntityRef::canonical(&scope.location.package, name));
                Some(
                    self.resolver
                        .resolve_traced(body, &identity_frame(&params), scope, &own)?,
                )
            }
            None => None,
        };
        Ok(TypeDef { params, body })
    }

    fn analyze_const(&self, constant: &Const, scope: &Scope<'_>) -> AnalyzerResult<Const> {
        let value = match &constant.value {
            ConstValue::Message(message) => ConstValue::Message(Message {
                type_expr: self.resolver.resolve(&message.type_expr, scope)?,
                value: message.value.clone(),
            }),
            ConstValue::Ref(reference) => {
                let (_, location) = scope.entity(reference)?;
                self.const_type(reference, scope)?;
                ConstValue::Ref(EntityRef::canonical(location.package, &reference.name))
            }
        };
        Ok(Const {
            value,
            span: constant.span,
        })
    }

    /// Type of the message a constant ultimately stands for, following
    /// const-to-const references.
    pub(super) fn const_type(
        &self,
        reference: &EntityRef,
        scope: &Scope<'_>,
    ) -> AnalyzerResult<TypeExpr> {
        let mut visited = Trace::new();
        let mut current = reference.clone();
        let mut scope = scope.clone();
        loop {
            let (entity, location) = scope.entity(&current)?;
            let Decl::Const(constant) = &entity.decl else {
                return Err(AnalyzerError::at(
                    ErrorKind::WrongEntityKind {
                        reference: current,
                        expected: "const",
                        actual: entity.kind(),
                    },
                    &scope.location,
                    None,
                ));
            };
            let canonical = EntityRef::canonical(&location.package, &current.name);
            if visited.contains(&canonical) {
                return Err(AnalyzerError::at(
                    ErrorKind::ConstCycle {
                        reference: canonical,
                    },
                    &location,
                    constant.span,
                ));
            }
            visited = visited.push(canonical);
            scope = scope.relocate(location);
            match &constant.value {
                ConstValue::Message(message) => {
                    return self.resolver.resolve(&message.type_expr, &scope);
                }
                ConstValue::Ref(next) => current = next.clone(),
            }
        }
    }

    /// `autoports` interfaces get their inports from the node's type argument.
    fn analyze_interface(
        &self,
        interface: &Interface,
        autoports: bool,
        scope: &Scope<'_>,
    ) -> AnalyzerResult<Interface> {
        let params = self.resolver.resolve_params(&interface.params, scope)?;
        let io = self.resolve_io(&interface.io, &identity_frame(&params), scope)?;

        // pure sources and sinks only exist in the standard library
        if !self.is_std_package(&scope.location.package) {
            if io.inports.is_empty() && !autoports {
                return Err(AnalyzerError::at(ErrorKind::NoInports, &scope.location, interface.span));
            }
            if io.outports.is_empty() {
                return Err(AnalyzerError::at(ErrorKind::NoOutports, &scope.location, interface.span));
            }
        }

        Ok(Interface {
            params,
            io,
            span: interface.span,
        })
    }

    pub(super) fn resolve_io(&self, io: &Io, frame: &TypeFrame, scope: &Scope<'_>) -> AnalyzerResult<Io> {
        Ok(Io {
            inports: self.resolve_ports(&io.inports, frame, scope)?,
            outports: self.resolve_ports(&io.outports, frame, scope)?,
        })
    }

    fn resolve_ports(
        &self,
        ports: &BTreeMap<String, Port>,
        frame: &TypeFrame,
        scope: &Scope<'_>,
    ) -> AnalyzerResult<BTreeMap<String, Port>> {
        ports
            .iter()
            .map(|(name, port)| {
                let type_expr = self
                    .resolver
                    .resolve_with_frame(&port.type_expr, frame, scope)
                    .map_err(|err| err.within(&scope.location, port.span, None))?;
                Ok((
                    name.clone(),
                    Port {
                        type_expr,
                        is_array: port.is_array,
                        span: port.span,
                    },
                ))
            })
            .collect()
    }

    pub(super) fn analyze_component(
        &self,
        component: &Component,
        scope: &Scope<'_>,
    ) -> AnalyzerResult<Component> {
        let autoports = component.directives.contains_key(&Directive::Autoports);
        let interface = self.analyze_interface(&component.interface, autoports, scope)?;
        let has_body = !component.nodes.is_empty() || !component.net.is_empty();

        if component.is_extern() && has_body {
            return Err(AnalyzerError::at(
                ErrorKind::ExternWithNetwork,
                &scope.location,
                component.interface.span,
            ));
        }
        if !has_body {
            return Ok(Component {
                interface,
                directives: component.directives.clone(),
                nodes: BTreeMap::new(),
                net: Vec::new(),
            });
        }

        let frames = super::nodes::Frames {
            identity: identity_frame(&interface.params),
            constraints: self.constraint_frame(&component.interface.params, scope)?,
        };
        let nodes = self.resolve_nodes(&component.nodes, &frames, scope)?;
        let own_io = self.resolve_io(&component.interface.io, &frames.constraints, scope)?;
        let net = self.check_network(&component.net, &own_io, &nodes, scope)?;

        Ok(Component {
            interface,
            directives: component.directives.clone(),
            nodes: nodes
                .into_iter()
                .map(|(name, resolved)| (name, resolved.node))
                .collect(),
            net,
        })
    }
}
