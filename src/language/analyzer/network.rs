use super::{nodes::ResolvedNode, Analyzer};
use crate::language::{
    ast::{Connection, Io, Port, PortAddr, ReceiverSide, SenderSide, SELF_IN, SELF_OUT},
    errors::{AnalyzerError, AnalyzerResult, ErrorKind, Subject},
    scope::Scope,
    typesystem::TerminatorParams,
    types::{EntityRef, TypeExpr},
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct PortUsage {
    inports: BTreeSet<String>,
    outports: BTreeSet<String>,
}

/// Which ports of which nodes the network touched so far.
type UsageLedger = BTreeMap<String, PortUsage>;

impl Analyzer {
    /// Type-checks every connection against the resolved node interfaces,
    /// then requires every node to be fully wired. Returns the connections
    /// with constant senders named canonically.
    pub(super) fn check_network(
        &self,
        net: &[Connection],
        own: &Io,
        nodes: &BTreeMap<String, ResolvedNode>,
        scope: &Scope<'_>,
    ) -> AnalyzerResult<Vec<Connection>> {
        let mut usage = UsageLedger::new();
        let mut resolved = Vec::with_capacity(net.len());
        for connection in net {
            let checked = self
                .check_connection(connection, own, nodes, &mut usage, scope)
                .map_err(|err| {
                    err.within(
                        &scope.location,
                        connection.span,
                        Some(Subject::Connection(connection.sender.to_string())),
                    )
                })?;
            resolved.push(checked);
        }
        debug!(
            location = %scope.location,
            connections = net.len(),
            nodes = nodes.len(),
            "network types check"
        );
        check_usage(nodes, &usage, scope)?;
        Ok(resolved)
    }

    fn check_connection(
        &self,
        connection: &Connection,
        own: &Io,
        nodes: &BTreeMap<String, ResolvedNode>,
        usage: &mut UsageLedger,
        scope: &Scope<'_>,
    ) -> AnalyzerResult<Connection> {
        let sender_type = self.sender_type(&connection.sender, own, nodes, usage, scope)?;
        trace!(sender = %connection.sender, ty = %sender_type, "checking connection");
        for receiver in &connection.receivers {
            let receiver_type = receiver_type(receiver, own, nodes, usage, scope)?;
            self.checker
                .check(&sender_type, &receiver_type, &TerminatorParams::new(scope))
                .map_err(|source| {
                    AnalyzerError::at(
                        ErrorKind::IncompatibleConnection {
                            sender: connection.sender.to_string(),
                            receiver: receiver.port_addr.to_string(),
                            source,
                        },
                        &scope.location,
                        receiver.span.or(connection.span),
                    )
                })?;
        }

        let mut resolved = connection.clone();
        if let Some(reference) = &connection.sender.const_ref {
            let (_, location) = scope.entity(reference)?;
            resolved.sender.const_ref = Some(EntityRef::canonical(location.package, &reference.name));
        }
        Ok(resolved)
    }

    fn sender_type(
        &self,
        sender: &SenderSide,
        own: &Io,
        nodes: &BTreeMap<String, ResolvedNode>,
        usage: &mut UsageLedger,
        scope: &Scope<'_>,
    ) -> AnalyzerResult<TypeExpr> {
        let sent = match (&sender.port_addr, &sender.const_ref) {
            (Some(addr), _) => {
                if addr.node == SELF_OUT {
                    return Err(AnalyzerError::at(
                        ErrorKind::ReadSelfOut {
                            port: addr.port.clone(),
                        },
                        &scope.location,
                        addr.span,
                    ));
                }
                let port = if addr.node == SELF_IN {
                    find_port(&own.inports, addr, scope)?
                } else {
                    let node = find_node(nodes, addr, scope)?;
                    let port = find_port(&node.io.outports, addr, scope)?;
                    usage
                        .entry(addr.node.clone())
                        .or_default()
                        .outports
                        .insert(addr.port.clone());
                    port
                };
                port.type_expr.clone()
            }
            (None, Some(reference)) => self.const_type(reference, scope)?,
            (None, None) => {
                return Err(AnalyzerError::at(
                    ErrorKind::EmptySender,
                    &scope.location,
                    sender.span,
                ))
            }
        };
        self.select(sent, &sender.selectors, scope)
            .map_err(|err| err.within(&scope.location, sender.span, None))
    }

    /// Projects a message type through a path of record fields.
    pub(super) fn select(
        &self,
        mut ty: TypeExpr,
        selectors: &[String],
        scope: &Scope<'_>,
    ) -> AnalyzerResult<TypeExpr> {
        for field in selectors {
            if let TypeExpr::Inst(inst) = &ty {
                if let Some(unfolded) = self.resolver.unfold(inst, scope)? {
                    ty = unfolded;
                }
            }
            let Some(fields) = ty.as_record() else {
                return Err(AnalyzerError::at(
                    ErrorKind::NotARecord {
                        field: field.clone(),
                        ty: ty.to_string(),
                    },
                    &scope.location,
                    None,
                ));
            };
            let Some(next) = fields.get(field) else {
                return Err(AnalyzerError::at(
                    ErrorKind::FieldNotFound {
                        field: field.clone(),
                        ty: ty.to_string(),
                    },
                    &scope.location,
                    None,
                ));
            };
            ty = next.clone();
        }
        Ok(ty)
    }
}

fn receiver_type(
    receiver: &ReceiverSide,
    own: &Io,
    nodes: &BTreeMap<String, ResolvedNode>,
    usage: &mut UsageLedger,
    scope: &Scope<'_>,
) -> AnalyzerResult<TypeExpr> {
    let addr = &receiver.port_addr;
    if addr.node == SELF_IN {
        return Err(AnalyzerError::at(
            ErrorKind::WriteSelfIn {
                port: addr.port.clone(),
            },
            &scope.location,
            addr.span.or(receiver.span),
        ));
    }
    if addr.node == SELF_OUT {
        return Ok(find_port(&own.outports, addr, scope)?.type_expr.clone());
    }
    let node = find_node(nodes, addr, scope)?;
    let port = find_port(&node.io.inports, addr, scope)?;
    usage
        .entry(addr.node.clone())
        .or_default()
        .inports
        .insert(addr.port.clone());
    Ok(port.type_expr.clone())
}

fn find_node<'n>(
    nodes: &'n BTreeMap<String, ResolvedNode>,
    addr: &PortAddr,
    scope: &Scope<'_>,
) -> AnalyzerResult<&'n ResolvedNode> {
    nodes.get(&addr.node).ok_or_else(|| {
        AnalyzerError::at(
            ErrorKind::NodeNotFound {
                node: addr.node.clone(),
            },
            &scope.location,
            addr.span,
        )
    })
}

fn find_port<'p>(
    ports: &'p BTreeMap<String, Port>,
    addr: &PortAddr,
    scope: &Scope<'_>,
) -> AnalyzerResult<&'p Port> {
    let port = ports.get(&addr.port).ok_or_else(|| {
        AnalyzerError::at(
            ErrorKind::PortNotFound {
                node: addr.node.clone(),
                port: addr.port.clone(),
            },
            &scope.location,
            addr.span,
        )
    })?;
    if addr.index.is_some() && !port.is_array {
        return Err(AnalyzerError::at(
            ErrorKind::NotArrayPort {
                addr: addr.to_string(),
            },
            &scope.location,
            addr.span,
        ));
    }
    Ok(port)
}

fn check_usage(
    nodes: &BTreeMap<String, ResolvedNode>,
    usage: &UsageLedger,
    scope: &Scope<'_>,
) -> AnalyzerResult<()> {
    for (name, node) in nodes {
        let fail = |kind| {
            Err(AnalyzerError::at(kind, &scope.location, node.node.span)
                .within(&scope.location, None, Some(Subject::Node(name.clone()))))
        };
        let Some(used) = usage.get(name) else {
            return fail(ErrorKind::UnusedNode { node: name.clone() });
        };
        if let Some(port) = node.io.inports.keys().find(|port| !used.inports.contains(*port)) {
            return fail(ErrorKind::UnusedInport {
                node: name.clone(),
                port: port.clone(),
            });
        }
        if !node.io.outports.is_empty() && used.outports.is_empty() {
            return fail(ErrorKind::UnusedOutports { node: name.clone() });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::scope::Location;
    use crate::tests::fixtures::{int, named, string, ModuleBuilder};

    #[test]
    fn selectors_walk_nested_records() {
        let module = ModuleBuilder::new().build();
        let analyzer = Analyzer::default();
        let scope = analyzer.scope(&module, Location::new("main", ModuleBuilder::file_name("main")));
        let ty = TypeExpr::record([("x", TypeExpr::record([("y", int())]))]);

        let selected = analyzer
            .select(ty.clone(), &["x".into(), "y".into()], &scope)
            .expect("x.y");
        assert_eq!(selected, int());

        let err = analyzer
            .select(ty.clone(), &["x".into(), "z".into()], &scope)
            .expect_err("missing field");
        assert!(matches!(err.kind, ErrorKind::FieldNotFound { ref field, .. } if field == "z"));

        let err = analyzer
            .select(ty, &["x".into(), "y".into(), "w".into()], &scope)
            .expect_err("int is not a record");
        assert!(matches!(err.kind, ErrorKind::NotARecord { .. }));
    }

    #[test]
    fn selectors_unfold_recursive_aliases() {
        let module = ModuleBuilder::new()
            .type_alias(
                "main",
                "node",
                &[],
                TypeExpr::record([("value", named("string")), ("next", named("node"))]),
            )
            .build();
        let analyzer = Analyzer::default();
        let scope = analyzer.scope(&module, Location::new("main", ModuleBuilder::file_name("main")));
        let node = TypeExpr::inst(
            crate::language::types::EntityRef::canonical("main", "node"),
            Vec::new(),
        );
        let selected = analyzer
            .select(node, &["next".into(), "next".into(), "value".into()], &scope)
            .expect("walk linked nodes");
        assert_eq!(selected, string());
    }

    #[test]
    fn indexing_a_plain_port_is_rejected() {
        let module = ModuleBuilder::new().build();
        let analyzer = Analyzer::default();
        let scope = analyzer.scope(&module, Location::new("main", ModuleBuilder::file_name("main")));
        let ports = BTreeMap::from([("data".to_string(), Port::new(int()))]);
        let mut addr = PortAddr::new("printer", "data");
        addr.index = Some(0);
        let err = find_port(&ports, &addr, &scope).expect_err("not an array port");
        assert_eq!(
            err.kind,
            ErrorKind::NotArrayPort {
                addr: "printer:data[0]".into()
            }
        );
    }
}
